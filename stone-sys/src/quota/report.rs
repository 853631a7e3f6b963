// SPDX-License-Identifier: GPL-3.0-only

//! Accounting report parsing
//!
//! Both `repquota -n` and `xfs_quota report -N -n` print one row per id,
//! prefixed with `#`. The block hard limit sits at a different column in each.

use crate::{Result, SysError};

/// Column layout of one report flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// `#id flags used soft hard grace ...` (repquota)
    Repquota,
    /// `#id used soft hard warn grace` (xfs_quota report -b)
    XfsQuota,
}

impl ReportFormat {
    fn hard_limit_column(self) -> usize {
        match self {
            ReportFormat::Repquota => 4,
            ReportFormat::XfsQuota => 3,
        }
    }
}

/// Id of a `#<id> ...` row, or `None` for headers and separators.
pub fn row_id(line: &str) -> Option<u32> {
    let first = line.split_whitespace().next()?;
    first.strip_prefix('#')?.parse().ok()
}

/// Every id in `report` within `min..=max`.
pub fn ids_in_range(report: &str, min: u32, max: u32) -> Vec<u32> {
    report
        .lines()
        .filter_map(row_id)
        .filter(|id| (min..=max).contains(id))
        .collect()
}

/// Block hard limit (KiB) of one row.
fn hard_limit(line: &str, format: ReportFormat) -> Result<u64> {
    line.split_whitespace()
        .nth(format.hard_limit_column())
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or_else(|| SysError::ReportParse(line.trim().to_string()))
}

/// Block hard limit (KiB) of one id. Only the row of `id` has to be well formed.
pub fn hard_limit_for(report: &str, format: ReportFormat, id: u32) -> Result<u64> {
    let line = report
        .lines()
        .find(|line| row_id(line) == Some(id))
        .ok_or_else(|| SysError::ReportParse(format!("no row for id {id}")))?;
    hard_limit(line, format)
}
