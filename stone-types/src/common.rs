// SPDX-License-Identifier: GPL-3.0-only

//! Byte size helpers shared by the CLI, the service and option parsing

use anyhow::Result;
use num_format::{Locale, ToFormattedString};

/// Convert bytes to human-readable format (e.g., "1.50 GB")
pub fn bytes_to_pretty(bytes: &u64, add_bytes: bool) -> String {
    let mut steps = 0;
    let mut val: f64 = *bytes as f64;

    while val > 1024. && steps <= 8 {
        val /= 1024.;
        steps += 1;
    }

    let unit = match steps {
        0 => "B",
        1 => "KB",
        2 => "MB",
        3 => "GB",
        4 => "TB",
        5 => "PB",
        6 => "EB",
        7 => "ZB",
        8 => "YB",
        _ => "Not Supported",
    };

    if add_bytes {
        let bytes_str = bytes.to_formatted_string(&Locale::en);
        format!("{:.2} {} ({} bytes)", val, unit, bytes_str)
    } else {
        format!("{:.2} {}", val, unit)
    }
}

/// Parse a byte size such as "5000000000", "512M", "10G" or "1 TiB".
///
/// Units are binary multiples and case-insensitive. Negative and fractional
/// values are rejected.
pub fn parse_size(input: &str) -> Result<u64> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|character: char| !character.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);

    if digits.is_empty() {
        return Err(anyhow::anyhow!("Invalid size: {input:?}"));
    }
    let value: u64 = digits.parse()?;

    let steps = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 0,
        "K" | "KB" | "KIB" => 1,
        "M" | "MB" | "MIB" => 2,
        "G" | "GB" | "GIB" => 3,
        "T" | "TB" | "TIB" => 4,
        "P" | "PB" | "PIB" => 5,
        other => return Err(anyhow::anyhow!("Invalid unit: {}", other)),
    };

    let multiplier = 1024_u64.pow(steps);
    value
        .checked_mul(multiplier)
        .ok_or_else(|| anyhow::anyhow!("Size overflows 64 bits: {input:?}"))
}
