// SPDX-License-Identifier: GPL-3.0-only

use std::path::PathBuf;

use thiserror::Error;

/// Error types for host-level operations
#[derive(Error, Debug)]
pub enum SysError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Required tool not found in PATH: {0}")]
    ToolNotFound(String),

    #[error("Command `{command}` failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("Mount point not found for {0}")]
    MountPointNotFound(PathBuf),

    #[error("No quota id bound to {0}")]
    QuotaNotBound(PathBuf),

    #[error("Quota not supported: {0}")]
    Unsupported(String),

    #[error("Malformed quota report: {0}")]
    ReportParse(String),

    #[error("Quota id range {min}..={max} is exhausted")]
    QuotaIdsExhausted { min: u32, max: u32 },

    #[error("Disk inventory failed: {0}")]
    Inventory(String),
}

/// Result type alias for host operations
pub type Result<T> = std::result::Result<T, SysError>;
