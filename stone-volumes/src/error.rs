// SPDX-License-Identifier: GPL-3.0-only

use std::io;
use std::path::{Path, PathBuf};

use stone_sys::SysError;
use thiserror::Error;

/// Error types for volume placement and lifecycle operations
#[derive(Error, Debug)]
pub enum VolumeError {
    #[error("{0:?} includes invalid characters for a volume name, only [a-zA-Z0-9][a-zA-Z0-9_.-] are allowed")]
    InvalidName(String),

    #[error("Invalid option {key}: {reason}")]
    InvalidOption { key: String, reason: String },

    #[error("Volume {0} already exists")]
    AlreadyExists(String),

    #[error("Volume {0} does not exist")]
    NotFound(String),

    #[error("No suitable disk: {0}")]
    NoSuitableDisk(String),

    #[error("Disk {0} not found")]
    DiskNotFound(String),

    #[error("Path {0} already exists")]
    PathExists(PathBuf),

    #[error("Path {0} does not exist")]
    PathMissing(PathBuf),

    #[error("Malformed volume metadata in {path}: {reason}")]
    BadFormat { path: PathBuf, reason: String },

    #[error("Data directory {0} is missing")]
    MissingDataDir(PathBuf),

    #[error("Volume {0} is not mounted")]
    NotMounted(String),

    #[error("Invalid configuration {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    #[error(transparent)]
    Sys(#[from] SysError),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse error classes reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Placement,
    Quota,
    Persistence,
    Command,
    NotFound,
    Conflict,
}

impl VolumeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VolumeError::InvalidName(_)
            | VolumeError::InvalidOption { .. }
            | VolumeError::Config { .. } => ErrorKind::Validation,
            VolumeError::NoSuitableDisk(_) | VolumeError::DiskNotFound(_) => ErrorKind::Placement,
            VolumeError::AlreadyExists(_) | VolumeError::PathExists(_) | VolumeError::NotMounted(_) => {
                ErrorKind::Conflict
            }
            VolumeError::NotFound(_) | VolumeError::PathMissing(_) => ErrorKind::NotFound,
            VolumeError::BadFormat { .. }
            | VolumeError::MissingDataDir(_)
            | VolumeError::Io { .. }
            | VolumeError::Json(_) => ErrorKind::Persistence,
            VolumeError::Sys(error) => match error {
                SysError::CommandFailed { .. } | SysError::ToolNotFound(_) | SysError::Inventory(_) => {
                    ErrorKind::Command
                }
                SysError::Io(_) => ErrorKind::Persistence,
                _ => ErrorKind::Quota,
            },
        }
    }

    pub(crate) fn invalid_option(key: &str, reason: impl Into<String>) -> Self {
        VolumeError::InvalidOption {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Attach the path to an I/O error: `fs::create_dir(&p).map_err(io_error(&p))`
pub(crate) fn io_error(path: &Path) -> impl FnOnce(io::Error) -> VolumeError + '_ {
    move |source| VolumeError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Result type alias for volume operations
pub type Result<T> = std::result::Result<T, VolumeError>;
