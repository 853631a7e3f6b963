// SPDX-License-Identifier: GPL-3.0-only

use stone_volumes::{ErrorKind, VolumeError};
use thiserror::Error;
use zbus::fdo;

/// Service-specific errors
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Volume(#[from] VolumeError),

    #[error("Task join error: {0}")]
    Join(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl From<ServiceError> for fdo::Error {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Volume(error) => {
                let msg = error.to_string();
                match error.kind() {
                    ErrorKind::Validation => fdo::Error::InvalidArgs(msg),
                    ErrorKind::NotFound => fdo::Error::FileNotFound(msg),
                    ErrorKind::Conflict => fdo::Error::FileExists(msg),
                    _ => fdo::Error::Failed(msg),
                }
            }
            _ => fdo::Error::Failed(err.to_string()),
        }
    }
}

impl From<tokio::task::JoinError> for ServiceError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServiceError::Join(err.to_string())
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn volume_errors_map_by_kind() {
        let mapped = |error: VolumeError| fdo::Error::from(ServiceError::from(error));

        assert!(matches!(
            mapped(VolumeError::InvalidName("a".to_string())),
            fdo::Error::InvalidArgs(_)
        ));
        assert!(matches!(
            mapped(VolumeError::NotFound("db".to_string())),
            fdo::Error::FileNotFound(_)
        ));
        assert!(matches!(
            mapped(VolumeError::PathExists(PathBuf::from("/data1/stone_volume/db"))),
            fdo::Error::FileExists(_)
        ));
        match mapped(VolumeError::NoSuitableDisk("no disk fits 10 bytes".to_string())) {
            fdo::Error::Failed(msg) => assert_eq!(msg, "No suitable disk: no disk fits 10 bytes"),
            other => panic!("unexpected mapping: {other:?}"),
        }
    }
}
