use std::path::PathBuf;

use janitor_api::{FsError, StoreError};
use thiserror::Error;

/// Why an audit ended in the `Failed` state.
///
/// Cloneable so that every caller coalesced onto one run receives it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuditFailure {
    #[error("database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("filesystem unavailable under {}: {reason}", root.display())]
    FilesystemUnavailable { root: PathBuf, reason: String },

    #[error("audit cancelled before cleanup")]
    Cancelled,

    #[error("internal failure: {0}")]
    Internal(String),
}

impl From<StoreError> for AuditFailure {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => AuditFailure::DatabaseUnavailable(reason),
        }
    }
}

impl From<FsError> for AuditFailure {
    fn from(err: FsError) -> Self {
        match err {
            FsError::Unavailable { root, reason } => {
                AuditFailure::FilesystemUnavailable { root, reason }
            }
            FsError::Io { path, source } => AuditFailure::FilesystemUnavailable {
                root: path,
                reason: source.to_string(),
            },
        }
    }
}

impl From<tokio::task::JoinError> for AuditFailure {
    fn from(err: tokio::task::JoinError) -> Self {
        AuditFailure::Internal(format!("audit worker failed: {err}"))
    }
}
