//! Error types for queuectl.

use rusqlite::ErrorCode;
use thiserror::Error;

use crate::model::{JobId, State};

#[derive(Debug, Error)]
pub enum Error {
    #[error("job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("invalid state transition for job {id}: {from} -> {to}")]
    InvalidTransition { id: JobId, from: State, to: State },

    #[error("attempt mismatch for job {id}: expected {expected}, got {actual}")]
    AttemptMismatch {
        id: JobId,
        expected: u32,
        actual: u32,
    },

    /// Lock timeout or other condition that should clear on its own.
    #[error("job store temporarily unavailable: {0}")]
    Transient(String),

    #[error("storage error: {0}")]
    Storage(rusqlite::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the same operation later is expected to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Transient(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(ref e, _)
                if matches!(
                    e.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) =>
            {
                Error::Transient(err.to_string())
            }
            other => Error::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
