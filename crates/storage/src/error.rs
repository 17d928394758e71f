//! Store error taxonomy.

use jobvault_core::DomainError;
use thiserror::Error;

use crate::engine::EngineError;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// The requested job (or its execution namespace) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The job was rejected before anything was written.
    #[error(transparent)]
    Validation(#[from] DomainError),

    /// The job names a parent that is not stored.
    #[error("parent job {0:?} not found")]
    ParentNotFound(String),

    /// A concurrent transaction invalidated this one. Nothing was written and
    /// the operation may be retried.
    #[error("transaction conflict, please retry")]
    Conflict,

    /// Bulk deletion ran out of attempts while competing with other writers.
    #[error("too many transaction conflicts")]
    TooManyConflicts,

    /// An execution was reported for a job that no longer exists.
    #[error("job {0:?} was deleted")]
    JobDeleted(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("storage error: {0}")]
    Storage(EngineError),
}

impl StoreError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// True for errors a caller can resolve by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict | Self::TooManyConflicts)
    }
}

impl From<EngineError> for StoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Conflict => StoreError::Conflict,
            other => StoreError::Storage(other),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Codec(err.to_string())
    }
}
