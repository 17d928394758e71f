//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// These are raised by validation before anything reaches storage. Storage
/// failures (conflicts, I/O) belong to the storage crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The job lists itself as its own parent.
    #[error("the job can not have itself as parent")]
    SameParent,

    /// The job lists itself among its dependent jobs.
    #[error("the job can not depend on itself")]
    DependsOnItself,

    /// The job name is empty or contains characters outside `[a-zA-Z0-9_-]`.
    #[error("invalid job name {0:?}: name can only contain alphanumeric characters, dashes and underscores")]
    InvalidName(String),

    /// A root job carries a schedule that does not parse.
    #[error("can't parse job schedule: {0}")]
    ScheduleParse(String),

    /// Concurrency is neither `allow` nor `forbid`.
    #[error("invalid concurrency policy value {0:?}, use \"allow\" or \"forbid\"")]
    WrongConcurrency(String),

    /// Timezone is not a known IANA zone.
    #[error("invalid timezone {0:?}")]
    InvalidTimezone(String),
}

impl DomainError {
    pub fn schedule_parse(msg: impl Into<String>) -> Self {
        Self::ScheduleParse(msg.into())
    }

    pub fn invalid_name(name: impl Into<String>) -> Self {
        Self::InvalidName(name.into())
    }
}
