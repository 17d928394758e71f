//! `jobvault-core`: domain model of the job store.
//!
//! Jobs, executions and the validation rules applied before anything is
//! written. No storage concerns live here.

pub mod error;
pub mod execution;
pub mod id;
pub mod job;
pub mod schedule;

pub use error::{DomainError, DomainResult};
pub use execution::Execution;
pub use id::InstanceId;
pub use job::{Concurrency, Job, JobStatus};
pub use schedule::Schedule;
