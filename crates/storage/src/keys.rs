//! Key layout.
//!
//! ```text
//! jobs/<job>                    job record
//! executions/<job>/             container marker, written on job creation
//! executions/<job>/<exec-key>   execution record
//! ```

use jobvault_core::Execution;

pub const JOBS_PREFIX: &str = "jobs";
pub const EXECUTIONS_PREFIX: &str = "executions";
pub const SEPARATOR: char = '/';

pub fn job_key(name: &str) -> String {
    format!("{JOBS_PREFIX}{SEPARATOR}{name}")
}

/// Prefix of every execution of `job`, without the trailing separator.
pub fn executions_prefix(job: &str) -> String {
    format!("{EXECUTIONS_PREFIX}{SEPARATOR}{job}")
}

pub fn execution_key(execution: &Execution) -> String {
    format!(
        "{}{SEPARATOR}{}",
        executions_prefix(&execution.job_name),
        execution.key()
    )
}

/// Marker key that makes an execution namespace exist before any execution
/// has been stored.
pub fn container_marker(prefix: &str) -> String {
    format!("{}{SEPARATOR}", prefix.trim_end_matches(SEPARATOR))
}
