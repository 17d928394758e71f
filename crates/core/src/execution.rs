//! Execution records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded run of a job on one node.
///
/// Executions are never mutated once stored; a later write at the same key
/// supersedes the record (unless it is older, see the execution repository).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    /// Name of the job this execution belongs to.
    pub job_name: String,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished; `None` while it is still running.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub success: bool,
    /// Captured output of the run.
    #[serde(default)]
    pub output: String,
    /// Node that ran the execution.
    pub node_name: String,
    /// Shared by all executions triggered together (a run and its retries).
    /// Assigned monotonically by the writer, usually the trigger timestamp.
    pub group: i64,
    /// Retry attempt, starting at 1.
    #[serde(default = "first_attempt")]
    pub attempt: u32,
}

fn first_attempt() -> u32 {
    1
}

impl Execution {
    /// Create a running execution for `job_name` on `node_name`.
    pub fn new(job_name: impl Into<String>, node_name: impl Into<String>, group: i64) -> Self {
        Self {
            job_name: job_name.into(),
            started_at: Utc::now(),
            finished_at: None,
            success: false,
            output: String::new(),
            node_name: node_name.into(),
            group,
            attempt: 1,
        }
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = at;
        self
    }

    /// Mark the execution as finished with the given outcome.
    pub fn finished(mut self, at: DateTime<Utc>, success: bool) -> Self {
        self.finished_at = Some(at);
        self.success = success;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Key of this execution within its job: start time in nanoseconds and
    /// the originating node.
    ///
    /// Start times outside the range an `i64` of nanoseconds covers (about
    /// 1677 to 2262) are written as seconds followed by nine digits of
    /// nanoseconds, which reads the same way.
    pub fn key(&self) -> String {
        let nanos = match self.started_at.timestamp_nanos_opt() {
            Some(nanos) => nanos.to_string(),
            None => format!(
                "{}{:09}",
                self.started_at.timestamp(),
                self.started_at.timestamp_subsec_nanos()
            ),
        };
        format!("{nanos}-{}", self.node_name)
    }

    pub fn is_running(&self) -> bool {
        self.finished_at.is_none()
    }
}
