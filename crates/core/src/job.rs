//! Job definitions and the rules that apply to them before they are stored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::execution::Execution;
use crate::id::InstanceId;
use crate::schedule;

/// Whether a job may start while a previous run is still executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Concurrency {
    Allow,
    Forbid,
}

impl Concurrency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Concurrency::Allow => "allow",
            Concurrency::Forbid => "forbid",
        }
    }

    /// Parse a user-supplied policy. An empty string means "unset".
    pub fn parse(s: &str) -> DomainResult<Option<Self>> {
        match s {
            "" => Ok(None),
            "allow" => Ok(Some(Concurrency::Allow)),
            "forbid" => Ok(Some(Concurrency::Forbid)),
            other => Err(DomainError::WrongConcurrency(other.to_string())),
        }
    }
}

/// Status of a job, derived from its most recent execution group.
///
/// Never persisted; computed at read time only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// No executions recorded.
    NotSet,
    /// At least one execution of the last group has not finished.
    Running,
    Success,
    Failed,
    /// The last group has both successful and failed executions.
    PartiallyFailed,
}

impl JobStatus {
    /// Derive the status from the executions of a single group.
    pub fn from_group(executions: &[Execution]) -> Self {
        if executions.is_empty() {
            return JobStatus::NotSet;
        }
        if executions.iter().any(Execution::is_running) {
            return JobStatus::Running;
        }

        let succeeded = executions.iter().filter(|e| e.success).count();
        let failed = executions.len() - succeeded;

        match (succeeded, failed) {
            (_, 0) => JobStatus::Success,
            (0, _) => JobStatus::Failed,
            _ => JobStatus::PartiallyFailed,
        }
    }
}

/// A schedulable unit of work.
///
/// `name` is the primary key. Runtime fields (`success_count`, `error_count`,
/// `last_success`, `last_error`) are maintained by the store and merged
/// monotonically on every upsert. `status` and `instance` are attached at read
/// time and never written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    /// Cron-like expression. Required for root jobs only.
    #[serde(default)]
    pub schedule: String,
    /// IANA timezone the schedule is evaluated in; empty means UTC.
    #[serde(default)]
    pub timezone: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub owner_email: String,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub error_count: u64,
    #[serde(default)]
    pub last_success: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_error: Option<DateTime<Utc>>,
    #[serde(default)]
    pub disabled: bool,
    /// Node selection tags, interpreted by the scheduler.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Free-form labels used for filtering in listings.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub retries: u32,
    /// Names of the jobs whose `parent_job` points here, in insertion order.
    #[serde(default)]
    pub dependent_jobs: Vec<String>,
    #[serde(default)]
    pub parent_job: Option<String>,
    #[serde(default)]
    pub concurrency: Option<Concurrency>,
    #[serde(default)]
    pub executor: String,
    #[serde(default)]
    pub executor_config: BTreeMap<String, String>,

    #[serde(skip)]
    pub status: Option<JobStatus>,
    #[serde(skip)]
    pub instance: Option<InstanceId>,
}

impl Job {
    /// Create a root job with the given schedule.
    pub fn new(name: impl Into<String>, schedule: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schedule: schedule.into(),
            ..Default::default()
        }
    }

    /// Create a job that runs after `parent` finishes.
    pub fn child_of(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent_job: Some(parent.into()),
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_concurrency(mut self, concurrency: Concurrency) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// The parent name, treating an empty string as no parent.
    pub fn parent(&self) -> Option<&str> {
        self.parent_job.as_deref().filter(|p| !p.is_empty())
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// Check the job before it is written.
    pub fn validate(&self) -> DomainResult<()> {
        if !is_valid_name(&self.name) {
            return Err(DomainError::invalid_name(&self.name));
        }

        if self.parent() == Some(self.name.as_str()) {
            return Err(DomainError::SameParent);
        }

        if self.dependent_jobs.iter().any(|d| d == &self.name) {
            return Err(DomainError::DependsOnItself);
        }

        // Only root jobs carry a schedule of their own.
        if self.is_root() {
            schedule::parse(&self.schedule)?;
        }

        schedule::validate_timezone(&self.timezone)?;

        Ok(())
    }

    /// Fold the runtime fields of the stored record into `self`, so counters
    /// and timestamps never go backwards across an upsert.
    ///
    /// When `copy_dependent_jobs` is set and `self` has no dependents, the
    /// stored dependents are kept.
    pub fn merge_runtime_from(&mut self, stored: &Job, copy_dependent_jobs: bool) {
        self.last_error = self.last_error.max(stored.last_error);
        self.last_success = self.last_success.max(stored.last_success);
        self.success_count = self.success_count.max(stored.success_count);
        self.error_count = self.error_count.max(stored.error_count);

        if copy_dependent_jobs && self.dependent_jobs.is_empty() && !stored.dependent_jobs.is_empty()
        {
            self.dependent_jobs = stored.dependent_jobs.clone();
        }
    }

    /// True when every requested metadata pair is present with an equal
    /// value. A job without metadata never matches a non-empty filter.
    pub fn has_metadata(&self, filter: &BTreeMap<String, String>) -> bool {
        if self.metadata.is_empty() {
            return false;
        }
        filter
            .iter()
            .all(|(k, v)| self.metadata.get(k).is_some_and(|stored| stored == v))
    }

    /// Record the outcome of a finished execution in the runtime fields.
    pub fn record_outcome(&mut self, execution: &Execution) {
        let finished_at = execution.finished_at.unwrap_or_else(Utc::now);
        if execution.success {
            self.last_success = Some(finished_at);
            self.success_count += 1;
        } else {
            self.last_error = Some(finished_at);
            self.error_count += 1;
        }
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
