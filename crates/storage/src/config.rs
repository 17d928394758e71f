//! Store configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

/// Shortest pause between garbage-collection ticks.
pub const MIN_GC_INTERVAL: Duration = Duration::from_secs(1);

/// Store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database directory for on-disk engines.
    pub data_dir: PathBuf,
    /// Seconds between garbage-collection ticks. Zero is read as one.
    pub gc_interval_secs: u64,
    /// Share of a value chain that must be stale before GC rewrites it.
    pub gc_discard_ratio: f64,
    /// Executions kept per job; older ones are evicted.
    pub max_executions: usize,
    /// Attempts of the bulk execution delete before giving up.
    pub max_update_attempts: u32,
    /// Write limit of a single engine transaction.
    pub max_txn_writes: usize,
    /// Start the background GC loop with the store.
    pub run_gc: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("jobvault.db"),
            gc_interval_secs: 300,
            gc_discard_ratio: 0.7,
            max_executions: 100,
            max_update_attempts: 5,
            max_txn_writes: 10_000,
            run_gc: true,
        }
    }
}

impl StoreConfig {
    /// Defaults overridden by `JOBVAULT_*` environment variables.
    ///
    /// Unparsable values are logged and ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`StoreConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("JOBVAULT_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        override_from(&lookup, "JOBVAULT_GC_INTERVAL_SECS", &mut config.gc_interval_secs);
        override_from(&lookup, "JOBVAULT_GC_DISCARD_RATIO", &mut config.gc_discard_ratio);
        override_from(&lookup, "JOBVAULT_MAX_EXECUTIONS", &mut config.max_executions);
        override_from(&lookup, "JOBVAULT_MAX_UPDATE_ATTEMPTS", &mut config.max_update_attempts);
        override_from(&lookup, "JOBVAULT_MAX_TXN_WRITES", &mut config.max_txn_writes);
        override_from(&lookup, "JOBVAULT_RUN_GC", &mut config.run_gc);

        if config.gc_interval_secs == 0 {
            let default = Self::default().gc_interval_secs;
            warn!(key = "JOBVAULT_GC_INTERVAL_SECS", default, "ignoring zero gc interval");
            config.gc_interval_secs = default;
        }

        config
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs).max(MIN_GC_INTERVAL)
    }

    /// Defaults for tests and embedding: no background GC.
    pub fn without_gc(mut self) -> Self {
        self.run_gc = false;
        self
    }

    pub fn with_max_executions(mut self, max: usize) -> Self {
        self.max_executions = max;
        self
    }

    pub fn with_max_txn_writes(mut self, max: usize) -> Self {
        self.max_txn_writes = max;
        self
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, target: &mut T)
where
    T: FromStr + std::fmt::Debug,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *target = value,
        Err(_) => warn!(key, value = %raw, default = ?target, "ignoring unparsable setting"),
    }
}
