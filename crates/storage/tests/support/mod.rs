//! Engine wrapper that injects commit conflicts.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::io::{Read, Write};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use jobvault_core::Execution;
use jobvault_storage::engine::{
    BackupSummary, EngineError, EngineResult, KvEngine, KvPair, KvTxn, MemoryEngine, MemoryTxn,
    ScanOptions,
};

/// A [`MemoryEngine`] whose commits can be made to fail with a conflict.
pub struct FlakyEngine {
    inner: MemoryEngine,
    commits: AtomicUsize,
    failing: Mutex<BTreeSet<usize>>,
    fail_all: Mutex<bool>,
}

impl FlakyEngine {
    pub fn new(max_txn_writes: usize) -> Self {
        Self {
            inner: MemoryEngine::with_max_txn_writes(max_txn_writes),
            commits: AtomicUsize::new(0),
            failing: Mutex::new(BTreeSet::new()),
            fail_all: Mutex::new(false),
        }
    }

    /// Make the `nth` commit from now (1-based) fail with a conflict.
    pub fn fail_commit(&self, nth: usize) {
        let base = self.commits.load(Ordering::SeqCst);
        self.failing.lock().unwrap().insert(base + nth);
    }

    /// Make every commit from now on fail with a conflict.
    pub fn fail_every_commit(&self) {
        *self.fail_all.lock().unwrap() = true;
    }

    /// Number of commits attempted so far, failed ones included.
    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    fn should_fail(&self) -> bool {
        let n = self.commits.fetch_add(1, Ordering::SeqCst) + 1;
        *self.fail_all.lock().unwrap() || self.failing.lock().unwrap().remove(&n)
    }
}

pub struct FlakyTxn<'a> {
    inner: MemoryTxn<'a>,
    engine: &'a FlakyEngine,
}

impl KvTxn for FlakyTxn<'_> {
    fn get(&mut self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.inner.set(key, value)
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<()> {
        self.inner.delete(key)
    }

    fn scan(&mut self, prefix: &[u8], opts: &ScanOptions) -> EngineResult<Vec<KvPair>> {
        self.inner.scan(prefix, opts)
    }

    fn commit(self) -> EngineResult<()> {
        if self.engine.should_fail() {
            return Err(EngineError::Conflict);
        }
        self.inner.commit()
    }
}

impl KvEngine for FlakyEngine {
    type Txn<'a> = FlakyTxn<'a>;

    fn begin(&self, writable: bool) -> EngineResult<FlakyTxn<'_>> {
        Ok(FlakyTxn {
            inner: self.inner.begin(writable)?,
            engine: self,
        })
    }

    fn collect_garbage(&self, discard_ratio: f64) -> EngineResult<bool> {
        self.inner.collect_garbage(discard_ratio)
    }

    fn backup(&self, sink: &mut dyn Write) -> EngineResult<BackupSummary> {
        self.inner.backup(sink)
    }

    fn load(&self, source: &mut dyn Read) -> EngineResult<u64> {
        self.inner.load(source)
    }

    fn close(&self) -> EngineResult<()> {
        self.inner.close()
    }
}

/// A fixed instant `secs` seconds into the test epoch.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

/// An execution of `job` started at `at(secs)`.
pub fn execution(job: &str, secs: i64, group: i64) -> Execution {
    Execution::new(job, "node-1", group).started_at(at(secs))
}
