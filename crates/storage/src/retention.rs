//! Execution retention and bulk deletion.

use tracing::{debug, error, warn};

use crate::codec::Codec;
use crate::engine::{EngineError, KvEngine, KvTxn, ScanOptions};
use crate::error::{StoreError, StoreResult};
use crate::keys::{container_marker, executions_prefix};
use crate::store::Store;

/// Outer loop of [`Store::delete_executions`].
#[derive(Debug, Clone, PartialEq, Eq)]
enum BulkDeleteState {
    Attempting(u32),
    Succeeded { deleted: usize },
    Exhausted,
}

/// One attempt: a chain of transactions walking the prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanState {
    Scanning { resume_from: Option<Vec<u8>> },
    /// The open transaction is full; commit it and continue at this key.
    PartialCommit { resume_from: Vec<u8> },
    ScanComplete,
}

impl<E: KvEngine, C: Codec> Store<E, C> {
    /// Evict the oldest executions of `job` beyond `max_executions`.
    ///
    /// Each eviction is its own transaction; failures are logged and skipped.
    /// Returns the number of evicted executions.
    pub fn enforce_retention(&self, job: &str) -> usize {
        match self.evict_oldest(job) {
            Ok(evicted) => evicted,
            Err(e) => {
                error!(job = %job, error = %e, "store: retention failed");
                0
            }
        }
    }

    fn evict_oldest(&self, job: &str) -> StoreResult<usize> {
        let mut entries = match self.view(|txn| self.execution_entries_in(txn, job)) {
            Ok(entries) => entries,
            Err(StoreError::NotFound(_)) => return Ok(0),
            Err(e) => return Err(e),
        };

        let max = self.config.max_executions;
        if entries.len() <= max {
            return Ok(0);
        }

        entries.sort_by_key(|(_, execution)| execution.started_at);
        let excess = entries.len() - max;

        let mut evicted = 0;
        for (key, _) in entries.iter().take(excess) {
            match self.update(|txn| Ok(txn.delete(key)?)) {
                Ok(()) => evicted += 1,
                Err(e) => error!(
                    job = %job,
                    key = %String::from_utf8_lossy(key),
                    error = %e,
                    "store: failed to evict execution"
                ),
            }
        }

        debug!(job = %job, evicted, "store: retention applied");
        Ok(evicted)
    }

    /// Delete every execution of `job`. The namespace marker stays, so the
    /// job keeps an empty execution list until [`Store::delete_job`] removes
    /// it together with the job record.
    ///
    /// Runs as a chain of transactions bounded by the engine's size limit.
    /// Each transaction rewrites the marker, which saves read, so a save that
    /// races a committed link of the chain conflicts instead of landing behind
    /// the scan. A conflict on any commit restarts the whole scan; after
    /// `max_update_attempts` failed attempts this gives up with
    /// [`StoreError::TooManyConflicts`]. Returns the number of executions
    /// deleted by the successful attempt.
    pub fn delete_executions(&self, job: &str) -> StoreResult<usize> {
        let prefix = container_marker(&executions_prefix(job));
        let max_attempts = self.config.max_update_attempts.max(1);

        let mut state = BulkDeleteState::Attempting(1);
        loop {
            state = match state {
                BulkDeleteState::Attempting(attempt) if attempt > max_attempts => {
                    BulkDeleteState::Exhausted
                }
                BulkDeleteState::Attempting(attempt) => {
                    match self.delete_prefix_once(prefix.as_bytes()) {
                        Ok(deleted) => BulkDeleteState::Succeeded { deleted },
                        Err(StoreError::Conflict) => {
                            warn!(job = %job, attempt, "store: conflict deleting executions, retrying");
                            BulkDeleteState::Attempting(attempt + 1)
                        }
                        Err(e) => return Err(e),
                    }
                }
                BulkDeleteState::Succeeded { deleted } => {
                    debug!(job = %job, deleted, "store: deleted executions");
                    return Ok(deleted);
                }
                BulkDeleteState::Exhausted => {
                    error!(job = %job, attempts = max_attempts, "store: gave up deleting executions");
                    return Err(StoreError::TooManyConflicts);
                }
            };
        }
    }

    fn delete_prefix_once(&self, marker: &[u8]) -> StoreResult<usize> {
        let mut txn = self.engine.begin(true)?;
        touch_marker(&mut txn, marker)?;
        let mut deleted = 0;
        let mut deleted_in_txn = 0;

        let mut state = ScanState::Scanning { resume_from: None };
        loop {
            state = match state {
                ScanState::Scanning { resume_from } => {
                    let opts = match resume_from {
                        Some(key) => ScanOptions::keys_only().resume_at(key),
                        None => ScanOptions::keys_only(),
                    };

                    let mut next = ScanState::ScanComplete;
                    for kv in txn.scan(marker, &opts)? {
                        if kv.key == marker {
                            continue;
                        }
                        match txn.delete(&kv.key) {
                            Ok(()) => {
                                deleted += 1;
                                deleted_in_txn += 1;
                            }
                            // The marker alone fills the transaction; no
                            // chain of commits can make progress.
                            Err(EngineError::TxnTooBig) if deleted_in_txn == 0 => {
                                return Err(EngineError::TxnTooBig.into());
                            }
                            Err(EngineError::TxnTooBig) => {
                                next = ScanState::PartialCommit { resume_from: kv.key };
                                break;
                            }
                            Err(e) => return Err(e.into()),
                        }
                    }
                    next
                }
                ScanState::PartialCommit { resume_from } => {
                    txn.commit()?;
                    debug!(deleted, "store: bulk delete partial commit");
                    txn = self.engine.begin(true)?;
                    touch_marker(&mut txn, marker)?;
                    deleted_in_txn = 0;
                    ScanState::Scanning {
                        resume_from: Some(resume_from),
                    }
                }
                ScanState::ScanComplete => {
                    txn.commit()?;
                    return Ok(deleted);
                }
            };
        }
    }

    /// Remove what is left of the execution namespace of `job`, marker
    /// included, inside `txn`. Executions saved after the bulk delete
    /// finished are removed here too; returns their number.
    pub(crate) fn drop_namespace_in<T: KvTxn>(&self, txn: &mut T, job: &str) -> StoreResult<usize> {
        let marker = container_marker(&executions_prefix(job));
        let mut stragglers = 0;
        for kv in txn.scan(marker.as_bytes(), &ScanOptions::keys_only())? {
            txn.delete(&kv.key)?;
            if kv.key != marker.as_bytes() {
                stragglers += 1;
            }
        }
        if stragglers > 0 {
            warn!(job = %job, stragglers, "store: executions saved while the job was being deleted");
        }
        Ok(stragglers)
    }
}

/// Write the marker back (or a tombstone when it is missing) so every save
/// that read it before this commit conflicts.
fn touch_marker<T: KvTxn>(txn: &mut T, marker: &[u8]) -> StoreResult<()> {
    match txn.get(marker)? {
        Some(value) => txn.set(marker, &value)?,
        None => txn.delete(marker)?,
    }
    Ok(())
}
