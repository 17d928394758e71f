//! Execution repository.

use std::collections::BTreeMap;

use jobvault_core::Execution;
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::engine::{KvEngine, KvTxn};
use crate::error::{StoreError, StoreResult};
use crate::keys::{container_marker, execution_key, executions_prefix};
use crate::listing::list_in;
use crate::store::Store;

/// Executions of one job bucketed by group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupedExecutions {
    pub groups: BTreeMap<i64, Vec<Execution>>,
    /// Group ids, most recent first.
    pub order: Vec<i64>,
}

impl GroupedExecutions {
    fn from_executions(executions: Vec<Execution>) -> Self {
        let mut groups: BTreeMap<i64, Vec<Execution>> = BTreeMap::new();
        for execution in executions {
            groups.entry(execution.group).or_default().push(execution);
        }
        let order = groups.keys().rev().copied().collect();
        Self { groups, order }
    }

    /// Executions of the most recent group.
    pub fn latest(&self) -> &[Execution] {
        self.order
            .first()
            .and_then(|g| self.groups.get(g))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn into_latest(mut self) -> Vec<Execution> {
        self.order
            .first()
            .and_then(|g| self.groups.remove(g))
            .unwrap_or_default()
    }
}

impl<E: KvEngine, C: Codec> Store<E, C> {
    /// Store an execution and return its key.
    ///
    /// A record already stored at the same key with a later finish time wins;
    /// the write is then skipped. Retention runs after the commit and never
    /// fails the save.
    pub fn set_execution(&self, execution: &Execution) -> StoreResult<String> {
        let key = execution_key(execution);
        debug!(job = %execution.job_name, key = %key, "store: setting execution");

        self.update(|txn| self.put_execution_in(txn, &key, execution))?;
        self.enforce_retention(&execution.job_name);
        Ok(key)
    }

    /// Record a finished execution and fold its outcome into the job's
    /// counters. Fails with [`StoreError::JobDeleted`] when the job is gone.
    ///
    /// Returns `false` when a newer record at the same key kept the write
    /// (and the counters) from happening.
    pub fn execution_done(&self, execution: &Execution) -> StoreResult<bool> {
        let key = execution_key(execution);
        debug!(job = %execution.job_name, key = %key, success = execution.success, "store: execution done");

        let written = self.update(|txn| {
            let Some(mut job) = self.load_job(txn, &execution.job_name)? else {
                warn!(job = %execution.job_name, "store: execution reported for a deleted job");
                return Err(StoreError::JobDeleted(execution.job_name.clone()));
            };

            let written = self.put_execution_in(txn, &key, execution)?;
            if written {
                job.record_outcome(execution);
                self.put_job_record(txn, &job)?;
            }
            Ok(written)
        })?;

        self.enforce_retention(&execution.job_name);
        Ok(written)
    }

    /// All executions of a job, in key order.
    ///
    /// [`StoreError::NotFound`] means the job never existed; a job without
    /// executions yields an empty list.
    pub fn get_executions(&self, job: &str) -> StoreResult<Vec<Execution>> {
        self.view(|txn| self.executions_in(txn, job))
    }

    /// Executions grouped by `group`, most recent group first.
    pub fn get_grouped_executions(&self, job: &str) -> StoreResult<GroupedExecutions> {
        let executions = self.get_executions(job)?;
        Ok(GroupedExecutions::from_executions(executions))
    }

    /// Executions of the most recent group, or nothing.
    pub fn get_last_execution_group(&self, job: &str) -> StoreResult<Vec<Execution>> {
        self.view(|txn| self.last_group_in(txn, job))
    }

    /// Every execution of the same job sharing `execution.group`.
    pub fn get_execution_group(&self, execution: &Execution) -> StoreResult<Vec<Execution>> {
        let mut executions = self.get_executions(&execution.job_name)?;
        executions.retain(|e| e.group == execution.group);
        Ok(executions)
    }

    /// Write `execution` at `key` unless the stored record finished later.
    pub(crate) fn put_execution_in<T: KvTxn>(
        &self,
        txn: &mut T,
        key: &str,
        execution: &Execution,
    ) -> StoreResult<bool> {
        // Tracked read: a bulk delete that commits first rewrites the marker
        // and this save then conflicts.
        let marker = container_marker(&executions_prefix(&execution.job_name));
        txn.get(marker.as_bytes())?;

        if let Some(bytes) = txn.get(key.as_bytes())? {
            let stored: Execution = self.codec.decode(&bytes)?;
            if stored.finished_at > execution.finished_at {
                debug!(key = %key, "store: stored execution is newer, skipping");
                return Ok(false);
            }
        }

        let bytes = self.codec.encode(execution)?;
        txn.set(key.as_bytes(), &bytes)?;
        Ok(true)
    }

    /// Executions with the keys they are stored under.
    pub(crate) fn execution_entries_in<T: KvTxn>(
        &self,
        txn: &mut T,
        job: &str,
    ) -> StoreResult<Vec<(Vec<u8>, Execution)>> {
        list_in(txn, &executions_prefix(job), true)?
            .into_iter()
            .map(|kv| -> StoreResult<(Vec<u8>, Execution)> {
                Ok((kv.key, self.codec.decode(&kv.value)?))
            })
            .collect()
    }

    fn executions_in<T: KvTxn>(&self, txn: &mut T, job: &str) -> StoreResult<Vec<Execution>> {
        Ok(self
            .execution_entries_in(txn, job)?
            .into_iter()
            .map(|(_, execution)| execution)
            .collect())
    }

    pub(crate) fn last_group_in<T: KvTxn>(&self, txn: &mut T, job: &str) -> StoreResult<Vec<Execution>> {
        match self.executions_in(txn, job) {
            Ok(executions) => Ok(GroupedExecutions::from_executions(executions).into_latest()),
            Err(StoreError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}
