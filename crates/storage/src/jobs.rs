//! Job repository.
//!
//! A job and its parent link are kept symmetric: whenever a job's
//! `parent_job` changes, the old parent loses it from `dependent_jobs` and the
//! new parent gains it, inside the transaction that writes the job.

use std::collections::{BTreeMap, BTreeSet};

use jobvault_core::{Job, JobStatus};
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::engine::{KvEngine, KvTxn};
use crate::error::{StoreError, StoreResult};
use crate::keys::{JOBS_PREFIX, container_marker, executions_prefix, job_key};
use crate::listing::list_in;
use crate::store::Store;

/// Read options for [`Store::get_job`] and [`Store::list_jobs`].
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    /// Derive `status` from the job's most recent execution group.
    pub compute_status: bool,
    /// Only list jobs carrying all of these metadata pairs. Empty means no
    /// filtering.
    pub metadata: BTreeMap<String, String>,
}

impl JobOptions {
    pub fn with_status() -> Self {
        Self {
            compute_status: true,
            ..Default::default()
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl<E: KvEngine, C: Codec> Store<E, C> {
    /// Create or update a job.
    ///
    /// Runtime fields never go backwards: counters keep the stored maximum and
    /// timestamps the later value. With `copy_dependent_jobs`, an incoming job
    /// without dependents keeps the stored ones. Returns the record as
    /// written.
    pub fn set_job(&self, job: Job, copy_dependent_jobs: bool) -> StoreResult<Job> {
        job.validate()?;
        debug!(job = %job.name, "store: setting job");

        self.update(|txn| {
            let (written, old_parent) = self.write_job(txn, job, copy_dependent_jobs)?;
            self.relink_parent(txn, &written.name, old_parent.as_deref(), written.parent())?;
            Ok(written)
        })
    }

    /// Load a job by name.
    pub fn get_job(&self, name: &str, options: &JobOptions) -> StoreResult<Job> {
        debug!(job = %name, "store: getting job");
        self.view(|txn| {
            let mut job = self
                .load_job(txn, name)?
                .ok_or_else(|| StoreError::not_found(job_key(name)))?;
            self.decorate(txn, &mut job, options)?;
            Ok(job)
        })
    }

    /// All jobs in key order, filtered by `options.metadata`.
    pub fn list_jobs(&self, options: &JobOptions) -> StoreResult<Vec<Job>> {
        self.view(|txn| {
            let pairs = list_in(txn, JOBS_PREFIX, false)?;
            let mut jobs = Vec::with_capacity(pairs.len());
            for kv in pairs {
                let mut job: Job = self.codec.decode(&kv.value)?;
                if !options.metadata.is_empty() && !job.has_metadata(&options.metadata) {
                    continue;
                }
                self.decorate(txn, &mut job, options)?;
                jobs.push(job);
            }
            debug!(count = jobs.len(), "store: listed jobs");
            Ok(jobs)
        })
    }

    /// Delete a job, its executions and every link to it. Returns the deleted
    /// job.
    ///
    /// Executions go first, through [`Store::delete_executions`]. The job
    /// record, the parent/child links and the execution namespace then change
    /// in one transaction. A failed delete leaves the job in place with an
    /// empty execution list; retrying completes it.
    pub fn delete_job(&self, name: &str) -> StoreResult<Job> {
        debug!(job = %name, "store: deleting job");

        self.view(|txn| self.load_job(txn, name))?
            .ok_or_else(|| StoreError::not_found(job_key(name)))?;
        self.delete_executions(name)?;

        self.update(|txn| {
            let job = self
                .load_job(txn, name)?
                .ok_or_else(|| StoreError::not_found(job_key(name)))?;

            if let Some(parent) = job.parent() {
                self.detach_from_parent(txn, parent, name)?;
            }

            let mut seen = BTreeSet::new();
            for child in job.dependent_jobs.iter().filter(|c| seen.insert(c.as_str())) {
                self.orphan_child(txn, child, name)?;
            }

            self.drop_namespace_in(txn, name)?;
            txn.delete(job_key(name).as_bytes())?;
            Ok(job)
        })
    }

    pub(crate) fn load_job<T: KvTxn>(&self, txn: &mut T, name: &str) -> StoreResult<Option<Job>> {
        txn.get(job_key(name).as_bytes())?
            .map(|bytes| self.codec.decode(&bytes))
            .transpose()
    }

    pub(crate) fn put_job_record<T: KvTxn>(&self, txn: &mut T, job: &Job) -> StoreResult<()> {
        let bytes = self.codec.encode(job)?;
        txn.set(job_key(&job.name).as_bytes(), &bytes)?;
        Ok(())
    }

    /// First step of an upsert: merge with the stored record and write it.
    /// Returns the written job and the parent the stored record pointed to.
    fn write_job<T: KvTxn>(
        &self,
        txn: &mut T,
        mut job: Job,
        copy_dependent_jobs: bool,
    ) -> StoreResult<(Job, Option<String>)> {
        let old_parent = match self.load_job(txn, &job.name)? {
            Some(stored) => {
                job.merge_runtime_from(&stored, copy_dependent_jobs);
                stored.parent().map(str::to_owned)
            }
            None => {
                let marker = container_marker(&executions_prefix(&job.name));
                txn.set(marker.as_bytes(), b"")?;
                None
            }
        };

        job.status = None;
        job.instance = None;
        self.put_job_record(txn, &job)?;
        Ok((job, old_parent))
    }

    /// Second step of an upsert: move `child` between parents.
    fn relink_parent<T: KvTxn>(
        &self,
        txn: &mut T,
        child: &str,
        old: Option<&str>,
        new: Option<&str>,
    ) -> StoreResult<()> {
        if old == new {
            return Ok(());
        }
        if let Some(old) = old {
            self.detach_from_parent(txn, old, child)?;
        }
        if let Some(new) = new {
            self.attach_to_parent(txn, new, child)?;
        }
        Ok(())
    }

    fn attach_to_parent<T: KvTxn>(&self, txn: &mut T, parent: &str, child: &str) -> StoreResult<()> {
        let mut parent_job = self
            .load_job(txn, parent)?
            .ok_or_else(|| StoreError::ParentNotFound(parent.to_string()))?;

        if parent_job.dependent_jobs.iter().any(|d| d == child) {
            return Ok(());
        }
        parent_job.dependent_jobs.push(child.to_string());
        debug!(parent = %parent, child = %child, "store: attached dependent job");
        self.put_job_record(txn, &parent_job)
    }

    /// Remove every occurrence of `child` from the parent's dependents.
    fn detach_from_parent<T: KvTxn>(&self, txn: &mut T, parent: &str, child: &str) -> StoreResult<()> {
        let Some(mut parent_job) = self.load_job(txn, parent)? else {
            warn!(parent = %parent, child = %child, "store: parent job missing, nothing to detach");
            return Ok(());
        };

        let before = parent_job.dependent_jobs.len();
        parent_job.dependent_jobs.retain(|d| d != child);
        if parent_job.dependent_jobs.len() == before {
            return Ok(());
        }
        debug!(parent = %parent, child = %child, "store: detached dependent job");
        self.put_job_record(txn, &parent_job)
    }

    fn orphan_child<T: KvTxn>(&self, txn: &mut T, child: &str, parent: &str) -> StoreResult<()> {
        let Some(mut child_job) = self.load_job(txn, child)? else {
            warn!(parent = %parent, child = %child, "store: dependent job missing");
            return Ok(());
        };
        if child_job.parent() != Some(parent) {
            debug!(parent = %parent, child = %child, "store: stale dependent entry skipped");
            return Ok(());
        }
        child_job.parent_job = None;
        self.put_job_record(txn, &child_job)
    }

    fn decorate<T: KvTxn>(&self, txn: &mut T, job: &mut Job, options: &JobOptions) -> StoreResult<()> {
        job.instance = Some(self.instance());
        if options.compute_status {
            let last = self.last_group_in(txn, &job.name)?;
            job.status = Some(JobStatus::from_group(&last));
        }
        Ok(())
    }
}
