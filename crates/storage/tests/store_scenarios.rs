//! End-to-end behaviour of the store over the in-memory engine.

mod support;

use jobvault_core::{DomainError, Job, JobStatus};
use jobvault_storage::engine::{KvEngine, KvTxn, MemoryEngine};
use jobvault_storage::{EngineError, JobOptions, Store, StoreConfig, StoreError};

use support::{FlakyEngine, at, execution};

fn store() -> Store<MemoryEngine> {
    jobvault_observability::init_test();
    Store::in_memory(StoreConfig::default().without_gc()).unwrap()
}

fn flaky_store(max_txn_writes: usize) -> Store<FlakyEngine> {
    jobvault_observability::init_test();
    let config = StoreConfig::default()
        .without_gc()
        .with_max_txn_writes(max_txn_writes);
    Store::new(FlakyEngine::new(max_txn_writes), config).unwrap()
}

fn raw<E: KvEngine>(store: &Store<E>, key: &str) -> Option<Vec<u8>> {
    store.engine().begin(false).unwrap().get(key.as_bytes()).unwrap()
}

fn opts() -> JobOptions {
    JobOptions::default()
}

#[test]
fn upserting_an_unchanged_job_is_idempotent() {
    let store = store();
    let job = Job::new("backup", "0 30 2 * * *").with_metadata("team", "ops");

    store.set_job(job.clone(), true).unwrap();
    let first = raw(&store, "jobs/backup").unwrap();
    store.set_job(job, true).unwrap();
    let second = raw(&store, "jobs/backup").unwrap();

    assert_eq!(first, second);
    assert_eq!(store.list_jobs(&opts()).unwrap().len(), 1);
}

#[test]
fn lower_incoming_counters_never_decrease_stored_values() {
    let store = store();
    let mut job = Job::new("backup", "@daily");
    job.success_count = 10;
    job.error_count = 3;
    job.last_success = Some(at(100));
    job.last_error = Some(at(50));
    store.set_job(job, true).unwrap();

    let mut stale = Job::new("backup", "@hourly");
    stale.success_count = 2;
    stale.error_count = 7;
    stale.last_success = Some(at(10));
    store.set_job(stale, true).unwrap();

    let stored = store.get_job("backup", &opts()).unwrap();
    assert_eq!(stored.schedule, "@hourly");
    assert_eq!(stored.success_count, 10);
    assert_eq!(stored.error_count, 7);
    assert_eq!(stored.last_success, Some(at(100)));
    assert_eq!(stored.last_error, Some(at(50)));
}

#[test]
fn self_parent_is_rejected_and_nothing_is_written() {
    let store = store();
    store.set_job(Job::new("loop", "@daily"), true).unwrap();
    let before = raw(&store, "jobs/loop");

    let err = store.set_job(Job::child_of("loop", "loop"), true).unwrap_err();

    assert_eq!(err, StoreError::Validation(DomainError::SameParent));
    assert_eq!(raw(&store, "jobs/loop"), before);
}

#[test]
fn invalid_schedule_and_timezone_are_rejected() {
    let store = store();

    assert!(matches!(
        store.set_job(Job::new("bad", "every now and then"), true),
        Err(StoreError::Validation(DomainError::ScheduleParse(_)))
    ));
    assert!(matches!(
        store.set_job(Job::new("bad", "@daily").with_timezone("Mars/Olympus"), true),
        Err(StoreError::Validation(DomainError::InvalidTimezone(_)))
    ));
    assert!(store.list_jobs(&opts()).unwrap().is_empty());
}

#[test]
fn unknown_concurrency_never_decodes_into_a_job() {
    let store = store();
    let mut value = serde_json::to_value(Job::new("bad", "@daily")).unwrap();
    value["concurrency"] = "sometimes".into();
    let bytes = serde_json::to_vec(&value).unwrap();

    assert!(serde_json::from_slice::<Job>(&bytes).is_err());

    // A record written behind the store's back surfaces as a codec error.
    let mut txn = store.engine().begin(true).unwrap();
    txn.set(b"jobs/bad", &bytes).unwrap();
    txn.commit().unwrap();
    assert!(matches!(
        store.get_job("bad", &opts()),
        Err(StoreError::Codec(_))
    ));
}

#[test]
fn child_appears_once_in_parent_and_leaves_when_cleared() {
    let store = store();
    store.set_job(Job::new("p", "@daily"), true).unwrap();

    store.set_job(Job::child_of("c", "p"), true).unwrap();
    store.set_job(Job::child_of("c", "p"), true).unwrap();
    assert_eq!(store.get_job("p", &opts()).unwrap().dependent_jobs, vec!["c"]);

    store.set_job(Job::new("c", "@hourly"), true).unwrap();
    assert!(store.get_job("p", &opts()).unwrap().dependent_jobs.is_empty());
}

#[test]
fn parent_upsert_keeps_dependents_when_asked() {
    let store = store();
    store.set_job(Job::new("p", "@daily"), true).unwrap();
    store.set_job(Job::child_of("c", "p"), true).unwrap();

    store.set_job(Job::new("p", "@hourly"), true).unwrap();
    assert_eq!(store.get_job("p", &opts()).unwrap().dependent_jobs, vec!["c"]);

    store.set_job(Job::new("p", "@hourly"), false).unwrap();
    assert!(store.get_job("p", &opts()).unwrap().dependent_jobs.is_empty());
}

#[test]
fn retention_keeps_the_latest_hundred() {
    let store = store();
    store.set_job(Job::new("backup", "@daily"), true).unwrap();

    for i in 0..101 {
        store.set_execution(&execution("backup", i, i)).unwrap();
    }

    let executions = store.get_executions("backup").unwrap();
    assert_eq!(executions.len(), 100);
    assert!(executions.iter().all(|e| e.started_at != at(0)));
    assert!(executions.iter().any(|e| e.started_at == at(100)));
}

#[test]
fn earlier_finish_at_the_same_key_leaves_the_store_unchanged() {
    let store = store();
    store.set_job(Job::new("backup", "@daily"), true).unwrap();
    let run = execution("backup", 0, 1);

    let key = store.set_execution(&run.clone().finished(at(30), true)).unwrap();
    let before = raw(&store, &key);
    let again = store
        .set_execution(&run.finished(at(20), false).with_output("late"))
        .unwrap();

    assert_eq!(key, again);
    assert_eq!(raw(&store, &key), before);
}

#[test]
fn deleting_a_middle_job_cascades() {
    let store = store();
    store.set_job(Job::new("p", "@daily"), true).unwrap();
    store.set_job(Job::child_of("a", "p"), true).unwrap();
    store.set_job(Job::child_of("b", "a"), true).unwrap();
    for i in 0..3 {
        store.set_execution(&execution("a", i, i)).unwrap();
    }

    let deleted = store.delete_job("a").unwrap();

    assert_eq!(deleted.name, "a");
    assert_eq!(deleted.dependent_jobs, vec!["b"]);
    assert!(matches!(store.get_job("a", &opts()), Err(StoreError::NotFound(_))));
    assert!(matches!(store.get_executions("a"), Err(StoreError::NotFound(_))));
    assert_eq!(store.get_job("b", &opts()).unwrap().parent_job, None);
    assert!(store.get_job("p", &opts()).unwrap().dependent_jobs.is_empty());
}

#[test]
fn deleting_a_parent_skips_missing_dependents() {
    let store = store();
    let mut parent = Job::new("p", "@daily");
    parent.dependent_jobs = vec!["ghost".into(), "c".into()];
    store.set_job(parent, false).unwrap();
    store.set_job(Job::child_of("c", "p"), true).unwrap();

    let deleted = store.delete_job("p").unwrap();

    assert_eq!(deleted.dependent_jobs, vec!["ghost", "c"]);
    assert_eq!(store.get_job("c", &opts()).unwrap().parent_job, None);
    assert!(matches!(store.get_job("ghost", &opts()), Err(StoreError::NotFound(_))));
}

#[test]
fn deleting_a_parent_leaves_children_of_other_parents_alone() {
    let store = store();
    store.set_job(Job::new("q", "@daily"), true).unwrap();
    store.set_job(Job::child_of("c", "q"), true).unwrap();
    let mut stale = Job::new("p", "@daily");
    stale.dependent_jobs = vec!["c".into()];
    store.set_job(stale, false).unwrap();

    store.delete_job("p").unwrap();

    assert_eq!(store.get_job("c", &opts()).unwrap().parent(), Some("q"));
    assert_eq!(store.get_job("q", &opts()).unwrap().dependent_jobs, vec!["c"]);
}

#[test]
fn groups_come_newest_first_and_last_group_is_the_max() {
    let store = store();
    store.set_job(Job::new("backup", "@daily"), true).unwrap();
    let mut secs = 0;
    for group in [5, 9, 1, 9, 5] {
        store.set_execution(&execution("backup", secs, group)).unwrap();
        secs += 1;
    }

    let grouped = store.get_grouped_executions("backup").unwrap();
    assert_eq!(grouped.order, vec![9, 5, 1]);

    let last = store.get_last_execution_group("backup").unwrap();
    assert_eq!(last.len(), 2);
    assert!(last.iter().all(|e| e.group == 9));
}

#[test]
fn parent_child_lifecycle() {
    let store = store();
    store.set_job(Job::new("A", "@every 10m"), true).unwrap();
    store.set_job(Job::child_of("B", "A"), true).unwrap();

    assert_eq!(store.get_job("A", &opts()).unwrap().dependent_jobs, vec!["B"]);

    store.delete_job("A").unwrap();

    assert_eq!(store.get_job("B", &opts()).unwrap().parent(), None);
    assert!(matches!(store.get_job("A", &opts()), Err(StoreError::NotFound(_))));
}

#[test]
fn status_reflects_the_last_group() {
    let store = store();
    store.set_job(Job::new("backup", "@daily"), true).unwrap();
    store
        .execution_done(&execution("backup", 0, 1).finished(at(1), true))
        .unwrap();
    store
        .execution_done(&execution("backup", 10, 2).finished(at(11), true))
        .unwrap();
    let mut failed = execution("backup", 10, 2).finished(at(12), false);
    failed.node_name = "node-2".into();
    store.execution_done(&failed).unwrap();

    let job = store.get_job("backup", &JobOptions::with_status()).unwrap();
    assert_eq!(job.status, Some(JobStatus::PartiallyFailed));
    assert_eq!(job.success_count, 2);
    assert_eq!(job.error_count, 1);

    let listed = store.list_jobs(&JobOptions::with_status()).unwrap();
    assert_eq!(listed[0].status, Some(JobStatus::PartiallyFailed));
}

#[test]
fn single_upsert_surfaces_conflicts() {
    let store = flaky_store(10_000);
    store.engine().fail_commit(1);

    let err = store.set_job(Job::new("backup", "@daily"), true).unwrap_err();

    assert_eq!(err, StoreError::Conflict);
    assert!(err.is_retryable());
    assert!(store.list_jobs(&opts()).unwrap().is_empty());
    // The caller retries.
    store.set_job(Job::new("backup", "@daily"), true).unwrap();
}

#[test]
fn bulk_delete_restarts_after_a_conflict_mid_chain() {
    let store = flaky_store(3);
    store.set_job(Job::new("backup", "@daily"), true).unwrap();
    for i in 0..10 {
        store.set_execution(&execution("backup", i, i)).unwrap();
    }

    // Each link rewrites the marker and deletes two executions. The first
    // link commits, the second conflicts, and the retry deletes the
    // remaining eight.
    store.engine().fail_commit(2);
    assert_eq!(store.delete_executions("backup").unwrap(), 8);

    assert!(store.get_executions("backup").unwrap().is_empty());
}

#[test]
fn failed_job_delete_keeps_an_empty_execution_list() {
    let store = flaky_store(10_000);
    store.set_job(Job::new("backup", "@daily"), true).unwrap();
    store.set_execution(&execution("backup", 0, 1)).unwrap();

    // The bulk delete commits, the final transaction conflicts.
    store.engine().fail_commit(2);
    assert_eq!(store.delete_job("backup"), Err(StoreError::Conflict));

    assert!(store.get_job("backup", &opts()).is_ok());
    assert!(store.get_executions("backup").unwrap().is_empty());

    store.delete_job("backup").unwrap();
    assert!(matches!(store.get_job("backup", &opts()), Err(StoreError::NotFound(_))));
    assert!(matches!(
        store.get_executions("backup"),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn job_delete_removes_executions_saved_after_an_earlier_bulk_delete() {
    let store = store();
    store.set_job(Job::new("backup", "@daily"), true).unwrap();
    store.set_execution(&execution("backup", 0, 1)).unwrap();

    assert_eq!(store.delete_executions("backup").unwrap(), 1);
    store.set_execution(&execution("backup", 5, 2)).unwrap();
    store.delete_job("backup").unwrap();

    assert!(matches!(
        store.get_executions("backup"),
        Err(StoreError::NotFound(_))
    ));
}

#[test]
fn bulk_delete_gives_up_after_max_attempts() {
    let store = flaky_store(10_000);
    store.set_job(Job::new("backup", "@daily"), true).unwrap();
    store.set_execution(&execution("backup", 0, 1)).unwrap();

    let before = store.engine().commits();
    store.engine().fail_every_commit();

    assert_eq!(
        store.delete_executions("backup"),
        Err(StoreError::TooManyConflicts)
    );
    assert_eq!(store.engine().commits() - before, 5);
}

#[test]
fn delete_job_surfaces_bulk_delete_exhaustion() {
    let store = flaky_store(10_000);
    store.set_job(Job::new("backup", "@daily"), true).unwrap();
    store.engine().fail_every_commit();

    assert_eq!(store.delete_job("backup"), Err(StoreError::TooManyConflicts));
}

#[test]
fn operations_fail_after_shutdown() {
    let store = Store::in_memory(StoreConfig::default()).unwrap();
    store.set_job(Job::new("backup", "@daily"), true).unwrap();
    store.shutdown().unwrap();

    assert_eq!(
        store.get_job("backup", &opts()),
        Err(StoreError::Storage(EngineError::Closed))
    );
}

#[test]
fn concurrent_upserts_of_one_job_never_lose_the_record() {
    let store = std::sync::Arc::new(store());
    store.set_job(Job::new("shared", "@daily"), true).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || {
                let mut ok = 0;
                for i in 0..25 {
                    let mut job = Job::new("shared", "@daily");
                    job.success_count = t * 100 + i;
                    match store.set_job(job, true) {
                        Ok(_) => ok += 1,
                        Err(StoreError::Conflict) => {}
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
                ok
            })
        })
        .collect();
    let committed: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();

    assert!(committed > 0);
    let job = store.get_job("shared", &opts()).unwrap();
    assert!(job.success_count < 400);
}

#[cfg(feature = "rocksdb")]
mod rocksdb_backed {
    use super::*;
    use jobvault_storage::engine::RocksEngine;

    fn open(dir: &tempfile::TempDir, max_txn_writes: usize) -> Store<RocksEngine> {
        jobvault_observability::init_test();
        let mut config = StoreConfig::default()
            .without_gc()
            .with_max_txn_writes(max_txn_writes);
        config.data_dir = dir.path().join("db");
        Store::open(config).unwrap()
    }

    #[test]
    fn round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 10_000);
        store.set_job(Job::new("A", "@daily"), true).unwrap();
        store.set_job(Job::child_of("B", "A"), true).unwrap();
        store.set_execution(&execution("A", 0, 1)).unwrap();

        assert_eq!(store.get_job("A", &opts()).unwrap().dependent_jobs, vec!["B"]);
        store.delete_job("A").unwrap();
        assert_eq!(store.get_job("B", &opts()).unwrap().parent(), None);
        store.shutdown().unwrap();
    }

    #[test]
    fn deleting_a_middle_job_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 10_000);
        store.set_job(Job::new("p", "@daily"), true).unwrap();
        store.set_job(Job::child_of("a", "p"), true).unwrap();
        store.set_job(Job::child_of("b", "a"), true).unwrap();
        for i in 0..3 {
            store.set_execution(&execution("a", i, i)).unwrap();
        }

        store.delete_job("a").unwrap();

        assert!(matches!(store.get_job("a", &opts()), Err(StoreError::NotFound(_))));
        assert!(matches!(store.get_executions("a"), Err(StoreError::NotFound(_))));
        assert_eq!(store.get_job("b", &opts()).unwrap().parent_job, None);
        assert!(store.get_job("p", &opts()).unwrap().dependent_jobs.is_empty());
    }

    #[test]
    fn bulk_delete_spans_several_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let store = open(&dir, 3);
        store.set_job(Job::new("backup", "@daily"), true).unwrap();
        store.set_job(Job::new("other", "@daily"), true).unwrap();
        for i in 0..10 {
            store.set_execution(&execution("backup", i, i)).unwrap();
        }
        store.set_execution(&execution("other", 0, 1)).unwrap();

        assert_eq!(store.delete_executions("backup").unwrap(), 10);
        assert!(store.get_executions("backup").unwrap().is_empty());
        assert_eq!(store.get_executions("other").unwrap().len(), 1);

        store.delete_job("backup").unwrap();
        assert!(matches!(
            store.get_executions("backup"),
            Err(StoreError::NotFound(_))
        ));
    }
}
