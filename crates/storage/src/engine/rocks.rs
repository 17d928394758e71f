//! RocksDB adapter backed by `OptimisticTransactionDB`.
//!
//! Transactions validate at commit against the snapshot taken at begin;
//! RocksDB reports invalidated commits as `Busy` or `TryAgain`, which map to
//! [`EngineError::Conflict`]. Reads go through a second snapshot taken right
//! after, so a transaction never sees commits newer than the ones it is
//! validated against. Keys returned by a writable scan are tracked for
//! conflicts like point reads. Keys inserted under a scanned prefix by another
//! transaction are not; callers that need that guard a marker key instead.

use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use rocksdb::{
    Direction, ErrorKind, IteratorMode, MultiThreaded, OptimisticTransactionDB,
    OptimisticTransactionOptions, Options, ReadOptions, SnapshotWithThreadMode, Transaction,
    WriteOptions,
};
use tracing::{debug, info};

use super::frame::{FrameReader, FrameWriter};
use super::memory::DEFAULT_MAX_TXN_WRITES;
use super::{BackupSummary, EngineError, EngineResult, KvEngine, KvPair, KvTxn, ScanOptions};

type Db = OptimisticTransactionDB<MultiThreaded>;

impl From<rocksdb::Error> for EngineError {
    fn from(err: rocksdb::Error) -> Self {
        match err.kind() {
            ErrorKind::Busy | ErrorKind::TryAgain => EngineError::Conflict,
            ErrorKind::Corruption => EngineError::Corrupted(err.into_string()),
            _ => EngineError::Io(err.into_string()),
        }
    }
}

pub struct RocksEngine {
    db: Db,
    max_txn_writes: usize,
    closed: AtomicBool,
}

impl std::fmt::Debug for RocksEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksEngine")
            .field("path", &self.db.path())
            .field("max_txn_writes", &self.max_txn_writes)
            .finish()
    }
}

impl RocksEngine {
    /// Open (or create) a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> EngineResult<Self> {
        Self::open_with_limit(path, DEFAULT_MAX_TXN_WRITES)
    }

    pub fn open_with_limit(path: impl AsRef<Path>, max_txn_writes: usize) -> EngineResult<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        let db = Db::open(&opts, path.as_ref())?;
        info!(path = %path.as_ref().display(), "rocksdb engine opened");

        Ok(Self {
            db,
            max_txn_writes: max_txn_writes.max(1),
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::Closed);
        }
        Ok(())
    }
}

impl KvEngine for RocksEngine {
    type Txn<'a> = RocksTxn<'a>;

    fn begin(&self, writable: bool) -> EngineResult<RocksTxn<'_>> {
        self.ensure_open()?;
        let mut txn_opts = OptimisticTransactionOptions::new();
        txn_opts.set_snapshot(true);
        let txn = self.db.transaction_opt(&WriteOptions::default(), &txn_opts);
        // Taken after the transaction's own snapshot: a commit landing in
        // between is visible and flagged at commit, never silently missed.
        let snapshot = self.db.snapshot();

        Ok(RocksTxn {
            txn,
            snapshot,
            writable,
            writes: 0,
            max_writes: self.max_txn_writes,
        })
    }

    fn collect_garbage(&self, _discard_ratio: f64) -> EngineResult<bool> {
        // Compaction reclaims everything in one go; there is never a second
        // pass worth running.
        self.ensure_open()?;
        self.db.compact_range(None::<&[u8]>, None::<&[u8]>);
        debug!("rocksdb engine: compacted");
        Ok(false)
    }

    fn backup(&self, sink: &mut dyn Write) -> EngineResult<BackupSummary> {
        self.ensure_open()?;
        let snapshot = self.db.snapshot();
        let version = self.db.latest_sequence_number();

        let mut writer = FrameWriter::new(sink)?;
        for item in snapshot.iterator(IteratorMode::Start) {
            let (key, value) = item?;
            writer.write_entry(&key, &value)?;
        }
        let entries = writer.finish()?;

        Ok(BackupSummary { entries, version })
    }

    fn load(&self, source: &mut dyn Read) -> EngineResult<u64> {
        let mut reader = FrameReader::new(source)?;
        let mut loaded = 0u64;
        let mut txn = self.begin(true)?;

        while let Some((key, value)) = reader.next_entry()? {
            match txn.set(&key, &value) {
                Ok(()) => {}
                Err(EngineError::TxnTooBig) => {
                    txn.commit()?;
                    txn = self.begin(true)?;
                    txn.set(&key, &value)?;
                }
                Err(e) => return Err(e),
            }
            loaded += 1;
        }
        txn.commit()?;

        Ok(loaded)
    }

    fn close(&self) -> EngineResult<()> {
        self.closed.store(true, Ordering::Release);
        self.db.flush()?;
        Ok(())
    }
}

pub struct RocksTxn<'a> {
    txn: Transaction<'a, Db>,
    snapshot: SnapshotWithThreadMode<'a, Db>,
    writable: bool,
    writes: usize,
    max_writes: usize,
}

impl RocksTxn<'_> {
    fn read_opts(&self) -> ReadOptions {
        let mut opts = ReadOptions::default();
        opts.set_snapshot(&self.snapshot);
        opts
    }

    fn count_write(&mut self) -> EngineResult<()> {
        if !self.writable {
            return Err(EngineError::ReadOnly);
        }
        if self.writes >= self.max_writes {
            return Err(EngineError::TxnTooBig);
        }
        self.writes += 1;
        Ok(())
    }
}

impl KvTxn for RocksTxn<'_> {
    fn get(&mut self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        let opts = self.read_opts();
        let value = if self.writable {
            self.txn.get_for_update_opt(key, true, &opts)?
        } else {
            self.txn.get_opt(key, &opts)?
        };
        Ok(value)
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.count_write()?;
        self.txn.put(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<()> {
        self.count_write()?;
        self.txn.delete(key)?;
        Ok(())
    }

    fn scan(&mut self, prefix: &[u8], opts: &ScanOptions) -> EngineResult<Vec<KvPair>> {
        let start = match &opts.start_at {
            Some(at) if at.as_slice() > prefix => at.as_slice(),
            _ => prefix,
        };

        let mut pairs = Vec::new();
        let iter = self
            .txn
            .iterator_opt(IteratorMode::From(start, Direction::Forward), self.read_opts());
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(prefix) {
                break;
            }
            let value = if opts.keys_only { Vec::new() } else { value.into_vec() };
            pairs.push(KvPair { key: key.into_vec(), value });
        }

        if self.writable {
            let opts = self.read_opts();
            for pair in &pairs {
                self.txn.get_for_update_opt(&pair.key, true, &opts)?;
            }
        }
        Ok(pairs)
    }

    fn commit(self) -> EngineResult<()> {
        self.txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> (tempfile::TempDir, RocksEngine) {
        let dir = tempfile::tempdir().unwrap();
        let engine = RocksEngine::open_with_limit(dir.path(), 2).unwrap();
        (dir, engine)
    }

    #[test]
    fn commits_and_scans_by_prefix() {
        let (_dir, engine) = engine();
        let mut txn = engine.begin(true).unwrap();
        txn.set(b"jobs/a", b"1").unwrap();
        txn.set(b"jobs/b", b"2").unwrap();
        assert_eq!(txn.set(b"jobs/c", b"3"), Err(EngineError::TxnTooBig));
        txn.commit().unwrap();

        let mut txn = engine.begin(false).unwrap();
        let keys: Vec<_> = txn
            .scan(b"jobs/", &ScanOptions::keys_only())
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec![b"jobs/a".to_vec(), b"jobs/b".to_vec()]);
    }

    #[test]
    fn concurrent_update_conflicts() {
        let (_dir, engine) = engine();
        let mut first = engine.begin(true).unwrap();
        first.get(b"k").unwrap();
        first.set(b"k", b"first").unwrap();

        let mut second = engine.begin(true).unwrap();
        second.set(b"k", b"second").unwrap();
        second.commit().unwrap();

        assert_eq!(first.commit(), Err(EngineError::Conflict));
    }

    #[test]
    fn reads_stay_on_the_begin_snapshot() {
        let (_dir, engine) = engine();
        let mut txn = engine.begin(true).unwrap();
        txn.set(b"jobs/a", b"v1").unwrap();
        txn.commit().unwrap();

        let mut reader = engine.begin(false).unwrap();
        let mut writer = engine.begin(true).unwrap();
        writer.set(b"jobs/a", b"v2").unwrap();
        writer.set(b"jobs/b", b"new").unwrap();
        writer.commit().unwrap();

        assert_eq!(reader.get(b"jobs/a").unwrap(), Some(b"v1".to_vec()));
        let keys: Vec<_> = reader
            .scan(b"jobs/", &ScanOptions::keys_only())
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec![b"jobs/a".to_vec()]);
    }

    #[test]
    fn marker_read_conflicts_with_a_later_marker_write() {
        let (_dir, engine) = engine();
        let mut txn = engine.begin(true).unwrap();
        txn.set(b"executions/a/", b"").unwrap();
        txn.commit().unwrap();

        let mut save = engine.begin(true).unwrap();
        save.get(b"executions/a/").unwrap();
        save.set(b"executions/a/1-n", b"x").unwrap();

        let mut bulk = engine.begin(true).unwrap();
        bulk.set(b"executions/a/", b"").unwrap();
        bulk.commit().unwrap();

        assert_eq!(save.commit(), Err(EngineError::Conflict));
    }

    #[test]
    fn backup_round_trips_into_a_fresh_database() {
        let (_dir, source) = engine();
        let mut txn = source.begin(true).unwrap();
        txn.set(b"jobs/a", b"A").unwrap();
        txn.commit().unwrap();

        let mut buf = Vec::new();
        assert_eq!(source.backup(&mut buf).unwrap().entries, 1);

        let (_dir2, target) = engine();
        assert_eq!(target.load(&mut buf.as_slice()).unwrap(), 1);
        let mut txn = target.begin(false).unwrap();
        assert_eq!(txn.get(b"jobs/a").unwrap(), Some(b"A".to_vec()));
    }
}
