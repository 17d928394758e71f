//! Transactional key-value engine boundary.
//!
//! The store never talks to a concrete database. It needs an ordered
//! key-value engine with snapshot-isolated transactions, optimistic
//! commit-time conflict detection, prefix scans, a transaction size limit,
//! background garbage collection and streaming backup/load. `KvEngine` and
//! `KvTxn` capture exactly that.
//!
//! Adapters:
//! - [`MemoryEngine`]: in-process MVCC engine (tests, development, embedding)
//! - `RocksEngine`: RocksDB `OptimisticTransactionDB` (feature `rocksdb`)

pub mod frame;
pub mod memory;
#[cfg(feature = "rocksdb")]
pub mod rocks;

use std::io::{Read, Write};

use thiserror::Error;

pub use memory::{MemoryEngine, MemoryTxn};
#[cfg(feature = "rocksdb")]
pub use rocks::{RocksEngine, RocksTxn};

/// Signals raised by an engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Another transaction committed a write to a key this transaction read
    /// or wrote. Transient; the caller may retry with a fresh transaction.
    #[error("transaction conflict, please retry")]
    Conflict,

    /// The transaction holds as many writes as the engine allows. The write
    /// that hit the limit was not recorded.
    #[error("transaction too big")]
    TxnTooBig,

    #[error("engine is closed")]
    Closed,

    #[error("write attempted in a read-only transaction")]
    ReadOnly,

    #[error("engine I/O error: {0}")]
    Io(String),

    #[error("engine data corrupted: {0}")]
    Corrupted(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::InvalidData | std::io::ErrorKind::UnexpectedEof => {
                EngineError::Corrupted(err.to_string())
            }
            _ => EngineError::Io(err.to_string()),
        }
    }
}

/// Options for [`KvTxn::scan`].
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Skip loading values; returned pairs carry an empty value.
    pub keys_only: bool,
    /// Start at this key (inclusive) instead of at the prefix.
    pub start_at: Option<Vec<u8>>,
}

impl ScanOptions {
    pub fn keys_only() -> Self {
        Self {
            keys_only: true,
            start_at: None,
        }
    }

    pub fn resume_at(mut self, key: Vec<u8>) -> Self {
        self.start_at = Some(key);
        self
    }
}

/// A key and its value as returned by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Outcome of a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BackupSummary {
    /// Number of key/value pairs written.
    pub entries: u64,
    /// Engine version the backup is consistent with.
    pub version: u64,
}

/// A transaction.
///
/// Reads see a consistent snapshot plus the transaction's own pending writes.
/// Writes become visible to others only on a successful `commit`. Dropping a
/// transaction without committing discards it.
pub trait KvTxn {
    fn get(&mut self, key: &[u8]) -> EngineResult<Option<Vec<u8>>>;

    fn set(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()>;

    fn delete(&mut self, key: &[u8]) -> EngineResult<()>;

    /// Every pair whose key starts with `prefix`, in key order.
    fn scan(&mut self, prefix: &[u8], opts: &ScanOptions) -> EngineResult<Vec<KvPair>>;

    /// Commit pending writes. Fails with [`EngineError::Conflict`] when a
    /// concurrent commit invalidated this transaction.
    fn commit(self) -> EngineResult<()>;
}

/// An embedded, ordered, transactional key-value engine.
pub trait KvEngine: Send + Sync + 'static {
    type Txn<'a>: KvTxn
    where
        Self: 'a;

    /// Open a transaction. Read-only transactions never conflict.
    fn begin(&self, writable: bool) -> EngineResult<Self::Txn<'_>>;

    /// Run one garbage-collection pass.
    ///
    /// Returns `true` when the pass reclaimed space and another pass may
    /// reclaim more, `false` when there is nothing left worth rewriting.
    fn collect_garbage(&self, discard_ratio: f64) -> EngineResult<bool>;

    /// Stream a point-in-time copy of every live pair to `sink`.
    fn backup(&self, sink: &mut dyn Write) -> EngineResult<BackupSummary>;

    /// Load a stream produced by [`KvEngine::backup`]. Pairs in the stream
    /// overwrite existing keys; keys absent from the stream are kept.
    /// Returns the number of pairs loaded.
    fn load(&self, source: &mut dyn Read) -> EngineResult<u64>;

    /// Refuse new transactions from now on.
    fn close(&self) -> EngineResult<()>;
}
