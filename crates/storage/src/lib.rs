//! Persistent job and execution store over a transactional key-value engine.
//!
//! [`Store`] keeps job definitions and their execution history, maintains the
//! parent/child links between jobs, caps stored executions per job, and runs
//! engine garbage collection in the background. The engine sits behind
//! [`engine::KvEngine`]; an in-memory engine is always available and RocksDB
//! is behind the `rocksdb` feature.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod executions;
pub mod gc;
pub mod jobs;
pub mod keys;
pub mod listing;
pub mod retention;
pub mod snapshot;
pub mod store;

pub use codec::{Codec, JsonCodec};
pub use config::StoreConfig;
pub use engine::{BackupSummary, EngineError, KvEngine, KvTxn, MemoryEngine};
pub use error::{StoreError, StoreResult};
pub use executions::GroupedExecutions;
pub use jobs::JobOptions;
pub use store::Store;
