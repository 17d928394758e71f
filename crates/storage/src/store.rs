//! The store: an engine, a codec and the background GC loop.

use std::sync::{Arc, Mutex};

use jobvault_core::InstanceId;
use tracing::{debug, info};

use crate::codec::{Codec, JsonCodec};
use crate::config::StoreConfig;
use crate::engine::{EngineError, KvEngine, KvTxn, MemoryEngine};
use crate::error::StoreResult;
use crate::gc::{GcHandle, spawn_gc_loop};

/// Job and execution store over a transactional key-value engine.
///
/// Every mutating operation runs in a single engine transaction and surfaces
/// [`crate::StoreError::Conflict`] when a concurrent commit invalidated it;
/// callers decide whether to retry. Bulk execution deletion is the exception
/// and retries internally.
pub struct Store<E: KvEngine, C: Codec = JsonCodec> {
    pub(crate) engine: Arc<E>,
    pub(crate) codec: C,
    pub(crate) config: StoreConfig,
    instance: InstanceId,
    gc: Mutex<Option<GcHandle>>,
}

impl<E: KvEngine> Store<E> {
    /// Store over `engine` with JSON encoding.
    pub fn new(engine: E, config: StoreConfig) -> StoreResult<Self> {
        Self::with_codec(engine, JsonCodec, config)
    }
}

impl Store<MemoryEngine> {
    /// Store over a fresh in-memory engine.
    pub fn in_memory(config: StoreConfig) -> StoreResult<Self> {
        let engine = MemoryEngine::with_max_txn_writes(config.max_txn_writes);
        Self::new(engine, config)
    }
}

#[cfg(feature = "rocksdb")]
impl Store<crate::engine::RocksEngine> {
    /// Open (or create) a RocksDB-backed store at `config.data_dir`.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        let engine =
            crate::engine::RocksEngine::open_with_limit(&config.data_dir, config.max_txn_writes)?;
        Self::new(engine, config)
    }
}

impl<E: KvEngine, C: Codec> Store<E, C> {
    pub fn with_codec(engine: E, codec: C, config: StoreConfig) -> StoreResult<Self> {
        let engine = Arc::new(engine);
        let gc = if config.run_gc {
            let handle =
                spawn_gc_loop(engine.clone(), config.gc_interval(), config.gc_discard_ratio)
                    .map_err(EngineError::from)?;
            Some(handle)
        } else {
            None
        };

        let instance = InstanceId::new();
        debug!(instance = %instance, gc = config.run_gc, "store opened");

        Ok(Self {
            engine,
            codec,
            config,
            instance,
            gc: Mutex::new(gc),
        })
    }

    /// Identity of this store instance, attached to every job it loads.
    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Stop and join the GC loop, then close the engine. Later operations
    /// fail with `Storage(Closed)`.
    pub fn shutdown(&self) -> StoreResult<()> {
        self.stop_gc();
        self.engine.close()?;
        info!(instance = %self.instance, "store shut down");
        Ok(())
    }

    fn stop_gc(&self) {
        let handle = match self.gc.lock() {
            Ok(mut gc) => gc.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    /// Run `f` in a read-only transaction.
    pub(crate) fn view<'a, T>(
        &'a self,
        f: impl FnOnce(&mut E::Txn<'a>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut txn = self.engine.begin(false)?;
        f(&mut txn)
    }

    /// Run `f` in a read-write transaction and commit if it succeeds.
    pub(crate) fn update<'a, T>(
        &'a self,
        f: impl FnOnce(&mut E::Txn<'a>) -> StoreResult<T>,
    ) -> StoreResult<T> {
        let mut txn = self.engine.begin(true)?;
        let out = f(&mut txn)?;
        txn.commit()?;
        Ok(out)
    }
}

impl<E: KvEngine, C: Codec> Drop for Store<E, C> {
    fn drop(&mut self) {
        self.stop_gc();
    }
}

impl<E: KvEngine, C: Codec> std::fmt::Debug for Store<E, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("instance", &self.instance)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
