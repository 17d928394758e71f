//! Backup and restore of the whole store.

use std::io::{Read, Write};

use tracing::info;

use crate::codec::Codec;
use crate::engine::{BackupSummary, KvEngine};
use crate::error::StoreResult;
use crate::store::Store;

impl<E: KvEngine, C: Codec> Store<E, C> {
    /// Stream a point-in-time copy of every job and execution to `sink`.
    /// Safe to run alongside other operations.
    pub fn snapshot<W: Write>(&self, mut sink: W) -> StoreResult<BackupSummary> {
        let summary = self.engine.backup(&mut sink)?;
        info!(entries = summary.entries, version = summary.version, "store: snapshot written");
        Ok(summary)
    }

    /// Load a snapshot into the live store. Keys present in the snapshot
    /// overwrite local ones; everything else is kept.
    pub fn restore<R: Read>(&self, mut source: R) -> StoreResult<u64> {
        let loaded = self.engine.load(&mut source)?;
        info!(entries = loaded, "store: snapshot restored");
        Ok(loaded)
    }
}
