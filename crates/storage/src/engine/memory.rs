//! In-process MVCC engine.
//!
//! Every key holds a chain of versions stamped with the commit timestamp that
//! wrote them (a `None` value is a tombstone). A transaction reads the newest
//! version at or below its start timestamp. At commit, the transaction fails
//! with [`EngineError::Conflict`] if any key it read, wrote or scanned over
//! received a newer version in the meantime.
//!
//! Garbage collection drops versions no active reader can see anymore.
//!
//! Intended for tests, development and embedding. Data lives in memory; use
//! [`KvEngine::backup`] to persist it.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use super::frame::{FrameReader, FrameWriter};
use super::{BackupSummary, EngineError, EngineResult, KvEngine, KvPair, KvTxn, ScanOptions};

/// Default write limit of a single transaction.
pub const DEFAULT_MAX_TXN_WRITES: usize = 10_000;

/// Number of version chains a single GC pass may rewrite.
const GC_BATCH: usize = 1_024;

#[derive(Debug, Clone)]
struct Version {
    ts: u64,
    value: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct State {
    data: BTreeMap<Vec<u8>, Vec<Version>>,
    last_ts: u64,
    /// Start timestamps of open transactions, with multiplicity.
    active: BTreeMap<u64, usize>,
    closed: bool,
}

impl State {
    fn visible(&self, key: &[u8], ts: u64) -> Option<&[u8]> {
        self.data
            .get(key)
            .and_then(|chain| chain.iter().rev().find(|v| v.ts <= ts))
            .and_then(|v| v.value.as_deref())
    }

    fn latest_ts(&self, key: &[u8]) -> Option<u64> {
        self.data
            .get(key)
            .and_then(|chain| chain.last())
            .map(|v| v.ts)
    }

    fn prefix_range<'a>(
        &'a self,
        prefix: &'a [u8],
        start: &'a [u8],
    ) -> impl Iterator<Item = (&'a Vec<u8>, &'a Vec<Version>)> + 'a {
        self.data
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
    }

    /// Oldest timestamp any open transaction may still read at.
    fn watermark(&self) -> u64 {
        self.active
            .keys()
            .next()
            .copied()
            .unwrap_or(self.last_ts)
    }
}

/// In-memory optimistic MVCC engine.
#[derive(Debug)]
pub struct MemoryEngine {
    state: RwLock<State>,
    max_txn_writes: usize,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_max_txn_writes(DEFAULT_MAX_TXN_WRITES)
    }

    /// Engine whose transactions fail with [`EngineError::TxnTooBig`] once
    /// they hold `max_txn_writes` pending writes.
    pub fn with_max_txn_writes(max_txn_writes: usize) -> Self {
        Self {
            state: RwLock::new(State::default()),
            max_txn_writes: max_txn_writes.max(1),
        }
    }

    /// Total number of stored versions, tombstones included.
    pub fn version_count(&self) -> usize {
        self.read()
            .map(|s| s.data.values().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn read(&self) -> EngineResult<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| EngineError::Corrupted("lock poisoned".to_string()))
    }

    fn write(&self) -> EngineResult<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| EngineError::Corrupted("lock poisoned".to_string()))
    }

    fn release(&self, read_ts: u64) {
        // Poisoning only loses a watermark entry; GC just keeps more versions.
        if let Ok(mut state) = self.state.write() {
            if let Some(count) = state.active.get_mut(&read_ts) {
                *count -= 1;
                if *count == 0 {
                    state.active.remove(&read_ts);
                }
            }
        }
    }
}

impl KvEngine for MemoryEngine {
    type Txn<'a> = MemoryTxn<'a>;

    fn begin(&self, writable: bool) -> EngineResult<MemoryTxn<'_>> {
        let mut state = self.write()?;
        if state.closed {
            return Err(EngineError::Closed);
        }
        let read_ts = state.last_ts;
        *state.active.entry(read_ts).or_insert(0) += 1;

        Ok(MemoryTxn {
            engine: self,
            read_ts,
            writable,
            pending: BTreeMap::new(),
            reads: BTreeSet::new(),
            scanned: Vec::new(),
        })
    }

    fn collect_garbage(&self, discard_ratio: f64) -> EngineResult<bool> {
        let mut state = self.write()?;
        if state.closed {
            return Err(EngineError::Closed);
        }
        let watermark = state.watermark();

        // A chain is worth rewriting when enough of it is invisible to every
        // reader: all versions older than the newest one at or below the
        // watermark, plus that one too if it is a tombstone with nothing newer.
        let candidates: Vec<Vec<u8>> = state
            .data
            .iter()
            .filter(|(_, chain)| {
                let stale = stale_versions(chain, watermark);
                stale > 0 && stale as f64 / chain.len() as f64 >= discard_ratio
            })
            .map(|(k, _)| k.clone())
            .take(GC_BATCH)
            .collect();

        if candidates.is_empty() {
            return Ok(false);
        }

        let mut reclaimed = 0usize;
        for key in &candidates {
            let Some(chain) = state.data.get_mut(key) else {
                continue;
            };
            let before = chain.len();
            if let Some(base) = chain.iter().rposition(|v| v.ts <= watermark) {
                chain.drain(..base);
                if chain.len() == 1 && chain[0].value.is_none() {
                    chain.clear();
                }
            }
            reclaimed += before - chain.len();
            if chain.is_empty() {
                state.data.remove(key);
            }
        }

        debug!(
            chains = candidates.len(),
            versions = reclaimed,
            watermark,
            "memory engine: garbage collected"
        );
        Ok(reclaimed > 0)
    }

    fn backup(&self, sink: &mut dyn Write) -> EngineResult<BackupSummary> {
        // Copy under the read lock, write outside it so slow sinks do not
        // stall writers.
        let (version, pairs) = {
            let state = self.read()?;
            if state.closed {
                return Err(EngineError::Closed);
            }
            let version = state.last_ts;
            let pairs: Vec<(Vec<u8>, Vec<u8>)> = state
                .data
                .keys()
                .filter_map(|k| state.visible(k, version).map(|v| (k.clone(), v.to_vec())))
                .collect();
            (version, pairs)
        };

        let mut writer = FrameWriter::new(sink)?;
        for (key, value) in &pairs {
            writer.write_entry(key, value)?;
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
        self.write()?.closed = true;
        Ok(())
    }
}

fn stale_versions(chain: &[Version], watermark: u64) -> usize {
    match chain.iter().rposition(|v| v.ts <= watermark) {
        Some(base) if base + 1 == chain.len() && chain[base].value.is_none() => base + 1,
        Some(base) => base,
        None => 0,
    }
}

/// Transaction over a [`MemoryEngine`].
#[derive(Debug)]
pub struct MemoryTxn<'a> {
    engine: &'a MemoryEngine,
    read_ts: u64,
    writable: bool,
    pending: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    reads: BTreeSet<Vec<u8>>,
    scanned: Vec<Vec<u8>>,
}

impl MemoryTxn<'_> {
    fn stage(&mut self, key: &[u8], value: Option<Vec<u8>>) -> EngineResult<()> {
        if !self.writable {
            return Err(EngineError::ReadOnly);
        }
        if self.pending.len() >= self.engine.max_txn_writes && !self.pending.contains_key(key) {
            return Err(EngineError::TxnTooBig);
        }
        self.pending.insert(key.to_vec(), value);
        Ok(())
    }

    fn conflicts(&self, state: &State) -> bool {
        let newer = |key: &[u8]| state.latest_ts(key).is_some_and(|ts| ts > self.read_ts);

        self.reads.iter().any(|k| newer(k.as_slice()))
            || self.pending.keys().any(|k| newer(k.as_slice()))
            || self.scanned.iter().any(|prefix| {
                state
                    .prefix_range(prefix, prefix)
                    .any(|(_, chain)| chain.last().is_some_and(|v| v.ts > self.read_ts))
            })
    }
}

impl KvTxn for MemoryTxn<'_> {
    fn get(&mut self, key: &[u8]) -> EngineResult<Option<Vec<u8>>> {
        if let Some(pending) = self.pending.get(key) {
            return Ok(pending.clone());
        }
        if self.writable {
            self.reads.insert(key.to_vec());
        }
        let state = self.engine.read()?;
        Ok(state.visible(key, self.read_ts).map(<[u8]>::to_vec))
    }

    fn set(&mut self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        self.stage(key, Some(value.to_vec()))
    }

    fn delete(&mut self, key: &[u8]) -> EngineResult<()> {
        self.stage(key, None)
    }

    fn scan(&mut self, prefix: &[u8], opts: &ScanOptions) -> EngineResult<Vec<KvPair>> {
        if self.writable {
            self.scanned.push(prefix.to_vec());
        }
        let start: &[u8] = match &opts.start_at {
            Some(at) if at.as_slice() > prefix => at.as_slice(),
            _ => prefix,
        };

        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = {
            let state = self.engine.read()?;
            state
                .prefix_range(prefix, start)
                .filter_map(|(k, _)| {
                    state.visible(k, self.read_ts).map(|v| {
                        let value = if opts.keys_only { Vec::new() } else { v.to_vec() };
                        (k.clone(), value)
                    })
                })
                .collect()
        };

        let own = self
            .pending
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .take_while(|(k, _)| k.starts_with(prefix));
        for (key, value) in own {
            match value {
                Some(v) => {
                    let value = if opts.keys_only { Vec::new() } else { v.clone() };
                    merged.insert(key.clone(), value);
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged
            .into_iter()
            .map(|(key, value)| KvPair { key, value })
            .collect())
    }

    fn commit(mut self) -> EngineResult<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let mut state = self.engine.write()?;
        if state.closed {
            return Err(EngineError::Closed);
        }
        if self.conflicts(&state) {
            return Err(EngineError::Conflict);
        }

        let commit_ts = state.last_ts + 1;
        for (key, value) in std::mem::take(&mut self.pending) {
            state
                .data
                .entry(key)
                .or_default()
                .push(Version { ts: commit_ts, value });
        }
        state.last_ts = commit_ts;

        Ok(())
    }
}

impl Drop for MemoryTxn<'_> {
    fn drop(&mut self) {
        self.engine.release(self.read_ts);
    }
}
