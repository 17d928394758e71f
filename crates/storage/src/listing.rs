//! Prefix listing shared by the job and execution repositories.

use crate::engine::{KvPair, KvTxn, ScanOptions};
use crate::error::{StoreError, StoreResult};
use crate::keys::{SEPARATOR, container_marker};

/// Every pair stored under `prefix`, in key order.
///
/// Only keys in the `prefix/` namespace match, so `executions/a` never picks
/// up `executions/ab/...`. The container marker (`prefix/`) makes the
/// namespace exist but is not returned.
///
/// With `check_root`, a non-empty prefix whose namespace holds nothing at all
/// (not even the marker) is reported as [`StoreError::NotFound`].
pub fn list_in<T: KvTxn>(txn: &mut T, prefix: &str, check_root: bool) -> StoreResult<Vec<KvPair>> {
    let root = prefix.trim_end_matches(SEPARATOR);
    let scan_prefix = if root.is_empty() {
        String::new()
    } else {
        container_marker(root)
    };

    let pairs = txn.scan(scan_prefix.as_bytes(), &ScanOptions::default())?;
    if check_root && !root.is_empty() && pairs.is_empty() {
        return Err(StoreError::not_found(root));
    }

    Ok(pairs
        .into_iter()
        .filter(|kv| kv.key != scan_prefix.as_bytes())
        .collect())
}
