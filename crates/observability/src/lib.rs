//! Process-wide tracing setup for jobvault binaries and tests.
//!
//! Library crates only emit `tracing` events; installing a subscriber is left
//! to whoever owns the process.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::{LogFormat, init_test};

/// Initialize process-wide logging: JSON lines, filtered by `RUST_LOG`
/// (default `info`).
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::Json, "info");
}
