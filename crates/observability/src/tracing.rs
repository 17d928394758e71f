//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event, for log shippers.
    #[default]
    Json,
    /// Human-readable lines.
    Pretty,
}

/// `RUST_LOG` if set and valid, `default_directive` otherwise.
pub fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install the global subscriber. Returns `false` when one was already
/// installed.
pub fn init(format: LogFormat, default_directive: &str) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    match format {
        LogFormat::Json => builder.json().with_target(false).try_init().is_ok(),
        LogFormat::Pretty => builder.with_target(true).try_init().is_ok(),
    }
}

/// Subscriber for tests: readable output captured by the test harness,
/// `warn` unless `RUST_LOG` says otherwise.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("warn"))
        .with_test_writer()
        .try_init();
}
