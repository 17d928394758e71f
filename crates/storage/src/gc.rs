//! Background garbage collection.

use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::{EngineError, KvEngine};

/// Handle to a running GC loop.
#[derive(Debug)]
pub struct GcHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl GcHandle {
    /// Signal the loop and wait for it to exit.
    pub fn stop(mut self) {
        self.signal_and_join();
    }

    fn signal_and_join(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

impl Drop for GcHandle {
    fn drop(&mut self) {
        self.signal_and_join();
    }
}

/// Spawn the GC loop on its own thread.
///
/// Every `interval` the loop runs engine garbage collection until the engine
/// reports nothing left to reclaim. It exits as soon as the handle is stopped
/// or dropped.
pub fn spawn_gc_loop<E: KvEngine>(
    engine: Arc<E>,
    interval: Duration,
    discard_ratio: f64,
) -> std::io::Result<GcHandle> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

    let join = thread::Builder::new()
        .name("jobvault-gc".to_string())
        .spawn(move || {
            info!(interval_secs = interval.as_secs(), discard_ratio, "gc loop started");
            loop {
                match shutdown_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        run_value_log_gc(engine.as_ref(), discard_ratio);
                    }
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => break,
                }
            }
            info!("gc loop stopped");
        })?;

    Ok(GcHandle {
        shutdown: shutdown_tx,
        join: Some(join),
    })
}

/// Collect garbage until the engine has nothing left worth rewriting.
/// Returns the number of passes that reclaimed space.
pub fn run_value_log_gc<E: KvEngine + ?Sized>(engine: &E, discard_ratio: f64) -> usize {
    let mut passes = 0;
    loop {
        match engine.collect_garbage(discard_ratio) {
            Ok(true) => passes += 1,
            Ok(false) => break,
            Err(EngineError::Closed) => {
                debug!("gc: engine closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "gc: pass failed");
                break;
            }
        }
    }
    if passes > 0 {
        debug!(passes, "gc: reclaimed space");
    }
    passes
}
