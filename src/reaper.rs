//! Background expiry sweeps.
//!
//! Reaping only reclaims storage: expired leases are already ignored by
//! every read, so a stopped or slow reaper never affects correctness.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Result;
use crate::service::LeaseService;
use crate::store::LeaseStore;

/// Run one sweep, logging instead of failing.
pub fn sweep_once<S: LeaseStore>(service: &LeaseService<S>) -> usize {
    match service.sweep() {
        Ok(reaped) => {
            if reaped > 0 {
                tracing::info!(reaped, "expired leases reaped");
            }
            reaped
        }
        Err(e) => {
            tracing::warn!(error = %e, "expiry sweep failed");
            0
        }
    }
}

/// Handle to the reaper thread. Dropping it stops the thread too.
pub struct ReaperHandle {
    running: Arc<AtomicBool>,
    wake: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl ReaperHandle {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Signal the thread and wait for the sweep in progress, if any.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.take();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            tracing::error!("reaper thread panicked");
        }
    }
}

impl Drop for ReaperHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sweep every `interval` until stopped.
pub fn spawn<S>(service: Arc<LeaseService<S>>, interval: Duration) -> Result<ReaperHandle>
where
    S: LeaseStore + 'static,
{
    let running = Arc::new(AtomicBool::new(true));
    let (wake, rx) = mpsc::channel::<()>();
    let flag = Arc::clone(&running);

    let thread = thread::Builder::new()
        .name("pathlease-reaper".into())
        .spawn(move || {
            tracing::debug!(interval_ms = interval.as_millis() as u64, "reaper started");
            while flag.load(Ordering::SeqCst) {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        sweep_once(&service);
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            }
            tracing::debug!("reaper stopped");
        })?;

    Ok(ReaperHandle {
        running,
        wake: Some(wake),
        thread: Some(thread),
    })
}
