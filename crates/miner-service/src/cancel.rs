//! Stop signalling between the lifecycle thread and the worker.
//!
//! The worker polls an atomic "still active" flag once per iteration and parks
//! between iterations on a channel that is never written to. Stopping clears
//! the flag and drops the sender, which wakes the parked worker immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Create a connected handle/token pair for one session.
pub fn stop_pair() -> (StopHandle, StopToken) {
    let active = Arc::new(AtomicBool::new(true));
    let (wake_tx, wake_rx) = bounded(0);
    (
        StopHandle {
            active: active.clone(),
            wake_tx: Some(wake_tx),
        },
        StopToken { active, wake_rx },
    )
}

/// Owned by the lifecycle controller.
#[derive(Debug)]
pub struct StopHandle {
    active: Arc<AtomicBool>,
    wake_tx: Option<Sender<()>>,
}

impl StopHandle {
    /// Clear the active flag and interrupt any pending sleep. Idempotent.
    pub fn stop(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.wake_tx.take();
    }
}

/// Moved into the worker thread.
#[derive(Clone, Debug)]
pub struct StopToken {
    active: Arc<AtomicBool>,
    wake_rx: Receiver<()>,
}

impl StopToken {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Sleep for `interval` unless interrupted.
    ///
    /// Returns `true` if the session is still active afterwards, `false` if
    /// the sleep was interrupted or the flag was cleared meanwhile.
    pub fn sleep(&self, interval: Duration) -> bool {
        match self.wake_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => self.is_active(),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => false,
        }
    }
}
