//! Experiment miner service.
//!
//! This crate provides the session machinery:
//! - `MiningService`: the lifecycle controller (`start` / `stop`)
//! - `worker`: the timed work loop run on one dedicated thread
//! - `notifier` and `wake_lock`: host resources held for the session
//! - `host`: adapter from host create/start/destroy callbacks

#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod cancel;
pub mod clock;
pub mod host;
pub mod notifier;
pub mod wake_lock;
pub mod worker;

#[cfg(test)]
mod end_to_end_tests;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::NaiveDateTime;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use engine_cpu::{MixWorkload, Workload};
use metrics::CsvLog;

use crate::cancel::{stop_pair, StopHandle};
use crate::clock::{Clock, SystemClock};
use crate::notifier::{LogSurface, NotificationSurface, PresenceNotifier};
use crate::wake_lock::{TimedWakeLock, WakeLock, DEFAULT_WAKE_LOCK_TIMEOUT};
use crate::worker::WorkLoop;

pub use crate::host::{Binder, HostService, ServiceHost, StartDirective, StartIntent};
pub use crate::worker::WorkerSummary;

/// Pool label used when the host starts the service without one.
pub const DEFAULT_POOL_URL: &str = "pool.supportxmr.com:3333";

/// Session configuration provided by the host or CLI.
#[derive(Clone, Debug)]
pub struct ServiceConfig {
    /// Free-form endpoint label. Only logged; no connection is made.
    pub pool_url: String,
    /// Root under which `experiment_data/` is created.
    pub data_root: PathBuf,
    /// Pause between iterations.
    pub iteration_interval: Duration,
    /// Refresh the presence notification every this many iterations (0 disables).
    pub notify_every: u64,
    /// Absolute ceiling on the wake lock.
    pub wake_lock_timeout: Duration,
    /// How long `stop` waits for the worker before detaching it.
    pub stop_timeout: Duration,
    /// Stop on its own after this many iterations.
    pub max_iterations: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            pool_url: DEFAULT_POOL_URL.to_string(),
            data_root: PathBuf::from("."),
            iteration_interval: Duration::from_millis(100),
            notify_every: 50,
            wake_lock_timeout: DEFAULT_WAKE_LOCK_TIMEOUT,
            stop_timeout: Duration::from_secs(1),
            max_iterations: None,
        }
    }
}

impl fmt::Display for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool={}, data_root={}, interval={:?}, notify_every={}, wake_lock_timeout={:?}, stop_timeout={:?}, max_iterations={}",
            self.pool_url,
            self.data_root.display(),
            self.iteration_interval,
            self.notify_every,
            self.wake_lock_timeout,
            self.stop_timeout,
            self.max_iterations
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unbounded".to_string())
        )
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ServiceState {
    Inactive,
    Starting,
    Active,
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("a session for {pool_url} is already running (state {state:?})")]
    AlreadyActive {
        pool_url: String,
        state: ServiceState,
    },
}

/// One activation of the service.
struct RunSession {
    started_at: NaiveDateTime,
    target_endpoint: String,
    log_path: Option<PathBuf>,
    stop: StopHandle,
    worker: Option<thread::JoinHandle<WorkerSummary>>,
    /// Disconnects when the worker thread exits.
    done_rx: Receiver<()>,
    stop_timeout: Duration,
}

/// Lifecycle controller.
///
/// Owns the wake lock and the worker thread of the current session. Resource
/// failures are logged and never returned; the only error a caller sees is a
/// rejected duplicate activation.
pub struct MiningService {
    workload: Arc<dyn Workload>,
    clock: Arc<dyn Clock>,
    notifier: Arc<PresenceNotifier>,
    wake_lock: Box<dyn WakeLock>,
    state: ServiceState,
    session: Option<RunSession>,
}

impl MiningService {
    pub fn builder() -> MiningServiceBuilder {
        MiningServiceBuilder::default()
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Path of the current session's log, if one was created.
    pub fn log_path(&self) -> Option<&Path> {
        self.session.as_ref().and_then(|s| s.log_path.as_deref())
    }

    /// Whether the current session's worker thread has exited.
    pub fn worker_finished(&self) -> bool {
        self.session
            .as_ref()
            .and_then(|s| s.worker.as_ref())
            .map_or(true, |h| h.is_finished())
    }

    pub fn wake_lock_held(&self) -> bool {
        self.wake_lock.is_held()
    }

    /// Create the notification channel ahead of the first session.
    pub fn prepare(&self) {
        self.notifier.ensure_channel();
    }

    /// Begin a session.
    ///
    /// Setup runs in order: presence notification, wake lock, log file,
    /// worker thread. A failed step is logged and skipped; there is no
    /// rollback.
    pub fn start(&mut self, config: ServiceConfig) -> Result<(), ServiceError> {
        if self.state != ServiceState::Inactive {
            return Err(ServiceError::AlreadyActive {
                pool_url: self
                    .session
                    .as_ref()
                    .map(|s| s.target_endpoint.clone())
                    .unwrap_or_default(),
                state: self.state,
            });
        }
        self.state = ServiceState::Starting;
        log::info!("starting session: {config}");

        self.notifier.ensure_channel();
        self.notifier.refresh();

        if let Err(e) = self.wake_lock.acquire(config.wake_lock_timeout) {
            log::warn!("failed to acquire wake lock: {e:#}");
        }

        let started_at = self.clock.now();
        let sink = match CsvLog::create(&config.data_root, started_at) {
            Ok(log) => Some(log),
            Err(e) => {
                log::error!("metrics log unavailable, continuing without it: {e:#}");
                None
            }
        };
        let log_path = sink.as_ref().map(|l| l.path().to_path_buf());

        let (stop, token) = stop_pair();
        let (done_tx, done_rx) = bounded::<()>(1);
        let work = WorkLoop {
            workload: self.workload.clone(),
            clock: self.clock.clone(),
            notifier: self.notifier.clone(),
            log: sink,
            notify_every: config.notify_every,
            interval: config.iteration_interval,
            max_iterations: config.max_iterations,
            pool_url: config.pool_url.clone(),
        };

        let worker = thread::Builder::new()
            .name("miner-worker".to_string())
            .spawn(move || {
                let _done = done_tx;
                work.run(token)
            });
        let worker = match worker {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("failed to spawn worker thread: {e}");
                None
            }
        };

        self.session = Some(RunSession {
            started_at,
            target_endpoint: config.pool_url,
            log_path,
            stop,
            worker,
            done_rx,
            stop_timeout: config.stop_timeout,
        });
        self.state = ServiceState::Active;
        metrics::set_active_sessions(1);
        Ok(())
    }

    /// End the current session. No-op when inactive.
    ///
    /// Returns the worker's summary when it exited within the stop timeout,
    /// `None` if there was no session or the worker had to be detached.
    pub fn stop(&mut self) -> Option<WorkerSummary> {
        let mut session = self.session.take()?;
        self.state = ServiceState::Stopping;

        session.stop.stop();
        let summary = session.worker.take().and_then(|handle| {
            match session.done_rx.recv_timeout(session.stop_timeout) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => match handle.join() {
                    Ok(summary) => Some(summary),
                    Err(_) => {
                        log::error!("worker thread panicked");
                        None
                    }
                },
                Err(RecvTimeoutError::Timeout) => {
                    log::warn!(
                        "worker did not stop within {:?}; detaching it",
                        session.stop_timeout
                    );
                    drop(handle);
                    None
                }
            }
        });

        if self.wake_lock.is_held() {
            if let Err(e) = self.wake_lock.release() {
                log::warn!("failed to release wake lock: {e:#}");
            }
        }
        self.notifier.dismiss();

        metrics::set_active_sessions(0);
        self.state = ServiceState::Inactive;
        log::info!(
            "session for {} (started {}) stopped",
            session.target_endpoint,
            session.started_at
        );
        summary
    }
}

impl Drop for MiningService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Collaborators for a [`MiningService`]; anything left unset gets the
/// in-process default.
#[derive(Default)]
pub struct MiningServiceBuilder {
    workload: Option<Arc<dyn Workload>>,
    clock: Option<Arc<dyn Clock>>,
    surface: Option<Arc<dyn NotificationSurface>>,
    wake_lock: Option<Box<dyn WakeLock>>,
}

impl MiningServiceBuilder {
    pub fn workload(mut self, workload: Arc<dyn Workload>) -> Self {
        self.workload = Some(workload);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn notification_surface(mut self, surface: Arc<dyn NotificationSurface>) -> Self {
        self.surface = Some(surface);
        self
    }

    pub fn wake_lock(mut self, wake_lock: Box<dyn WakeLock>) -> Self {
        self.wake_lock = Some(wake_lock);
        self
    }

    pub fn build(self) -> MiningService {
        let surface = self
            .surface
            .unwrap_or_else(|| Arc::new(LogSurface) as Arc<dyn NotificationSurface>);
        MiningService {
            workload: self
                .workload
                .unwrap_or_else(|| Arc::new(MixWorkload::default()) as Arc<dyn Workload>),
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>),
            notifier: Arc::new(PresenceNotifier::new(surface)),
            wake_lock: self
                .wake_lock
                .unwrap_or_else(|| Box::new(TimedWakeLock::default()) as Box<dyn WakeLock>),
            state: ServiceState::Inactive,
            session: None,
        }
    }
}
