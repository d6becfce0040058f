//! The work loop run on the session's dedicated thread.

use std::sync::Arc;
use std::time::Duration;

use engine_cpu::{rate_from_elapsed_ns, Workload};
use metrics::{CsvLog, MetricRecord};

use crate::cancel::StopToken;
use crate::clock::Clock;
use crate::notifier::PresenceNotifier;

/// What the loop did before it exited.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkerSummary {
    pub iterations: u64,
    pub last_rate: Option<f64>,
    /// Presence notification refreshes issued by the loop.
    pub refreshes: u64,
}

/// Everything the worker owns for one session.
pub struct WorkLoop {
    pub(crate) workload: Arc<dyn Workload>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) notifier: Arc<PresenceNotifier>,
    /// `None` when the log could not be created; the loop then runs unlogged.
    pub(crate) log: Option<CsvLog>,
    pub(crate) notify_every: u64,
    pub(crate) interval: Duration,
    pub(crate) max_iterations: Option<u64>,
    pub(crate) pool_url: String,
}

impl WorkLoop {
    /// Run until the token is stopped, the sleep is interrupted or
    /// `max_iterations` is reached.
    pub fn run(self, token: StopToken) -> WorkerSummary {
        log::info!(
            target: "miner",
            "experiment started: pool={}, workload={} ({} rounds)",
            self.pool_url,
            self.workload.name(),
            self.workload.rounds()
        );

        let mut summary = WorkerSummary::default();
        let mut iteration: u64 = 0;

        while token.is_active() {
            if self.max_iterations.is_some_and(|max| iteration >= max) {
                break;
            }

            let Some((rate, refreshed)) = self.run_iteration(iteration, &token) else {
                log::debug!(target: "miner", "session stopped during iteration {iteration}; discarding it");
                break;
            };
            summary.last_rate = Some(rate);
            summary.refreshes += u64::from(refreshed);
            iteration += 1;
            summary.iterations = iteration;

            if self.max_iterations.is_some_and(|max| iteration >= max) {
                break;
            }
            if !token.sleep(self.interval) {
                log::debug!(target: "miner", "work loop interrupted after {iteration} iterations");
                break;
            }
        }

        log::info!(
            target: "miner",
            "experiment finished after {} iterations",
            summary.iterations
        );
        summary
    }

    /// One timed pass of the workload, logged and (every `notify_every`)
    /// followed by a notification refresh. Returns the derived rate and
    /// whether a refresh happened, or `None` if the session was stopped while
    /// the workload ran (nothing is written or published then).
    fn run_iteration(&self, iteration: u64, token: &StopToken) -> Option<(f64, bool)> {
        let start = self.clock.monotonic_ns();
        let _ = self.workload.run();
        let end = self.clock.monotonic_ns();

        if !token.is_active() {
            return None;
        }

        let rate = rate_from_elapsed_ns(end.saturating_sub(start));
        metrics::record_iteration(rate);

        if let Some(sink) = &self.log {
            let record = MetricRecord {
                timestamp: self.clock.now(),
                iteration,
                rate,
            };
            if let Err(e) = sink.append(&record) {
                metrics::inc_log_write_errors();
                log::error!(target: "miner", "failed to write metrics row: {e:#}");
            }
        }

        let refresh = self.notify_every > 0 && iteration % self.notify_every == 0;
        if refresh {
            self.notifier.refresh();
        }

        Some((rate, refresh))
    }
}
