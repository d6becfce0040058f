//! Time sources for the work loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDateTime};

/// Wall-clock and monotonic time, injectable so iterations can be timed
/// deterministically.
pub trait Clock: Send + Sync {
    /// Local wall-clock time, used for row timestamps and file names.
    fn now(&self) -> NaiveDateTime;

    /// Monotonic nanoseconds since an arbitrary origin.
    fn monotonic_ns(&self) -> u64;
}

/// The real clock.
#[derive(Debug)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn monotonic_ns(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

/// A clock that only moves when told to.
///
/// Every `monotonic_ns` read advances the reading by `step_ns`, so a
/// start/end pair around a workload always measures exactly `step_ns`.
#[derive(Debug)]
pub struct ManualClock {
    wall: Mutex<NaiveDateTime>,
    ns: AtomicU64,
    step_ns: u64,
}

impl ManualClock {
    pub fn new(wall: NaiveDateTime, step_ns: u64) -> Self {
        Self {
            wall: Mutex::new(wall),
            ns: AtomicU64::new(0),
            step_ns,
        }
    }

    /// Move the wall clock forward.
    pub fn advance_wall(&self, by: Duration) {
        if let Ok(mut wall) = self.wall.lock() {
            if let Ok(delta) = chrono::Duration::from_std(by) {
                *wall += delta;
            }
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.wall.lock() {
            Ok(wall) => *wall,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn monotonic_ns(&self) -> u64 {
        self.ns.fetch_add(self.step_ns, Ordering::SeqCst)
    }
}
