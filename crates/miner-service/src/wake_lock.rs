//! Wake-type resource: keeps the host from sleeping while a session runs.

use std::time::{Duration, Instant};

use anyhow::Result;

pub const WAKE_LOCK_TAG: &str = "lottolotto::MiningWakelock";

/// Safety ceiling applied on acquire, independent of explicit release.
pub const DEFAULT_WAKE_LOCK_TIMEOUT: Duration = Duration::from_secs(10 * 60);

pub trait WakeLock: Send {
    /// Acquire the lock; it lapses on its own after `timeout`.
    fn acquire(&mut self, timeout: Duration) -> Result<()>;

    fn release(&mut self) -> Result<()>;

    fn is_held(&self) -> bool;
}

/// In-process wake lock that expires after its timeout.
#[derive(Debug)]
pub struct TimedWakeLock {
    tag: String,
    held_until: Option<Instant>,
}

impl TimedWakeLock {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            held_until: None,
        }
    }
}

impl Default for TimedWakeLock {
    fn default() -> Self {
        Self::new(WAKE_LOCK_TAG)
    }
}

impl WakeLock for TimedWakeLock {
    fn acquire(&mut self, timeout: Duration) -> Result<()> {
        let until = Instant::now()
            .checked_add(timeout)
            .ok_or_else(|| anyhow::anyhow!("wake lock timeout {timeout:?} out of range"))?;
        self.held_until = Some(until);
        log::debug!("wake lock {} acquired for {:?}", self.tag, timeout);
        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        if !self.is_held() {
            anyhow::bail!("wake lock {} is not held", self.tag);
        }
        self.held_until = None;
        log::debug!("wake lock {} released", self.tag);
        Ok(())
    }

    fn is_held(&self) -> bool {
        self.held_until.is_some_and(|until| Instant::now() < until)
    }
}
