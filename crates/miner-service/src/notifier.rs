//! Presence notification.
//!
//! The host requires a persistent, user-visible notification while the
//! session runs. The worker refreshes it periodically by re-publishing under
//! the same id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

pub const CHANNEL_ID: &str = "MiningChannel";
pub const CHANNEL_NAME: &str = "Mining Service";
pub const CHANNEL_DESCRIPTION: &str = "Experiment status notifications";
pub const NOTIFICATION_ID: u32 = 1;
pub const NOTIFICATION_TITLE: &str = "lottolotto";
pub const NOTIFICATION_TEXT: &str = "Experiment running...";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Importance {
    Low,
    Default,
    High,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub description: String,
    pub importance: Importance,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Notification {
    pub channel_id: String,
    pub title: String,
    pub text: String,
}

/// Host notification service.
pub trait NotificationSurface: Send + Sync {
    fn create_channel(&self, channel: &NotificationChannel) -> Result<()>;

    /// Publish or replace the notification with this id.
    fn publish(&self, id: u32, notification: &Notification) -> Result<()>;

    fn dismiss(&self, id: u32) -> Result<()>;
}

/// Surface that writes notifications to the log, for hosts without a
/// notification shade.
#[derive(Debug, Default)]
pub struct LogSurface;

impl NotificationSurface for LogSurface {
    fn create_channel(&self, channel: &NotificationChannel) -> Result<()> {
        log::debug!(
            "notification channel {} ({:?}) ready",
            channel.id,
            channel.importance
        );
        Ok(())
    }

    fn publish(&self, id: u32, notification: &Notification) -> Result<()> {
        log::info!(
            "[notification #{id}] {}: {}",
            notification.title,
            notification.text
        );
        Ok(())
    }

    fn dismiss(&self, id: u32) -> Result<()> {
        log::debug!("[notification #{id}] dismissed");
        Ok(())
    }
}

/// Creates the channel once and (re)publishes the single presence
/// notification. All failures are logged and swallowed.
pub struct PresenceNotifier {
    surface: Arc<dyn NotificationSurface>,
    channel_ready: AtomicBool,
    notification: Notification,
}

impl PresenceNotifier {
    pub fn new(surface: Arc<dyn NotificationSurface>) -> Self {
        Self {
            surface,
            channel_ready: AtomicBool::new(false),
            notification: Notification {
                channel_id: CHANNEL_ID.to_string(),
                title: NOTIFICATION_TITLE.to_string(),
                text: NOTIFICATION_TEXT.to_string(),
            },
        }
    }

    /// Create the low-importance channel unless it already exists.
    pub fn ensure_channel(&self) {
        if self.channel_ready.load(Ordering::Acquire) {
            return;
        }
        let channel = NotificationChannel {
            id: CHANNEL_ID.to_string(),
            name: CHANNEL_NAME.to_string(),
            description: CHANNEL_DESCRIPTION.to_string(),
            importance: Importance::Low,
        };
        match self.surface.create_channel(&channel) {
            Ok(()) => self.channel_ready.store(true, Ordering::Release),
            Err(e) => log::warn!("failed to create notification channel {CHANNEL_ID}: {e:#}"),
        }
    }

    /// Publish the notification; an update is a re-publish under the same id.
    pub fn refresh(&self) {
        self.ensure_channel();
        if let Err(e) = self.surface.publish(NOTIFICATION_ID, &self.notification) {
            log::warn!("failed to publish notification #{NOTIFICATION_ID}: {e:#}");
        }
    }

    pub fn dismiss(&self) {
        if let Err(e) = self.surface.dismiss(NOTIFICATION_ID) {
            log::warn!("failed to dismiss notification #{NOTIFICATION_ID}: {e:#}");
        }
    }
}
