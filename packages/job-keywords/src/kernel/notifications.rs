//! User-visible notifications and the in-process hub that fans them out.
//!
//! The workflows report what a user should be told (sign in, processing
//! started, something failed). Presentation is left to whoever subscribes.

use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

use crate::common::JobId;
use crate::kernel::traits::BaseNotifier;

/// Severity, for presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    LoginRequired,
    ProcessingStarted { job_id: JobId },
    ProcessingFailed { reason: String },
    RetryStarted { job_id: JobId },
    KeywordFetchFailed { job_id: JobId, reason: String },
}

impl Notification {
    pub fn level(&self) -> Level {
        match self {
            Notification::ProcessingStarted { .. } | Notification::RetryStarted { .. } => {
                Level::Success
            }
            Notification::LoginRequired
            | Notification::ProcessingFailed { .. }
            | Notification::KeywordFetchFailed { .. } => Level::Error,
        }
    }

    /// Short message for the user.
    pub fn message(&self) -> &'static str {
        match self {
            Notification::LoginRequired => "Please log in to process job postings",
            Notification::ProcessingStarted { .. } => "Job processing started",
            Notification::ProcessingFailed { .. } => "Failed to process job posting",
            Notification::RetryStarted { .. } => "Job processing restarted",
            Notification::KeywordFetchFailed { .. } => "Failed to fetch keywords",
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Broadcast hub for notifications.
///
/// Cloneable; every clone publishes to the same subscribers. Publishing with
/// no subscribers only logs.
#[derive(Clone)]
pub struct NotificationHub {
    tx: broadcast::Sender<Notification>,
}

impl NotificationHub {
    /// Create a hub with default capacity (64 notifications).
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tx: broadcast::channel(capacity).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notification: Notification) {
        match notification.level() {
            Level::Success => tracing::info!(?notification, "{}", notification),
            Level::Error => tracing::warn!(?notification, "{}", notification),
        }
        // Ignore send errors (no active receivers)
        let _ = self.tx.send(notification);
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseNotifier for NotificationHub {
    fn notify(&self, notification: Notification) {
        self.publish(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let hub = NotificationHub::new();
        let mut rx = hub.subscribe();

        hub.notify(Notification::ProcessingStarted {
            job_id: JobId::new(42),
        });

        let received = rx.recv().await.unwrap();
        assert_eq!(
            received,
            Notification::ProcessingStarted {
                job_id: JobId::new(42)
            }
        );
        assert_eq!(received.level(), Level::Success);
        assert_eq!(received.to_string(), "Job processing started");
    }

    #[tokio::test]
    async fn test_publish_no_subscribers_is_noop() {
        let hub = NotificationHub::new();
        // Should not panic
        hub.publish(Notification::LoginRequired);
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let hub = NotificationHub::new();
        let mut rx1 = hub.subscribe();
        let mut rx2 = hub.clone().subscribe();

        hub.publish(Notification::LoginRequired);

        assert_eq!(rx1.recv().await.unwrap(), Notification::LoginRequired);
        assert_eq!(rx2.recv().await.unwrap(), Notification::LoginRequired);
    }

    #[test]
    fn test_serialized_shape() {
        let value = serde_json::to_value(Notification::KeywordFetchFailed {
            job_id: JobId::new(7),
            reason: "boom".into(),
        })
        .unwrap();
        assert_eq!(
            value,
            serde_json::json!({"type": "keyword_fetch_failed", "job_id": 7, "reason": "boom"})
        );
    }
}
