//! Notification contract. The core emits notifications through a
//! [`NotificationSink`]; fan-out to delivery channels, quiet hours, and
//! per-user preferences live behind the sink, not in the core.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Delivery priority, ordered weakest to strongest.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationPriority {
    Low,
    Medium,
    High,
    Urgent,
}

/// What the notification is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Signal,
    Trade,
    RiskBreach,
    StrategyError,
    Optimization,
    System,
}

/// A single notification addressed to one owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub owner: String,
    pub kind: NotificationKind,
    pub priority: NotificationPriority,
    pub title: String,
    pub body: String,
    pub data: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        owner: &str,
        kind: NotificationKind,
        priority: NotificationPriority,
        title: &str,
        body: &str,
    ) -> Self {
        Self {
            owner: owner.to_string(),
            kind,
            priority,
            title: title.to_string(),
            body: body.to_string(),
            data: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// Delivery-agnostic notification outlet.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification);
}

/// Sink that drops everything. Useful for backtests and benchmarks.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl NotificationSink for NoopSink {
    async fn notify(&self, _notification: Notification) {}
}

/// Sink that buffers notifications in memory so tests can assert on them.
#[derive(Debug, Default)]
pub struct CollectingSink {
    sent: Mutex<Vec<Notification>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications captured so far.
    pub fn all(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    /// Drain captured notifications.
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.sent.lock())
    }
}

#[async_trait]
impl NotificationSink for CollectingSink {
    async fn notify(&self, notification: Notification) {
        self.sent.lock().push(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering() {
        assert!(NotificationPriority::Low < NotificationPriority::Medium);
        assert!(NotificationPriority::Medium < NotificationPriority::High);
        assert!(NotificationPriority::High < NotificationPriority::Urgent);
    }

    #[tokio::test]
    async fn test_collecting_sink_captures() {
        let sink = CollectingSink::new();
        sink.notify(Notification::new(
            "alice",
            NotificationKind::Trade,
            NotificationPriority::Medium,
            "Order filled",
            "40 AAPL @ 49",
        ))
        .await;

        let all = sink.all();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].owner, "alice");
        assert_eq!(all[0].priority, NotificationPriority::Medium);

        let taken = sink.take();
        assert_eq!(taken.len(), 1);
        assert!(sink.all().is_empty());
    }
}
