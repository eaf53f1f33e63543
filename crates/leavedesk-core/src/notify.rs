//! Notification bus for transient user-facing messages.
//!
//! Publishing is fire-and-forget: it never blocks, never fails and never
//! deduplicates. The bus is a bounded broadcast channel, so a consumer that
//! falls behind loses the oldest messages instead of holding up publishers.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

/// Default number of notifications buffered per consumer.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Success,
    Error,
    Info,
    Warning,
}

impl NotificationKind {
    pub fn label(&self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Error => "error",
            NotificationKind::Info => "info",
            NotificationKind::Warning => "warning",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Notification {
    pub kind: NotificationKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Notification {
    pub fn new(kind: NotificationKind, message: impl Into<String>, title: Option<&str>) -> Self {
        Self {
            kind,
            message: message.into(),
            title: title.map(str::to_string),
        }
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.title {
            Some(ref title) => write!(f, "[{}] {}: {}", self.kind.label(), title, self.message),
            None => write!(f, "[{}] {}", self.kind.label(), self.message),
        }
    }
}

/// Publish side of the notification channel.
/// Clone is cheap - every clone feeds the same consumers.
#[derive(Debug, Clone)]
pub struct NotificationBus {
    tx: broadcast::Sender<Notification>,
}

impl NotificationBus {
    pub fn new(capacity: usize) -> Self {
        // broadcast::channel panics on a zero capacity
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish a notification to every current consumer.
    pub fn publish(&self, notification: Notification) {
        if let Err(broadcast::error::SendError(dropped)) = self.tx.send(notification) {
            trace!(kind = dropped.kind.label(), "No notification consumer, dropping");
        }
    }

    pub fn success(&self, message: impl Into<String>, title: Option<&str>) {
        self.publish(Notification::new(NotificationKind::Success, message, title));
    }

    pub fn error(&self, message: impl Into<String>, title: Option<&str>) {
        self.publish(Notification::new(NotificationKind::Error, message, title));
    }

    pub fn info(&self, message: impl Into<String>, title: Option<&str>) {
        self.publish(Notification::new(NotificationKind::Info, message, title));
    }

    pub fn warning(&self, message: impl Into<String>, title: Option<&str>) {
        self.publish(Notification::new(NotificationKind::Warning, message, title));
    }

    /// Register a consumer. It only sees notifications published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new(DEFAULT_NOTIFICATION_CAPACITY)
    }
}
