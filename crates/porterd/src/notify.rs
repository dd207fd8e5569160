//! Operator notifications.
//!
//! Producers (the engine thread, resolution calls) enqueue without ever
//! blocking; a tokio task drains the queue into a short in-memory feed the
//! operator UI polls over D-Bus.

use chrono::{DateTime, Utc};
use porter_core::Tier;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;

const SECURITY_LINK: &str = "/security";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Warning,
    Info,
    Highlight,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub icon: String,
    pub severity: Severity,
    pub text: String,
    pub link: String,
}

impl Notification {
    pub fn new(icon: &str, severity: Severity, text: impl Into<String>, link: &str) -> Self {
        Self {
            icon: icon.to_string(),
            severity,
            text: text.into(),
            link: link.to_string(),
        }
    }

    pub fn known_entry(name: &str, tier: Tier) -> Self {
        Self::new(
            "fa-door-open",
            Severity::Success,
            format!("{name} entered (confidence: {tier})."),
            SECURITY_LINK,
        )
    }

    pub fn unknown_visitor() -> Self {
        Self::new(
            "fa-user-secret",
            Severity::Warning,
            "Unknown person detected at the door.",
            SECURITY_LINK,
        )
    }

    pub fn denied() -> Self {
        Self::new(
            "fa-user-slash",
            Severity::Info,
            "Access for unknown person was denied.",
            SECURITY_LINK,
        )
    }

    pub fn registered(name: &str) -> Self {
        Self::new(
            "fa-user-plus",
            Severity::Highlight,
            format!("New user '{name}' was registered and granted access."),
            SECURITY_LINK,
        )
    }

    pub fn temporarily_allowed(name: &str) -> Self {
        Self::new(
            "fa-user-plus",
            Severity::Highlight,
            format!("Visitor '{name}' was allowed in once."),
            SECURITY_LINK,
        )
    }
}

/// Fire-and-forget notification target.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Bounded-queue sink. Never blocks; drops when the queue is full.
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, notification: Notification) {
        tracing::info!(text = %notification.text, "notification");
        if let Err(e) = self.tx.try_send(notification) {
            tracing::warn!(error = %e, "notification dropped");
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedItem {
    #[serde(flatten)]
    pub notification: Notification,
    /// Local display time, `HH:MM`.
    pub time: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedView {
    pub notifications: Vec<FeedItem>,
    pub unread_count: usize,
}

/// Most recent notifications, newest first.
pub struct NotificationFeed {
    items: Mutex<VecDeque<FeedItem>>,
    capacity: usize,
}

impl NotificationFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, notification: Notification, at: DateTime<Utc>) {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        items.push_front(FeedItem {
            notification,
            time: at.with_timezone(&chrono::Local).format("%H:%M").to_string(),
            timestamp: at,
            read: false,
        });
        items.truncate(self.capacity);
    }

    pub fn view(&self) -> FeedView {
        let items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        FeedView {
            unread_count: items.iter().filter(|i| !i.read).count(),
            notifications: items.iter().cloned().collect(),
        }
    }

    pub fn mark_all_read(&self) {
        let mut items = self.items.lock().unwrap_or_else(PoisonError::into_inner);
        for item in items.iter_mut() {
            item.read = true;
        }
    }
}

/// Create the sink/feed pair and spawn the task that connects them.
///
/// Must be called inside a tokio runtime.
pub fn spawn_feed(queue: usize, history: usize) -> (Arc<ChannelNotifier>, Arc<NotificationFeed>) {
    let (tx, mut rx) = mpsc::channel::<Notification>(queue.max(1));
    let feed = Arc::new(NotificationFeed::new(history));

    let sink_feed = Arc::clone(&feed);
    tokio::spawn(async move {
        while let Some(notification) = rx.recv().await {
            sink_feed.push(notification, Utc::now());
        }
        tracing::debug!("notification feed closed");
    });

    (Arc::new(ChannelNotifier { tx }), feed)
}
