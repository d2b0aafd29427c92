//! The bounded, newest-first alert feed with read-state tracking.

use std::collections::VecDeque;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, trace};
use uuid::Uuid;

use crate::models::{Alert, SignalMatch};

/// Hard cap on the alert feed; the oldest alerts are dropped first.
pub const ALERT_CAPACITY: usize = 500;

pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// A change to the feed, carrying the unread count after the change.
#[derive(Debug, Clone)]
pub enum FeedEvent {
    Added { alert: Alert, unread_count: usize },
    Read { alert_id: Uuid, unread_count: usize },
    Deleted { alert_id: Uuid, unread_count: usize },
    Cleared { unread_count: usize },
}

#[derive(Default)]
struct Feed {
    alerts: VecDeque<Alert>,
    unread_count: usize,
}

impl Feed {
    fn recount(&mut self) {
        self.unread_count = self.alerts.iter().filter(|a| !a.is_read).count();
    }
}

/// Single owner of the alert feed. The feed and its unread counter change
/// together under one lock.
pub struct AlertManager {
    feed: Mutex<Feed>,
    events: broadcast::Sender<FeedEvent>,
}

impl AlertManager {
    pub fn new() -> Self {
        Self::with_event_buffer(DEFAULT_EVENT_BUFFER)
    }

    pub fn with_event_buffer(buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        Self {
            feed: Mutex::new(Feed::default()),
            events,
        }
    }

    /// Observe feed changes. Lagging receivers lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.events.subscribe()
    }

    /// Fold one match into the feed as a new unread alert at the front.
    pub async fn handle_match(&self, signal_match: SignalMatch, message: impl Into<String>) -> Alert {
        let alert = Alert {
            id: Uuid::new_v4(),
            priority: signal_match.priority,
            signal_match,
            message: message.into(),
            created_at: Utc::now(),
            is_read: false,
        };

        let mut feed = self.feed.lock().await;
        feed.alerts.push_front(alert.clone());
        feed.unread_count += 1;
        if feed.alerts.len() > ALERT_CAPACITY {
            feed.alerts.truncate(ALERT_CAPACITY);
            feed.recount();
        }
        debug!(
            alert_id = %alert.id,
            signal_id = alert.signal_match.signal_id,
            unread = feed.unread_count,
            "alert added"
        );
        self.publish(FeedEvent::Added {
            alert: alert.clone(),
            unread_count: feed.unread_count,
        });
        alert
    }

    /// Mark an alert read. Unknown ids are ignored.
    pub async fn mark_read(&self, alert_id: Uuid) {
        let mut feed = self.feed.lock().await;
        let Some(alert) = feed.alerts.iter_mut().find(|a| a.id == alert_id) else {
            trace!(%alert_id, "mark_read on unknown alert");
            return;
        };
        alert.is_read = true;
        feed.recount();
        self.publish(FeedEvent::Read {
            alert_id,
            unread_count: feed.unread_count,
        });
    }

    /// Remove an alert. Unknown ids are ignored.
    pub async fn delete_alert(&self, alert_id: Uuid) {
        let mut feed = self.feed.lock().await;
        let before = feed.alerts.len();
        feed.alerts.retain(|a| a.id != alert_id);
        if feed.alerts.len() == before {
            trace!(%alert_id, "delete on unknown alert");
            return;
        }
        feed.recount();
        self.publish(FeedEvent::Deleted {
            alert_id,
            unread_count: feed.unread_count,
        });
    }

    pub async fn clear_all(&self) {
        let mut feed = self.feed.lock().await;
        feed.alerts.clear();
        feed.unread_count = 0;
        debug!("alert feed cleared");
        self.publish(FeedEvent::Cleared {
            unread_count: feed.unread_count,
        });
    }

    pub async fn alerts_for_signal(&self, signal_id: i64) -> Vec<Alert> {
        self.feed
            .lock()
            .await
            .alerts
            .iter()
            .filter(|a| a.signal_match.signal_id == signal_id)
            .cloned()
            .collect()
    }

    pub async fn alerts(&self) -> Vec<Alert> {
        self.feed.lock().await.alerts.iter().cloned().collect()
    }

    pub async fn unread_count(&self) -> usize {
        self.feed.lock().await.unread_count
    }

    fn publish(&self, event: FeedEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl Default for AlertManager {
    fn default() -> Self {
        Self::new()
    }
}
