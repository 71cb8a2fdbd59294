//! Presence-change feed for in-process observers.
//!
//! Uses a single `tokio::sync::broadcast` channel. The registry publishes
//! an entry whenever a user gains their first connection or loses their
//! last one; subscribers that fall behind skip entries (`RecvError::Lagged`).

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::events::PresenceStatus;

const PRESENCE_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceChange {
    pub user_id: String,
    pub username: String,
    pub status: PresenceStatus,
    pub at: DateTime<Utc>,
}

/// Cloneable publisher for presence changes.
#[derive(Clone)]
pub struct PresenceFeed {
    sender: broadcast::Sender<PresenceChange>,
}

impl PresenceFeed {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(PRESENCE_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PresenceChange> {
        self.sender.subscribe()
    }

    pub(crate) fn publish(&self, user_id: &str, username: &str, status: PresenceStatus) {
        // Err only means nobody is subscribed.
        let _ = self.sender.send(PresenceChange {
            user_id: user_id.to_string(),
            username: username.to_string(),
            status,
            at: Utc::now(),
        });
    }
}

impl Default for PresenceFeed {
    fn default() -> Self {
        Self::new()
    }
}
