//! Bounded per-user holding area for notifications created while the
//! recipient had no live connection.
//!
//! Memory only. A restart drops queued pushes; the notification records
//! themselves were already persisted and stay listable.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::models::notification::Notification;

/// Default per-user bound.
pub const DEFAULT_QUEUE_LIMIT: usize = 50;

pub struct OfflineQueue {
    limit: usize,
    queues: DashMap<String, VecDeque<Notification>>,
}

impl OfflineQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            queues: DashMap::new(),
        }
    }

    /// Append for `user_id`, evicting the oldest entries past the limit.
    /// Returns how many entries were evicted.
    pub fn enqueue(&self, user_id: &str, notification: Notification) -> usize {
        let mut queue = self.queues.entry(user_id.to_string()).or_default();
        queue.push_back(notification);
        let mut evicted = 0;
        while queue.len() > self.limit {
            queue.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(%user_id, evicted, "offline queue full, dropped oldest entries");
        }
        evicted
    }

    /// Put entries that were handed to a connection but never written back
    /// at the front, ahead of anything queued since. `notifications` is
    /// oldest first. Returns how many entries were evicted.
    pub fn requeue(&self, user_id: &str, notifications: Vec<Notification>) -> usize {
        if notifications.is_empty() {
            return 0;
        }
        let mut queue = self.queues.entry(user_id.to_string()).or_default();
        for notification in notifications.into_iter().rev() {
            queue.push_front(notification);
        }
        let mut evicted = 0;
        while queue.len() > self.limit {
            queue.pop_front();
            evicted += 1;
        }
        if evicted > 0 {
            tracing::debug!(%user_id, evicted, "offline queue full, dropped oldest entries");
        }
        evicted
    }

    /// Take every queued entry for `user_id`, oldest first.
    pub fn flush(&self, user_id: &str) -> Vec<Notification> {
        self.queues
            .remove(user_id)
            .map(|(_, queue)| queue.into())
            .unwrap_or_default()
    }

    pub fn len(&self, user_id: &str) -> usize {
        self.queues.get(user_id).map_or(0, |q| q.len())
    }

    /// Entries queued across all users.
    pub fn total(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_LIMIT)
    }
}
