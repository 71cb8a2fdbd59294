use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::db::store::{NotificationStore, UserDirectory};
use crate::error::CoreResult;
use crate::models::notification::{
    Notification, NotificationFilter, NotificationId, NotificationSlice,
};
use crate::models::user::UserRecord;

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// In-memory notification store. Keyed by snowflake ID, so iterating in
/// reverse yields newest first.
pub struct MemoryNotificationStore {
    data: Mutex<BTreeMap<NotificationId, Notification>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
        }
    }

    /// Raw record count, including expired records not yet swept.
    pub fn len(&self) -> usize {
        self.data.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.lock().is_empty()
    }
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> CoreResult<()> {
        self.data.lock().insert(notification.id, notification.clone());
        Ok(())
    }

    async fn find(&self, id: NotificationId) -> CoreResult<Option<Notification>> {
        Ok(self.data.lock().get(&id).cloned())
    }

    async fn query(&self, user_id: &str, filter: &NotificationFilter) -> CoreResult<NotificationSlice> {
        let data = self.data.lock();
        let matching = data.values().rev().filter(|n| {
            n.user_id == user_id
                && !n.is_expired(filter.now)
                && (!filter.unread_only || !n.is_read)
                && filter.kind.map_or(true, |k| n.kind == k)
        });

        let mut total = 0u64;
        let mut items = Vec::new();
        for (i, n) in matching.enumerate() {
            total += 1;
            if i >= filter.offset && items.len() < filter.limit {
                items.push(n.clone());
            }
        }
        Ok(NotificationSlice { items, total })
    }

    async fn list_active(&self, user_id: &str, now: DateTime<Utc>) -> CoreResult<Vec<Notification>> {
        Ok(self
            .data
            .lock()
            .values()
            .rev()
            .filter(|n| n.user_id == user_id && !n.is_expired(now))
            .cloned()
            .collect())
    }

    async fn count_unread(&self, user_id: &str, now: DateTime<Utc>) -> CoreResult<u64> {
        Ok(self
            .data
            .lock()
            .values()
            .filter(|n| n.user_id == user_id && !n.is_read && !n.is_expired(now))
            .count() as u64)
    }

    async fn mark_read(
        &self,
        user_id: &str,
        id: NotificationId,
        at: DateTime<Utc>,
    ) -> CoreResult<Option<Notification>> {
        let mut data = self.data.lock();
        let Some(n) = data.get_mut(&id) else {
            return Ok(None);
        };
        if n.user_id != user_id || n.is_expired(at) {
            return Ok(None);
        }
        if !n.is_read {
            n.is_read = true;
            n.read_at = Some(at);
        }
        Ok(Some(n.clone()))
    }

    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> CoreResult<u64> {
        let mut updated = 0;
        for n in self.data.lock().values_mut() {
            if n.user_id == user_id && !n.is_read && !n.is_expired(at) {
                n.is_read = true;
                n.read_at = Some(at);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, user_id: &str, id: NotificationId) -> CoreResult<bool> {
        let mut data = self.data.lock();
        match data.get(&id) {
            Some(n) if n.user_id == user_id => {
                data.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_all(&self, user_id: &str) -> CoreResult<u64> {
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|_, n| n.user_id != user_id);
        Ok((before - data.len()) as u64)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|_, n| !n.is_expired(now));
        Ok((before - data.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, UserRecord>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self {
            users: RwLock::new(HashMap::new()),
        }
    }

    /// Load a JSON array of user records.
    pub fn load_json(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let users: Vec<UserRecord> = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let directory = Self::new();
        for user in users {
            directory.upsert(user);
        }
        Ok(directory)
    }

    pub fn upsert(&self, user: UserRecord) {
        self.users.write().insert(user.id.clone(), user);
    }

    pub fn set_active(&self, user_id: &str, active: bool) {
        if let Some(user) = self.users.write().get_mut(user_id) {
            user.is_active = active;
        }
    }
}

impl Default for MemoryUserDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn find_user(&self, user_id: &str) -> CoreResult<Option<UserRecord>> {
        Ok(self.users.read().get(user_id).cloned())
    }

    async fn active_user_ids(&self) -> CoreResult<Vec<String>> {
        let mut ids: Vec<String> = self
            .users
            .read()
            .values()
            .filter(|u| u.is_active)
            .map(|u| u.id.clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}
