//! Store adapter seams for notification and user records.
//!
//! The portal's document store implements these traits; [`super::memory`]
//! holds the in-process adapter used in development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::CoreResult;
use crate::models::notification::{
    Notification, NotificationFilter, NotificationId, NotificationSlice,
};
use crate::models::user::UserRecord;

/// Durable storage for notification records.
///
/// Every call that names a `user_id` must be scoped to that user's records.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, notification: &Notification) -> CoreResult<()>;

    async fn find(&self, id: NotificationId) -> CoreResult<Option<Notification>>;

    /// Non-expired notifications for `user_id` matching `filter`, newest first.
    async fn query(&self, user_id: &str, filter: &NotificationFilter) -> CoreResult<NotificationSlice>;

    /// Every non-expired notification for `user_id`.
    async fn list_active(&self, user_id: &str, now: DateTime<Utc>) -> CoreResult<Vec<Notification>>;

    async fn count_unread(&self, user_id: &str, now: DateTime<Utc>) -> CoreResult<u64>;

    /// Returns the updated record, or `None` if no such notification is
    /// owned by `user_id`.
    async fn mark_read(
        &self,
        user_id: &str,
        id: NotificationId,
        at: DateTime<Utc>,
    ) -> CoreResult<Option<Notification>>;

    /// Returns how many notifications were flipped to read.
    async fn mark_all_read(&self, user_id: &str, at: DateTime<Utc>) -> CoreResult<u64>;

    async fn delete(&self, user_id: &str, id: NotificationId) -> CoreResult<bool>;

    async fn delete_all(&self, user_id: &str) -> CoreResult<u64>;

    /// Purge everything that expired at or before `now`, across all users.
    async fn delete_expired(&self, now: DateTime<Utc>) -> CoreResult<u64>;
}

/// Read access to the portal's user records.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, user_id: &str) -> CoreResult<Option<UserRecord>>;

    async fn active_user_ids(&self) -> CoreResult<Vec<String>>;
}
