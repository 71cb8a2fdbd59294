//! Notification lifecycle: create, list, read state, delete, expiry.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use portal_common::SnowflakeGenerator;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::{IntoParams, ToSchema};

use crate::db::store::{NotificationStore, UserDirectory};
use crate::error::{CoreError, CoreResult};
use crate::gateway::events::ServerEvent;
use crate::gateway::{ConnectionRegistry, Delivery};
use crate::models::notification::{
    NewNotification, Notification, NotificationFilter, NotificationId, NotificationPage,
    NotificationStats, NotificationType, Pagination,
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
const MAX_TITLE_LEN: usize = 200;
const MAX_MESSAGE_LEN: usize = 2000;
/// Window used for [`NotificationStats::recent_count`].
const RECENT_WINDOW_DAYS: i64 = 7;

/// Query parameters for listing notifications.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// 1-based page number.
    pub page: Option<u32>,
    /// Page size, at most 100.
    pub limit: Option<u32>,
    #[serde(default)]
    pub unread_only: bool,
    /// Restrict to one notification type.
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

/// A freshly created notification and how it reached the recipient.
#[derive(Debug, Clone)]
pub struct Created {
    pub notification: Notification,
    pub delivery: Delivery,
}

/// Per-recipient outcome of a multi-user create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    pub user_id: String,
    pub outcome: DeliveryOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DeliveryOutcome {
    /// Persisted and pushed to a live connection.
    #[serde(rename_all = "camelCase")]
    Pushed { notification_id: String },
    /// Persisted and held in the offline queue.
    #[serde(rename_all = "camelCase")]
    Queued { notification_id: String },
    Failed { error: String },
}

impl From<CoreResult<Created>> for DeliveryOutcome {
    fn from(result: CoreResult<Created>) -> Self {
        match result {
            Ok(Created {
                notification,
                delivery: Delivery::Pushed,
            }) => DeliveryOutcome::Pushed {
                notification_id: notification.id.to_string(),
            },
            Ok(Created {
                notification,
                delivery: Delivery::Queued,
            }) => DeliveryOutcome::Queued {
                notification_id: notification.id.to_string(),
            },
            Err(e) => DeliveryOutcome::Failed {
                error: e.to_string(),
            },
        }
    }
}

/// Validated creation input.
struct Draft {
    kind: NotificationType,
    title: String,
    message: String,
    data: Value,
    expires_at: Option<DateTime<Utc>>,
}

pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    users: Arc<dyn UserDirectory>,
    registry: Arc<ConnectionRegistry>,
    id_gen: SnowflakeGenerator,
    ttl: Duration,
}

impl NotificationService {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        users: Arc<dyn UserDirectory>,
        registry: Arc<ConnectionRegistry>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            users,
            registry,
            id_gen: SnowflakeGenerator::new(0),
            ttl,
        }
    }

    /// Persist a notification for `user_id`, then push it or queue it.
    ///
    /// Nothing is pushed or queued unless the record was stored.
    pub async fn create(&self, user_id: &str, input: NewNotification) -> CoreResult<Created> {
        let draft = validate(input, Utc::now())?;
        self.create_validated(user_id, &draft).await
    }

    /// Create the same notification for several users. Each recipient
    /// succeeds or fails on its own; duplicates are collapsed.
    ///
    /// Fails as a whole only if the input itself is invalid.
    pub async fn create_for_users(
        &self,
        user_ids: &[String],
        input: NewNotification,
    ) -> CoreResult<Vec<DeliveryReport>> {
        let draft = validate(input, Utc::now())?;

        let mut seen = HashSet::new();
        let recipients: Vec<&String> = user_ids.iter().filter(|id| seen.insert(*id)).collect();

        let results = join_all(
            recipients
                .iter()
                .map(|user_id| self.create_validated(user_id, &draft)),
        )
        .await;

        Ok(recipients
            .into_iter()
            .zip(results)
            .map(|(user_id, result)| DeliveryReport {
                user_id: user_id.clone(),
                outcome: result.into(),
            })
            .collect())
    }

    /// Notify every active user except those in `exclude`.
    pub async fn create_system_wide(
        &self,
        exclude: &[String],
        input: NewNotification,
    ) -> CoreResult<Vec<DeliveryReport>> {
        let excluded: HashSet<&str> = exclude.iter().map(String::as_str).collect();
        let recipients: Vec<String> = self
            .users
            .active_user_ids()
            .await?
            .into_iter()
            .filter(|id| !excluded.contains(id.as_str()))
            .collect();

        tracing::info!(recipients = recipients.len(), "creating system-wide notification");
        self.create_for_users(&recipients, input).await
    }

    async fn create_validated(&self, user_id: &str, draft: &Draft) -> CoreResult<Created> {
        if self.users.find_user(user_id).await?.is_none() {
            return Err(CoreError::not_found("user"));
        }

        let now = Utc::now();
        let notification = Notification {
            id: self.id_gen.generate(),
            user_id: user_id.to_string(),
            kind: draft.kind,
            title: draft.title.clone(),
            message: draft.message.clone(),
            data: draft.data.clone(),
            is_read: false,
            read_at: None,
            created_at: now,
            expires_at: draft.expires_at.unwrap_or(now + self.ttl),
        };

        if let Err(e) = self.store.insert(&notification).await {
            tracing::error!(%user_id, error = %e, "failed to persist notification");
            return Err(e);
        }

        let delivery = self.registry.deliver(user_id, &notification);
        tracing::info!(
            %user_id,
            notification_id = notification.id,
            kind = %notification.kind,
            ?delivery,
            "notification created"
        );

        Ok(Created {
            notification,
            delivery,
        })
    }

    /// One page of `owner_id`'s notifications, newest first.
    ///
    /// Only the owner may list them.
    pub async fn list(
        &self,
        requester_id: &str,
        owner_id: &str,
        query: &ListQuery,
    ) -> CoreResult<NotificationPage> {
        if requester_id != owner_id {
            return Err(CoreError::AuthorizationFailed);
        }

        let kind = query
            .kind
            .as_deref()
            .filter(|k| !k.is_empty())
            .map(str::parse::<NotificationType>)
            .transpose()?;
        let page = query.page.unwrap_or(1).max(1);
        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let now = Utc::now();

        let filter = NotificationFilter {
            unread_only: query.unread_only,
            kind,
            now,
            offset: ((page - 1) as usize) * limit as usize,
            limit: limit as usize,
        };
        let slice = self.store.query(owner_id, &filter).await?;
        let unread_count = self.store.count_unread(owner_id, now).await?;

        Ok(NotificationPage {
            items: slice.items,
            pagination: Pagination {
                page,
                limit,
                total: slice.total,
                pages: slice.total.div_ceil(u64::from(limit)),
            },
            unread_count,
        })
    }

    pub async fn unread_count(&self, user_id: &str) -> CoreResult<u64> {
        self.store.count_unread(user_id, Utc::now()).await
    }

    /// Mark one notification read. Expired or foreign notifications are
    /// `NotFound`.
    pub async fn mark_read(&self, user_id: &str, id: NotificationId) -> CoreResult<Notification> {
        let notification = self
            .store
            .mark_read(user_id, id, Utc::now())
            .await?
            .ok_or_else(|| CoreError::not_found("notification"))?;

        self.registry.push(
            user_id,
            ServerEvent::NotificationRead {
                notification_id: id,
            },
        );
        Ok(notification)
    }

    /// Returns how many notifications changed.
    pub async fn mark_all_read(&self, user_id: &str) -> CoreResult<u64> {
        let count = self.store.mark_all_read(user_id, Utc::now()).await?;
        self.registry
            .push(user_id, ServerEvent::AllNotificationsRead { count });
        tracing::debug!(%user_id, count, "marked all notifications read");
        Ok(count)
    }

    pub async fn delete(&self, user_id: &str, id: NotificationId) -> CoreResult<()> {
        let owned = self
            .store
            .find(id)
            .await?
            .filter(|n| n.user_id == user_id && !n.is_expired(Utc::now()));
        if owned.is_none() || !self.store.delete(user_id, id).await? {
            return Err(CoreError::not_found("notification"));
        }

        self.registry.push(
            user_id,
            ServerEvent::NotificationDeleted {
                notification_id: id,
            },
        );
        Ok(())
    }

    /// Delete every notification `user_id` owns. Returns how many went.
    pub async fn clear_all(&self, user_id: &str) -> CoreResult<u64> {
        let count = self.store.delete_all(user_id).await?;
        self.registry
            .push(user_id, ServerEvent::AllNotificationsCleared { count });
        tracing::debug!(%user_id, count, "cleared notifications");
        Ok(count)
    }

    pub async fn stats(&self, user_id: &str) -> CoreResult<NotificationStats> {
        let now = Utc::now();
        let active = self.store.list_active(user_id, now).await?;
        Ok(summarize(&active, now))
    }

    /// Purge expired notifications across all users.
    pub async fn sweep_expired(&self) -> CoreResult<u64> {
        self.store.delete_expired(Utc::now()).await
    }
}

fn validate(input: NewNotification, now: DateTime<Utc>) -> CoreResult<Draft> {
    let kind: NotificationType = input.kind.parse()?;

    let title = input.title.trim();
    if title.is_empty() {
        return Err(CoreError::validation("title must not be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(CoreError::validation(format!(
            "title must be at most {MAX_TITLE_LEN} characters"
        )));
    }

    let message = input.message.trim();
    if message.is_empty() {
        return Err(CoreError::validation("message must not be empty"));
    }
    if message.chars().count() > MAX_MESSAGE_LEN {
        return Err(CoreError::validation(format!(
            "message must be at most {MAX_MESSAGE_LEN} characters"
        )));
    }

    if let Some(expires_at) = input.expires_at {
        if expires_at <= now {
            return Err(CoreError::validation("expiresAt must be in the future"));
        }
    }

    let data = match input.data {
        Value::Null => Value::Object(Default::default()),
        Value::Object(map) => Value::Object(map),
        _ => return Err(CoreError::validation("data must be an object")),
    };

    Ok(Draft {
        kind,
        title: title.to_string(),
        message: message.to_string(),
        data,
        expires_at: input.expires_at,
    })
}

fn summarize(active: &[Notification], now: DateTime<Utc>) -> NotificationStats {
    let recent_since = now - Duration::days(RECENT_WINDOW_DAYS);
    let mut by_type: BTreeMap<String, u64> = NotificationType::ALL
        .iter()
        .map(|k| (k.as_str().to_string(), 0))
        .collect();

    let mut stats = NotificationStats::default();
    for n in active {
        stats.total += 1;
        if !n.is_read {
            stats.unread += 1;
        }
        if n.created_at >= recent_since {
            stats.recent_count += 1;
        }
        *by_type.entry(n.kind.as_str().to_string()).or_default() += 1;
    }
    stats.by_type = by_type;
    stats
}
