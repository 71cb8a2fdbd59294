use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::CoreError;

/// Snowflake ID of a notification. Serialized as a string on the wire.
pub type NotificationId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    System,
    Forum,
    Learning,
    Wellness,
    Chat,
}

impl NotificationType {
    pub const ALL: [NotificationType; 5] = [
        NotificationType::System,
        NotificationType::Forum,
        NotificationType::Learning,
        NotificationType::Wellness,
        NotificationType::Chat,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            NotificationType::System => "system",
            NotificationType::Forum => "forum",
            NotificationType::Learning => "learning",
            NotificationType::Wellness => "wellness",
            NotificationType::Chat => "chat",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CoreError::validation(format!("unknown notification type '{s}'")))
    }
}

pub(crate) fn serialize_i64_as_string<S: serde::Serializer>(
    val: &i64,
    s: S,
) -> Result<S::Ok, S::Error> {
    s.serialize_str(&val.to_string())
}

/// A persisted, user-owned notification.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(serialize_with = "serialize_i64_as_string")]
    #[schema(value_type = String)]
    pub id: NotificationId,
    pub user_id: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    /// Contextual references (post id, course id, ...) interpreted by the UI.
    #[schema(value_type = Object)]
    pub data: Value,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Caller-supplied fields for a new notification. `kind` is validated
/// against [`NotificationType`] by the service.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub data: Value,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewNotification {
    pub fn new(kind: impl Into<String>, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            title: title.into(),
            message: message.into(),
            data: Value::Null,
            expires_at: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub fn expiring_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

/// Filter pushed down to the store when listing a user's notifications.
#[derive(Debug, Clone, Copy)]
pub struct NotificationFilter {
    pub unread_only: bool,
    pub kind: Option<NotificationType>,
    /// Anything expiring at or before this instant is excluded.
    pub now: DateTime<Utc>,
    pub offset: usize,
    pub limit: usize,
}

/// One page of results from the store, with the unpaginated match count.
#[derive(Debug, Clone, Default)]
pub struct NotificationSlice {
    pub items: Vec<Notification>,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub pages: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPage {
    pub items: Vec<Notification>,
    pub pagination: Pagination,
    pub unread_count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NotificationStats {
    pub total: u64,
    pub unread: u64,
    pub by_type: BTreeMap<String, u64>,
    /// Notifications created within the recent window (last 7 days).
    pub recent_count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_known_type() {
        for kind in NotificationType::ALL {
            assert_eq!(kind.as_str().parse::<NotificationType>().unwrap(), kind);
        }
    }

    #[test]
    fn rejects_unknown_type() {
        let err = "promo".parse::<NotificationType>().unwrap_err();
        assert!(matches!(err, CoreError::ValidationFailed(_)));
    }

    #[test]
    fn serializes_id_as_string_and_type_as_lowercase() {
        let now = Utc::now();
        let n = Notification {
            id: 42,
            user_id: "usr_1".into(),
            kind: NotificationType::Wellness,
            title: "Check in".into(),
            message: "How are you feeling?".into(),
            data: serde_json::json!({ "communityId": "c1" }),
            is_read: false,
            read_at: None,
            created_at: now,
            expires_at: now,
        };
        let json = serde_json::to_value(&n).unwrap();
        assert_eq!(json["id"], "42");
        assert_eq!(json["type"], "wellness");
        assert_eq!(json["isRead"], false);
        assert_eq!(json["data"]["communityId"], "c1");
    }
}
