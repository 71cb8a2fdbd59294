//! Gateway wire format: every frame is `{ "event": <name>, "data": <payload> }`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::models::notification::{serialize_i64_as_string, Notification, NotificationId, NotificationType};
use crate::models::user::UserSummary;

// ---------------------------------------------------------------------------
// Shared payload types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RoomType {
    Forum,
    Course,
    Wellness,
    Chat,
    #[default]
    General,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// Severity of a `system-message`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

/// The `notification` push payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPush {
    #[serde(serialize_with = "serialize_i64_as_string")]
    pub id: NotificationId,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    /// Kept off the wire; lets an undelivered push go back to the offline queue.
    #[serde(skip)]
    pub expires_at: DateTime<Utc>,
}

impl NotificationPush {
    /// Rebuild the queued form of this push for `user_id`.
    pub fn to_notification(&self, user_id: &str) -> Notification {
        Notification {
            id: self.id,
            user_id: user_id.to_string(),
            kind: self.kind,
            title: self.title.clone(),
            message: self.message.clone(),
            data: self.data.clone(),
            is_read: false,
            read_at: None,
            created_at: self.timestamp,
            expires_at: self.expires_at,
        }
    }
}

impl From<&Notification> for NotificationPush {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id,
            kind: n.kind,
            title: n.title.clone(),
            message: n.message.clone(),
            data: n.data.clone(),
            timestamp: n.created_at,
            expires_at: n.expires_at,
        }
    }
}

// ---------------------------------------------------------------------------
// Server → Client
// ---------------------------------------------------------------------------

/// Events sent from the server to a client connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    Authenticated {
        user_id: String,
        username: String,
        full_name: String,
    },
    AuthError {
        message: String,
    },
    JoinedRoom {
        room_id: String,
        room_type: RoomType,
        users_count: usize,
    },
    LeftRoom {
        room_id: String,
    },
    UserJoinedRoom {
        room_id: String,
        user: UserSummary,
    },
    UserLeftRoom {
        room_id: String,
        user_id: String,
        username: String,
    },
    UserStatusChange {
        user_id: String,
        username: String,
        status: PresenceStatus,
    },
    UserTyping {
        room_id: String,
        user_id: String,
        username: String,
        is_typing: bool,
    },
    /// An application event fanned out to a room (e.g. `post-liked`).
    RoomEvent {
        room_id: String,
        name: String,
        payload: Value,
    },
    Notification(NotificationPush),
    NotificationRead {
        #[serde(serialize_with = "serialize_i64_as_string")]
        notification_id: NotificationId,
    },
    AllNotificationsRead {
        count: u64,
    },
    NotificationDeleted {
        #[serde(serialize_with = "serialize_i64_as_string")]
        notification_id: NotificationId,
    },
    AllNotificationsCleared {
        count: u64,
    },
    SystemMessage {
        message: String,
        level: MessageLevel,
        timestamp: DateTime<Utc>,
    },
    ForceDisconnect {
        reason: String,
    },
    Error {
        message: String,
    },
    Pong,
}

impl ServerEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::AuthError { .. } => "auth-error",
            Self::JoinedRoom { .. } => "joined-room",
            Self::LeftRoom { .. } => "left-room",
            Self::UserJoinedRoom { .. } => "user-joined-room",
            Self::UserLeftRoom { .. } => "user-left-room",
            Self::UserStatusChange { .. } => "user-status-change",
            Self::UserTyping { .. } => "user-typing",
            Self::RoomEvent { .. } => "room-event",
            Self::Notification(_) => "notification",
            Self::NotificationRead { .. } => "notification-read",
            Self::AllNotificationsRead { .. } => "all-notifications-read",
            Self::NotificationDeleted { .. } => "notification-deleted",
            Self::AllNotificationsCleared { .. } => "all-notifications-cleared",
            Self::SystemMessage { .. } => "system-message",
            Self::ForceDisconnect { .. } => "force-disconnect",
            Self::Error { .. } => "error",
            Self::Pong => "pong",
        }
    }
}

// ---------------------------------------------------------------------------
// Client → Server
// ---------------------------------------------------------------------------

/// Frames a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    Authenticate {
        token: String,
    },
    JoinRoom {
        room_id: String,
        #[serde(default)]
        room_type: RoomType,
    },
    LeaveRoom {
        room_id: String,
    },
    Typing {
        room_id: String,
        #[serde(default = "default_true")]
        is_typing: bool,
    },
    Ping,
}

fn default_true() -> bool {
    true
}
