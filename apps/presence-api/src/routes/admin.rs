//! Administrative endpoints. Every handler requires the admin role.

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::auth::middleware::AdminUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::gateway::events::{MessageLevel, ServerEvent};
use crate::gateway::{OnlineUser, RoomStats};
use crate::models::notification::NewNotification;
use crate::notifications::DeliveryReport;
use crate::AppState;

const MAX_EVENT_NAME_LEN: usize = 64;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/online-users", get(online_users))
        .route("/admin/gateway/stats", get(gateway_stats))
        .route("/admin/users/{user_id}/disconnect", post(disconnect_user))
        .route("/admin/broadcast", post(broadcast))
        .route("/admin/rooms/{room_id}/events", post(room_event))
        .route("/admin/notifications", post(send_notification))
}

// ---------------------------------------------------------------------------
// GET /api/v1/admin/online-users
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct OnlineUsersResponse {
    pub count: usize,
    pub users: Vec<OnlineUser>,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/online-users",
    tag = "Admin",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Users with at least one live connection", body = OnlineUsersResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin role required", body = ApiErrorBody),
    ),
)]
pub async fn online_users(
    _admin: AdminUser,
    State(state): State<AppState>,
) -> Json<OnlineUsersResponse> {
    let users = state.registry.list_online();
    Json(OnlineUsersResponse {
        count: users.len(),
        users,
    })
}

// ---------------------------------------------------------------------------
// GET /api/v1/admin/gateway/stats
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStats {
    pub online_users: usize,
    pub connections: usize,
    pub rooms: Vec<RoomStats>,
    /// Notifications waiting in offline queues, across all users.
    pub queued_notifications: usize,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/gateway/stats",
    tag = "Admin",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Connection and room statistics", body = GatewayStats),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin role required", body = ApiErrorBody),
    ),
)]
pub async fn gateway_stats(_admin: AdminUser, State(state): State<AppState>) -> Json<GatewayStats> {
    Json(GatewayStats {
        online_users: state.registry.online_count(),
        connections: state.registry.connection_count(),
        rooms: state.rooms.room_stats(),
        queued_notifications: state.registry.queue().total(),
    })
}

// ---------------------------------------------------------------------------
// POST /api/v1/admin/users/:user_id/disconnect
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct DisconnectRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DisconnectResponse {
    pub disconnected: usize,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/users/{user_id}/disconnect",
    tag = "Admin",
    security(("bearer" = [])),
    params(("user_id" = String, Path, description = "User to disconnect")),
    request_body = DisconnectRequest,
    responses(
        (status = 200, description = "Connections terminated", body = DisconnectResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin role required", body = ApiErrorBody),
    ),
)]
pub async fn disconnect_user(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<DisconnectRequest>,
) -> Json<DisconnectResponse> {
    let reason = body
        .reason
        .filter(|r| !r.trim().is_empty())
        .unwrap_or_else(|| "Disconnected by administrator".to_string());
    let disconnected = state.registry.force_disconnect(&user_id, &reason);
    tracing::info!(admin_id = %admin.user_id, %user_id, disconnected, "admin disconnect");
    Json(DisconnectResponse { disconnected })
}

// ---------------------------------------------------------------------------
// POST /api/v1/admin/broadcast
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct BroadcastRequest {
    pub message: String,
    #[serde(default)]
    pub level: MessageLevel,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RecipientsResponse {
    pub recipients: usize,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/broadcast",
    tag = "Admin",
    security(("bearer" = [])),
    request_body = BroadcastRequest,
    responses(
        (status = 200, description = "System message sent to every live connection", body = RecipientsResponse),
        (status = 400, description = "Empty message", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin role required", body = ApiErrorBody),
    ),
)]
pub async fn broadcast(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(body): Json<BroadcastRequest>,
) -> Result<Json<RecipientsResponse>, ApiError> {
    let message = body.message.trim();
    if message.is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }

    let recipients = state.registry.broadcast_all(ServerEvent::SystemMessage {
        message: message.to_string(),
        level: body.level,
        timestamp: chrono::Utc::now(),
    });
    tracing::info!(admin_id = %admin.user_id, recipients, "system message broadcast");
    Ok(Json(RecipientsResponse { recipients }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/admin/rooms/:room_id/events
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoomEventRequest {
    pub event: String,
    #[serde(default)]
    #[schema(value_type = Object)]
    pub payload: Value,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/rooms/{room_id}/events",
    tag = "Admin",
    security(("bearer" = [])),
    params(("room_id" = String, Path, description = "Target room")),
    request_body = RoomEventRequest,
    responses(
        (status = 200, description = "Event fanned out to the room", body = RecipientsResponse),
        (status = 400, description = "Invalid event name", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin role required", body = ApiErrorBody),
    ),
)]
pub async fn room_event(
    _admin: AdminUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    Json(body): Json<RoomEventRequest>,
) -> Result<Json<RecipientsResponse>, ApiError> {
    let event = body.event.trim();
    if event.is_empty() || event.len() > MAX_EVENT_NAME_LEN {
        return Err(ApiError::bad_request(format!(
            "event must be 1 to {MAX_EVENT_NAME_LEN} characters"
        )));
    }

    let recipients = state.rooms.broadcast(&room_id, event, body.payload);
    Ok(Json(RecipientsResponse { recipients }))
}

// ---------------------------------------------------------------------------
// POST /api/v1/admin/notifications
// ---------------------------------------------------------------------------

/// Who receives an admin-created notification.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum NotificationTarget {
    #[serde(rename_all = "camelCase")]
    SystemWide {
        system_wide: bool,
        #[serde(default)]
        exclude_user_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Users { user_ids: Vec<String> },
    #[serde(rename_all = "camelCase")]
    User { user_id: String },
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SendNotificationRequest {
    pub target: NotificationTarget,
    #[serde(flatten)]
    pub notification: NewNotification,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SendNotificationResponse {
    pub reports: Vec<DeliveryReport>,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/notifications",
    tag = "Admin",
    security(("bearer" = [])),
    request_body = SendNotificationRequest,
    responses(
        (status = 200, description = "Per-recipient outcome", body = SendNotificationResponse),
        (status = 400, description = "Validation error", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Admin role required", body = ApiErrorBody),
    ),
)]
pub async fn send_notification(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(body): Json<SendNotificationRequest>,
) -> Result<Json<SendNotificationResponse>, ApiError> {
    let service = &state.notifications;
    let reports = match body.target {
        NotificationTarget::SystemWide {
            system_wide: true,
            exclude_user_ids,
        } => {
            service
                .create_system_wide(&exclude_user_ids, body.notification)
                .await?
        }
        NotificationTarget::SystemWide { .. } => {
            return Err(ApiError::bad_request("systemWide must be true when set"));
        }
        NotificationTarget::Users { user_ids } => {
            if user_ids.is_empty() {
                return Err(ApiError::bad_request("userIds must not be empty"));
            }
            service.create_for_users(&user_ids, body.notification).await?
        }
        NotificationTarget::User { user_id } => {
            let created = service.create(&user_id, body.notification).await?;
            vec![DeliveryReport {
                user_id,
                outcome: Ok(created).into(),
            }]
        }
    };

    tracing::info!(admin_id = %admin.user_id, recipients = reports.len(), "admin notification sent");
    Ok(Json(SendNotificationResponse { reports }))
}
