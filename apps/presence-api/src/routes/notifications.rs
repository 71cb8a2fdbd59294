//! Notification endpoints for the signed-in user.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, put};
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::notification::{Notification, NotificationId, NotificationPage, NotificationStats};
use crate::notifications::ListQuery;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/notifications",
            get(list_notifications).delete(clear_notifications),
        )
        .route("/notifications/stats", get(notification_stats))
        .route("/notifications/unread-count", get(unread_count))
        .route("/notifications/read-all", put(mark_all_read))
        .route("/notifications/{id}/read", put(mark_read))
        .route("/notifications/{id}", axum::routing::delete(delete_notification))
        .route("/users/{user_id}/notifications", get(list_user_notifications))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CountResponse {
    pub count: u64,
}

fn parse_id(raw: &str) -> Result<NotificationId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::bad_request("Invalid notification ID"))
}

// ---------------------------------------------------------------------------
// GET /api/v1/notifications
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/notifications",
    tag = "Notifications",
    security(("bearer" = [])),
    params(ListQuery),
    responses(
        (status = 200, description = "Newest first", body = NotificationPage),
        (status = 400, description = "Unknown notification type", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn list_notifications(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<NotificationPage>, ApiError> {
    let page = state.notifications.list(&user_id, &user_id, &query).await?;
    Ok(Json(page))
}

// ---------------------------------------------------------------------------
// GET /api/v1/users/:user_id/notifications
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/users/{user_id}/notifications",
    tag = "Notifications",
    security(("bearer" = [])),
    params(
        ("user_id" = String, Path, description = "Owner of the notifications"),
        ListQuery,
    ),
    responses(
        (status = 200, description = "Newest first", body = NotificationPage),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 403, description = "Not the owner", body = ApiErrorBody),
    ),
)]
pub async fn list_user_notifications(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(owner_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<NotificationPage>, ApiError> {
    let page = state.notifications.list(&user_id, &owner_id, &query).await?;
    Ok(Json(page))
}

// ---------------------------------------------------------------------------
// GET /api/v1/notifications/stats
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/notifications/stats",
    tag = "Notifications",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Counts over unexpired notifications", body = NotificationStats),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn notification_stats(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<NotificationStats>, ApiError> {
    Ok(Json(state.notifications.stats(&user_id).await?))
}

// ---------------------------------------------------------------------------
// GET /api/v1/notifications/unread-count
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/notifications/unread-count",
    tag = "Notifications",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Unread, unexpired notifications", body = CountResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn unread_count(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.notifications.unread_count(&user_id).await?;
    Ok(Json(CountResponse { count }))
}

// ---------------------------------------------------------------------------
// PUT /api/v1/notifications/read-all
// ---------------------------------------------------------------------------

#[utoipa::path(
    put,
    path = "/api/v1/notifications/read-all",
    tag = "Notifications",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Number of notifications marked read", body = CountResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn mark_all_read(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.notifications.mark_all_read(&user_id).await?;
    Ok(Json(CountResponse { count }))
}

// ---------------------------------------------------------------------------
// PUT /api/v1/notifications/:id/read
// ---------------------------------------------------------------------------

#[utoipa::path(
    put,
    path = "/api/v1/notifications/{id}/read",
    tag = "Notifications",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Notification ID")),
    responses(
        (status = 200, description = "Notification marked read", body = Notification),
        (status = 400, description = "Invalid ID", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Notification not found", body = ApiErrorBody),
    ),
)]
pub async fn mark_read(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Notification>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(state.notifications.mark_read(&user_id, id).await?))
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/notifications/:id
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/api/v1/notifications/{id}",
    tag = "Notifications",
    security(("bearer" = [])),
    params(("id" = String, Path, description = "Notification ID")),
    responses(
        (status = 204, description = "Notification deleted"),
        (status = 400, description = "Invalid ID", body = ApiErrorBody),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
        (status = 404, description = "Notification not found", body = ApiErrorBody),
    ),
)]
pub async fn delete_notification(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let id = parse_id(&id)?;
    state.notifications.delete(&user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// DELETE /api/v1/notifications
// ---------------------------------------------------------------------------

#[utoipa::path(
    delete,
    path = "/api/v1/notifications",
    tag = "Notifications",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Number of notifications deleted", body = CountResponse),
        (status = 401, description = "Unauthorized", body = ApiErrorBody),
    ),
)]
pub async fn clear_notifications(
    AuthUser { user_id, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<CountResponse>, ApiError> {
    let count = state.notifications.clear_all(&user_id).await?;
    Ok(Json(CountResponse { count }))
}
