pub mod admin;
pub mod health;
pub mod notifications;

use axum::Router;
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::gateway::server::router())
        .nest(
            "/api/v1",
            notifications::router().merge(admin::router()),
        )
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        // Health
        health::health,
        // Notifications
        notifications::list_notifications,
        notifications::list_user_notifications,
        notifications::notification_stats,
        notifications::unread_count,
        notifications::mark_all_read,
        notifications::mark_read,
        notifications::delete_notification,
        notifications::clear_notifications,
        // Admin
        admin::online_users,
        admin::gateway_stats,
        admin::disconnect_user,
        admin::broadcast,
        admin::room_event,
        admin::send_notification,
    ),
    components(
        schemas(
            // Error types
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            // Models
            crate::models::notification::Notification,
            crate::models::notification::NotificationType,
            crate::models::notification::NewNotification,
            crate::models::notification::NotificationPage,
            crate::models::notification::Pagination,
            crate::models::notification::NotificationStats,
            crate::models::user::Role,
            crate::models::user::UserSummary,
            crate::gateway::events::RoomType,
            crate::gateway::events::PresenceStatus,
            crate::gateway::events::MessageLevel,
            crate::gateway::OnlineUser,
            crate::gateway::RoomStats,
            crate::notifications::DeliveryReport,
            crate::notifications::DeliveryOutcome,
            // Route request/response types
            health::HealthResponse,
            notifications::CountResponse,
            admin::OnlineUsersResponse,
            admin::GatewayStats,
            admin::DisconnectRequest,
            admin::DisconnectResponse,
            admin::BroadcastRequest,
            admin::RecipientsResponse,
            admin::RoomEventRequest,
            admin::NotificationTarget,
            admin::SendNotificationRequest,
            admin::SendNotificationResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Notifications", description = "User notifications"),
        (name = "Admin", description = "Gateway administration"),
    )
)]
pub struct ApiDoc;
