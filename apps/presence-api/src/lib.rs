pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod models;
pub mod notifications;
pub mod routes;

use std::sync::Arc;

use tokio::time;
use tokio_util::task::TaskTracker;

use auth::authenticator::PresenceAuthenticator;
use config::Config;
use db::memory::{MemoryNotificationStore, MemoryUserDirectory};
use db::store::{NotificationStore, UserDirectory};
use gateway::queue::OfflineQueue;
use gateway::{ConnectionRegistry, RoomBroadcaster};
use notifications::NotificationService;

/// Shared application state available to all route handlers.
///
/// Built once at startup. Every service owns its own state; nothing is
/// reachable through globals.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub authenticator: Arc<PresenceAuthenticator>,
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomBroadcaster>,
    pub notifications: Arc<NotificationService>,
    /// One task per upgraded gateway socket.
    pub connection_tasks: TaskTracker,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn NotificationStore>,
        users: Arc<dyn UserDirectory>,
    ) -> Self {
        let queue = Arc::new(OfflineQueue::new(config.offline_queue_limit));
        let registry = Arc::new(ConnectionRegistry::new(queue));
        let rooms = Arc::new(RoomBroadcaster::new(&registry));
        let authenticator = Arc::new(PresenceAuthenticator::new(&config.jwt_secret, users.clone()));
        let notifications = Arc::new(NotificationService::new(
            store,
            users,
            registry.clone(),
            config.notification_ttl,
        ));

        Self {
            config: Arc::new(config),
            authenticator,
            registry,
            rooms,
            notifications,
            connection_tasks: TaskTracker::new(),
        }
    }

    /// Close every gateway connection and wait up to `shutdown_grace` for
    /// their tasks to write the last frames. Returns false if the deadline
    /// passed first.
    pub async fn drain_connections(&self, reason: &str) -> bool {
        let closed = self.registry.close_all(reason);
        self.connection_tasks.close();
        let finished = time::timeout(self.config.shutdown_grace, self.connection_tasks.wait())
            .await
            .is_ok();
        tracing::info!(
            closed,
            finished,
            remaining = self.connection_tasks.len(),
            "gateway connections drained"
        );
        finished
    }

    /// State backed by empty in-memory stores.
    pub fn in_memory(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(MemoryNotificationStore::new()),
            Arc::new(MemoryUserDirectory::new()),
        )
    }
}
