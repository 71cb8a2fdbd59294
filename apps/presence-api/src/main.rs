use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use presence_api::config::Config;
use presence_api::db::memory::{MemoryNotificationStore, MemoryUserDirectory};
use presence_api::db::store::UserDirectory;
use presence_api::notifications::sweeper;
use presence_api::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing, env vars may be set externally)
    if dotenvy::dotenv().is_err() {
        let env_path = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
        let _ = dotenvy::from_path(env_path);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;
    let sweep_interval = config.sweep_interval;

    // In-memory adapters. The portal's document store plugs in here.
    let users = match &config.users_file {
        Some(path) => match MemoryUserDirectory::load_json(path) {
            Ok(users) => users,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "failed to load users file");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("USERS_FILE not set, user directory starts empty");
            MemoryUserDirectory::new()
        }
    };
    let users: Arc<dyn UserDirectory> = Arc::new(users);
    let store = Arc::new(MemoryNotificationStore::new());

    let state = AppState::new(config, store, users);
    let sweeper = sweeper::spawn(state.notifications.clone(), sweep_interval);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(presence_api::routes::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "presence-api listening");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    let registry = state.registry.clone();
    let shutdown = async move {
        let _ = tokio::signal::ctrl_c().await;
        let closed = registry.close_all("Server shutting down");
        tracing::info!(closed, "shutting down, connections closed");
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        tracing::error!(error = %e, "server error");
    }

    // Upgraded sockets outlive `serve`; give them time to send their close frames.
    if !state.drain_connections("Server shutting down").await {
        tracing::warn!("gateway connections still open at shutdown deadline");
    }
    sweeper.abort();
}
