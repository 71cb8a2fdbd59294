#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use jsonwebtoken::{EncodingKey, Header};

use presence_api::auth::authenticator::AccessClaims;
use presence_api::config::Config;
use presence_api::db::memory::{MemoryNotificationStore, MemoryUserDirectory};
use presence_api::models::user::{Role, UserRecord};
use presence_api::AppState;

pub const TEST_SECRET: &str = "integration-test-secret";

pub const AMY: &str = "usr_amy";
pub const BOB: &str = "usr_bob";
pub const CAT: &str = "usr_cat";
pub const ADMIN: &str = "usr_admin";
pub const DORMANT: &str = "usr_dormant";

/// Handles to the in-memory adapters behind a test [`AppState`].
pub struct TestContext {
    pub state: AppState,
    pub store: Arc<MemoryNotificationStore>,
    pub users: Arc<MemoryUserDirectory>,
}

fn user(id: &str, role: Role, is_active: bool) -> UserRecord {
    let username = id.trim_start_matches("usr_").to_string();
    UserRecord {
        id: id.to_string(),
        full_name: format!("{} Tester", username),
        username,
        avatar_url: None,
        role,
        is_active,
    }
}

/// Build a test AppState with in-memory stores and a fixed set of users.
pub fn test_context() -> TestContext {
    test_context_with(Config::with_secret(TEST_SECRET))
}

pub fn test_context_with(config: Config) -> TestContext {
    let users = Arc::new(MemoryUserDirectory::new());
    users.upsert(user(AMY, Role::User, true));
    users.upsert(user(BOB, Role::User, true));
    users.upsert(user(CAT, Role::Moderator, true));
    users.upsert(user(ADMIN, Role::Admin, true));
    users.upsert(user(DORMANT, Role::User, false));

    let store = Arc::new(MemoryNotificationStore::new());
    let state = AppState::new(config, store.clone(), users.clone());
    TestContext {
        state,
        store,
        users,
    }
}

/// Build the full application router wired to a fresh test context.
pub fn test_app() -> (Router, TestContext) {
    let ctx = test_context();
    let app = presence_api::routes::router().with_state(ctx.state.clone());
    (app, ctx)
}

/// Mint an HS256 access token for `user_id`, valid for `ttl_secs`.
pub fn mint_token_with_ttl(user_id: &str, ttl_secs: i64) -> String {
    let now = chrono::Utc::now();
    let claims = AccessClaims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + chrono::Duration::seconds(ttl_secs)).timestamp(),
    };
    jsonwebtoken::encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(TEST_SECRET.as_bytes()),
    )
    .expect("mint test token")
}

pub fn mint_token(user_id: &str) -> String {
    mint_token_with_ttl(user_id, 300)
}

pub fn bearer(user_id: &str) -> String {
    format!("Bearer {}", mint_token(user_id))
}

/// Start a real TCP server for WebSocket testing. The server runs in the
/// background for the rest of the test.
pub async fn start_server(ctx: &TestContext) -> SocketAddr {
    let app = presence_api::routes::router().with_state(ctx.state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}
