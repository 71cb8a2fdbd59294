mod common;

use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use common::{AMY, BOB};
use presence_api::config::Config;
use presence_api::gateway::events::{MessageLevel, ServerEvent};
use presence_api::models::notification::NewNotification;

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn open(url: impl IntoClientRequest + Unpin) -> Ws {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .expect("ws connect");
    ws
}

async fn send(ws: &mut Ws, frame: Value) {
    ws.send(Message::Text(frame.to_string().into()))
        .await
        .expect("send frame");
}

/// Next raw frame, failing the test after five seconds.
async fn next_message(ws: &mut Ws) -> Message {
    time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for frame")
        .expect("stream ended")
        .expect("ws read error")
}

async fn next_event(ws: &mut Ws) -> Value {
    let msg = next_message(ws).await;
    let text = msg.into_text().expect("not text");
    serde_json::from_str(&text).expect("parse event")
}

/// Read until an event called `name` arrives, skipping presence chatter.
async fn expect_event(ws: &mut Ws, name: &str) -> Value {
    loop {
        let event = next_event(ws).await;
        if event["event"] == name {
            return event;
        }
    }
}

/// Read until the close frame and return its code.
async fn expect_close(ws: &mut Ws) -> u16 {
    loop {
        match next_message(ws).await {
            Message::Close(Some(frame)) => return u16::from(frame.code),
            Message::Close(None) => panic!("close frame without code"),
            _ => continue,
        }
    }
}

/// Connect with a query token and wait until the connection is registered.
async fn connect(addr: SocketAddr, user_id: &str) -> Ws {
    let token = common::mint_token(user_id);
    let mut ws = open(format!("ws://{addr}/gateway?token={token}")).await;

    let authed = next_event(&mut ws).await;
    assert_eq!(authed["event"], "authenticated");
    assert_eq!(authed["data"]["userId"], user_id);

    // A pong is only produced once the connection is registered.
    send(&mut ws, json!({ "event": "ping" })).await;
    expect_event(&mut ws, "pong").await;
    ws
}

// ---------------------------------------------------------------------------
// Handshake
// ---------------------------------------------------------------------------

#[tokio::test]
async fn query_token_authenticates() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    let _ws = connect(addr, AMY).await;
    assert!(ctx.state.registry.is_online(AMY));
    assert_eq!(ctx.state.registry.connection_count(), 1);
}

#[tokio::test]
async fn authorization_header_authenticates() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    let mut request = format!("ws://{addr}/gateway")
        .into_client_request()
        .expect("request");
    request
        .headers_mut()
        .insert("Authorization", common::bearer(BOB).parse().unwrap());

    let mut ws = open(request).await;
    let authed = next_event(&mut ws).await;
    assert_eq!(authed["event"], "authenticated");
    assert_eq!(authed["data"]["userId"], BOB);
    assert_eq!(authed["data"]["username"], "bob");
    assert_eq!(authed["data"]["fullName"], "bob Tester");
}

#[tokio::test]
async fn authenticate_frame_authenticates() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    let mut ws = open(format!("ws://{addr}/gateway")).await;
    send(
        &mut ws,
        json!({ "event": "authenticate", "data": { "token": common::mint_token(AMY) } }),
    )
    .await;

    let authed = next_event(&mut ws).await;
    assert_eq!(authed["event"], "authenticated");
    assert_eq!(authed["data"]["userId"], AMY);
}

#[tokio::test]
async fn bad_token_gets_auth_error_and_close() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    let mut ws = open(format!("ws://{addr}/gateway?token=garbage")).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "auth-error");
    assert!(event["data"]["message"].is_string());
    assert_eq!(expect_close(&mut ws).await, 4001);

    assert_eq!(ctx.state.registry.connection_count(), 0);
}

#[tokio::test]
async fn non_authenticate_first_frame_is_rejected() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    let mut ws = open(format!("ws://{addr}/gateway")).await;
    send(&mut ws, json!({ "event": "ping" })).await;

    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "auth-error");
    assert_eq!(event["data"]["message"], "Authentication required");
    assert_eq!(expect_close(&mut ws).await, 4001);
}

#[tokio::test]
async fn silent_client_times_out() {
    let mut config = Config::with_secret(common::TEST_SECRET);
    config.handshake_timeout = Duration::from_millis(200);
    let ctx = common::test_context_with(config);
    let addr = common::start_server(&ctx).await;

    let mut ws = open(format!("ws://{addr}/gateway")).await;
    let event = next_event(&mut ws).await;
    assert_eq!(event["event"], "auth-error");
    assert_eq!(event["data"]["message"], "Authentication timeout");
    assert_eq!(expect_close(&mut ws).await, 4008);
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

#[tokio::test]
async fn join_room_announces_to_existing_members() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    let mut amy = connect(addr, AMY).await;
    let mut bob = connect(addr, BOB).await;

    send(
        &mut amy,
        json!({ "event": "join-room", "data": { "roomId": "course-7", "roomType": "course" } }),
    )
    .await;
    let joined = expect_event(&mut amy, "joined-room").await;
    assert_eq!(joined["data"]["roomId"], "course-7");
    assert_eq!(joined["data"]["roomType"], "course");
    assert_eq!(joined["data"]["usersCount"], 1);

    send(
        &mut bob,
        json!({ "event": "join-room", "data": { "roomId": "course-7" } }),
    )
    .await;
    let joined = expect_event(&mut bob, "joined-room").await;
    // The room keeps the type it was created with.
    assert_eq!(joined["data"]["roomType"], "course");
    assert_eq!(joined["data"]["usersCount"], 2);

    let announced = expect_event(&mut amy, "user-joined-room").await;
    assert_eq!(announced["data"]["roomId"], "course-7");
    assert_eq!(announced["data"]["user"]["id"], BOB);
}

#[tokio::test]
async fn typing_reaches_other_members_only() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    let mut amy = connect(addr, AMY).await;
    let mut bob = connect(addr, BOB).await;
    for ws in [&mut amy, &mut bob] {
        send(ws, json!({ "event": "join-room", "data": { "roomId": "chat-1", "roomType": "chat" } })).await;
        expect_event(ws, "joined-room").await;
    }

    send(
        &mut amy,
        json!({ "event": "typing", "data": { "roomId": "chat-1", "isTyping": true } }),
    )
    .await;
    let typing = expect_event(&mut bob, "user-typing").await;
    assert_eq!(typing["data"]["userId"], AMY);
    assert_eq!(typing["data"]["isTyping"], true);

    // Amy's next frame is the pong, not her own typing event.
    send(&mut amy, json!({ "event": "ping" })).await;
    loop {
        let event = next_event(&mut amy).await;
        assert_ne!(event["event"], "user-typing");
        if event["event"] == "pong" {
            break;
        }
    }
}

#[tokio::test]
async fn leaving_announces_departure() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    let mut amy = connect(addr, AMY).await;
    let mut bob = connect(addr, BOB).await;
    for ws in [&mut amy, &mut bob] {
        send(ws, json!({ "event": "join-room", "data": { "roomId": "forum-3" } })).await;
        expect_event(ws, "joined-room").await;
    }

    send(&mut bob, json!({ "event": "leave-room", "data": { "roomId": "forum-3" } })).await;
    let left = expect_event(&mut bob, "left-room").await;
    assert_eq!(left["data"]["roomId"], "forum-3");

    let announced = expect_event(&mut amy, "user-left-room").await;
    assert_eq!(announced["data"]["userId"], BOB);
    assert_eq!(announced["data"]["username"], "bob");
}

#[tokio::test]
async fn invalid_frame_keeps_connection_open() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    let mut ws = connect(addr, AMY).await;
    ws.send(Message::Text("not json".into())).await.unwrap();
    let error = expect_event(&mut ws, "error").await;
    assert_eq!(error["data"]["message"], "Invalid message");

    send(&mut ws, json!({ "event": "ping" })).await;
    expect_event(&mut ws, "pong").await;
}

// ---------------------------------------------------------------------------
// Presence and notifications
// ---------------------------------------------------------------------------

#[tokio::test]
async fn others_see_status_changes() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    let mut amy = connect(addr, AMY).await;
    let bob = connect(addr, BOB).await;

    let online = expect_event(&mut amy, "user-status-change").await;
    assert_eq!(online["data"]["userId"], BOB);
    assert_eq!(online["data"]["status"], "online");

    drop(bob);
    let offline = expect_event(&mut amy, "user-status-change").await;
    assert_eq!(offline["data"]["userId"], BOB);
    assert_eq!(offline["data"]["status"], "offline");
}

#[tokio::test]
async fn live_notification_is_pushed() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;
    let mut amy = connect(addr, AMY).await;

    let created = ctx
        .state
        .notifications
        .create(AMY, NewNotification::new("forum", "New reply", "Someone replied"))
        .await
        .unwrap();

    let pushed = expect_event(&mut amy, "notification").await;
    assert_eq!(pushed["data"]["id"], created.notification.id.to_string());
    assert_eq!(pushed["data"]["type"], "forum");
    assert_eq!(pushed["data"]["title"], "New reply");
}

#[tokio::test]
async fn queued_notifications_flush_on_connect() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;

    for title in ["first", "second"] {
        ctx.state
            .notifications
            .create(BOB, NewNotification::new("learning", title, "queued"))
            .await
            .unwrap();
    }
    assert_eq!(ctx.state.registry.queue().len(BOB), 2);

    let token = common::mint_token(BOB);
    let mut bob = open(format!("ws://{addr}/gateway?token={token}")).await;
    assert_eq!(next_event(&mut bob).await["event"], "authenticated");

    let first = expect_event(&mut bob, "notification").await;
    let second = expect_event(&mut bob, "notification").await;
    assert_eq!(first["data"]["title"], "first");
    assert_eq!(second["data"]["title"], "second");
    assert_eq!(ctx.state.registry.queue().len(BOB), 0);
}

/// Notification ids in every frame readable from `ws` until it ends.
async fn read_notification_ids(ws: &mut Ws) -> Vec<String> {
    let mut ids = Vec::new();
    while let Ok(Some(Ok(msg))) = time::timeout(Duration::from_secs(5), ws.next()).await {
        let Message::Text(text) = msg else { continue };
        let event: Value = serde_json::from_str(&text).expect("parse event");
        if event["event"] == "notification" {
            ids.push(event["data"]["id"].as_str().expect("string id").to_string());
        }
    }
    ids
}

#[tokio::test]
async fn pushes_stuck_behind_a_stalled_socket_reach_the_next_connection() {
    let mut config = Config::with_secret(common::TEST_SECRET);
    config.push_write_timeout = Duration::from_millis(200);
    config.outbound_buffer = 1024;
    config.offline_queue_limit = 1024;
    let ctx = common::test_context_with(config);
    let addr = common::start_server(&ctx).await;
    let mut stalled = connect(addr, AMY).await;

    // Far more than the socket buffers hold; the client reads none of it.
    let blob = "x".repeat(64 * 1024);
    let mut created = Vec::new();
    for i in 0..800 {
        let input = NewNotification::new("system", format!("bulk {i}"), "bulk")
            .with_data(json!({ "blob": blob }));
        let outcome = ctx.state.notifications.create(AMY, input).await.unwrap();
        created.push(outcome.notification.id.to_string());
    }

    time::timeout(Duration::from_secs(10), async {
        while ctx.state.registry.is_online(AMY) {
            time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stalled connection was never dropped");

    let requeued = ctx.state.registry.queue().len(AMY);
    assert!(requeued > 0);

    let mut seen: HashSet<String> = read_notification_ids(&mut stalled).await.into_iter().collect();

    let token = common::mint_token(AMY);
    let mut again = open(format!("ws://{addr}/gateway?token={token}")).await;
    assert_eq!(next_event(&mut again).await["event"], "authenticated");
    for _ in 0..requeued {
        let pushed = expect_event(&mut again, "notification").await;
        seen.insert(pushed["data"]["id"].as_str().unwrap().to_string());
    }

    for id in &created {
        assert!(seen.contains(id), "notification {id} never reached a connection");
    }
    assert_eq!(ctx.state.registry.queue().len(AMY), 0);
}

#[tokio::test]
async fn drain_waits_for_connections_to_say_goodbye() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;
    let mut amy = connect(addr, AMY).await;
    let mut bob = connect(addr, BOB).await;

    assert!(ctx.state.drain_connections("Server shutting down").await);
    assert!(ctx.state.connection_tasks.is_empty());
    assert_eq!(ctx.state.registry.connection_count(), 0);

    for ws in [&mut amy, &mut bob] {
        let notice = expect_event(ws, "force-disconnect").await;
        assert_eq!(notice["data"]["reason"], "Server shutting down");
        assert_eq!(expect_close(ws).await, 4009);
    }
}

#[tokio::test]
async fn force_disconnect_sends_notice_then_closes() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;
    let mut amy = connect(addr, AMY).await;

    let closed = ctx.state.registry.force_disconnect(AMY, "Account suspended");
    assert_eq!(closed, 1);

    let notice = expect_event(&mut amy, "force-disconnect").await;
    assert_eq!(notice["data"]["reason"], "Account suspended");
    assert_eq!(expect_close(&mut amy).await, 4009);
    assert!(!ctx.state.registry.is_online(AMY));
}

#[tokio::test]
async fn system_broadcast_reaches_everyone() {
    let ctx = common::test_context();
    let addr = common::start_server(&ctx).await;
    let mut amy = connect(addr, AMY).await;
    let mut bob = connect(addr, BOB).await;

    let reached = ctx.state.registry.broadcast_all(ServerEvent::SystemMessage {
        message: "Maintenance at noon".into(),
        level: MessageLevel::Warning,
        timestamp: chrono::Utc::now(),
    });
    assert_eq!(reached, 2);

    for ws in [&mut amy, &mut bob] {
        let event = expect_event(ws, "system-message").await;
        assert_eq!(event["data"]["message"], "Maintenance at noon");
        assert_eq!(event["data"]["level"], "warning");
    }
}
