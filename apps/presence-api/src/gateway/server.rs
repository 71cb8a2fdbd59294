//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use portal_common::id::{prefix, prefixed_ulid};
use tokio::time;

use crate::error::CoreError;
use crate::models::user::Identity;
use crate::AppState;

use super::connection::{ConnectionHandle, ConnectionInbox};
use super::events::{ClientMessage, ServerEvent};
use super::handshake::{await_credential, credential_from_request, HandshakeError, HandshakeQuery};

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Close codes (4000-range for application-level).
const CLOSE_NORMAL: u16 = 1000;
const CLOSE_AUTH_FAILED: u16 = 4001;
const CLOSE_HANDSHAKE_TIMEOUT: u16 = 4008;
const CLOSE_FORCED: u16 = 4009;
const CLOSE_WRITE_TIMEOUT: u16 = 4010;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let credential = credential_from_request(&query, &headers);
    let tasks = state.connection_tasks.clone();
    ws.on_upgrade(move |socket| tasks.track_future(handle_connection(socket, state, credential)))
}

#[derive(Debug)]
enum WriteError {
    Timeout,
    Closed,
}

/// How a connection's loop ended.
struct Ended {
    reason: String,
    /// Event taken from the inbox whose write failed.
    unsent: Option<Arc<ServerEvent>>,
}

impl Ended {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            unsent: None,
        }
    }

    fn unsent(reason: String, event: Arc<ServerEvent>) -> Self {
        Self {
            reason,
            unsent: Some(event),
        }
    }
}

async fn handle_connection(socket: WebSocket, state: AppState, credential: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let write_timeout = state.config.push_write_timeout;

    // Step 1: authenticate within the handshake window.
    let handshake = time::timeout(
        state.config.handshake_timeout,
        authenticate(&state, credential, &mut ws_rx),
    )
    .await;

    let identity = match handshake {
        Ok(Ok(identity)) => identity,
        Ok(Err(message)) => {
            tracing::debug!(%message, "gateway handshake rejected");
            reject(&mut ws_tx, CLOSE_AUTH_FAILED, &message, write_timeout).await;
            return;
        }
        Err(_elapsed) => {
            tracing::debug!("gateway handshake timed out");
            let message = HandshakeError::Timeout.message();
            reject(&mut ws_tx, CLOSE_HANDSHAKE_TIMEOUT, message, write_timeout).await;
            return;
        }
    };

    let authenticated = ServerEvent::Authenticated {
        user_id: identity.user_id.clone(),
        username: identity.username.clone(),
        full_name: identity.full_name.clone(),
    };
    if write_event(&mut ws_tx, &authenticated, write_timeout).await.is_err() {
        return;
    }

    // Step 2: register. Queued notifications land in the inbox right away.
    let connection_id = prefixed_ulid(prefix::CONNECTION);
    let (handle, mut inbox) = ConnectionHandle::channel(state.config.outbound_buffer);
    state
        .registry
        .register_connection(connection_id.clone(), &identity, handle);

    // Step 3: serve until either side goes away.
    let ended = run_connection(&state, &connection_id, &identity, ws_tx, ws_rx, &mut inbox).await;

    // Step 4: unregister. Notifications still buffered go back to the queue.
    let recovered = state.registry.release_connection(
        &connection_id,
        &identity.user_id,
        &mut inbox,
        ended.unsent,
    );
    tracing::info!(
        connection_id = %connection_id,
        user_id = %identity.user_id,
        reason = %ended.reason,
        recovered,
        "gateway connection ended"
    );
}

/// Resolve the connection's credential to an identity. Errors are the text
/// of the `auth-error` frame.
async fn authenticate(
    state: &AppState,
    credential: Option<String>,
    ws_rx: &mut WsStream,
) -> Result<Identity, String> {
    let token = match credential {
        Some(token) => token,
        None => await_credential(ws_rx)
            .await
            .map_err(|e| e.message().to_string())?,
    };

    state.authenticator.verify(&token).await.map_err(|e| match e {
        CoreError::AuthenticationFailed(reason) => reason,
        other => {
            tracing::error!(error = %other, "credential check failed");
            "Authentication unavailable".to_string()
        }
    })
}

async fn run_connection(
    state: &AppState,
    connection_id: &str,
    identity: &Identity,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    inbox: &mut ConnectionInbox,
) -> Ended {
    let write_timeout = state.config.push_write_timeout;

    loop {
        tokio::select! {
            biased;

            // Forced termination (admin action or shutdown).
            _ = inbox.shutdown.changed() => {
                let reason = inbox.shutdown.borrow().clone().unwrap_or_default();
                // Flush what was queued before the close, including the
                // force-disconnect notice.
                while let Ok(event) = inbox.events.try_recv() {
                    if write_event(&mut ws_tx, &event, write_timeout).await.is_err() {
                        return Ended::unsent(format!("terminated: {reason}"), event);
                    }
                }
                let _ = time::timeout(write_timeout, send_close(&mut ws_tx, CLOSE_FORCED, &reason)).await;
                return Ended::new(format!("terminated: {reason}"));
            }

            // Client sends us a frame.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Some(reply) = handle_frame(state, connection_id, identity, &text) else {
                            continue;
                        };
                        if let Err(e) = write_event(&mut ws_tx, &reply, write_timeout).await {
                            return Ended::new(write_failed(&mut ws_tx, connection_id, e, write_timeout).await);
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => return Ended::new("client closed"),
                    Some(Err(e)) => {
                        tracing::debug!(?e, %connection_id, "ws read error");
                        return Ended::new("read error");
                    }
                    Some(Ok(_)) => continue,
                }
            }

            // Event pushed by the registry, a room, or the notification service.
            event = inbox.events.recv() => {
                let Some(event) = event else {
                    let _ = time::timeout(write_timeout, send_close(&mut ws_tx, CLOSE_NORMAL, "")).await;
                    return Ended::new("unregistered");
                };
                if let Err(e) = write_event(&mut ws_tx, &event, write_timeout).await {
                    return Ended::unsent(write_failed(&mut ws_tx, connection_id, e, write_timeout).await, event);
                }
            }
        }
    }
}

/// Dispatch one client frame. Returns the direct reply, if any.
///
/// Failures become an `error` frame on this connection only.
fn handle_frame(
    state: &AppState,
    connection_id: &str,
    identity: &Identity,
    text: &str,
) -> Option<ServerEvent> {
    let message: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(%e, %connection_id, "unparseable client frame");
            return Some(ServerEvent::error("Invalid message"));
        }
    };

    match message {
        ClientMessage::Authenticate { .. } => Some(ServerEvent::error("Already authenticated")),
        ClientMessage::JoinRoom { room_id, room_type } => {
            match state.rooms.join(connection_id, &room_id, room_type) {
                Ok(joined) => Some(ServerEvent::JoinedRoom {
                    room_id,
                    room_type: joined.room_type,
                    users_count: joined.member_count,
                }),
                Err(e) => Some(ServerEvent::error(e.to_string())),
            }
        }
        ClientMessage::LeaveRoom { room_id } => {
            state.rooms.leave(connection_id, &room_id);
            Some(ServerEvent::LeftRoom { room_id })
        }
        ClientMessage::Typing { room_id, is_typing } => {
            if !state.rooms.is_member(connection_id, &room_id) {
                return Some(ServerEvent::error("Not a member of this room"));
            }
            state.rooms.broadcast_except(
                &room_id,
                connection_id,
                ServerEvent::UserTyping {
                    room_id: room_id.clone(),
                    user_id: identity.user_id.clone(),
                    username: identity.username.clone(),
                    is_typing,
                },
            );
            None
        }
        ClientMessage::Ping => Some(ServerEvent::Pong),
    }
}

async fn write_event(
    ws_tx: &mut WsSink,
    event: &ServerEvent,
    deadline: Duration,
) -> Result<(), WriteError> {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(%e, event = event.name(), "failed to serialize gateway event");
            return Ok(());
        }
    };
    match time::timeout(deadline, ws_tx.send(Message::Text(json.into()))).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(_)) => Err(WriteError::Closed),
        Err(_) => Err(WriteError::Timeout),
    }
}

async fn write_failed(
    ws_tx: &mut WsSink,
    connection_id: &str,
    error: WriteError,
    deadline: Duration,
) -> String {
    match error {
        WriteError::Timeout => {
            tracing::warn!(%connection_id, "socket write timed out, dropping connection");
            // The sink is likely still stalled; don't wait on it forever.
            let _ = time::timeout(deadline, send_close(ws_tx, CLOSE_WRITE_TIMEOUT, "Write timeout")).await;
            "write timeout".into()
        }
        WriteError::Closed => "write failed".into(),
    }
}

/// Send `auth-error` and close.
async fn reject(ws_tx: &mut WsSink, code: u16, message: &str, deadline: Duration) {
    let event = ServerEvent::AuthError {
        message: message.to_string(),
    };
    if write_event(ws_tx, &event, deadline).await.is_ok() {
        let _ = time::timeout(deadline, send_close(ws_tx, code, message)).await;
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, code: u16, reason: &str) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code,
        reason: reason.to_string().into(),
    }));
    ws_tx.send(close_msg).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::events::RoomType;
    use crate::gateway::registry::tests::{drain, identity};
    use crate::AppState;

    fn state() -> AppState {
        AppState::in_memory(crate::config::Config::with_secret("server-test"))
    }

    fn connect(state: &AppState, conn: &str, user: &str) -> ConnectionInbox {
        let (handle, inbox) = ConnectionHandle::channel(16);
        state
            .registry
            .register_connection(conn.into(), &identity(user), handle);
        inbox
    }

    #[test]
    fn join_replies_with_member_count() {
        let state = state();
        let _inbox = connect(&state, "c1", "usr_amy");
        let reply = handle_frame(
            &state,
            "c1",
            &identity("usr_amy"),
            r#"{"event":"join-room","data":{"roomId":"course-1","roomType":"course"}}"#,
        );
        assert_eq!(
            reply,
            Some(ServerEvent::JoinedRoom {
                room_id: "course-1".into(),
                room_type: RoomType::Course,
                users_count: 1,
            })
        );
    }

    #[test]
    fn bad_frames_get_error_replies() {
        let state = state();
        let _inbox = connect(&state, "c1", "usr_amy");
        let amy = identity("usr_amy");

        assert_eq!(
            handle_frame(&state, "c1", &amy, "{nope"),
            Some(ServerEvent::error("Invalid message"))
        );
        assert_eq!(
            handle_frame(&state, "c1", &amy, r#"{"event":"authenticate","data":{"token":"x"}}"#),
            Some(ServerEvent::error("Already authenticated"))
        );
        assert!(matches!(
            handle_frame(&state, "c1", &amy, r#"{"event":"join-room","data":{"roomId":""}}"#),
            Some(ServerEvent::Error { .. })
        ));
        assert_eq!(
            handle_frame(&state, "c1", &amy, r#"{"event":"typing","data":{"roomId":"r"}}"#),
            Some(ServerEvent::error("Not a member of this room"))
        );
    }

    #[test]
    fn typing_is_not_echoed_to_sender() {
        let state = state();
        let mut amy_inbox = connect(&state, "a1", "usr_amy");
        let mut bob_inbox = connect(&state, "b1", "usr_bob");
        state.rooms.join("a1", "chat-1", RoomType::Chat).unwrap();
        state.rooms.join("b1", "chat-1", RoomType::Chat).unwrap();
        drain(&mut amy_inbox);
        drain(&mut bob_inbox);

        let reply = handle_frame(
            &state,
            "a1",
            &identity("usr_amy"),
            r#"{"event":"typing","data":{"roomId":"chat-1","isTyping":true}}"#,
        );
        assert!(reply.is_none());
        assert!(drain(&mut amy_inbox).is_empty());
        assert!(matches!(
            drain(&mut bob_inbox).as_slice(),
            [ServerEvent::UserTyping { user_id, is_typing: true, .. }] if user_id == "usr_amy"
        ));
    }

    #[test]
    fn ping_gets_pong() {
        let state = state();
        let reply = handle_frame(&state, "c1", &identity("usr_amy"), r#"{"event":"ping"}"#);
        assert_eq!(reply, Some(ServerEvent::Pong));
    }
}
