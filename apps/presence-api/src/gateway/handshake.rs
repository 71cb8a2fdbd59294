//! Credential discovery for a new gateway socket.
//!
//! A client may present its token in the upgrade request (`?token=` or an
//! `Authorization: Bearer` header). Otherwise its first frame must be
//! `authenticate {token}`, sent within the handshake window.

use axum::extract::ws::{Message, WebSocket};
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use futures_util::stream::SplitStream;
use futures_util::StreamExt;
use serde::Deserialize;

use super::events::ClientMessage;

#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
}

/// Why a handshake ended without a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    Timeout,
    /// The client went away first.
    Closed,
    /// The first frame was not `authenticate`.
    Rejected(&'static str),
}

impl HandshakeError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Timeout => "Authentication timeout",
            Self::Closed => "Connection closed before authentication",
            Self::Rejected(reason) => *reason,
        }
    }
}

/// Token supplied with the upgrade request, if any. The query parameter
/// wins over the header.
pub fn credential_from_request(query: &HandshakeQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query.token.as_deref().filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Pull the token out of a pre-authentication frame.
pub fn parse_authenticate(text: &str) -> Result<String, HandshakeError> {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Authenticate { token }) => Ok(token),
        Ok(_) => Err(HandshakeError::Rejected("Authentication required")),
        Err(_) => Err(HandshakeError::Rejected("Invalid authenticate frame")),
    }
}

/// Read frames until the client sends `authenticate`. The caller bounds
/// this with the handshake timeout.
pub(crate) async fn await_credential(
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<String, HandshakeError> {
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => return parse_authenticate(&text),
            Ok(Message::Close(_)) => return Err(HandshakeError::Closed),
            Ok(_) => continue,
            Err(e) => {
                tracing::debug!(?e, "ws read error during handshake");
                return Err(HandshakeError::Closed);
            }
        }
    }
    Err(HandshakeError::Closed)
}
