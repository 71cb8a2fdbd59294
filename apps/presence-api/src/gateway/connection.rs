//! Per-connection state and the channel pair that feeds a socket writer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use crate::models::user::UserSummary;

use super::events::ServerEvent;

/// Opaque handle to one transport session (`conn_` prefixed ULID).
pub type ConnectionId = String;

/// One live, authenticated transport connection.
#[derive(Debug, Clone)]
pub struct ConnectionRecord {
    pub connection_id: ConnectionId,
    pub user_id: String,
    /// Cached at handshake time.
    pub user: UserSummary,
    pub connected_at: DateTime<Utc>,
}

/// Sending half held by the registry.
///
/// Event delivery never waits: a full outbound buffer means the client is
/// not keeping up, and the push counts as undelivered.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    events: mpsc::Sender<Arc<ServerEvent>>,
    shutdown: Arc<watch::Sender<Option<String>>>,
}

/// Receiving half owned by the connection task.
pub struct ConnectionInbox {
    pub events: mpsc::Receiver<Arc<ServerEvent>>,
    pub shutdown: watch::Receiver<Option<String>>,
}

impl ConnectionHandle {
    pub fn channel(buffer: usize) -> (ConnectionHandle, ConnectionInbox) {
        let (events_tx, events_rx) = mpsc::channel(buffer.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(None);
        (
            ConnectionHandle {
                events: events_tx,
                shutdown: Arc::new(shutdown_tx),
            },
            ConnectionInbox {
                events: events_rx,
                shutdown: shutdown_rx,
            },
        )
    }

    /// Queue an event for the socket writer. Returns false if the buffer is
    /// full or the connection task has gone away.
    pub fn try_send(&self, event: Arc<ServerEvent>) -> bool {
        self.events.try_send(event).is_ok()
    }

    /// Ask the connection task to close the socket with `reason`.
    pub fn close(&self, reason: &str) {
        self.shutdown.send_replace(Some(reason.to_string()));
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }
}
