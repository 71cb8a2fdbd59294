//! Real-time gateway: connection registry, rooms and the WebSocket endpoint.
//!
//! All live state is in memory and owned by [`ConnectionRegistry`]; the
//! [`RoomBroadcaster`] shares its connection table.

pub mod connection;
pub mod events;
pub mod handshake;
mod hub;
pub mod presence;
pub mod queue;
pub mod registry;
pub mod rooms;
pub mod server;

pub use registry::{ConnectionRegistry, Delivery, OnlineUser};
pub use rooms::{RoomBroadcaster, RoomStats};
