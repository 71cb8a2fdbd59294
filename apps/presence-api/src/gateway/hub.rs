//! The shared connection table behind the registry and the room broadcaster.
//!
//! Connections, the per-user index and room memberships sit behind one
//! `RwLock`, so a reader never sees a connection in one map but not yet in
//! another. Socket writes happen outside the lock: callers collect
//! [`ConnectionHandle`]s under the lock and fan out after releasing it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::models::user::UserSummary;

use super::connection::{ConnectionHandle, ConnectionId, ConnectionRecord};
use super::events::{RoomType, ServerEvent};

pub(crate) type SharedHub = Arc<RwLock<HubState>>;

pub(crate) struct ConnectionSlot {
    pub record: ConnectionRecord,
    pub handle: ConnectionHandle,
    /// Rooms this connection has joined.
    pub rooms: HashSet<String>,
}

/// Ephemeral: created on first join, dropped when the last member leaves.
pub(crate) struct Room {
    pub room_type: RoomType,
    /// user_id -> that user's connections in the room.
    pub members: HashMap<String, HashSet<ConnectionId>>,
}

impl Room {
    pub fn connection_count(&self) -> usize {
        self.members.values().map(HashSet::len).sum()
    }
}

/// What happened when a connection was taken out of a room.
pub(crate) enum RoomExit {
    NotMember,
    /// Another of the user's connections is still in the room.
    StillPresent,
    /// The user is no longer a member. `remaining` are the other members'
    /// connections.
    UserLeft { remaining: Vec<ConnectionHandle> },
}

#[derive(Default)]
pub(crate) struct HubState {
    pub connections: HashMap<ConnectionId, ConnectionSlot>,
    pub users: HashMap<String, HashSet<ConnectionId>>,
    pub rooms: HashMap<String, Room>,
}

impl HubState {
    pub fn handles_of_user(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.users
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
            .map(|slot| slot.handle.clone())
            .collect()
    }

    /// Every connection not owned by `user_id`.
    pub fn handles_except_user(&self, user_id: &str) -> Vec<ConnectionHandle> {
        self.connections
            .values()
            .filter(|slot| slot.record.user_id != user_id)
            .map(|slot| slot.handle.clone())
            .collect()
    }

    pub fn all_handles(&self) -> Vec<ConnectionHandle> {
        self.connections.values().map(|slot| slot.handle.clone()).collect()
    }

    pub fn room_handles(&self, room_id: &str, except: Option<&str>) -> Vec<ConnectionHandle> {
        let Some(room) = self.rooms.get(room_id) else {
            return Vec::new();
        };
        room.members
            .values()
            .flatten()
            .filter(|id| except != Some(id.as_str()))
            .filter_map(|id| self.connections.get(id))
            .map(|slot| slot.handle.clone())
            .collect()
    }

    pub fn summary_of(&self, user_id: &str) -> Option<UserSummary> {
        self.users
            .get(user_id)?
            .iter()
            .find_map(|id| self.connections.get(id))
            .map(|slot| slot.record.user.clone())
    }

    /// Remove `connection_id` from `room_id`, dropping the room if it empties.
    pub fn exit_room(&mut self, connection_id: &str, room_id: &str) -> RoomExit {
        let Some(slot) = self.connections.get_mut(connection_id) else {
            return RoomExit::NotMember;
        };
        if !slot.rooms.remove(room_id) {
            return RoomExit::NotMember;
        }
        let user_id = slot.record.user_id.clone();

        let Some(room) = self.rooms.get_mut(room_id) else {
            return RoomExit::NotMember;
        };

        let user_gone = match room.members.get_mut(&user_id) {
            Some(conns) => {
                conns.remove(connection_id);
                conns.is_empty()
            }
            None => return RoomExit::NotMember,
        };
        if !user_gone {
            return RoomExit::StillPresent;
        }

        room.members.remove(&user_id);
        if room.members.is_empty() {
            self.rooms.remove(room_id);
            return RoomExit::UserLeft {
                remaining: Vec::new(),
            };
        }

        RoomExit::UserLeft {
            remaining: self.room_handles(room_id, None),
        }
    }
}

/// Queue `event` on every handle. Returns how many accepted it.
pub(crate) fn fan_out(handles: &[ConnectionHandle], event: ServerEvent) -> usize {
    if handles.is_empty() {
        return 0;
    }
    let event = Arc::new(event);
    handles
        .iter()
        .filter(|handle| handle.try_send(event.clone()))
        .count()
}
