//! Room membership and room-scoped fan-out.
//!
//! Rooms are ephemeral. One is created on the first join and dropped when
//! its last member leaves or disconnects. Nothing here is persisted, so a
//! restart starts with no rooms and clients re-join on reconnect.

use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::{CoreError, CoreResult};
use crate::models::user::UserSummary;

use super::events::{RoomType, ServerEvent};
use super::hub::{fan_out, Room, RoomExit, SharedHub};
use super::registry::ConnectionRegistry;

const MAX_ROOM_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoomStats {
    pub room_id: String,
    pub room_type: RoomType,
    /// Distinct users in the room.
    pub members: usize,
    pub connections: usize,
}

/// Result of a join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Joined {
    pub room_type: RoomType,
    /// Distinct users in the room after the join.
    pub member_count: usize,
}

pub struct RoomBroadcaster {
    hub: SharedHub,
}

impl RoomBroadcaster {
    /// Shares the registry's connection table.
    pub fn new(registry: &ConnectionRegistry) -> Self {
        Self { hub: registry.hub() }
    }

    /// Add a connection to a room. Joining twice is a no-op.
    ///
    /// Existing members hear `user-joined-room` only when the user was not
    /// already in the room through another connection. A room keeps the type
    /// it was created with.
    pub fn join(
        &self,
        connection_id: &str,
        room_id: &str,
        room_type: RoomType,
    ) -> CoreResult<Joined> {
        validate_room_id(room_id)?;

        let (joined, announce) = {
            let mut hub = self.hub.write();
            let slot = hub
                .connections
                .get_mut(connection_id)
                .ok_or_else(|| CoreError::not_found("connection"))?;
            slot.rooms.insert(room_id.to_string());
            let user_id = slot.record.user_id.clone();
            let user = slot.record.user.clone();

            let room = hub.rooms.entry(room_id.to_string()).or_insert_with(|| Room {
                room_type,
                members: Default::default(),
            });
            let conns = room.members.entry(user_id.clone()).or_default();
            let newly_entered = conns.is_empty();
            conns.insert(connection_id.to_string());

            let joined = Joined {
                room_type: room.room_type,
                member_count: room.members.len(),
            };

            let announce = if newly_entered {
                let others: Vec<_> = room
                    .members
                    .iter()
                    .filter(|(member, _)| **member != user_id)
                    .flat_map(|(_, conns)| conns.iter().cloned())
                    .collect();
                let handles: Vec<_> = others
                    .iter()
                    .filter_map(|id| hub.connections.get(id))
                    .map(|slot| slot.handle.clone())
                    .collect();
                Some((handles, user))
            } else {
                None
            };
            (joined, announce)
        };

        if let Some((handles, user)) = announce {
            fan_out(
                &handles,
                ServerEvent::UserJoinedRoom {
                    room_id: room_id.to_string(),
                    user,
                },
            );
        }

        tracing::debug!(%connection_id, %room_id, members = joined.member_count, "joined room");
        Ok(joined)
    }

    /// Take a connection out of a room. Returns false if it was not a member.
    pub fn leave(&self, connection_id: &str, room_id: &str) -> bool {
        let (exit, user) = {
            let mut hub = self.hub.write();
            let user = hub
                .connections
                .get(connection_id)
                .map(|slot| (slot.record.user_id.clone(), slot.record.user.username.clone()));
            (hub.exit_room(connection_id, room_id), user)
        };

        match (exit, user) {
            (RoomExit::NotMember, _) | (_, None) => false,
            (RoomExit::StillPresent, _) => true,
            (RoomExit::UserLeft { remaining }, Some((user_id, username))) => {
                fan_out(
                    &remaining,
                    ServerEvent::UserLeftRoom {
                        room_id: room_id.to_string(),
                        user_id,
                        username,
                    },
                );
                tracing::debug!(%connection_id, %room_id, "left room");
                true
            }
        }
    }

    /// Send an application event to every connection in the room.
    /// Returns how many connections accepted it.
    pub fn broadcast(&self, room_id: &str, event_name: &str, payload: Value) -> usize {
        self.broadcast_event(
            room_id,
            None,
            ServerEvent::RoomEvent {
                room_id: room_id.to_string(),
                name: event_name.to_string(),
                payload,
            },
        )
    }

    /// Like [`broadcast`](Self::broadcast) but skips `except_connection`.
    pub fn broadcast_except(&self, room_id: &str, except_connection: &str, event: ServerEvent) -> usize {
        self.broadcast_event(room_id, Some(except_connection), event)
    }

    fn broadcast_event(&self, room_id: &str, except: Option<&str>, event: ServerEvent) -> usize {
        let handles = self.hub.read().room_handles(room_id, except);
        fan_out(&handles, event)
    }

    /// Members of `room_id`, sorted by username. Empty for an unknown room.
    pub fn members_of(&self, room_id: &str) -> Vec<UserSummary> {
        let hub = self.hub.read();
        let Some(room) = hub.rooms.get(room_id) else {
            return Vec::new();
        };
        let mut members: Vec<UserSummary> = room
            .members
            .keys()
            .filter_map(|user_id| hub.summary_of(user_id))
            .collect();
        drop(hub);
        members.sort_by(|a, b| a.username.cmp(&b.username));
        members
    }

    pub fn is_member(&self, connection_id: &str, room_id: &str) -> bool {
        self.hub
            .read()
            .connections
            .get(connection_id)
            .is_some_and(|slot| slot.rooms.contains(room_id))
    }

    pub fn room_count(&self) -> usize {
        self.hub.read().rooms.len()
    }

    /// Every live room, sorted by id.
    pub fn room_stats(&self) -> Vec<RoomStats> {
        let hub = self.hub.read();
        let mut stats: Vec<RoomStats> = hub
            .rooms
            .iter()
            .map(|(room_id, room)| RoomStats {
                room_id: room_id.clone(),
                room_type: room.room_type,
                members: room.members.len(),
                connections: room.connection_count(),
            })
            .collect();
        drop(hub);
        stats.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        stats
    }
}

fn validate_room_id(room_id: &str) -> CoreResult<()> {
    if room_id.trim().is_empty() {
        return Err(CoreError::validation("roomId must not be empty"));
    }
    if room_id.len() > MAX_ROOM_ID_LEN {
        return Err(CoreError::validation(format!(
            "roomId must be at most {MAX_ROOM_ID_LEN} characters"
        )));
    }
    Ok(())
}
