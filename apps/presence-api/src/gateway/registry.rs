//! Connection registry: the source of truth for who is online.
//!
//! Presence is per-**user**, not per-connection. A user stays online while
//! any one of their connections is registered.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use utoipa::ToSchema;

use crate::models::notification::Notification;
use crate::models::user::{Identity, UserSummary};

use super::connection::{ConnectionHandle, ConnectionId, ConnectionInbox, ConnectionRecord};
use super::events::{NotificationPush, PresenceStatus, ServerEvent};
use super::hub::{fan_out, ConnectionSlot, HubState, RoomExit, SharedHub};
use super::presence::PresenceFeed;
use super::queue::OfflineQueue;

/// Result of registering a connection.
#[derive(Debug, Clone)]
pub struct Registration {
    pub record: ConnectionRecord,
    /// True if this is the user's only connection.
    pub came_online: bool,
    /// Offline-queue entries handed to the new connection.
    pub flushed: usize,
}

/// Outcome of [`ConnectionRegistry::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Pushed,
    Queued,
}

/// An online user as listed on the admin surface.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnlineUser {
    #[serde(flatten)]
    pub user: UserSummary,
    pub connections: usize,
    /// Earliest `connected_at` among the user's connections.
    pub online_since: DateTime<Utc>,
}

pub struct ConnectionRegistry {
    hub: SharedHub,
    queue: Arc<OfflineQueue>,
    presence: PresenceFeed,
}

impl ConnectionRegistry {
    pub fn new(queue: Arc<OfflineQueue>) -> Self {
        Self {
            hub: Arc::new(RwLock::new(HubState::default())),
            queue,
            presence: PresenceFeed::new(),
        }
    }

    pub(crate) fn hub(&self) -> SharedHub {
        self.hub.clone()
    }

    pub fn queue(&self) -> &OfflineQueue {
        &self.queue
    }

    pub fn presence(&self) -> &PresenceFeed {
        &self.presence
    }

    /// Record an authenticated connection.
    ///
    /// The user's offline queue is flushed into `handle` under the same write
    /// lock that makes the connection visible, so a concurrent
    /// [`deliver`](Self::deliver) either queues before the flush or pushes
    /// after it; nothing is stranded or reordered.
    pub fn register_connection(
        &self,
        connection_id: ConnectionId,
        identity: &Identity,
        handle: ConnectionHandle,
    ) -> Registration {
        let record = ConnectionRecord {
            connection_id: connection_id.clone(),
            user_id: identity.user_id.clone(),
            user: identity.summary(),
            connected_at: Utc::now(),
        };

        let (came_online, flushed, observers) = {
            let mut hub = self.hub.write();

            let conns = hub.users.entry(identity.user_id.clone()).or_default();
            let came_online = conns.is_empty();
            conns.insert(connection_id.clone());

            hub.connections.insert(
                connection_id.clone(),
                ConnectionSlot {
                    record: record.clone(),
                    handle: handle.clone(),
                    rooms: Default::default(),
                },
            );

            let flushed = self.flush_into(&identity.user_id, &handle);

            let observers = if came_online {
                hub.handles_except_user(&identity.user_id)
            } else {
                Vec::new()
            };
            (came_online, flushed, observers)
        };

        if came_online {
            fan_out(
                &observers,
                ServerEvent::UserStatusChange {
                    user_id: identity.user_id.clone(),
                    username: identity.username.clone(),
                    status: PresenceStatus::Online,
                },
            );
            self.presence
                .publish(&identity.user_id, &identity.username, PresenceStatus::Online);
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %identity.user_id,
            came_online,
            flushed,
            "connection registered"
        );

        Registration {
            record,
            came_online,
            flushed,
        }
    }

    /// Hand queued notifications to a fresh connection. Anything the
    /// connection cannot take goes back on the queue.
    fn flush_into(&self, user_id: &str, handle: &ConnectionHandle) -> usize {
        let mut delivered = 0;
        let mut pending = self.queue.flush(user_id).into_iter();
        for notification in pending.by_ref() {
            let event = Arc::new(ServerEvent::Notification(NotificationPush::from(&notification)));
            if !handle.try_send(event) {
                self.queue.enqueue(user_id, notification);
                break;
            }
            delivered += 1;
        }
        for notification in pending {
            self.queue.enqueue(user_id, notification);
        }
        delivered
    }

    /// Forget a connection. Safe to call more than once.
    ///
    /// Leaves every room the connection joined. If it was the user's last
    /// connection the user goes offline.
    pub fn remove_connection(&self, connection_id: &str) -> Option<ConnectionRecord> {
        let departure = detach(&mut self.hub.write(), connection_id)?;
        self.announce(&departure);

        tracing::info!(
            connection_id = %connection_id,
            user_id = %departure.record.user_id,
            went_offline = departure.went_offline,
            "connection removed"
        );

        Some(departure.record)
    }

    /// Retire a connection whose socket task has ended and recover the
    /// notifications it accepted but never wrote.
    ///
    /// `unsent` is the event whose write failed, if any; it predates
    /// whatever is still buffered in `inbox`. Recovered notifications go to
    /// the user's remaining connections, or back to the front of the offline
    /// queue when none will take them. Expired ones are dropped. Runs under
    /// the hub write lock, so no [`deliver`](Self::deliver) or flush can
    /// slip a notification into `inbox` after it was drained.
    ///
    /// Returns how many notifications were recovered.
    pub fn release_connection(
        &self,
        connection_id: &str,
        user_id: &str,
        inbox: &mut ConnectionInbox,
        unsent: Option<Arc<ServerEvent>>,
    ) -> usize {
        let now = Utc::now();
        let (departure, recovered, requeued) = {
            let mut hub = self.hub.write();
            // Already gone if it was force-disconnected.
            let departure = detach(&mut hub, connection_id);

            let pending: Vec<Notification> = unsent
                .into_iter()
                .chain(std::iter::from_fn(|| inbox.events.try_recv().ok()))
                .filter_map(|event| match event.as_ref() {
                    ServerEvent::Notification(push) => Some(push.to_notification(user_id)),
                    _ => None,
                })
                .filter(|notification| !notification.is_expired(now))
                .collect();
            let recovered = pending.len();

            let handles = hub.handles_of_user(user_id);
            let leftover: Vec<Notification> = pending
                .into_iter()
                .filter(|notification| {
                    let event = Arc::new(ServerEvent::Notification(NotificationPush::from(notification)));
                    let accepted = handles
                        .iter()
                        .filter(|handle| handle.try_send(event.clone()))
                        .count();
                    accepted == 0
                })
                .collect();
            let requeued = leftover.len();
            self.queue.requeue(user_id, leftover);

            (departure, recovered, requeued)
        };

        if let Some(departure) = &departure {
            self.announce(departure);
        }

        tracing::info!(
            connection_id = %connection_id,
            user_id = %user_id,
            went_offline = departure.as_ref().is_some_and(|d| d.went_offline),
            recovered,
            requeued,
            "connection released"
        );

        recovered
    }

    /// Tell room members and other users about a departure. Called after the
    /// hub lock is released.
    fn announce(&self, departure: &Departure) {
        let record = &departure.record;
        for (room_id, remaining) in &departure.room_exits {
            fan_out(
                remaining,
                ServerEvent::UserLeftRoom {
                    room_id: room_id.clone(),
                    user_id: record.user_id.clone(),
                    username: record.user.username.clone(),
                },
            );
        }

        if departure.went_offline {
            fan_out(
                &departure.observers,
                ServerEvent::UserStatusChange {
                    user_id: record.user_id.clone(),
                    username: record.user.username.clone(),
                    status: PresenceStatus::Offline,
                },
            );
            self.presence
                .publish(&record.user_id, &record.user.username, PresenceStatus::Offline);
        }
    }

    /// Deliver `event` to every connection of `user_id` without waiting.
    /// Returns true if at least one connection accepted it. Never queues.
    pub fn push(&self, user_id: &str, event: ServerEvent) -> bool {
        let handles = self.hub.read().handles_of_user(user_id);
        fan_out(&handles, event) > 0
    }

    /// Push a notification, or put it on the offline queue if no connection
    /// accepts it.
    pub fn deliver(&self, user_id: &str, notification: &Notification) -> Delivery {
        let event = Arc::new(ServerEvent::Notification(NotificationPush::from(notification)));

        // Held across push-or-enqueue so registration cannot flush in between.
        let hub = self.hub.read();
        let accepted = hub
            .handles_of_user(user_id)
            .iter()
            .filter(|handle| handle.try_send(event.clone()))
            .count();
        if accepted > 0 {
            return Delivery::Pushed;
        }
        self.queue.enqueue(user_id, notification.clone());
        drop(hub);

        tracing::debug!(%user_id, notification_id = notification.id, "recipient offline, notification queued");
        Delivery::Queued
    }

    /// Send `event` to every live connection. Returns how many accepted it.
    pub fn broadcast_all(&self, event: ServerEvent) -> usize {
        let handles = self.hub.read().all_handles();
        fan_out(&handles, event)
    }

    /// Terminate every connection `user_id` holds. Returns how many were
    /// closed.
    pub fn force_disconnect(&self, user_id: &str, reason: &str) -> usize {
        let targets: Vec<(ConnectionId, ConnectionHandle)> = {
            let hub = self.hub.read();
            hub.users
                .get(user_id)
                .into_iter()
                .flatten()
                .filter_map(|id| hub.connections.get(id).map(|s| (id.clone(), s.handle.clone())))
                .collect()
        };
        let closed = self.terminate(targets, reason);
        tracing::info!(%user_id, %reason, closed, "user force-disconnected");
        closed
    }

    /// Terminate every connection. Used at shutdown.
    pub fn close_all(&self, reason: &str) -> usize {
        let targets: Vec<(ConnectionId, ConnectionHandle)> = self
            .hub
            .read()
            .connections
            .iter()
            .map(|(id, slot)| (id.clone(), slot.handle.clone()))
            .collect();
        self.terminate(targets, reason)
    }

    fn terminate(&self, targets: Vec<(ConnectionId, ConnectionHandle)>, reason: &str) -> usize {
        let notice = Arc::new(ServerEvent::ForceDisconnect {
            reason: reason.to_string(),
        });
        let mut closed = 0;
        for (connection_id, handle) in targets {
            handle.try_send(notice.clone());
            handle.close(reason);
            if self.remove_connection(&connection_id).is_some() {
                closed += 1;
            }
        }
        closed
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.hub
            .read()
            .users
            .get(user_id)
            .is_some_and(|conns| !conns.is_empty())
    }

    /// Number of distinct users online.
    pub fn online_count(&self) -> usize {
        self.hub.read().users.len()
    }

    pub fn connection_count(&self) -> usize {
        self.hub.read().connections.len()
    }

    pub fn connection(&self, connection_id: &str) -> Option<ConnectionRecord> {
        self.hub
            .read()
            .connections
            .get(connection_id)
            .map(|slot| slot.record.clone())
    }

    pub fn connections_of(&self, user_id: &str) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self
            .hub
            .read()
            .users
            .get(user_id)
            .map(|conns| conns.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Online users, sorted by username.
    pub fn list_online(&self) -> Vec<OnlineUser> {
        let hub = self.hub.read();
        let mut users: Vec<OnlineUser> = hub
            .users
            .values()
            .filter_map(|conns| {
                let records: Vec<&ConnectionRecord> = conns
                    .iter()
                    .filter_map(|id| hub.connections.get(id))
                    .map(|slot| &slot.record)
                    .collect();
                let first = records.first()?;
                Some(OnlineUser {
                    user: first.user.clone(),
                    connections: records.len(),
                    online_since: records.iter().map(|r| r.connected_at).min()?,
                })
            })
            .collect();
        drop(hub);
        users.sort_by(|a, b| a.user.username.cmp(&b.user.username));
        users
    }
}

/// What removing a connection changed, pending announcement.
struct Departure {
    record: ConnectionRecord,
    /// Rooms the user left entirely, with the members still inside.
    room_exits: Vec<(String, Vec<ConnectionHandle>)>,
    went_offline: bool,
    /// Connections of other users, when `went_offline`.
    observers: Vec<ConnectionHandle>,
}

fn detach(hub: &mut HubState, connection_id: &str) -> Option<Departure> {
    let rooms: Vec<String> = hub
        .connections
        .get(connection_id)?
        .rooms
        .iter()
        .cloned()
        .collect();
    let mut room_exits = Vec::new();
    for room_id in rooms {
        if let RoomExit::UserLeft { remaining } = hub.exit_room(connection_id, &room_id) {
            room_exits.push((room_id, remaining));
        }
    }

    let slot = hub.connections.remove(connection_id)?;
    let user_id = slot.record.user_id.clone();

    let went_offline = match hub.users.get_mut(&user_id) {
        Some(conns) => {
            conns.remove(connection_id);
            conns.is_empty()
        }
        None => true,
    };
    let observers = if went_offline {
        hub.users.remove(&user_id);
        hub.handles_except_user(&user_id)
    } else {
        Vec::new()
    };

    Some(Departure {
        record: slot.record,
        room_exits,
        went_offline,
        observers,
    })
}
