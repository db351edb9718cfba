//! Real-time fan-out hub.
//!
//! A single dispatcher task consumes typed [`HubEvent`]s from an mpsc
//! channel, so event order is the order the dispatcher accepts them.
//! Connection state (the registry, the per-user index, the room index) lives
//! behind one `RwLock` whose critical sections never cross an await.
//!
//! Delivery to a connection is a non-blocking `try_send` on its bounded
//! outbound queue. A full queue means a slow consumer: the hub closes that
//! connection and unregisters it rather than blocking everyone else. Other
//! connections are unaffected.

mod bridge;
mod connection;
mod socket;

pub use bridge::{
    BusError, BusPublisher, GLOBAL_NOTIFICATIONS, LIVE_PLAYLISTS, LIVE_UPDATES, NOW_PLAYING,
    PLAYLIST_UPDATES, SYSTEM_NOTIFICATIONS, USER_PRESENCE, run_bridge, user_channel,
};
pub use connection::{ConnectionHandle, ConnectionId};
pub use socket::serve_socket;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::CONNECTION_QUEUE_CAPACITY;
use crate::model::BusMessage;
use connection::ConnectionEntry;

/// Capacity of the dispatcher's event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events accepted by the dispatcher.
#[derive(Debug)]
enum HubEvent {
    Register {
        id: ConnectionId,
        entry: ConnectionEntry,
    },
    Unregister {
        id: ConnectionId,
    },
    Broadcast(BusMessage),
    SendToUser {
        user_id: String,
        message: BusMessage,
    },
    SendToConnection {
        id: ConnectionId,
        message: BusMessage,
    },
    SendToRoom {
        room: String,
        message: BusMessage,
    },
    JoinRoom {
        id: ConnectionId,
        room: String,
    },
    LeaveRoom {
        id: ConnectionId,
        room: String,
    },
}

/// Connection registry and its secondary indexes.
#[derive(Debug, Default)]
struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    users: HashMap<String, HashSet<ConnectionId>>,
    rooms: HashMap<String, HashSet<ConnectionId>>,
}

impl Registry {
    fn insert(&mut self, id: ConnectionId, entry: ConnectionEntry) {
        if let Some(user_id) = &entry.user_id {
            self.users
                .entry(user_id.clone())
                .or_default()
                .insert(id.clone());
        }
        self.connections.insert(id, entry);
    }

    /// Removes a connection from every index. Returns whether it was present.
    fn remove(&mut self, id: &ConnectionId) -> bool {
        let Some(entry) = self.connections.remove(id) else {
            return false;
        };
        if let Some(user_id) = &entry.user_id {
            if let Some(set) = self.users.get_mut(user_id) {
                set.remove(id);
                if set.is_empty() {
                    self.users.remove(user_id);
                }
            }
        }
        for members in self.rooms.values_mut() {
            members.remove(id);
        }
        self.rooms.retain(|_, members| !members.is_empty());
        true
    }
}

/// Cloneable handle to the hub; the only way components talk to it.
#[derive(Debug, Clone)]
pub struct HubHandle {
    events: mpsc::Sender<HubEvent>,
    registry: Arc<RwLock<Registry>>,
}

impl HubHandle {
    /// Starts the hub: spawns the dispatcher task and returns the handle.
    #[must_use]
    pub fn start() -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let registry = Arc::new(RwLock::new(Registry::default()));
        tokio::spawn(dispatch(events_rx, Arc::clone(&registry)));
        Self {
            events: events_tx,
            registry,
        }
    }

    /// Registers a new connection and returns its handle.
    ///
    /// `user_id` is `None` for anonymous connections (they receive only
    /// broadcasts). The outbound queue uses the default bounded capacity.
    pub async fn register(&self, user_id: Option<String>) -> ConnectionHandle {
        self.register_with_capacity(user_id, CONNECTION_QUEUE_CAPACITY)
            .await
    }

    /// Registers with an explicit queue capacity (tests exercise the
    /// queue-full drop policy with a capacity of one).
    pub async fn register_with_capacity(
        &self,
        user_id: Option<String>,
        capacity: usize,
    ) -> ConnectionHandle {
        let id = ConnectionId::generate();
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.send(HubEvent::Register {
            id: id.clone(),
            entry: ConnectionEntry {
                user_id,
                outbound: tx,
            },
        })
        .await;
        ConnectionHandle { id, outbound: rx }
    }

    /// Unregisters a connection; its outbound queue closes once the
    /// dispatcher processes the event. Unregistering twice is a no-op.
    pub async fn unregister(&self, id: ConnectionId) {
        self.send(HubEvent::Unregister { id }).await;
    }

    /// Broadcasts to every live connection.
    pub async fn broadcast(&self, message: BusMessage) {
        self.send(HubEvent::Broadcast(message)).await;
    }

    /// Sends to every connection of one user; unknown user is a no-op.
    pub async fn send_to_user(&self, user_id: impl Into<String>, message: BusMessage) {
        self.send(HubEvent::SendToUser {
            user_id: user_id.into(),
            message,
        })
        .await;
    }

    /// Sends to a single connection (used for `pong` replies).
    pub async fn send_to_connection(&self, id: ConnectionId, message: BusMessage) {
        self.send(HubEvent::SendToConnection { id, message }).await;
    }

    /// Sends to every member of a room; unknown room is a no-op.
    pub async fn send_to_room(&self, room: impl Into<String>, message: BusMessage) {
        self.send(HubEvent::SendToRoom {
            room: room.into(),
            message,
        })
        .await;
    }

    /// Adds a connection to a room.
    pub async fn join_room(&self, id: ConnectionId, room: impl Into<String>) {
        self.send(HubEvent::JoinRoom {
            id,
            room: room.into(),
        })
        .await;
    }

    /// Removes a connection from a room.
    pub async fn leave_room(&self, id: ConnectionId, room: impl Into<String>) {
        self.send(HubEvent::LeaveRoom {
            id,
            room: room.into(),
        })
        .await;
    }

    /// Number of live connections; observability and tests.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .connections
            .len()
    }

    /// Number of live connections for one user.
    #[must_use]
    pub fn user_connection_count(&self, user_id: &str) -> usize {
        self.registry
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .users
            .get(user_id)
            .map_or(0, HashSet::len)
    }

    async fn send(&self, event: HubEvent) {
        if self.events.send(event).await.is_err() {
            warn!("hub dispatcher is gone, dropping event");
        }
    }
}

/// The single dispatcher loop: serializes every mutation and fan-out.
async fn dispatch(mut events: mpsc::Receiver<HubEvent>, registry: Arc<RwLock<Registry>>) {
    info!("hub dispatcher started");
    while let Some(event) = events.recv().await {
        match event {
            HubEvent::Register { id, entry } => {
                debug!(connection = %id, user = entry.user_id.as_deref().unwrap_or("-"), "register");
                registry
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .insert(id, entry);
            }
            HubEvent::Unregister { id } => {
                let removed = registry
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .remove(&id);
                if removed {
                    debug!(connection = %id, "unregistered");
                }
            }
            HubEvent::Broadcast(message) => {
                let stale = {
                    let registry = registry
                        .read()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    deliver(
                        registry
                            .connections
                            .iter()
                            .map(|(id, entry)| (id, &entry.outbound)),
                        &message,
                    )
                };
                drop_stale(&registry, stale);
            }
            HubEvent::SendToUser { user_id, message } => {
                let stale = {
                    let registry = registry
                        .read()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    let Some(ids) = registry.users.get(&user_id) else {
                        continue;
                    };
                    deliver(
                        ids.iter()
                            .filter_map(|id| registry.connections.get(id).map(|e| (id, &e.outbound))),
                        &message,
                    )
                };
                drop_stale(&registry, stale);
            }
            HubEvent::SendToConnection { id, message } => {
                let stale = {
                    let registry = registry
                        .read()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    let Some(entry) = registry.connections.get(&id) else {
                        continue;
                    };
                    deliver(std::iter::once((&id, &entry.outbound)), &message)
                };
                drop_stale(&registry, stale);
            }
            HubEvent::SendToRoom { room, message } => {
                let stale = {
                    let registry = registry
                        .read()
                        .unwrap_or_else(std::sync::PoisonError::into_inner);
                    let Some(ids) = registry.rooms.get(&room) else {
                        continue;
                    };
                    deliver(
                        ids.iter()
                            .filter_map(|id| registry.connections.get(id).map(|e| (id, &e.outbound))),
                        &message,
                    )
                };
                drop_stale(&registry, stale);
            }
            HubEvent::JoinRoom { id, room } => {
                let mut registry = registry
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if registry.connections.contains_key(&id) {
                    registry.rooms.entry(room).or_default().insert(id);
                }
            }
            HubEvent::LeaveRoom { id, room } => {
                let mut registry = registry
                    .write()
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                if let Some(members) = registry.rooms.get_mut(&room) {
                    members.remove(&id);
                    if members.is_empty() {
                        registry.rooms.remove(&room);
                    }
                }
            }
        }
    }
    info!("hub dispatcher stopped");
}

/// Non-blocking fan-out; returns the connections whose queue was full.
fn deliver<'a>(
    targets: impl Iterator<Item = (&'a ConnectionId, &'a mpsc::Sender<BusMessage>)>,
    message: &BusMessage,
) -> Vec<ConnectionId> {
    let mut stale = Vec::new();
    for (id, outbound) in targets {
        match outbound.try_send(message.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                // Backpressure policy: a slow consumer is dropped, not waited on.
                warn!(connection = %id, "outbound queue full, dropping connection");
                stale.push(id.clone());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(connection = %id, "outbound queue already closed");
                stale.push(id.clone());
            }
        }
    }
    stale
}

/// Unregisters connections found dead during fan-out.
fn drop_stale(registry: &Arc<RwLock<Registry>>, stale: Vec<ConnectionId>) {
    if stale.is_empty() {
        return;
    }
    let mut registry = registry
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    for id in stale {
        registry.remove(&id);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn settle() {
        // Let the dispatcher drain its queue.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
    }

    #[tokio::test]
    async fn test_register_indexes_user() {
        let hub = HubHandle::start();
        let _conn = hub.register(Some("u1".to_string())).await;
        settle().await;
        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.user_connection_count("u1"), 1);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let hub = HubHandle::start();
        let mut a = hub.register(Some("u1".to_string())).await;
        let mut b = hub.register(None).await;
        settle().await;

        hub.broadcast(BusMessage::system_notification(serde_json::json!("hi")))
            .await;
        settle().await;

        assert_eq!(a.outbound.recv().await.unwrap().kind, "system_notification");
        assert_eq!(b.outbound.recv().await.unwrap().kind, "system_notification");
    }

    #[tokio::test]
    async fn test_user_send_targets_only_that_user() {
        let hub = HubHandle::start();
        let mut u1 = hub.register(Some("u1".to_string())).await;
        let mut u2 = hub.register(Some("u2".to_string())).await;
        settle().await;

        hub.send_to_user("u1", BusMessage::notification(serde_json::json!("yours")))
            .await;
        settle().await;

        assert!(u1.outbound.try_recv().is_ok());
        assert!(u2.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_user_send_to_missing_user_is_noop() {
        let hub = HubHandle::start();
        let mut conn = hub.register(Some("u1".to_string())).await;
        settle().await;

        hub.send_to_user("ghost", BusMessage::notification(serde_json::json!(1)))
            .await;
        settle().await;

        assert!(conn.outbound.try_recv().is_err());
        assert_eq!(hub.connection_count(), 1);
    }

    #[tokio::test]
    async fn test_unregister_closes_queue_and_stops_delivery() {
        let hub = HubHandle::start();
        let mut conn = hub.register(Some("u1".to_string())).await;
        settle().await;

        hub.unregister(conn.id.clone()).await;
        settle().await;

        assert_eq!(hub.connection_count(), 0);
        assert_eq!(hub.user_connection_count("u1"), 0);
        // Queue is closed: recv yields None, and later sends reach nobody.
        assert!(conn.outbound.recv().await.is_none());
        hub.send_to_user("u1", BusMessage::notification(serde_json::json!(1)))
            .await;
        settle().await;
    }

    #[tokio::test]
    async fn test_double_unregister_is_noop() {
        let hub = HubHandle::start();
        let conn = hub.register(None).await;
        settle().await;
        hub.unregister(conn.id.clone()).await;
        hub.unregister(conn.id.clone()).await;
        settle().await;
        assert_eq!(hub.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_only_that_connection() {
        let hub = HubHandle::start();
        let mut healthy = hub.register(Some("u3".to_string())).await;
        let slow = hub.register_with_capacity(Some("u3".to_string()), 1).await;
        settle().await;
        assert_eq!(hub.user_connection_count("u3"), 2);

        // Two broadcasts: the slow connection (capacity 1, never drained)
        // overflows on the second and is dropped.
        hub.broadcast(BusMessage::notification(serde_json::json!(1)))
            .await;
        hub.broadcast(BusMessage::notification(serde_json::json!(2)))
            .await;
        settle().await;

        assert_eq!(hub.connection_count(), 1);
        assert_eq!(hub.user_connection_count("u3"), 1);

        // The healthy connection still receives subsequent messages in order.
        hub.broadcast(BusMessage::notification(serde_json::json!(3)))
            .await;
        settle().await;
        assert_eq!(healthy.outbound.recv().await.unwrap().data, 1);
        assert_eq!(healthy.outbound.recv().await.unwrap().data, 2);
        assert_eq!(healthy.outbound.recv().await.unwrap().data, 3);
        drop(slow);
    }

    #[tokio::test]
    async fn test_room_membership_and_send() {
        let hub = HubHandle::start();
        let mut in_room = hub.register(None).await;
        let mut outside = hub.register(None).await;
        settle().await;

        hub.join_room(in_room.id.clone(), "listening-party").await;
        settle().await;

        hub.send_to_room(
            "listening-party",
            BusMessage::live_playlist(serde_json::json!({"track": "t1"})),
        )
        .await;
        settle().await;

        assert!(in_room.outbound.try_recv().is_ok());
        assert!(outside.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_room_stops_room_delivery() {
        let hub = HubHandle::start();
        let mut conn = hub.register(None).await;
        settle().await;

        hub.join_room(conn.id.clone(), "r").await;
        hub.leave_room(conn.id.clone(), "r").await;
        hub.send_to_room("r", BusMessage::live_playlist(serde_json::json!(1)))
            .await;
        settle().await;

        assert!(conn.outbound.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unregister_clears_room_membership() {
        let hub = HubHandle::start();
        let conn = hub.register(None).await;
        settle().await;
        hub.join_room(conn.id.clone(), "r").await;
        hub.unregister(conn.id.clone()).await;
        settle().await;

        let registry = hub
            .registry
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        assert!(registry.rooms.is_empty());
    }

    #[tokio::test]
    async fn test_per_connection_delivery_is_fifo() {
        let hub = HubHandle::start();
        let mut conn = hub.register(None).await;
        settle().await;

        for n in 0..10 {
            hub.broadcast(BusMessage::notification(serde_json::json!(n)))
                .await;
        }
        settle().await;

        for n in 0..10 {
            assert_eq!(conn.outbound.recv().await.unwrap().data, n);
        }
    }
}
