//! Room membership and membership-scoped fan-out.
//!
//! Every connection owns one ordered outbound queue. A room holds the queue
//! handles of its current members behind its own lock, and a broadcast keeps
//! that lock for the whole fan-out, so two broadcasts to the same room never
//! interleave while broadcasts to different rooms never contend.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::protocol::ServerEvent;

pub type ConnectionId = Uuid;
pub type Outbound = mpsc::UnboundedSender<Arc<ServerEvent>>;
pub type Inbound = mpsc::UnboundedReceiver<Arc<ServerEvent>>;

struct ConnectionEntry {
    user_id: String,
    tx: Outbound,
    rooms: HashSet<String>,
}

type Members = Arc<Mutex<HashMap<ConnectionId, Outbound>>>;

#[derive(Default)]
struct RegistryInner {
    // lock order: connections, then rooms, then a room's members
    connections: RwLock<HashMap<ConnectionId, ConnectionEntry>>,
    rooms: RwLock<HashMap<String, Members>>,
}

#[derive(Clone, Default)]
pub struct RoomRegistry {
    inner: Arc<RegistryInner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new connection for `user_id` and hands back the receiving
    /// end of its outbound queue.
    pub async fn connect(&self, user_id: impl Into<String>) -> (ConnectionId, Inbound) {
        let id = Uuid::now_v7();
        let (tx, rx) = mpsc::unbounded_channel();
        let user_id = user_id.into();
        debug!(connection = %id, user = %user_id, "connection registered");

        self.inner.connections.write().await.insert(
            id,
            ConnectionEntry {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        (id, rx)
    }

    /// Drops the connection from every room it joined. No events are emitted.
    pub async fn disconnect(&self, connection: ConnectionId) {
        let Some(entry) = self.inner.connections.write().await.remove(&connection) else {
            return;
        };

        let rooms = self.inner.rooms.read().await;
        for room_id in &entry.rooms {
            if let Some(members) = rooms.get(room_id) {
                members.lock().await.remove(&connection);
            }
        }
        debug!(connection = %connection, rooms = entry.rooms.len(), "connection dropped");
    }

    /// Adds the connection to the room. Returns false if it was already a
    /// member or is not registered.
    pub async fn join(&self, connection: ConnectionId, room_id: &str) -> bool {
        let mut connections = self.inner.connections.write().await;
        let Some(entry) = connections.get_mut(&connection) else {
            return false;
        };
        if !entry.rooms.insert(room_id.to_owned()) {
            return false;
        }

        let members = self
            .inner
            .rooms
            .write()
            .await
            .entry(room_id.to_owned())
            .or_default()
            .clone();
        members.lock().await.insert(connection, entry.tx.clone());

        info!(connection = %connection, user = %entry.user_id, room = room_id, "joined room");
        true
    }

    /// Removes the connection from the room. Returns false if it was not a member.
    pub async fn leave(&self, connection: ConnectionId, room_id: &str) -> bool {
        let mut connections = self.inner.connections.write().await;
        let Some(entry) = connections.get_mut(&connection) else {
            return false;
        };
        if !entry.rooms.remove(room_id) {
            return false;
        }

        if let Some(members) = self.inner.rooms.read().await.get(room_id) {
            members.lock().await.remove(&connection);
        }

        info!(connection = %connection, user = %entry.user_id, room = room_id, "left room");
        true
    }

    /// Queues `event` for every connection currently in the room, the
    /// originator's own included. Returns how many connections it reached.
    pub async fn broadcast(&self, room_id: &str, event: ServerEvent) -> usize {
        let Some(members) = self.inner.rooms.read().await.get(room_id).cloned() else {
            return 0;
        };

        let event = Arc::new(event);
        let mut members = members.lock().await;
        let before = members.len();
        members.retain(|_, tx| tx.send(event.clone()).is_ok());

        let reached = members.len();
        if reached < before {
            debug!(room = room_id, pruned = before - reached, "pruned closed connections");
        }
        reached
    }

    /// Queues an event for a single connection.
    pub async fn send_to(&self, connection: ConnectionId, event: ServerEvent) -> bool {
        match self.inner.connections.read().await.get(&connection) {
            Some(entry) => entry.tx.send(Arc::new(event)).is_ok(),
            None => false,
        }
    }

    pub async fn is_member(&self, connection: ConnectionId, room_id: &str) -> bool {
        self.inner
            .connections
            .read()
            .await
            .get(&connection)
            .is_some_and(|entry| entry.rooms.contains(room_id))
    }

    pub async fn members(&self, room_id: &str) -> Vec<ConnectionId> {
        let Some(members) = self.inner.rooms.read().await.get(room_id).cloned() else {
            return Vec::new();
        };
        let members = members.lock().await;
        members.keys().copied().collect()
    }

    pub async fn rooms_of(&self, connection: ConnectionId) -> Vec<String> {
        self.inner
            .connections
            .read()
            .await
            .get(&connection)
            .map(|entry| entry.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn user_of(&self, connection: ConnectionId) -> Option<String> {
        self.inner
            .connections
            .read()
            .await
            .get(&connection)
            .map(|entry| entry.user_id.clone())
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.connections.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(text: &str) -> ServerEvent {
        ServerEvent::Error { message: text.to_owned() }
    }

    fn drain(rx: &mut Inbound) -> Vec<Arc<ServerEvent>> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    #[tokio::test]
    async fn broadcast_reaches_every_member_including_sender() {
        let registry = RoomRegistry::new();
        let (a, mut rx_a) = registry.connect("alice").await;
        let (b, mut rx_b) = registry.connect("bob").await;
        let (_c, mut rx_c) = registry.connect("carol").await;

        registry.join(a, "r1").await;
        registry.join(b, "r1").await;

        assert_eq!(registry.broadcast("r1", notice("hello")).await, 2);
        assert_eq!(drain(&mut rx_a).len(), 1);
        assert_eq!(drain(&mut rx_b).len(), 1);
        assert!(drain(&mut rx_c).is_empty());
    }

    #[tokio::test]
    async fn join_and_leave_are_idempotent() {
        let registry = RoomRegistry::new();
        let (a, mut rx) = registry.connect("alice").await;

        assert!(registry.join(a, "r1").await);
        assert!(!registry.join(a, "r1").await);
        assert_eq!(registry.members("r1").await, vec![a]);

        registry.broadcast("r1", notice("once")).await;
        assert_eq!(drain(&mut rx).len(), 1);

        assert!(registry.leave(a, "r1").await);
        assert!(!registry.leave(a, "r1").await);
        assert!(registry.members("r1").await.is_empty());
    }

    #[tokio::test]
    async fn disconnect_removes_from_all_rooms() {
        let registry = RoomRegistry::new();
        let (a, _rx) = registry.connect("alice").await;
        registry.join(a, "r1").await;
        registry.join(a, "r2").await;

        registry.disconnect(a).await;

        assert!(registry.members("r1").await.is_empty());
        assert!(registry.members("r2").await.is_empty());
        assert!(registry.rooms_of(a).await.is_empty());
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn reconnect_and_rejoin_delivers_once() {
        let registry = RoomRegistry::new();
        let (first, _old_rx) = registry.connect("alice").await;
        registry.join(first, "r1").await;
        registry.disconnect(first).await;

        let (second, mut rx) = registry.connect("alice").await;
        registry.join(second, "r1").await;
        registry.join(second, "r1").await;

        assert_eq!(registry.members("r1").await, vec![second]);
        assert_eq!(registry.broadcast("r1", notice("after")).await, 1);
        assert_eq!(drain(&mut rx).len(), 1);
    }

    #[tokio::test]
    async fn closed_queues_are_pruned() {
        let registry = RoomRegistry::new();
        let (a, rx) = registry.connect("alice").await;
        registry.join(a, "r1").await;
        drop(rx);

        assert_eq!(registry.broadcast("r1", notice("gone")).await, 0);
        assert!(registry.members("r1").await.is_empty());
    }

    #[tokio::test]
    async fn per_connection_order_is_preserved() {
        let registry = RoomRegistry::new();
        let (a, mut rx) = registry.connect("alice").await;
        registry.join(a, "r1").await;

        for i in 0..50 {
            registry.broadcast("r1", notice(&i.to_string())).await;
        }

        let seen: Vec<String> = drain(&mut rx)
            .into_iter()
            .map(|event| match &*event {
                ServerEvent::Error { message } => message.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        let expected: Vec<String> = (0..50).map(|i| i.to_string()).collect();
        assert_eq!(seen, expected);
    }
}
