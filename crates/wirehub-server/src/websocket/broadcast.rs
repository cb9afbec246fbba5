//! The live connection set and event fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::event::Event;

use super::connection::{Connection, ConnectionId};

/// Live connections indexed by id.
///
/// Fan-out takes a snapshot under the read lock and sends after releasing
/// it, so a slow recipient never holds the lock against add or remove.
pub struct ConnectionSet {
    connections: RwLock<HashMap<ConnectionId, Arc<Connection>>>,
}

impl ConnectionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a connection.
    pub async fn add(&self, connection: Arc<Connection>) {
        let mut conns = self.connections.write().await;
        let _ = conns.insert(connection.id().clone(), connection);
    }

    /// Remove a connection, returning it if it was present.
    pub async fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let mut conns = self.connections.write().await;
        conns.remove(id)
    }

    /// Whether the connection is present.
    pub async fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Look up a connection by id.
    pub async fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.read().await.get(id).cloned()
    }

    /// Number of live connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether the set is empty.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Every live connection.
    pub async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Live connections whose room equals `room`.
    pub async fn snapshot_room(&self, room: &str) -> Vec<Arc<Connection>> {
        let conns = self.connections.read().await;
        conns.values().filter(|c| c.in_room(room)).cloned().collect()
    }
}

impl Default for ConnectionSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Enqueue `event` on each recipient, logging and skipping failures.
pub(crate) async fn deliver(recipients: Vec<Arc<Connection>>, event: &Event) -> usize {
    let total = recipients.len();
    let mut delivered = 0;
    for conn in recipients {
        match conn.send(event.clone()).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                warn!(conn_id = %conn.id(), event_type = %event.event_type, error = %e, "failed to deliver event");
            }
        }
    }
    debug!(
        event_type = %event.event_type,
        recipients = total,
        delivered,
        "fan-out complete"
    );
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::mpsc;

    fn join(set: &Arc<ConnectionSet>, capacity: usize) -> (Arc<Connection>, mpsc::Receiver<Event>) {
        let (conn, rx) = Connection::new(Arc::downgrade(set), capacity, Duration::from_secs(10));
        (Arc::new(conn), rx)
    }

    #[tokio::test]
    async fn add_and_remove() {
        let set = Arc::new(ConnectionSet::new());
        let (conn, _rx) = join(&set, 1);
        set.add(Arc::clone(&conn)).await;
        assert_eq!(set.len().await, 1);
        assert!(set.contains(conn.id()).await);

        assert!(set.remove(conn.id()).await.is_some());
        assert!(set.remove(conn.id()).await.is_none());
        assert!(set.is_empty().await);
    }

    #[tokio::test]
    async fn get_by_id() {
        let set = Arc::new(ConnectionSet::new());
        let (conn, _rx) = join(&set, 1);
        set.add(Arc::clone(&conn)).await;
        let found = set.get(conn.id()).await.unwrap();
        assert!(Arc::ptr_eq(&found, &conn));
        assert!(set.get(&ConnectionId::from("conn_missing")).await.is_none());
    }

    #[tokio::test]
    async fn broadcast_includes_sender() {
        let set = Arc::new(ConnectionSet::new());
        let (a, mut a_rx) = join(&set, 4);
        let (b, mut b_rx) = join(&set, 4);
        set.add(Arc::clone(&a)).await;
        set.add(Arc::clone(&b)).await;

        let n = a.broadcast(Event::new("hello", json!(1)).with_from("a")).await;

        assert_eq!(n, 2);
        assert_eq!(a_rx.recv().await.unwrap().event_type, "hello");
        assert_eq!(b_rx.recv().await.unwrap().from, "a");
    }

    #[tokio::test]
    async fn group_cast_respects_rooms() {
        let set = Arc::new(ConnectionSet::new());
        let (a, mut a_rx) = join(&set, 4);
        let (b, mut b_rx) = join(&set, 4);
        let (c, mut c_rx) = join(&set, 4);
        for conn in [&a, &b, &c] {
            set.add(Arc::clone(conn)).await;
        }
        let _ = a.set_room("lobby");
        let _ = c.set_room("lobby");

        let n = a.group_cast(Event::new("msg", json!("x"))).await;

        assert_eq!(n, 2);
        assert_eq!(a_rx.recv().await.unwrap().event_type, "msg");
        assert_eq!(c_rx.recv().await.unwrap().event_type, "msg");
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn group_cast_uses_room_at_call_time() {
        let set = Arc::new(ConnectionSet::new());
        let (a, mut a_rx) = join(&set, 4);
        let (b, mut b_rx) = join(&set, 4);
        set.add(Arc::clone(&a)).await;
        set.add(Arc::clone(&b)).await;

        let _ = b.set_room("elsewhere");
        let _ = a.group_cast(Event::new("one", json!(null))).await;
        let _ = b.set_room("default");
        let _ = a.group_cast(Event::new("two", json!(null))).await;

        assert_eq!(a_rx.recv().await.unwrap().event_type, "one");
        assert_eq!(a_rx.recv().await.unwrap().event_type, "two");
        assert_eq!(b_rx.recv().await.unwrap().event_type, "two");
    }

    #[tokio::test]
    async fn failed_recipient_skipped() {
        let set = Arc::new(ConnectionSet::new());
        let (a, mut a_rx) = join(&set, 4);
        let (b, _b_rx) = join(&set, 4);
        set.add(Arc::clone(&a)).await;
        set.add(Arc::clone(&b)).await;
        b.close_queue();

        let n = a.broadcast(Event::new("x", json!(null))).await;

        assert_eq!(n, 1);
        assert_eq!(a_rx.recv().await.unwrap().event_type, "x");
    }

    #[tokio::test]
    async fn blocked_recipient_does_not_hold_lock() {
        let set = Arc::new(ConnectionSet::new());
        let (a, _a_rx) = join(&set, 4);
        let (slow, _slow_rx) = join(&set, 1);
        set.add(Arc::clone(&a)).await;
        set.add(Arc::clone(&slow)).await;
        // Fill the slow recipient's only slot.
        slow.send(Event::new("fill", json!(null))).await.unwrap();

        let sender = Arc::clone(&a);
        let fanout = tokio::spawn(async move { sender.broadcast(Event::new("x", json!(null))).await });
        tokio::task::yield_now().await;

        // Fan-out is parked on the slow queue; add/remove still proceed.
        let (late, _late_rx) = join(&set, 1);
        set.add(Arc::clone(&late)).await;
        assert!(set.remove(late.id()).await.is_some());

        slow.teardown();
        let _ = fanout.await.unwrap();
    }
}
