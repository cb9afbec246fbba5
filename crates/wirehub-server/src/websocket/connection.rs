//! Per-peer connection state and send primitives.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::SendError;
use crate::event::Event;

use super::broadcast::{ConnectionSet, deliver};

/// Room every connection starts in.
pub const DEFAULT_ROOM: &str = "default";

/// Opaque connection identifier (`conn_<uuid v7>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(format!("conn_{}", Uuid::now_v7()))
    }

    /// Borrow as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A connected peer.
///
/// Any holder may enqueue events; only the connection's outbound pump drains
/// the queue. The transport itself is owned by the two pumps and torn down
/// through `closed`.
pub struct Connection {
    id: ConnectionId,
    room: Mutex<String>,
    /// `None` once `close_queue` has been called.
    tx: Mutex<Option<mpsc::Sender<Event>>>,
    /// Reads past this instant fail with a timeout.
    deadline: Mutex<Instant>,
    closed: CancellationToken,
    members: Weak<ConnectionSet>,
    connected_at: std::time::Instant,
}

impl Connection {
    /// Create a connection and the receiving end of its outbound queue.
    ///
    /// `members` is the set used for broadcast and group-cast.
    pub fn new(
        members: Weak<ConnectionSet>,
        queue_capacity: usize,
        pong_wait: Duration,
    ) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let conn = Self {
            id: ConnectionId::new(),
            room: Mutex::new(DEFAULT_ROOM.to_owned()),
            tx: Mutex::new(Some(tx)),
            deadline: Mutex::new(Instant::now() + pong_wait),
            closed: CancellationToken::new(),
            members,
            connected_at: std::time::Instant::now(),
        };
        (conn, rx)
    }

    /// Connection identifier.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current room.
    pub fn room(&self) -> String {
        self.room.lock().clone()
    }

    /// Move to another room, returning the previous one.
    pub fn set_room(&self, room: impl Into<String>) -> String {
        std::mem::replace(&mut *self.room.lock(), room.into())
    }

    /// Whether the connection is currently in `room`.
    pub fn in_room(&self, room: &str) -> bool {
        *self.room.lock() == room
    }

    /// Enqueue an event for this peer.
    ///
    /// Waits for a free queue slot. Fails when the queue was closed or the
    /// connection has been torn down, instead of waiting forever.
    pub async fn send(&self, event: Event) -> Result<(), SendError> {
        let Some(tx) = self.tx.lock().clone() else {
            return Err(SendError::QueueClosed(self.id.clone()));
        };
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(SendError::Disconnected(self.id.clone())),
            res = tx.send(event) => res.map_err(|_| SendError::Disconnected(self.id.clone())),
        }
    }

    /// Enqueue on every registered connection, this one included.
    ///
    /// Returns how many connections accepted the event.
    pub async fn broadcast(&self, event: Event) -> usize {
        let Some(members) = self.members.upgrade() else {
            return 0;
        };
        let recipients = members.snapshot().await;
        deliver(recipients, &event).await
    }

    /// Enqueue on every registered connection sharing this connection's room.
    ///
    /// Returns how many connections accepted the event.
    pub async fn group_cast(&self, event: Event) -> usize {
        let Some(members) = self.members.upgrade() else {
            return 0;
        };
        let room = self.room();
        let recipients = members.snapshot_room(&room).await;
        deliver(recipients, &event).await
    }

    /// Stop accepting sends.
    ///
    /// Already queued events are still written; after that the outbound pump
    /// writes a close frame and the connection shuts down.
    pub fn close_queue(&self) {
        let _ = self.tx.lock().take();
    }

    /// Whether `close_queue` has been called.
    pub fn is_queue_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Current read deadline.
    pub fn deadline(&self) -> Instant {
        *self.deadline.lock()
    }

    /// Push the read deadline to `now + pong_wait`.
    pub fn extend_deadline(&self, pong_wait: Duration) {
        *self.deadline.lock() = Instant::now() + pong_wait;
    }

    /// Whether the transport has been torn down.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Time since the connection was created.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Token both pumps watch for teardown.
    pub(crate) fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }

    /// Signal both pumps to stop.
    pub(crate) fn teardown(&self) {
        self.closed.cancel();
    }

    /// A connection outside any set, for unit tests.
    #[cfg(test)]
    pub(crate) fn detached(queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Event>) {
        let (conn, rx) = Self::new(Weak::new(), queue_capacity, Duration::from_secs(10));
        (Arc::new(conn), rx)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("room", &self.room())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
