//! `SocketManager`: connection registry, lifecycle hooks and dispatch table.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::{MethodRouter, get};
use futures::future::BoxFuture;
use futures::{FutureExt, Sink, Stream, StreamExt};
use metrics::{counter, gauge, histogram};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SocketConfig;
use crate::dispatch::{ChangeRoomHandler, EventHandler, HandlerRegistry};
use crate::errors::{HandlerError, RouteError};
use crate::event::{EVENT_CHANGE_ROOM, Event};
use crate::metrics::{
    WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
    WS_DISCONNECTIONS_TOTAL, WS_REJECTED_TOTAL,
};

use super::broadcast::ConnectionSet;
use super::connection::Connection;
use super::handler::Termination;
use super::session::{run_inbound, run_outbound};

/// Callback run when a connection joins or leaves.
pub type LifecycleHook =
    Arc<dyn Fn(Arc<Connection>) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// A connection whose pumps are running.
pub struct Attached {
    /// The registered connection.
    pub connection: Arc<Connection>,
    /// Inbound pump task.
    pub inbound: JoinHandle<Termination>,
    /// Outbound pump task.
    pub outbound: JoinHandle<Termination>,
}

/// Owns the live connection set, the lifecycle hooks and the event handlers.
///
/// One manager serves any number of connections. It is shared as
/// `Arc<SocketManager>`; pumps hold a clone so they can deregister.
pub struct SocketManager {
    connections: Arc<ConnectionSet>,
    handlers: HandlerRegistry,
    on_connect: RwLock<Option<LifecycleHook>>,
    on_disconnect: RwLock<Option<LifecycleHook>>,
    config: SocketConfig,
}

impl SocketManager {
    /// Create a manager with the built-in `change_room` handler registered.
    pub fn new(config: SocketConfig) -> Arc<Self> {
        let handlers = HandlerRegistry::new();
        let _ = handlers.register(EVENT_CHANGE_ROOM, ChangeRoomHandler);
        Arc::new(Self {
            connections: Arc::new(ConnectionSet::new()),
            handlers,
            on_connect: RwLock::new(None),
            on_disconnect: RwLock::new(None),
            config,
        })
    }

    /// Socket limits and heartbeat timing.
    pub fn config(&self) -> &SocketConfig {
        &self.config
    }

    /// The event handler table.
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// The live connection set.
    pub fn connections(&self) -> &Arc<ConnectionSet> {
        &self.connections
    }

    /// Register (or replace) the handler for an event type.
    pub fn register_handler(&self, event_type: &str, handler: impl EventHandler + 'static) -> bool {
        self.handlers.register(event_type, handler)
    }

    /// Route an event as if it arrived on `connection`.
    pub async fn route(&self, event: Event, connection: &Arc<Connection>) -> Result<(), RouteError> {
        self.handlers.route(event, connection).await
    }

    /// Set the hook run after a connection is registered.
    pub fn on_connect<F, Fut>(&self, hook: F)
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let hook: LifecycleHook = Arc::new(move |conn: Arc<Connection>| hook(conn).boxed());
        *self.on_connect.write() = Some(hook);
    }

    /// Set the hook run when a connection is deregistered, before teardown.
    pub fn on_disconnect<F, Fut>(&self, hook: F)
    where
        F: Fn(Arc<Connection>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let hook: LifecycleHook = Arc::new(move |conn: Arc<Connection>| hook(conn).boxed());
        *self.on_disconnect.write() = Some(hook);
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.len().await
    }

    /// Insert a connection into the live set.
    pub async fn add(&self, connection: Arc<Connection>) {
        self.connections.add(connection).await;
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    }

    /// Deregister a connection.
    ///
    /// Only the first call for a connection does anything: it stops the
    /// queue, runs the disconnect hook, then tears down both pumps. Later
    /// calls return `false`.
    pub async fn remove(&self, connection: &Arc<Connection>) -> bool {
        let Some(removed) = self.connections.remove(connection.id()).await else {
            return false;
        };
        removed.close_queue();

        let hook = self.on_disconnect.read().clone();
        if let Some(hook) = hook {
            if let Err(e) = hook(Arc::clone(&removed)).await {
                warn!(conn_id = %removed.id(), error = %e, "on_disconnect hook failed");
            }
        }

        removed.teardown();
        counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        histogram!(WS_CONNECTION_DURATION_SECONDS).record(removed.age().as_secs_f64());
        info!(conn_id = %removed.id(), room = %removed.room(), "client disconnected");
        true
    }

    /// Deregister every live connection. Returns how many were removed.
    pub async fn disconnect_all(&self) -> usize {
        let mut removed = 0;
        for conn in self.connections.snapshot().await {
            if self.remove(&conn).await {
                removed += 1;
            }
        }
        removed
    }

    /// Register a connection over an already-established transport and start
    /// its pumps.
    ///
    /// The outbound pump starts before the connect hook runs so the hook can
    /// send; the inbound pump starts after it, so no event is routed before
    /// the hook finishes.
    pub async fn attach<K, S, E>(self: &Arc<Self>, sink: K, stream: S) -> Attached
    where
        K: Sink<Message> + Unpin + Send + 'static,
        K::Error: Display + Send,
        S: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
    {
        let (conn, queue) = Connection::new(
            Arc::downgrade(&self.connections),
            self.config.queue_capacity(),
            self.config.pong_wait(),
        );
        let connection = Arc::new(conn);
        self.add(Arc::clone(&connection)).await;
        info!(conn_id = %connection.id(), "client connected");

        let outbound = tokio::spawn(run_outbound(
            sink,
            queue,
            Arc::clone(&connection),
            Arc::clone(self),
        ));

        let hook = self.on_connect.read().clone();
        if let Some(hook) = hook {
            if let Err(e) = hook(Arc::clone(&connection)).await {
                warn!(conn_id = %connection.id(), error = %e, "on_connect hook failed");
            }
        }

        let inbound = tokio::spawn(run_inbound(
            stream,
            Arc::clone(&connection),
            Arc::clone(self),
        ));

        Attached {
            connection,
            inbound,
            outbound,
        }
    }

    /// Apply transport limits and upgrade the request.
    ///
    /// A failed upgrade after the response has been sent is logged; no
    /// connection is created.
    pub fn upgrade(self: &Arc<Self>, ws: WebSocketUpgrade) -> Response {
        let manager = Arc::clone(self);
        ws.max_message_size(self.config.max_message_size)
            .read_buffer_size(self.config.read_buffer_size)
            .write_buffer_size(self.config.write_buffer_size)
            .on_failed_upgrade(|error: axum::Error| {
                counter!(WS_REJECTED_TOTAL, "reason" => "upgrade_failed").increment(1);
                warn!(error = %error, "websocket upgrade failed");
            })
            .on_upgrade(move |socket| async move {
                let (sink, stream) = socket.split();
                let _ = manager.attach(sink, stream).await;
            })
    }

    /// A `GET` route that upgrades to a managed connection.
    ///
    /// Mount it on any path of any router.
    pub fn ws_route<S>(self: &Arc<Self>) -> MethodRouter<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        get(ws_upgrade).with_state(Arc::clone(self))
    }
}

async fn ws_upgrade(State(manager): State<Arc<SocketManager>>, ws: WebSocketUpgrade) -> Response {
    manager.upgrade(ws)
}
