//! Event type to handler table.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use parking_lot::RwLock;
use tracing::debug;

use crate::errors::{HandlerError, RouteError};
use crate::event::Event;
use crate::metrics::{EVENTS_ROUTED_TOTAL, EVENTS_UNKNOWN_TOTAL, HANDLER_ERRORS_TOTAL};
use crate::websocket::connection::Connection;

/// Trait implemented by every event handler.
///
/// The handler receives the connection the event arrived on so it can reply,
/// broadcast, or change the connection's room.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one inbound event.
    async fn handle(&self, event: Event, connection: &Arc<Connection>) -> Result<(), HandlerError>;
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as an [`EventHandler`].
///
/// ```ignore
/// manager.register_handler("echo", handler_fn(|event, conn| async move {
///     conn.send(Event::new("echo_reply", event.payload)).await?;
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Event, Arc<Connection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event, Arc<Connection>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: Event, connection: &Arc<Connection>) -> Result<(), HandlerError> {
        (self.f)(event, Arc::clone(connection)).await
    }
}

/// Registry mapping event types to handlers.
///
/// Exactly one handler per type; registering a type again replaces the
/// previous handler. Registration may happen while events are being routed.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn EventHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for an event type.
    ///
    /// Returns `true` if an existing handler was replaced.
    pub fn register(&self, event_type: &str, handler: impl EventHandler + 'static) -> bool {
        let replaced = self
            .handlers
            .write()
            .insert(event_type.to_owned(), Arc::new(handler))
            .is_some();
        debug!(event_type, replaced, "event handler registered");
        replaced
    }

    /// Look up the handler for an event type.
    pub fn get(&self, event_type: &str) -> Option<Arc<dyn EventHandler>> {
        self.handlers.read().get(event_type).cloned()
    }

    /// Route an event to its handler.
    ///
    /// The handler is cloned out of the table before it runs, so a slow
    /// handler never blocks registration.
    pub async fn route(&self, event: Event, connection: &Arc<Connection>) -> Result<(), RouteError> {
        let event_type = event.event_type.clone();
        let Some(handler) = self.get(&event_type) else {
            counter!(EVENTS_UNKNOWN_TOTAL).increment(1);
            return Err(RouteError::UnknownEventType(event_type));
        };

        counter!(EVENTS_ROUTED_TOTAL, "event_type" => event_type.clone()).increment(1);
        handler.handle(event, connection).await.map_err(|source| {
            counter!(HANDLER_ERRORS_TOTAL, "event_type" => event_type.clone()).increment(1);
            RouteError::Handler { event_type, source }
        })
    }

    /// All registered event types (sorted).
    pub fn event_types(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether a handler is registered for the type.
    pub fn has_handler(&self, event_type: &str) -> bool {
        self.handlers.read().contains_key(event_type)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// Whether no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use assert_matches::assert_matches;
    use serde_json::json;

    struct Counting {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for Counting {
        async fn handle(&self, _event: Event, _conn: &Arc<Connection>) -> Result<(), HandlerError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventHandler for Failing {
        async fn handle(&self, _event: Event, _conn: &Arc<Connection>) -> Result<(), HandlerError> {
            Err(HandlerError::internal("nope"))
        }
    }

    fn counting() -> (Counting, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Counting {
                calls: Arc::clone(&calls),
            },
            calls,
        )
    }

    #[tokio::test]
    async fn routes_to_registered_handler_once() {
        let reg = HandlerRegistry::new();
        let (a, a_calls) = counting();
        let (b, b_calls) = counting();
        let _ = reg.register("a", a);
        let _ = reg.register("b", b);
        let (conn, _rx) = Connection::detached(1);

        reg.route(Event::new("a", json!(null)), &conn).await.unwrap();

        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unknown_type_reported() {
        let reg = HandlerRegistry::new();
        let (conn, _rx) = Connection::detached(1);
        let err = reg
            .route(Event::new("missing", json!(null)), &conn)
            .await
            .unwrap_err();
        assert_matches!(err, RouteError::UnknownEventType(t) if t == "missing");
    }

    #[tokio::test]
    async fn handler_error_surfaces() {
        let reg = HandlerRegistry::new();
        let _ = reg.register("bad", Failing);
        let (conn, _rx) = Connection::detached(1);
        let err = reg
            .route(Event::new("bad", json!(null)), &conn)
            .await
            .unwrap_err();
        assert_matches!(
            err,
            RouteError::Handler { event_type, source: HandlerError::Internal { .. } } if event_type == "bad"
        );
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let reg = HandlerRegistry::new();
        let (first, first_calls) = counting();
        let (second, second_calls) = counting();
        assert!(!reg.register("t", first));
        assert!(reg.register("t", second));
        assert_eq!(reg.len(), 1);

        let (conn, _rx) = Connection::detached(1);
        reg.route(Event::new("t", json!(1)), &conn).await.unwrap();
        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(second_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closure_handler_replies() {
        let reg = HandlerRegistry::new();
        let _ = reg.register(
            "echo",
            handler_fn(|event: Event, conn: Arc<Connection>| async move {
                conn.send(Event::new("echo_reply", event.payload)).await?;
                Ok(())
            }),
        );
        let (conn, mut rx) = Connection::detached(1);

        reg.route(Event::new("echo", json!("hi")), &conn).await.unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.event_type, "echo_reply");
        assert_eq!(reply.payload, json!("hi"));
    }

    #[tokio::test]
    async fn registration_during_routing() {
        let reg = Arc::new(HandlerRegistry::new());
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let gate_rx = Arc::new(tokio::sync::Mutex::new(Some(gate_rx)));
        let _ = reg.register(
            "slow",
            handler_fn(move |_event: Event, _conn: Arc<Connection>| {
                let gate_rx = Arc::clone(&gate_rx);
                async move {
                    if let Some(rx) = gate_rx.lock().await.take() {
                        let _ = rx.await;
                    }
                    Ok(())
                }
            }),
        );

        let (conn, _rx) = Connection::detached(1);
        let routing = {
            let reg = Arc::clone(&reg);
            tokio::spawn(async move { reg.route(Event::new("slow", json!(null)), &conn).await })
        };
        tokio::task::yield_now().await;

        // The slow handler is in flight; the table is not locked.
        let (other, _) = counting();
        let _ = reg.register("other", other);
        assert!(reg.has_handler("other"));

        let _ = gate_tx.send(());
        routing.await.unwrap().unwrap();
    }

    #[test]
    fn event_types_sorted() {
        let reg = HandlerRegistry::new();
        let _ = reg.register("zeta", Failing);
        let _ = reg.register("alpha", Failing);
        assert_eq!(reg.event_types(), vec!["alpha", "zeta"]);
        assert!(!reg.is_empty());
        assert!(!reg.has_handler("beta"));
    }
}
