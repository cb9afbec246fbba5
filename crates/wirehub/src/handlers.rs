//! Demo event handlers and lifecycle hooks.

use std::sync::Arc;

use tracing::info;
use wirehub_server::{Connection, Event, SocketManager, handler_fn};

/// Reply type for `echo`.
pub const EVENT_ECHO_REPLY: &str = "echo_reply";
/// Fan-out type for `send_message`.
pub const EVENT_NEW_MESSAGE: &str = "new_message";
/// Sender identity on server-originated replies.
pub const SERVER_IDENTITY: &str = "SERVER";

/// Register `echo` and `send_message`, plus logging connect/disconnect hooks.
pub fn register(manager: &SocketManager) {
    let _ = manager.register_handler(
        "echo",
        handler_fn(|event: Event, conn: Arc<Connection>| async move {
            let reply = Event::new(EVENT_ECHO_REPLY, event.payload).with_from(SERVER_IDENTITY);
            conn.send(reply).await?;
            Ok(())
        }),
    );

    let _ = manager.register_handler(
        "send_message",
        handler_fn(|event: Event, conn: Arc<Connection>| async move {
            let message = Event::new(EVENT_NEW_MESSAGE, event.payload).with_from(event.from);
            let delivered = conn.group_cast(message).await;
            info!(conn_id = %conn.id(), room = %conn.room(), delivered, "message sent");
            Ok(())
        }),
    );

    manager.on_connect(|conn| async move {
        info!(conn_id = %conn.id(), "peer joined");
        Ok(())
    });
    manager.on_disconnect(|conn| async move {
        info!(conn_id = %conn.id(), room = %conn.room(), age_secs = conn.age().as_secs(), "peer left");
        Ok(())
    });
}
