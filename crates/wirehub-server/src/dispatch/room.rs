//! Built-in `change_room` handler.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::errors::HandlerError;
use crate::event::{EVENT_SET_ROOM, Event};
use crate::websocket::connection::Connection;

use super::registry::EventHandler;

/// Moves the calling connection into the room named by the payload and
/// acknowledges with `set_room`.
pub struct ChangeRoomHandler;

#[async_trait]
impl EventHandler for ChangeRoomHandler {
    async fn handle(&self, event: Event, connection: &Arc<Connection>) -> Result<(), HandlerError> {
        let room = event.payload_text();
        let previous = connection.set_room(room.clone());
        debug!(conn_id = %connection.id(), from_room = %previous, room, "room changed");

        let ack = Event {
            event_type: EVENT_SET_ROOM.to_owned(),
            payload: event.payload,
            from: event.from,
        };
        connection.send(ack).await?;
        Ok(())
    }
}
