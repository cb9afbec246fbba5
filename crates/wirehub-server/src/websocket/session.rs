//! The two per-connection pumps.
//!
//! The inbound pump reads frames and routes events; the outbound pump drains
//! the connection's queue and sends pings. Either one ending deregisters the
//! connection, which tears down the other through the connection's token.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::event::Event;

use super::connection::Connection;
use super::handler::{Flow, Termination, handle_frame};
use super::heartbeat::Heartbeat;
use super::manager::SocketManager;

/// Upper bound on flushing the close handshake at teardown.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Read frames until a terminal condition, then deregister.
#[instrument(skip_all, fields(conn_id = %connection.id()))]
pub(crate) async fn run_inbound<S, E>(
    mut stream: S,
    connection: Arc<Connection>,
    manager: Arc<SocketManager>,
) -> Termination
where
    S: Stream<Item = Result<Message, E>> + Unpin + Send,
    E: Display + Send,
{
    let heartbeat = Heartbeat::from_config(manager.config());
    let max_message_size = manager.config().max_message_size;
    let teardown = connection.closed_token();
    heartbeat.pong_received(&connection);

    let termination = loop {
        let read = tokio::select! {
            biased;
            () = teardown.cancelled() => break Termination::Shutdown,
            read = tokio::time::timeout_at(connection.deadline(), stream.next()) => read,
        };
        let message = match read {
            Err(_elapsed) => break Termination::TimedOut,
            Ok(None) => break Termination::StreamEnded,
            Ok(Some(Err(e))) => break Termination::Transport(e.to_string()),
            Ok(Some(Ok(message))) => message,
        };
        match handle_frame(
            message,
            &connection,
            manager.handlers(),
            &heartbeat,
            max_message_size,
        )
        .await
        {
            Flow::Continue => {}
            Flow::Terminate(t) => break t,
        }
    };

    log_termination("inbound", &termination);
    let _ = manager.remove(&connection).await;
    termination
}

/// Drain the queue and ping until a terminal condition, then close the sink
/// and deregister.
#[instrument(skip_all, fields(conn_id = %connection.id()))]
pub(crate) async fn run_outbound<K>(
    mut sink: K,
    mut queue: mpsc::Receiver<Event>,
    connection: Arc<Connection>,
    manager: Arc<SocketManager>,
) -> Termination
where
    K: Sink<Message> + Unpin + Send,
    K::Error: Display + Send,
{
    let mut ticker = Heartbeat::from_config(manager.config()).ticker();
    let teardown = connection.closed_token();

    let termination = loop {
        tokio::select! {
            biased;
            () = teardown.cancelled() => break Termination::Shutdown,
            next = queue.recv() => {
                let Some(event) = next else {
                    if let Err(t) = write(&mut sink, Message::Close(None), &teardown).await {
                        debug!(error = %t, "close frame not written");
                    }
                    break Termination::QueueClosed;
                };
                let text = match event.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(event_type = %event.event_type, error = %e, "failed to encode event");
                        continue;
                    }
                };
                if let Err(t) = write(&mut sink, Message::Text(text.into()), &teardown).await {
                    break t;
                }
            }
            _ = ticker.tick() => {
                if let Err(t) = write(&mut sink, Heartbeat::ping(), &teardown).await {
                    break t;
                }
            }
        }
    };

    log_termination("outbound", &termination);
    if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
        debug!("sink close timed out");
    }
    let _ = manager.remove(&connection).await;
    termination
}

/// Write one frame, giving up if the connection is torn down meanwhile.
async fn write<K>(sink: &mut K, message: Message, teardown: &CancellationToken) -> Result<(), Termination>
where
    K: Sink<Message> + Unpin + Send,
    K::Error: Display + Send,
{
    tokio::select! {
        biased;
        () = teardown.cancelled() => Err(Termination::Shutdown),
        res = sink.send(message) => res.map_err(|e| Termination::WriteFailed(e.to_string())),
    }
}

fn log_termination(pump: &'static str, termination: &Termination) {
    if termination.is_benign() {
        info!(pump, kind = termination.label(), reason = %termination, "pump stopped");
    } else {
        warn!(pump, kind = termination.label(), reason = %termination, "pump stopped");
    }
}
