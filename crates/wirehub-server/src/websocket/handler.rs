//! Inbound frame handling: decode, route, and decide whether the pump goes on.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, close_code};
use tracing::{debug, warn};

use crate::errors::RouteError;
use crate::event::Event;
use crate::dispatch::HandlerRegistry;

use super::connection::Connection;
use super::heartbeat::Heartbeat;

/// What the inbound pump does after a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading.
    Continue,
    /// Stop the pump and deregister the connection.
    Terminate(Termination),
}

/// Why a pump stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Termination {
    /// The peer sent a close frame.
    #[error("peer closed (code {code:?})")]
    PeerClosed {
        /// Close code, if the frame carried one.
        code: Option<u16>,
    },
    /// The transport stream ended without a close frame.
    #[error("stream ended")]
    StreamEnded,
    /// The transport reported a read error.
    #[error("transport error: {0}")]
    Transport(String),
    /// A frame was not a valid event envelope.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// No pong arrived within the pong wait.
    #[error("liveness deadline passed")]
    TimedOut,
    /// A frame exceeded the configured message size.
    #[error("message of {size} bytes exceeds limit of {limit}")]
    MessageTooLarge {
        /// Size of the offending frame.
        size: usize,
        /// Configured limit.
        limit: usize,
    },
    /// The outbound queue was closed and drained.
    #[error("outbound queue closed")]
    QueueClosed,
    /// Writing to the transport failed.
    #[error("write failed: {0}")]
    WriteFailed(String),
    /// The connection was torn down from elsewhere.
    #[error("connection torn down")]
    Shutdown,
}

impl Termination {
    /// Expected endings, logged at info rather than warn.
    pub fn is_benign(&self) -> bool {
        match self {
            Self::PeerClosed { code } => {
                matches!(code, None | Some(close_code::NORMAL | close_code::AWAY))
            }
            Self::StreamEnded | Self::QueueClosed | Self::Shutdown => true,
            _ => false,
        }
    }

    /// Short label used for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::PeerClosed { .. } => "peer_closed",
            Self::StreamEnded => "stream_ended",
            Self::Transport(_) => "transport",
            Self::ProtocolViolation(_) => "protocol_violation",
            Self::TimedOut => "timed_out",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::QueueClosed => "queue_closed",
            Self::WriteFailed(_) => "write_failed",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Handle one inbound frame.
///
/// Text and binary frames are decoded and routed. Routing failures are
/// logged and reading continues; decode failures and oversize frames end
/// the pump.
pub async fn handle_frame(
    message: Message,
    connection: &Arc<Connection>,
    handlers: &HandlerRegistry,
    heartbeat: &Heartbeat,
    max_message_size: usize,
) -> Flow {
    match message {
        Message::Text(text) => {
            handle_payload(text.as_bytes(), connection, handlers, max_message_size).await
        }
        Message::Binary(data) => handle_payload(&data, connection, handlers, max_message_size).await,
        Message::Pong(_) => {
            heartbeat.pong_received(connection);
            Flow::Continue
        }
        // The transport answers pings itself.
        Message::Ping(_) => Flow::Continue,
        Message::Close(frame) => Flow::Terminate(Termination::PeerClosed {
            code: frame.map(|CloseFrame { code, .. }| code),
        }),
    }
}

async fn handle_payload(
    bytes: &[u8],
    connection: &Arc<Connection>,
    handlers: &HandlerRegistry,
    max_message_size: usize,
) -> Flow {
    if bytes.len() > max_message_size {
        return Flow::Terminate(Termination::MessageTooLarge {
            size: bytes.len(),
            limit: max_message_size,
        });
    }

    let event = match Event::decode(bytes) {
        Ok(event) => event,
        Err(e) => return Flow::Terminate(Termination::ProtocolViolation(e.to_string())),
    };

    let event_type = event.event_type.clone();
    debug!(conn_id = %connection.id(), event_type = %event_type, "routing event");
    match handlers.route(event, connection).await {
        Ok(()) => {}
        Err(RouteError::UnknownEventType(t)) => {
            warn!(conn_id = %connection.id(), event_type = %t, "no handler for event type");
        }
        Err(e @ RouteError::Handler { .. }) => {
            warn!(conn_id = %connection.id(), event_type = %event_type, error = %e, "error handling event");
        }
    }
    Flow::Continue
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::json;

    use crate::dispatch::handler_fn;
    use crate::errors::HandlerError;

    const LIMIT: usize = 512;

    fn registry_with_echo() -> HandlerRegistry {
        let reg = HandlerRegistry::new();
        let _ = reg.register(
            "echo",
            handler_fn(|event: Event, conn: Arc<Connection>| async move {
                conn.send(Event::new("echo_reply", event.payload).with_from("SERVER"))
                    .await?;
                Ok(())
            }),
        );
        reg
    }

    async fn frame(msg: Message, conn: &Arc<Connection>, reg: &HandlerRegistry) -> Flow {
        handle_frame(msg, conn, reg, &Heartbeat::default(), LIMIT).await
    }

    #[tokio::test]
    async fn text_frame_routed() {
        let reg = registry_with_echo();
        let (conn, mut rx) = Connection::detached(1);

        let flow = frame(
            Message::Text(r#"{"type":"echo","payload":"hi","from":"u1"}"#.into()),
            &conn,
            &reg,
        )
        .await;

        assert_eq!(flow, Flow::Continue);
        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.event_type, "echo_reply");
        assert_eq!(reply.payload, json!("hi"));
        assert_eq!(reply.from, "SERVER");
    }

    #[tokio::test]
    async fn binary_frame_routed() {
        let reg = registry_with_echo();
        let (conn, mut rx) = Connection::detached(1);
        let body = br#"{"type":"echo","payload":[1,2]}"#.to_vec();

        let flow = frame(Message::Binary(body.into()), &conn, &reg).await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(rx.recv().await.unwrap().payload, json!([1, 2]));
    }

    #[tokio::test]
    async fn unknown_type_continues() {
        let reg = HandlerRegistry::new();
        let (conn, _rx) = Connection::detached(1);
        let flow = frame(Message::Text(r#"{"type":"nope"}"#.into()), &conn, &reg).await;
        assert_eq!(flow, Flow::Continue);
    }

    #[tokio::test]
    async fn handler_error_continues() {
        let reg = HandlerRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _ = reg.register(
            "bad",
            handler_fn(move |_event: Event, _conn: Arc<Connection>| {
                let counter = Arc::clone(&counter);
                async move {
                    let _ = counter.fetch_add(1, Ordering::SeqCst);
                    Err(HandlerError::internal("broken"))
                }
            }),
        );
        let (conn, _rx) = Connection::detached(1);

        let flow = frame(Message::Text(r#"{"type":"bad"}"#.into()), &conn, &reg).await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_frame_terminates() {
        let reg = registry_with_echo();
        let (conn, _rx) = Connection::detached(1);
        let flow = frame(Message::Text("{oops".into()), &conn, &reg).await;
        assert_matches!(flow, Flow::Terminate(Termination::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn oversize_frame_terminates() {
        let reg = registry_with_echo();
        let (conn, _rx) = Connection::detached(1);
        let big = format!(r#"{{"type":"echo","payload":"{}"}}"#, "x".repeat(LIMIT));

        let flow = frame(Message::Text(big.into()), &conn, &reg).await;

        assert_matches!(
            flow,
            Flow::Terminate(Termination::MessageTooLarge { limit: LIMIT, .. })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pong_extends_deadline() {
        let reg = HandlerRegistry::new();
        let (conn, _rx) = Connection::detached(1);
        let before = conn.deadline();
        tokio::time::advance(Duration::from_secs(2)).await;

        let flow = frame(Message::Pong(Vec::new().into()), &conn, &reg).await;

        assert_eq!(flow, Flow::Continue);
        assert_eq!(conn.deadline() - before, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn ping_ignored() {
        let reg = HandlerRegistry::new();
        let (conn, _rx) = Connection::detached(1);
        let flow = frame(Message::Ping(Vec::new().into()), &conn, &reg).await;
        assert_eq!(flow, Flow::Continue);
    }

    #[tokio::test]
    async fn close_frame_terminates_with_code() {
        let reg = HandlerRegistry::new();
        let (conn, _rx) = Connection::detached(1);
        let close = Message::Close(Some(CloseFrame {
            code: close_code::AWAY,
            reason: "bye".into(),
        }));

        let flow = frame(close, &conn, &reg).await;

        assert_eq!(
            flow,
            Flow::Terminate(Termination::PeerClosed {
                code: Some(close_code::AWAY)
            })
        );
    }

    #[test]
    fn benign_terminations() {
        assert!(Termination::PeerClosed { code: None }.is_benign());
        assert!(Termination::PeerClosed { code: Some(close_code::NORMAL) }.is_benign());
        assert!(Termination::StreamEnded.is_benign());
        assert!(Termination::QueueClosed.is_benign());
        assert!(!Termination::PeerClosed { code: Some(close_code::PROTOCOL) }.is_benign());
        assert!(!Termination::TimedOut.is_benign());
        assert!(!Termination::ProtocolViolation("x".into()).is_benign());
        assert!(!Termination::WriteFailed("x".into()).is_benign());
    }

    #[test]
    fn termination_display() {
        let t = Termination::MessageTooLarge { size: 600, limit: 512 };
        assert_eq!(t.to_string(), "message of 600 bytes exceeds limit of 512");
        assert_eq!(t.label(), "message_too_large");
    }
}
