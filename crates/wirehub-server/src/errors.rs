//! Error types for the event channel core.

use thiserror::Error;

use crate::websocket::connection::ConnectionId;

/// Errors raised while starting or running the HTTP listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not bind to the configured address.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
    /// Any other listener IO failure.
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An inbound frame that is not a valid event envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// Not JSON, or JSON of the wrong shape.
    #[error("malformed event envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Failure to enqueue an event for a connection.
#[derive(Debug, Error)]
pub enum SendError {
    /// `close_queue` was called; no further sends are accepted.
    #[error("outbound queue of {0} is closed")]
    QueueClosed(ConnectionId),
    /// The outbound pump has stopped draining the queue.
    #[error("connection {0} is no longer writable")]
    Disconnected(ConnectionId),
}

/// Error returned by an event handler or lifecycle hook.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The payload did not have the shape the handler expects.
    #[error("invalid payload: {message}")]
    InvalidPayload {
        /// Description of what is wrong.
        message: String,
    },
    /// A reply or fan-out could not be enqueued.
    #[error(transparent)]
    Send(#[from] SendError),
    /// Anything else.
    #[error("{message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Internal`].
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Shorthand for [`HandlerError::InvalidPayload`].
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }
}

/// Outcome of routing one event that did not succeed.
#[derive(Debug, Error)]
pub enum RouteError {
    /// No handler is registered for the event type.
    #[error("no handler registered for event type '{0}'")]
    UnknownEventType(String),
    /// The handler ran and reported a failure.
    #[error("handler for '{event_type}' failed: {source}")]
    Handler {
        /// Event type that was routed.
        event_type: String,
        /// The handler's error.
        #[source]
        source: HandlerError,
    },
}
