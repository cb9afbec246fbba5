//! # wirehub-server
//!
//! Real-time event channel over WebSocket.
//!
//! - Connection registry with on-connect / on-disconnect hooks
//! - Per-connection inbound and outbound pumps with ping/pong liveness
//! - Event routing by `type` to registered handlers
//! - Unicast, broadcast and room-scoped group-cast delivery
//! - axum HTTP surface: `/ws`, `/health`, `/metrics`
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod event;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::{ServerConfig, SocketConfig};
pub use dispatch::{EventHandler, HandlerRegistry, handler_fn};
pub use errors::{EnvelopeError, HandlerError, RouteError, SendError, ServerError};
pub use event::{EVENT_CHANGE_ROOM, EVENT_SET_ROOM, Event};
pub use server::WireHubServer;
pub use shutdown::ShutdownCoordinator;
pub use websocket::connection::{Connection, ConnectionId};
pub use websocket::handler::{Flow, Termination};
pub use websocket::manager::{Attached, SocketManager};
