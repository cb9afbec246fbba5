//! WebSocket connection registry, duplex pumps, heartbeat and fan-out.

pub mod broadcast;
pub mod connection;
pub mod handler;
pub mod heartbeat;
pub mod manager;
pub mod session;
