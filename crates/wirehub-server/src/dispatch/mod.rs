//! Event dispatch: handler table and built-in handlers.

pub mod registry;
pub mod room;

pub use registry::{EventHandler, FnHandler, HandlerRegistry, handler_fn};
pub use room::ChangeRoomHandler;
