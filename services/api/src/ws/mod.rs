//! Browser-facing WebSocket endpoint: the control protocol and the
//! per-connection session handler.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
