//! Hearth API Library Crate
//!
//! This library contains all the logic for the Hearth voice service:
//! configuration, the audio codec utilities, the realtime Live transport
//! bindings, the voice session state machine, and the browser-facing
//! WebSocket endpoint. The `api` binary is a thin wrapper around this
//! library.

pub mod audio;
pub mod config;
pub mod router;
pub mod state;
pub mod voice;
pub mod ws;
