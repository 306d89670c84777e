//! The realtime voice agent: transport bindings, playback scheduling, and
//! the session state machine that ties them together.

pub mod playback;
pub mod session;
pub mod transport;

use crate::config::{Config, TransportBinding};
use hearth_core::tools::declarations;
use transport::{LiveConfig, LiveTransport, socket::SocketTransport, stream::StreamTransport};

/// The standing instruction given to the agent at setup time.
pub fn system_instruction() -> String {
    let today = chrono::Local::now().format("%A, %B %-d, %Y");
    format!(
        "You are a warm, efficient voice assistant for a household scheduling hub. \
         Today is {today}. You help the family manage their shared calendar and task lists. \
         Before answering any question about events or tasks, call get_events or get_tasks \
         to see the current schedule; never answer from memory. Updating or deleting an item \
         requires its id, so fetch the list first if you don't have one. \
         Confirm every change you make out loud. Keep replies brief and conversational; \
         you are speaking, not writing."
    )
}

/// Builds the configured Live transport binding. Both bindings speak the
/// same protocol, so the session never knows which one it got.
pub fn build_transport(config: &Config) -> Box<dyn LiveTransport> {
    let live = LiveConfig {
        api_key: config.gemini_api_key.clone(),
        model: config.live_model.clone(),
        voice: config.voice_name.clone(),
        system_instruction: system_instruction(),
        declarations: declarations(),
    };
    match config.transport {
        TransportBinding::Socket => Box::new(SocketTransport::new(live)),
        TransportBinding::Stream => Box::new(StreamTransport::new(live)),
    }
}
