//! Defines the WebSocket message protocol between the browser client and the API server.
//!
//! Control messages are JSON text frames; microphone audio travels as raw
//! binary frames (little-endian PCM16 at the uplink rate) and is not part
//! of this enum.

use hearth_core::notify::ChangeKind;
use serde::{Deserialize, Serialize};

/// Messages sent from the client (browser) to the server.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Starts a voice session on this connection.
    #[serde(rename = "start_voice")]
    StartVoice,
    /// Ends the current voice session.
    #[serde(rename = "stop_voice")]
    StopVoice,
    /// A typed message from the user, injected into the running session.
    #[serde(rename = "user_text")]
    UserText { text: String },
}

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The voice session is live; the client should start streaming audio.
    VoiceStarted,
    /// The voice session ended.
    VoiceStopped,
    /// A chunk of synthesized audio (base64 PCM16 at 24 kHz) to play.
    AudioChunk { data: String },
    /// The agent has audio scheduled.
    SpeakingStart,
    /// The agent's scheduled audio finished or was cleared.
    SpeakingEnd,
    /// An update on the user's speech-to-text transcription.
    TranscriptionUpdate { text: String },
    /// Barge-in: the client must drop any buffered agent audio.
    PlaybackClear,
    /// A calendar or task mutation landed; the client should refresh.
    ScheduleChanged {
        kind: ChangeKind,
        id: Option<String>,
    },
    /// Reports an error to the client.
    Error { message: String },
}
