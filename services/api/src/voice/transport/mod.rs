//! Duplex transport to the Live agent endpoint.
//!
//! One protocol (`BidiGenerateContent` over a message-framed socket), one
//! interface, two interchangeable bindings:
//!
//! - [`socket::SocketTransport`]: a raw message pump that inspects inbound
//!   JSON values for the payload kinds it cares about.
//! - [`stream::StreamTransport`]: a structured binding that decodes inbound
//!   frames into typed server-event structs before delivery.
//!
//! Both yield the same [`TransportEvent`] stream for identical inbound
//! frames, so the session state machine is binding-agnostic.

pub mod socket;
pub mod stream;

use hearth_core::tools::{FunctionDeclaration, ToolCall, ToolResult};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message as WsMessage,
};

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const LIVE_HOST: &str = "generativelanguage.googleapis.com";
const LIVE_RPC_PATH: &str =
    "/ws/google.ai.generativelanguage.v1alpha.GenerativeService.BidiGenerateContent";

/// The fixed Live endpoint URL, with the API key as a query parameter.
pub fn live_url(api_key: &str) -> String {
    format!("wss://{LIVE_HOST}{LIVE_RPC_PATH}?key={api_key}")
}

/// Everything a binding needs to open and configure one Live connection.
#[derive(Clone)]
pub struct LiveConfig {
    pub api_key: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub declarations: Vec<FunctionDeclaration>,
}

/// Lifecycle of one connection. `Closed` is terminal: a new session builds
/// a new transport instance, there is no reconnection-in-place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Disconnected,
    Connecting,
    Open,
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("setup handshake did not complete: {0}")]
    Handshake(String),
    #[error("socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("failed to encode client message: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Client-to-server messages, independent of binding.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A base64 PCM16 microphone frame at the uplink rate.
    Audio { data: String },
    /// A user text turn steering the conversation.
    Text(String),
    /// The resolution of a tool call.
    ToolResult(ToolResult),
}

/// Server-to-client events, unified across bindings. A single inbound frame
/// may fan out into several events (audio plus tool calls plus an
/// interruption, in that order).
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Inline synthesized audio, base64 PCM16 at the downlink rate.
    Audio { data: String },
    /// A batch of tool calls; each must be resolved exactly once.
    ToolCalls(Vec<ToolCall>),
    /// Transcription of the user's speech.
    Transcription { text: String },
    /// The user started speaking over the agent's playback.
    Interrupted,
    /// The agent finished its turn.
    TurnComplete,
    /// Terminal: the connection is gone. `reason` is set for error closes.
    Closed { reason: Option<String> },
}

/// One duplex, message-framed connection to the Live endpoint.
#[async_trait::async_trait]
pub trait LiveTransport: Send {
    /// Opens the connection and completes the setup handshake. On success
    /// returns the inbound event stream; its final event is always
    /// [`TransportEvent::Closed`].
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError>;

    /// Sends a client event. Before the link is `Open` this is a no-op with
    /// a warning, never an error.
    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError>;

    /// Closes the connection. Idempotent.
    async fn disconnect(&mut self);

    fn status(&self) -> LinkStatus;
}

pub(crate) async fn open_live_socket(config: &LiveConfig) -> Result<WsStream, TransportError> {
    let (ws_stream, _) = connect_async(live_url(&config.api_key))
        .await
        .map_err(|e| TransportError::Connect(e.to_string()))?;
    Ok(ws_stream)
}

pub(crate) fn text_frame(payload: String) -> WsMessage {
    WsMessage::Text(payload.into())
}

/// Waits for the server's setup acknowledgment. `is_ack` is the binding's
/// own check of the first data frame.
pub(crate) async fn await_setup_ack<F>(
    inbound: &mut futures_util::stream::SplitStream<WsStream>,
    is_ack: F,
) -> Result<(), TransportError>
where
    F: Fn(&str) -> bool,
{
    use futures_util::StreamExt;
    loop {
        match inbound.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                return if is_ack(&text) {
                    Ok(())
                } else {
                    Err(TransportError::Handshake(format!(
                        "unexpected first message: {text}"
                    )))
                };
            }
            Some(Ok(WsMessage::Binary(bytes))) => {
                let text = std::str::from_utf8(&bytes).map_err(|_| {
                    TransportError::Handshake("first message was not UTF-8".to_string())
                })?;
                return if is_ack(text) {
                    Ok(())
                } else {
                    Err(TransportError::Handshake(format!(
                        "unexpected first message: {text}"
                    )))
                };
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(TransportError::Socket(e)),
            None => {
                return Err(TransportError::Handshake(
                    "connection closed during setup".to_string(),
                ));
            }
        }
    }
}

/// Runs the read side of an open connection: every inbound data frame goes
/// through the binding's `parse` and the resulting events are delivered in
/// order. Always finishes with a single `Closed` event.
pub(crate) fn spawn_pump<F>(
    mut inbound: futures_util::stream::SplitStream<WsStream>,
    tx: mpsc::Sender<TransportEvent>,
    parse: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn(&str) -> Vec<TransportEvent> + Send + 'static,
{
    use futures_util::StreamExt;
    tokio::spawn(async move {
        let reason = loop {
            match inbound.next().await {
                Some(Ok(WsMessage::Text(text))) => {
                    for event in parse(&text) {
                        if tx.send(event).await.is_err() {
                            return;
                        }
                    }
                }
                Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        for event in parse(text) {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(_) => {
                        tracing::warn!("Discarding non-UTF-8 frame from the Live endpoint");
                    }
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    break frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty());
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(e.to_string()),
                None => break None,
            }
        };
        let _ = tx.send(TransportEvent::Closed { reason }).await;
    })
}

/// Client-to-server wire shapes for the `BidiGenerateContent` protocol,
/// shared by both bindings.
pub(crate) mod wire {
    use super::{ClientEvent, LiveConfig};
    use hearth_core::tools::{FunctionDeclaration, ToolResult};
    use serde::Serialize;

    #[derive(Serialize)]
    pub struct SetupMessage<'a> {
        pub setup: Setup<'a>,
    }

    #[derive(Serialize)]
    pub struct Setup<'a> {
        pub model: &'a str,
        pub generation_config: GenerationConfig<'a>,
        pub system_instruction: Content<'a>,
        pub tools: Vec<ToolSection<'a>>,
    }

    #[derive(Serialize)]
    pub struct GenerationConfig<'a> {
        pub response_modalities: Vec<&'static str>,
        pub speech_config: SpeechConfig<'a>,
    }

    #[derive(Serialize)]
    pub struct SpeechConfig<'a> {
        pub voice_config: VoiceConfig<'a>,
    }

    #[derive(Serialize)]
    pub struct VoiceConfig<'a> {
        pub prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
    }

    #[derive(Serialize)]
    pub struct PrebuiltVoiceConfig<'a> {
        pub voice_name: &'a str,
    }

    #[derive(Serialize)]
    pub struct ToolSection<'a> {
        pub function_declarations: &'a [FunctionDeclaration],
    }

    #[derive(Serialize)]
    pub struct Content<'a> {
        pub parts: Vec<Part<'a>>,
    }

    #[derive(Serialize)]
    pub struct Part<'a> {
        pub text: &'a str,
    }

    #[derive(Serialize)]
    struct RealtimeInputMessage {
        realtime_input: RealtimeInput,
    }

    #[derive(Serialize)]
    struct RealtimeInput {
        media_chunks: Vec<MediaChunk>,
    }

    #[derive(Serialize)]
    struct MediaChunk {
        mime_type: &'static str,
        data: String,
    }

    #[derive(Serialize)]
    struct ClientContentMessage {
        client_content: ClientContent,
    }

    #[derive(Serialize)]
    struct ClientContent {
        turns: Vec<Turn>,
        turn_complete: bool,
    }

    #[derive(Serialize)]
    struct Turn {
        role: &'static str,
        parts: Vec<OwnedPart>,
    }

    #[derive(Serialize)]
    struct OwnedPart {
        text: String,
    }

    #[derive(Serialize)]
    struct ToolResponseMessage {
        tool_response: ToolResponsePayload,
    }

    #[derive(Serialize)]
    struct ToolResponsePayload {
        function_responses: Vec<ToolResult>,
    }

    /// The setup handshake frame declaring modality, voice, system
    /// instruction, and the tool declarations.
    pub fn setup_frame(config: &LiveConfig) -> Result<String, serde_json::Error> {
        serde_json::to_string(&SetupMessage {
            setup: Setup {
                model: &config.model,
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO"],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: &config.voice,
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![Part {
                        text: &config.system_instruction,
                    }],
                },
                tools: vec![ToolSection {
                    function_declarations: &config.declarations,
                }],
            },
        })
    }

    /// Serializes a client event into its wire frame.
    pub fn client_frame(event: &ClientEvent) -> Result<String, serde_json::Error> {
        match event {
            ClientEvent::Audio { data } => serde_json::to_string(&RealtimeInputMessage {
                realtime_input: RealtimeInput {
                    media_chunks: vec![MediaChunk {
                        mime_type: "audio/pcm;rate=16000",
                        data: data.clone(),
                    }],
                },
            }),
            ClientEvent::Text(text) => serde_json::to_string(&ClientContentMessage {
                client_content: ClientContent {
                    turns: vec![Turn {
                        role: "user",
                        parts: vec![OwnedPart { text: text.clone() }],
                    }],
                    turn_complete: true,
                },
            }),
            ClientEvent::ToolResult(result) => serde_json::to_string(&ToolResponseMessage {
                tool_response: ToolResponsePayload {
                    function_responses: vec![result.clone()],
                },
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_core::tools::{ToolResponse, declarations};
    use serde_json::json;

    fn config() -> LiveConfig {
        LiveConfig {
            api_key: "k".to_string(),
            model: "models/test-live".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: "Be brief.".to_string(),
            declarations: declarations(),
        }
    }

    #[test]
    fn test_live_url_embeds_key() {
        let url = live_url("secret");
        assert!(url.starts_with("wss://generativelanguage.googleapis.com/ws/"));
        assert!(url.contains("GenerativeService.BidiGenerateContent"));
        assert!(url.ends_with("?key=secret"));
    }

    #[test]
    fn test_setup_frame_shape() {
        let frame: serde_json::Value =
            serde_json::from_str(&wire::setup_frame(&config()).unwrap()).unwrap();

        assert_eq!(frame["setup"]["model"], "models/test-live");
        assert_eq!(
            frame["setup"]["generation_config"]["response_modalities"],
            json!(["AUDIO"])
        );
        assert_eq!(
            frame["setup"]["generation_config"]["speech_config"]["voice_config"]
                ["prebuilt_voice_config"]["voice_name"],
            "Zephyr"
        );
        assert_eq!(
            frame["setup"]["system_instruction"]["parts"][0]["text"],
            "Be brief."
        );
        let declared = frame["setup"]["tools"][0]["function_declarations"]
            .as_array()
            .unwrap();
        assert_eq!(declared.len(), declarations().len());
        assert_eq!(declared[0]["name"], "add_event");
    }

    #[test]
    fn test_audio_frame_shape() {
        let frame: serde_json::Value = serde_json::from_str(
            &wire::client_frame(&ClientEvent::Audio {
                data: "QUJD".to_string(),
            })
            .unwrap(),
        )
        .unwrap();

        assert_eq!(
            frame,
            json!({
                "realtime_input": {
                    "media_chunks": [
                        { "mime_type": "audio/pcm;rate=16000", "data": "QUJD" }
                    ]
                }
            })
        );
    }

    #[test]
    fn test_text_frame_shape() {
        let frame: serde_json::Value = serde_json::from_str(
            &wire::client_frame(&ClientEvent::Text("hello".to_string())).unwrap(),
        )
        .unwrap();

        assert_eq!(
            frame,
            json!({
                "client_content": {
                    "turns": [ { "role": "user", "parts": [ { "text": "hello" } ] } ],
                    "turn_complete": true
                }
            })
        );
    }

    #[test]
    fn test_tool_result_frame_shape() {
        let result = ToolResult {
            id: "c1".to_string(),
            name: "add_event".to_string(),
            response: ToolResponse {
                result: json!("Event added successfully"),
            },
        };
        let frame: serde_json::Value =
            serde_json::from_str(&wire::client_frame(&ClientEvent::ToolResult(result)).unwrap())
                .unwrap();

        assert_eq!(
            frame,
            json!({
                "tool_response": {
                    "function_responses": [
                        {
                            "id": "c1",
                            "name": "add_event",
                            "response": { "result": "Event added successfully" }
                        }
                    ]
                }
            })
        );
    }
}
