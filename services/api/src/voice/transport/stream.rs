//! Structured binding: inbound frames are decoded into typed server-event
//! structs before delivery, so unexpected shapes are rejected by serde
//! instead of being probed field by field.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use hearth_core::tools::ToolCall;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{
    ClientEvent, LinkStatus, LiveConfig, LiveTransport, TransportError, TransportEvent, WsStream,
    await_setup_ack, open_live_socket, spawn_pump, text_frame, wire,
};

pub struct StreamTransport {
    config: LiveConfig,
    status: LinkStatus,
    outbound: Option<SplitSink<WsStream, tokio_tungstenite::tungstenite::protocol::Message>>,
    pump: Option<JoinHandle<()>>,
}

impl StreamTransport {
    pub fn new(config: LiveConfig) -> Self {
        Self {
            config,
            status: LinkStatus::Disconnected,
            outbound: None,
            pump: None,
        }
    }

    async fn establish(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        let socket = open_live_socket(&self.config).await?;
        let (mut outbound, mut inbound) = socket.split();

        outbound
            .send(text_frame(wire::setup_frame(&self.config)?))
            .await?;
        await_setup_ack(&mut inbound, is_setup_ack).await?;

        let (tx, rx) = mpsc::channel(128);
        self.pump = Some(spawn_pump(inbound, tx, parse_frame));
        self.outbound = Some(outbound);
        Ok(rx)
    }
}

#[async_trait::async_trait]
impl LiveTransport for StreamTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.status = LinkStatus::Connecting;
        match self.establish().await {
            Ok(rx) => {
                self.status = LinkStatus::Open;
                info!(model = %self.config.model, "Live stream open");
                Ok(rx)
            }
            Err(e) => {
                self.status = LinkStatus::Closed;
                Err(e)
            }
        }
    }

    async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
        if self.status != LinkStatus::Open {
            warn!(status = ?self.status, "Dropping outbound event; link is not open");
            return Ok(());
        }
        let frame = wire::client_frame(&event)?;
        if let Some(outbound) = self.outbound.as_mut() {
            if let Err(e) = outbound.send(text_frame(frame)).await {
                self.status = LinkStatus::Closed;
                return Err(e.into());
            }
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Some(mut outbound) = self.outbound.take() {
            let _ = outbound.close().await;
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        self.status = LinkStatus::Closed;
    }

    fn status(&self) -> LinkStatus {
        self.status
    }
}

/// The server-to-client message shapes of `BidiGenerateContent`, camelCase
/// on the wire.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LiveServerMessage {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    tool_call: Option<ToolCallBatch>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    input_transcription: Option<Transcription>,
    #[serde(default)]
    interrupted: Option<bool>,
    #[serde(default)]
    turn_complete: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    inline_data: Option<InlineBlob>,
    #[allow(dead_code)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InlineBlob {
    data: String,
}

#[derive(Debug, Deserialize)]
struct Transcription {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolCallBatch {
    #[serde(default)]
    function_calls: Vec<ToolCall>,
}

fn is_setup_ack(text: &str) -> bool {
    serde_json::from_str::<LiveServerMessage>(text)
        .map(|m| m.setup_complete.is_some())
        .unwrap_or(false)
}

fn parse_frame(text: &str) -> Vec<TransportEvent> {
    match serde_json::from_str::<LiveServerMessage>(text) {
        Ok(message) => events(message),
        Err(e) => {
            warn!(error = %e, "Discarding unparseable frame from the Live endpoint");
            Vec::new()
        }
    }
}

/// Flattens one decoded server message into session events, in the same
/// order the raw socket binding emits them.
pub(crate) fn events(message: LiveServerMessage) -> Vec<TransportEvent> {
    let mut out = Vec::new();

    if let Some(content) = &message.server_content {
        if let Some(turn) = &content.model_turn {
            for part in &turn.parts {
                if let Some(blob) = &part.inline_data {
                    out.push(TransportEvent::Audio {
                        data: blob.data.clone(),
                    });
                }
            }
        }
        if let Some(transcription) = &content.input_transcription {
            out.push(TransportEvent::Transcription {
                text: transcription.text.clone(),
            });
        }
    }

    if let Some(batch) = message.tool_call {
        if !batch.function_calls.is_empty() {
            out.push(TransportEvent::ToolCalls(batch.function_calls));
        }
    }

    if let Some(content) = &message.server_content {
        if content.interrupted == Some(true) {
            out.push(TransportEvent::Interrupted);
        }
        if content.turn_complete == Some(true) {
            out.push(TransportEvent::TurnComplete);
        }
    }

    out
}
