//! Raw socket binding: a message pump that treats every inbound frame as an
//! untyped JSON value and inspects it for the payload kinds the session
//! consumes.

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use hearth_core::tools::ToolCall;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::{
    ClientEvent, LinkStatus, LiveConfig, LiveTransport, TransportError, TransportEvent, WsStream,
    await_setup_ack, open_live_socket, spawn_pump, text_frame, wire,
};

pub struct SocketTransport {
    config: LiveConfig,
    status: LinkStatus,
    outbound: Option<SplitSink<WsStream, tokio_tungstenite::tungstenite::protocol::Message>>,
    pump: Option<JoinHandle<()>>,
}

impl SocketTransport {
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
impl LiveTransport for SocketTransport {
    async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
        self.status = LinkStatus::Connecting;
        match self.establish().await {
            Ok(rx) => {
                self.status = LinkStatus::Open;
                info!(model = %self.config.model, "Live socket open");
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

fn is_setup_ack(text: &str) -> bool {
    serde_json::from_str::<Value>(text)
        .map(|v| v.get("setupComplete").is_some())
        .unwrap_or(false)
}

fn parse_frame(text: &str) -> Vec<TransportEvent> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => inspect(&value),
        Err(e) => {
            warn!(error = %e, "Discarding unparseable frame from the Live endpoint");
            Vec::new()
        }
    }
}

/// Extracts session events from one server message. A single message can
/// carry audio, tool calls, and an interruption at once; emission order is
/// audio, transcription, tool calls, interruption, turn completion.
pub(crate) fn inspect(value: &Value) -> Vec<TransportEvent> {
    let mut events = Vec::new();

    if let Some(parts) = value
        .pointer("/serverContent/modelTurn/parts")
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(data) = part.pointer("/inlineData/data").and_then(Value::as_str) {
                events.push(TransportEvent::Audio {
                    data: data.to_string(),
                });
            }
        }
    }

    if let Some(text) = value
        .pointer("/serverContent/inputTranscription/text")
        .and_then(Value::as_str)
    {
        events.push(TransportEvent::Transcription {
            text: text.to_string(),
        });
    }

    if let Some(calls) = value.pointer("/toolCall/functionCalls") {
        match serde_json::from_value::<Vec<ToolCall>>(calls.clone()) {
            Ok(calls) if !calls.is_empty() => events.push(TransportEvent::ToolCalls(calls)),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Discarding malformed tool call batch"),
        }
    }

    if value.pointer("/serverContent/interrupted").and_then(Value::as_bool) == Some(true) {
        events.push(TransportEvent::Interrupted);
    }

    if value.pointer("/serverContent/turnComplete").and_then(Value::as_bool) == Some(true) {
        events.push(TransportEvent::TurnComplete);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_setup_ack_detection() {
        assert!(is_setup_ack(r#"{"setupComplete": {}}"#));
        assert!(!is_setup_ack(r#"{"serverContent": {}}"#));
        assert!(!is_setup_ack("not json"));
    }

    #[test]
    fn test_inspect_extracts_audio_parts() {
        let msg = json!({
            "serverContent": {
                "modelTurn": {
                    "parts": [
                        { "inlineData": { "mimeType": "audio/pcm", "data": "QUJD" } },
                        { "text": "ignored" },
                        { "inlineData": { "data": "REVG" } }
                    ]
                }
            }
        });

        assert_eq!(
            inspect(&msg),
            vec![
                TransportEvent::Audio {
                    data: "QUJD".to_string()
                },
                TransportEvent::Audio {
                    data: "REVG".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_inspect_extracts_transcription() {
        let msg = json!({
            "serverContent": {
                "inputTranscription": { "text": "add milk to my list" }
            }
        });

        assert_eq!(
            inspect(&msg),
            vec![TransportEvent::Transcription {
                text: "add milk to my list".to_string()
            }]
        );
    }

    #[test]
    fn test_inspect_extracts_tool_calls() {
        let msg = json!({
            "toolCall": {
                "functionCalls": [
                    { "id": "c1", "name": "get_tasks", "args": {} },
                    { "id": "c2", "name": "add_task", "args": { "title": "Milk" } }
                ]
            }
        });

        match inspect(&msg).as_slice() {
            [TransportEvent::ToolCalls(calls)] => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id, "c1");
                assert_eq!(calls[0].name, "get_tasks");
                assert_eq!(calls[1].args["title"], "Milk");
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[test]
    fn test_inspect_interruption_and_turn_complete() {
        assert_eq!(
            inspect(&json!({ "serverContent": { "interrupted": true } })),
            vec![TransportEvent::Interrupted]
        );
        assert_eq!(
            inspect(&json!({ "serverContent": { "turnComplete": true } })),
            vec![TransportEvent::TurnComplete]
        );
        // Explicit false is not an interruption.
        assert!(inspect(&json!({ "serverContent": { "interrupted": false } })).is_empty());
    }

    #[test]
    fn test_inspect_orders_combined_payloads() {
        let msg = json!({
            "serverContent": {
                "modelTurn": { "parts": [ { "inlineData": { "data": "QQ==" } } ] },
                "interrupted": true
            },
            "toolCall": {
                "functionCalls": [ { "id": "c1", "name": "get_events", "args": {} } ]
            }
        });

        let events = inspect(&msg);
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TransportEvent::Audio { .. }));
        assert!(matches!(events[1], TransportEvent::ToolCalls(_)));
        assert!(matches!(events[2], TransportEvent::Interrupted));
    }

    #[test]
    fn test_inspect_ignores_unknown_payloads() {
        assert!(inspect(&json!({ "usageMetadata": { "totalTokenCount": 12 } })).is_empty());
        assert!(inspect(&json!({ "toolCall": { "functionCalls": [] } })).is_empty());
        assert!(parse_frame("{{not json").is_empty());
    }

    fn unconnected() -> SocketTransport {
        SocketTransport::new(LiveConfig {
            api_key: "k".to_string(),
            model: "m".to_string(),
            voice: "Zephyr".to_string(),
            system_instruction: String::new(),
            declarations: Vec::new(),
        })
    }

    #[test]
    fn test_status_starts_disconnected() {
        assert_eq!(unconnected().status(), LinkStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_send_before_open_is_a_noop() {
        let mut transport = unconnected();

        let outcome = transport
            .send(ClientEvent::Audio {
                data: "QUJD".to_string(),
            })
            .await;

        // Dropped with a warning, never an error, and the link stays put.
        assert!(outcome.is_ok());
        assert_eq!(transport.status(), LinkStatus::Disconnected);
    }
}
