//! Manages the browser-facing WebSocket connection lifecycle.
//!
//! Each connection owns at most one voice session at a time. Control
//! messages are JSON text frames; microphone audio arrives as raw binary
//! PCM16 frames and is forwarded into the running session.

use super::protocol::{ClientMessage, ServerMessage};
use crate::audio;
use crate::state::AppState;
use crate::voice::{
    build_transport,
    session::{ChannelCapture, SessionCommand, SessionEvent, VoiceSession},
};
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use hearth_core::tools::ToolRegistry;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Per-connection voice session handles. Empty while no session is running.
#[derive(Default)]
struct VoiceHandles {
    mic_tx: Option<mpsc::Sender<Vec<f32>>>,
    cmd_tx: Option<mpsc::Sender<SessionCommand>>,
    task: Option<JoinHandle<()>>,
    /// Set once `SessionEvent::Started` arrives. Binary frames received
    /// before then are dropped, not queued.
    started: bool,
}

impl VoiceHandles {
    fn clear(&mut self) {
        self.mic_tx = None;
        self.cmd_tx = None;
        self.task = None;
        self.started = false;
    }
}

/// Main handler for an individual WebSocket connection.
#[instrument(name = "ws_conn", skip_all, fields(conn_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let conn_id: u32 = rand::random();
    tracing::Span::current().record("conn_id", conn_id.to_string());
    info!("New WebSocket connection");

    let (socket_tx, mut socket_rx) = socket.split();
    let socket_tx = Arc::new(Mutex::new(socket_tx));

    // One event channel outlives every voice session on this connection;
    // each session gets a clone of the sender.
    let (session_tx, mut session_rx) = mpsc::channel::<SessionEvent>(64);
    let mut changes = state.notifier.subscribe();
    let mut voice = VoiceHandles::default();

    loop {
        tokio::select! {
            maybe_msg = socket_rx.next() => {
                match maybe_msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(msg) => {
                                if handle_client_message(msg, &state, &session_tx, &mut voice).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Ignoring unparseable client message"),
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        forward_mic_frame(&data, &voice).await;
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client sent close frame");
                        break;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "Error receiving from client WebSocket");
                        break;
                    }
                    None => break,
                }
            },

            Some(event) = session_rx.recv() => {
                let outbound = match event {
                    SessionEvent::Started => {
                        voice.started = true;
                        ServerMessage::VoiceStarted
                    }
                    SessionEvent::Audio { data } => ServerMessage::AudioChunk { data },
                    SessionEvent::SpeakingChanged(true) => ServerMessage::SpeakingStart,
                    SessionEvent::SpeakingChanged(false) => ServerMessage::SpeakingEnd,
                    SessionEvent::Transcription { text } => {
                        ServerMessage::TranscriptionUpdate { text }
                    }
                    SessionEvent::PlaybackCleared => ServerMessage::PlaybackClear,
                    SessionEvent::Error { message } => {
                        // A pre-start failure (denied microphone, failed
                        // handshake) leaves no session behind to close.
                        if !voice.started {
                            voice.clear();
                        }
                        ServerMessage::Error { message }
                    }
                    SessionEvent::Closed => {
                        voice.clear();
                        ServerMessage::VoiceStopped
                    }
                };
                if send_msg(&mut *socket_tx.lock().await, outbound).await.is_err() {
                    break;
                }
            },

            change = changes.recv() => {
                match change {
                    Ok(notification) => {
                        let msg = ServerMessage::ScheduleChanged {
                            kind: notification.kind,
                            id: notification.id,
                        };
                        if send_msg(&mut *socket_tx.lock().await, msg).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Dropped schedule notifications");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {}
                }
            },
        }
    }

    // Let the session tear itself down rather than aborting it, so the Live
    // connection closes cleanly.
    if let Some(cmd_tx) = voice.cmd_tx.take() {
        let _ = cmd_tx.send(SessionCommand::Stop).await;
    }
    if let Some(task) = voice.task.take() {
        let _ = task.await;
    }
    info!("WebSocket connection closed");
}

/// Reacts to one control message. An `Err` means the connection should end.
async fn handle_client_message(
    msg: ClientMessage,
    state: &Arc<AppState>,
    session_tx: &mpsc::Sender<SessionEvent>,
    voice: &mut VoiceHandles,
) -> Result<()> {
    match msg {
        ClientMessage::StartVoice => {
            if voice.cmd_tx.is_some() {
                warn!("Ignoring start_voice; a session is already running");
                return Ok(());
            }
            info!(transport = ?state.config.transport, "Starting voice session");

            let transport = build_transport(&state.config);
            let (mic_tx, mic_rx) = mpsc::channel(32);
            let (cmd_tx, cmd_rx) = mpsc::channel(8);
            let registry = Arc::new(ToolRegistry::new(
                Arc::clone(&state.scheduler),
                state.notifier.clone(),
            ));
            let session = VoiceSession::new(
                transport,
                Box::new(ChannelCapture::new(mic_rx)),
                registry,
                session_tx.clone(),
            );

            let span = tracing::info_span!("voice_session");
            voice.task = Some(tokio::spawn(session.run(cmd_rx).instrument(span)));
            voice.mic_tx = Some(mic_tx);
            voice.cmd_tx = Some(cmd_tx);
            voice.started = false;
        }
        ClientMessage::StopVoice => {
            if let Some(cmd_tx) = &voice.cmd_tx {
                let _ = cmd_tx.send(SessionCommand::Stop).await;
            } else {
                warn!("Ignoring stop_voice; no session is running");
            }
        }
        ClientMessage::UserText { text } => {
            if let Some(cmd_tx) = &voice.cmd_tx {
                let _ = cmd_tx.send(SessionCommand::Say(text)).await;
            } else {
                warn!("Ignoring user_text; no session is running");
            }
        }
    }
    Ok(())
}

/// Decodes one binary microphone frame and pushes it into the session.
/// Frames that arrive before the session is active are dropped, and a
/// malformed frame is dropped without ending anything.
async fn forward_mic_frame(data: &[u8], voice: &VoiceHandles) {
    if !voice.started {
        return;
    }
    let Some(mic_tx) = &voice.mic_tx else {
        return;
    };
    match audio::pcm16_to_f32(data, audio::UPLINK_SAMPLE_RATE, 1) {
        Ok(buffer) => {
            if let Some(samples) = buffer.channels.into_iter().next() {
                if mic_tx.send(samples).await.is_err() {
                    warn!("Microphone channel closed; dropping frame");
                }
            }
        }
        Err(e) => warn!(error = %e, "Dropping malformed microphone frame"),
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
