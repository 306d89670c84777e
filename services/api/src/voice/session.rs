//! The voice session state machine.
//!
//! One `VoiceSession` owns one Live connection, one microphone capture
//! stream, and one playback schedule. It runs a single select loop that
//! forwards captured frames upstream, turns transport events into session
//! events for the browser, and resolves tool calls through the registry.
//!
//! Lifecycle: `Idle -> Connecting -> Active`, with `Interrupted` entered on
//! barge-in and left as soon as fresh agent audio arrives, and `Closed` as
//! the only terminal state. A closed session is never reconnected; the
//! client starts a new one.

use std::ops::ControlFlow;
use std::sync::Arc;

use hearth_core::tools::ToolRegistry;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio;
use crate::voice::playback::PlaybackScheduler;
use crate::voice::transport::{ClientEvent, LiveTransport, TransportEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Interrupted,
    Closed,
}

/// Commands from the owning connection into a running session.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    /// Inject a user text turn alongside the audio stream.
    Say(String),
    /// Tear the session down.
    Stop,
}

/// What a session reports back to the owning connection. The stream ends
/// after `Closed` (or after `Error` if the session never became active).
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The transport handshake completed; audio may now flow.
    Started,
    /// A synthesized audio chunk, base64 PCM16 at the downlink rate.
    Audio { data: String },
    /// The agent started or stopped having scheduled audio.
    SpeakingChanged(bool),
    /// Transcription of the user's speech so far.
    Transcription { text: String },
    /// Barge-in: all scheduled playback was dropped.
    PlaybackCleared,
    Error { message: String },
    Closed,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CaptureError {
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("capture unavailable: {0}")]
    Unavailable(String),
}

/// Where microphone frames come from. Frames are mono f32 samples at the
/// uplink rate, already sliced into capture-sized chunks.
#[async_trait::async_trait]
pub trait CaptureSource: Send {
    /// Starts capture. Can only succeed once per source.
    async fn open(&mut self) -> Result<mpsc::Receiver<Vec<f32>>, CaptureError>;
    async fn close(&mut self);
}

/// Capture fed by the browser over the client WebSocket: the connection
/// handler decodes inbound binary frames and pushes them here.
pub struct ChannelCapture {
    frames: Option<mpsc::Receiver<Vec<f32>>>,
}

impl ChannelCapture {
    pub fn new(frames: mpsc::Receiver<Vec<f32>>) -> Self {
        Self {
            frames: Some(frames),
        }
    }
}

#[async_trait::async_trait]
impl CaptureSource for ChannelCapture {
    async fn open(&mut self) -> Result<mpsc::Receiver<Vec<f32>>, CaptureError> {
        self.frames
            .take()
            .ok_or_else(|| CaptureError::Unavailable("capture channel already taken".to_string()))
    }

    async fn close(&mut self) {}
}

pub struct VoiceSession {
    transport: Box<dyn LiveTransport>,
    capture: Box<dyn CaptureSource>,
    registry: Arc<ToolRegistry>,
    playback: PlaybackScheduler,
    events: mpsc::Sender<SessionEvent>,
    state: SessionState,
}

impl VoiceSession {
    pub fn new(
        transport: Box<dyn LiveTransport>,
        capture: Box<dyn CaptureSource>,
        registry: Arc<ToolRegistry>,
        events: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            transport,
            capture,
            registry,
            playback: PlaybackScheduler::new(),
            events,
            state: SessionState::Idle,
        }
    }

    /// Drives the session to completion. Returns once the session is closed
    /// or failed to start; the event channel closes when this returns.
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        self.state = SessionState::Connecting;

        let mut frames = match self.capture.open().await {
            Ok(frames) => frames,
            Err(e) => {
                // Denied capture returns the session to idle; the user can
                // grant permission and start again.
                warn!(error = %e, "Capture did not start");
                self.state = SessionState::Idle;
                let _ = self
                    .events
                    .send(SessionEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        let mut inbound = match self.transport.connect().await {
            Ok(inbound) => inbound,
            Err(e) => {
                // Like a denied microphone: back to idle, no Closed event,
                // so the client may simply start again.
                warn!(error = %e, "Live connection failed");
                self.state = SessionState::Idle;
                let _ = self
                    .events
                    .send(SessionEvent::Error {
                        message: e.to_string(),
                    })
                    .await;
                return;
            }
        };

        self.state = SessionState::Active;
        info!("Voice session active");
        let _ = self.events.send(SessionEvent::Started).await;

        let mut speaking = self.playback.speaking_watch();
        let mut was_speaking = false;

        loop {
            tokio::select! {
                maybe_frame = frames.recv() => match maybe_frame {
                    Some(samples) => {
                        let data = audio::encode_f32_frame(&samples);
                        if let Err(e) = self.transport.send(ClientEvent::Audio { data }).await {
                            warn!(error = %e, "Failed to forward microphone frame");
                        }
                    }
                    // Capture ended: the client stopped the microphone.
                    None => break,
                },

                maybe_command = commands.recv() => match maybe_command {
                    Some(SessionCommand::Say(text)) => {
                        if let Err(e) = self.transport.send(ClientEvent::Text(text)).await {
                            warn!(error = %e, "Failed to send text turn");
                        }
                    }
                    Some(SessionCommand::Stop) | None => break,
                },

                maybe_event = inbound.recv() => match maybe_event {
                    Some(event) => {
                        if self.handle_event(event).await.is_break() {
                            break;
                        }
                    }
                    None => break,
                },

                _ = speaking.changed() => {
                    let now_speaking = *speaking.borrow_and_update();
                    if now_speaking != was_speaking {
                        was_speaking = now_speaking;
                        let _ = self
                            .events
                            .send(SessionEvent::SpeakingChanged(now_speaking))
                            .await;
                    }
                },
            }
        }

        self.teardown().await;
    }

    async fn handle_event(&mut self, event: TransportEvent) -> ControlFlow<()> {
        match event {
            TransportEvent::Audio { data } => {
                // A malformed chunk is dropped; the session keeps running.
                match audio::decode_downlink_frame(&data) {
                    Ok(buffer) => {
                        self.playback.schedule(buffer.duration()).await;
                        if self.state == SessionState::Interrupted {
                            self.state = SessionState::Active;
                        }
                        let _ = self.events.send(SessionEvent::Audio { data }).await;
                    }
                    Err(e) => {
                        warn!(error = %e, "Dropping undecodable audio chunk");
                    }
                }
            }
            TransportEvent::ToolCalls(calls) => {
                // Every call gets exactly one response, even across an
                // interruption mid-batch.
                for call in calls {
                    let result = self.registry.dispatch(call).await;
                    if let Err(e) = self.transport.send(ClientEvent::ToolResult(result)).await {
                        warn!(error = %e, "Failed to send tool result");
                    }
                }
            }
            TransportEvent::Transcription { text } => {
                let _ = self.events.send(SessionEvent::Transcription { text }).await;
            }
            TransportEvent::Interrupted => {
                let dropped = self.playback.interrupt().await;
                debug!(dropped, "Barge-in: cleared scheduled playback");
                self.state = SessionState::Interrupted;
                let _ = self.events.send(SessionEvent::PlaybackCleared).await;
            }
            TransportEvent::TurnComplete => {
                debug!("Agent turn complete");
            }
            TransportEvent::Closed { reason } => {
                if let Some(reason) = reason {
                    warn!(%reason, "Live connection closed");
                    let _ = self
                        .events
                        .send(SessionEvent::Error { message: reason })
                        .await;
                }
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    async fn teardown(&mut self) {
        self.capture.close().await;
        self.transport.disconnect().await;
        self.playback.interrupt().await;
        self.state = SessionState::Closed;
        let _ = self.events.send(SessionEvent::Closed).await;
        info!("Voice session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::transport::{LinkStatus, TransportError};
    use hearth_core::notify::ChangeNotifier;
    use hearth_core::schedule::{
        CreatedRecord, EventDraft, ScheduleError, SchedulerApi, TaskDraft, TaskPatch,
    };
    use serde_json::json;
    use tokio::sync::Mutex;

    struct StubScheduler;

    #[async_trait::async_trait]
    impl SchedulerApi for StubScheduler {
        async fn create_event(&self, _draft: EventDraft) -> Result<CreatedRecord, ScheduleError> {
            Ok(CreatedRecord {
                id: Some("ev1".to_string()),
            })
        }

        async fn list_events(&self) -> Result<serde_json::Value, ScheduleError> {
            Ok(json!([{ "id": "ev1", "summary": "Dentist" }]))
        }

        async fn delete_event(
            &self,
            _event_id: String,
            _account_id: Option<String>,
        ) -> Result<(), ScheduleError> {
            Ok(())
        }

        async fn create_task(&self, _draft: TaskDraft) -> Result<CreatedRecord, ScheduleError> {
            Ok(CreatedRecord {
                id: Some("t1".to_string()),
            })
        }

        async fn list_tasks(&self) -> Result<serde_json::Value, ScheduleError> {
            Ok(json!([]))
        }

        async fn update_task(&self, _patch: TaskPatch) -> Result<(), ScheduleError> {
            Ok(())
        }

        async fn delete_task(
            &self,
            _task_id: String,
            _task_list_id: Option<String>,
            _account_id: Option<String>,
        ) -> Result<(), ScheduleError> {
            Ok(())
        }
    }

    struct FakeTransport {
        inbound: Option<Result<mpsc::Receiver<TransportEvent>, TransportError>>,
        sent: Arc<Mutex<Vec<ClientEvent>>>,
        status: LinkStatus,
    }

    impl FakeTransport {
        fn new(
            inbound: Result<mpsc::Receiver<TransportEvent>, TransportError>,
        ) -> (Self, Arc<Mutex<Vec<ClientEvent>>>) {
            let sent = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    inbound: Some(inbound),
                    sent: Arc::clone(&sent),
                    status: LinkStatus::Disconnected,
                },
                sent,
            )
        }
    }

    #[async_trait::async_trait]
    impl LiveTransport for FakeTransport {
        async fn connect(&mut self) -> Result<mpsc::Receiver<TransportEvent>, TransportError> {
            match self.inbound.take() {
                Some(Ok(rx)) => {
                    self.status = LinkStatus::Open;
                    Ok(rx)
                }
                Some(Err(e)) => {
                    self.status = LinkStatus::Closed;
                    Err(e)
                }
                None => {
                    self.status = LinkStatus::Closed;
                    Err(TransportError::Connect("already connected".to_string()))
                }
            }
        }

        async fn send(&mut self, event: ClientEvent) -> Result<(), TransportError> {
            self.sent.lock().await.push(event);
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.status = LinkStatus::Closed;
        }

        fn status(&self) -> LinkStatus {
            self.status
        }
    }

    struct DeniedCapture;

    #[async_trait::async_trait]
    impl CaptureSource for DeniedCapture {
        async fn open(&mut self) -> Result<mpsc::Receiver<Vec<f32>>, CaptureError> {
            Err(CaptureError::PermissionDenied)
        }

        async fn close(&mut self) {}
    }

    fn registry() -> Arc<ToolRegistry> {
        Arc::new(ToolRegistry::new(
            Arc::new(StubScheduler),
            ChangeNotifier::default(),
        ))
    }

    /// Builds a session around a fake transport fed by `agent_tx` and a
    /// channel capture fed by `mic_tx`.
    fn session(
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> (
        VoiceSession,
        mpsc::Sender<TransportEvent>,
        mpsc::Sender<Vec<f32>>,
        Arc<Mutex<Vec<ClientEvent>>>,
    ) {
        let (agent_tx, agent_rx) = mpsc::channel(16);
        let (mic_tx, mic_rx) = mpsc::channel(16);
        let (transport, sent) = FakeTransport::new(Ok(agent_rx));
        let session = VoiceSession::new(
            Box::new(transport),
            Box::new(ChannelCapture::new(mic_rx)),
            registry(),
            events_tx,
        );
        (session, agent_tx, mic_tx, sent)
    }

    async fn drain(events_rx: &mut mpsc::Receiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Some(event) = events_rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_permission_denied_returns_to_idle_with_an_error() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (agent_tx, agent_rx) = mpsc::channel(1);
        let (transport, _) = FakeTransport::new(Ok(agent_rx));
        let session = VoiceSession::new(
            Box::new(transport),
            Box::new(DeniedCapture),
            registry(),
            events_tx,
        );
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);

        session.run(cmd_rx).await;
        drop(agent_tx);

        let events = drain(&mut events_rx).await;
        assert_eq!(
            events,
            vec![SessionEvent::Error {
                message: "microphone permission denied".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_an_error() {
        let (events_tx, mut events_rx) = mpsc::channel(16);
        let (mic_tx, mic_rx) = mpsc::channel(1);
        let (transport, _) =
            FakeTransport::new(Err(TransportError::Connect("dns failure".to_string())));
        let session = VoiceSession::new(
            Box::new(transport),
            Box::new(ChannelCapture::new(mic_rx)),
            registry(),
            events_tx,
        );
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);

        session.run(cmd_rx).await;
        drop(mic_tx);

        let events = drain(&mut events_rx).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            SessionEvent::Error { message } if message.contains("dns failure")
        ));
        // Like a denied microphone, a failed connect never reaches Closed:
        // the session is back at idle and the client may start again.
        assert!(!events.contains(&SessionEvent::Closed));
    }

    #[tokio::test]
    async fn test_microphone_frames_are_encoded_and_forwarded() {
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let (session, _agent_tx, mic_tx, sent) = session(events_tx);
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);

        let samples = vec![0.0f32, 0.5, -0.5, 1.0];
        mic_tx.send(samples.clone()).await.unwrap();
        drop(mic_tx); // stop capture, ending the session

        session.run(cmd_rx).await;

        let sent = sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            ClientEvent::Audio {
                data: audio::encode_f32_frame(&samples)
            }
        );

        let events = drain(&mut events_rx).await;
        assert_eq!(events.first(), Some(&SessionEvent::Started));
        assert_eq!(events.last(), Some(&SessionEvent::Closed));
    }

    #[tokio::test]
    async fn test_every_tool_call_gets_exactly_one_result() {
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let (session, agent_tx, _mic_tx, sent) = session(events_tx);
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);

        let calls = vec![
            hearth_core::tools::ToolCall {
                id: "c1".to_string(),
                name: "get_tasks".to_string(),
                args: serde_json::Map::new(),
            },
            hearth_core::tools::ToolCall {
                id: "c2".to_string(),
                name: "unknown_thing".to_string(),
                args: serde_json::Map::new(),
            },
        ];
        agent_tx
            .send(TransportEvent::ToolCalls(calls))
            .await
            .unwrap();
        agent_tx
            .send(TransportEvent::Closed { reason: None })
            .await
            .unwrap();

        session.run(cmd_rx).await;
        let _ = drain(&mut events_rx).await;

        let sent = sent.lock().await;
        let results: Vec<_> = sent
            .iter()
            .filter_map(|e| match e {
                ClientEvent::ToolResult(result) => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "c1");
        assert_eq!(results[1].id, "c2");
        // The unknown capability still resolved, with failure text.
        assert_eq!(
            results[1].response.result,
            json!("Unknown capability: unknown_thing")
        );
    }

    #[tokio::test]
    async fn test_interruption_clears_playback_and_reports_it() {
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let (session, agent_tx, _mic_tx, _sent) = session(events_tx);
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);

        // One second of downlink audio, then a barge-in.
        let chunk = audio::encode_f32_frame(&vec![0.1f32; audio::DOWNLINK_SAMPLE_RATE as usize]);
        agent_tx
            .send(TransportEvent::Audio { data: chunk.clone() })
            .await
            .unwrap();
        agent_tx.send(TransportEvent::Interrupted).await.unwrap();
        agent_tx
            .send(TransportEvent::Closed { reason: None })
            .await
            .unwrap();

        session.run(cmd_rx).await;

        let events = drain(&mut events_rx).await;
        assert!(events.contains(&SessionEvent::Audio { data: chunk }));
        assert!(events.contains(&SessionEvent::PlaybackCleared));
        // The audio chunk is forwarded before the barge-in clears playback.
        let audio_at = events
            .iter()
            .position(|e| matches!(e, SessionEvent::Audio { .. }))
            .unwrap();
        let cleared_at = events
            .iter()
            .position(|e| *e == SessionEvent::PlaybackCleared)
            .unwrap();
        assert!(audio_at < cleared_at);
        assert_eq!(events.last(), Some(&SessionEvent::Closed));
    }

    #[tokio::test]
    async fn test_undecodable_audio_is_dropped_without_ending_the_session() {
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let (session, agent_tx, _mic_tx, _sent) = session(events_tx);
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);

        agent_tx
            .send(TransportEvent::Audio {
                data: "!!!not-base64!!!".to_string(),
            })
            .await
            .unwrap();
        agent_tx
            .send(TransportEvent::Transcription {
                text: "still alive".to_string(),
            })
            .await
            .unwrap();
        agent_tx
            .send(TransportEvent::Closed { reason: None })
            .await
            .unwrap();

        session.run(cmd_rx).await;

        let events = drain(&mut events_rx).await;
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Audio { .. })));
        assert!(events.contains(&SessionEvent::Transcription {
            text: "still alive".to_string()
        }));
    }

    #[tokio::test]
    async fn test_unexpected_close_reports_reason_then_closes() {
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let (session, agent_tx, _mic_tx, _sent) = session(events_tx);
        let (_cmd_tx, cmd_rx) = mpsc::channel(1);

        agent_tx
            .send(TransportEvent::Closed {
                reason: Some("quota exceeded".to_string()),
            })
            .await
            .unwrap();

        session.run(cmd_rx).await;

        let events = drain(&mut events_rx).await;
        assert_eq!(
            events,
            vec![
                SessionEvent::Started,
                SessionEvent::Error {
                    message: "quota exceeded".to_string()
                },
                SessionEvent::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_stop_command_tears_the_session_down() {
        let (events_tx, mut events_rx) = mpsc::channel(32);
        let (session, _agent_tx, _mic_tx, _sent) = session(events_tx);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);

        cmd_tx.send(SessionCommand::Stop).await.unwrap();
        session.run(cmd_rx).await;

        let events = drain(&mut events_rx).await;
        assert_eq!(events.first(), Some(&SessionEvent::Started));
        assert_eq!(events.last(), Some(&SessionEvent::Closed));
    }

    #[tokio::test]
    async fn test_say_command_becomes_a_text_turn() {
        let (events_tx, _events_rx) = mpsc::channel(32);
        let (session, _agent_tx, _mic_tx, sent) = session(events_tx);
        let (cmd_tx, cmd_rx) = mpsc::channel(4);

        cmd_tx
            .send(SessionCommand::Say("what's on my calendar".to_string()))
            .await
            .unwrap();
        cmd_tx.send(SessionCommand::Stop).await.unwrap();

        session.run(cmd_rx).await;

        let sent = sent.lock().await;
        assert_eq!(
            sent.first(),
            Some(&ClientEvent::Text("what's on my calendar".to_string()))
        );
    }
}
