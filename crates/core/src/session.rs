//! Lifecycle of the single logical connection to the remote streaming service.
//!
//! The transport itself sits behind [`LiveConnector`] / [`LiveSession`]. Its
//! callbacks arrive as [`SessionEvent`]s on the agent's event loop and are
//! applied here as explicit state transitions.

use crate::codec::{self, WireChunk};
use crate::config::AgentConfiguration;
use crate::generic_types::{
    InboundMessage, ResponseModality, SessionEvent, SessionRequest, SessionSignal, SignalSink,
};
use crate::scheduler::{AudioOutput, PlaybackScheduler};
use crate::status::StatusChannel;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error("could not build session request: {0}")]
    Request(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("no open session")]
    NotOpen,
    #[error("transport closed")]
    TransportClosed,
    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session already closed")]
    AlreadyClosed,
    #[error("failed to close session: {0}")]
    Close(String),
}

/// Opens sessions against a remote streaming service.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    /// Performs the handshake. On success the transport reports every
    /// subsequent lifecycle callback through `signals`.
    async fn connect(
        &self,
        request: SessionRequest,
        signals: SignalSink,
    ) -> Result<Box<dyn LiveSession>, ConnectError>;
}

/// A live, bidirectional stream handle.
#[async_trait]
pub trait LiveSession: Send {
    /// Queues one chunk of realtime input. Never waits on the network.
    fn send(&mut self, chunk: WireChunk) -> Result<(), SendError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Connecting,
    Open,
    Closed,
    Errored,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Errored)
    }
}

pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    request: SessionRequest,
    handle: Box<dyn LiveSession>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// The configuration this session was negotiated with.
    pub fn request(&self) -> &SessionRequest {
        &self.request
    }
}

pub struct SessionManager<C> {
    connector: C,
    model: String,
    session: Option<Session>,
    state: SessionState,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
}

impl<C: LiveConnector> SessionManager<C> {
    /// Creates the manager and the receiving end of its event stream.
    pub fn new(
        connector: C,
        model: impl Into<String>,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let manager = Self {
            connector,
            model: model.into(),
            session: None,
            state: SessionState::Uninitialized,
            events_tx,
        };
        (manager, events_rx)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some() && self.state == SessionState::Open
    }

    /// True when there is no session, or the current one has ended.
    pub fn needs_reconnect(&self) -> bool {
        self.session.is_none() || self.state.is_terminal()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn build_request(&self, config: &AgentConfiguration) -> SessionRequest {
        SessionRequest {
            model: self.model.clone(),
            response_modality: ResponseModality::Audio,
            voice: config.voice,
            system_instruction: config.system_instruction_override().map(str::to_string),
        }
    }

    /// Opens a new session with `config`, closing any session still held.
    ///
    /// On failure the error is surfaced on the status channel and no session
    /// is stored. The playback cursor is left alone so audio from the previous
    /// session finishes before the new session's audio starts.
    pub async fn connect(
        &mut self,
        config: &AgentConfiguration,
        status: &mut StatusChannel,
    ) -> Result<(), ConnectError> {
        if self.session.is_some() {
            debug!("Closing the previous session before connecting");
            self.close().await;
        }

        let request = self.build_request(config);
        let id = Uuid::new_v4();
        let previous = self.state;
        self.state = SessionState::Connecting;
        info!(session_id = %id, model = %request.model, voice = %request.voice, "Connecting live session");

        let signals = SignalSink::new(id, self.events_tx.clone());
        match self.connector.connect(request.clone(), signals).await {
            Ok(handle) => {
                self.session = Some(Session {
                    id,
                    created_at: Utc::now(),
                    request,
                    handle,
                });
                if config.is_customized() {
                    status.update_status("Session initialized with custom settings.");
                } else {
                    status.update_status("Session initialized.");
                }
                Ok(())
            }
            Err(e) => {
                error!(session_id = %id, error = %e, "Failed to initialize session");
                self.state = previous;
                status.update_error(format!("Failed to initialize session: {e}"));
                Err(e)
            }
        }
    }

    /// Tears down any existing session, then connects with `config`.
    pub async fn reconnect(
        &mut self,
        config: &AgentConfiguration,
        status: &mut StatusChannel,
    ) -> Result<(), ConnectError> {
        self.close().await;
        self.connect(config, status).await
    }

    /// Closes and discards the current session, if any. Close errors are
    /// logged and otherwise ignored.
    pub async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Err(e) = session.handle.close().await {
                warn!(session_id = %session.id, error = %e, "Error closing session during teardown");
            } else {
                debug!(session_id = %session.id, "Session closed");
            }
            self.state = SessionState::Closed;
        }
    }

    /// Forwards one encoded frame to the open session.
    pub fn send(&mut self, chunk: WireChunk) -> Result<(), SendError> {
        match (&mut self.session, self.state) {
            (Some(session), SessionState::Open) => session.handle.send(chunk),
            _ => Err(SendError::NotOpen),
        }
    }

    /// Applies one transport callback. Events from sessions that were already
    /// discarded are ignored.
    pub fn handle_event<O: AudioOutput>(
        &mut self,
        event: SessionEvent,
        scheduler: &mut PlaybackScheduler<O>,
        status: &mut StatusChannel,
    ) {
        let current = self.session.as_ref().map(Session::id);
        if current != Some(event.session_id) {
            debug!(session_id = %event.session_id, "Ignoring event from a discarded session");
            return;
        }

        match event.signal {
            SessionSignal::Opened => {
                info!(session_id = %event.session_id, "Live session open");
                self.state = SessionState::Open;
                status.update_status("Session open");
            }
            SessionSignal::Message(message) => on_message(message, scheduler, status),
            SessionSignal::Error(message) => {
                error!(session_id = %event.session_id, error = %message, "Live session error");
                self.state = SessionState::Errored;
                status.update_error(format!("Error: {message}"));
            }
            SessionSignal::Closed { reason } => {
                let reason = reason
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "No reason given".to_string());
                info!(session_id = %event.session_id, %reason, "Live session closed");
                self.state = SessionState::Closed;
                status.update_status(format!("Session closed: {reason}"));
            }
        }
    }
}

/// Interruption is applied before any audio carried by the same message, so
/// the flush only ever hits audio that was queued earlier.
fn on_message<O: AudioOutput>(
    message: InboundMessage,
    scheduler: &mut PlaybackScheduler<O>,
    status: &mut StatusChannel,
) {
    if message.interrupted {
        let stopped = scheduler.on_interrupt();
        info!(stopped, "Playback interrupted by the remote side");
    }

    for chunk in &message.audio {
        match codec::decode_chunk(chunk) {
            Ok(buffer) if buffer.is_empty() => {}
            Ok(buffer) => {
                scheduler.on_chunk_ready(buffer);
            }
            Err(e) => {
                warn!(error = %e, "Dropping undecodable audio chunk");
                status.update_error(format!("Error decoding audio: {e}"));
            }
        }
    }

    if message.turn_complete {
        debug!("Model turn complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use crate::config::Voice;
    use crate::testing::{FakeConnector, FakeOutput, audio_message};

    struct Harness {
        connector: FakeConnector,
        sessions: SessionManager<FakeConnector>,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        output: FakeOutput,
        scheduler: PlaybackScheduler<FakeOutput>,
        status: StatusChannel,
    }

    impl Harness {
        fn new() -> Self {
            let connector = FakeConnector::new();
            let (sessions, events) = SessionManager::new(connector.clone(), "models/test");
            let output = FakeOutput::at(10.0);
            Self {
                connector,
                sessions,
                events,
                scheduler: PlaybackScheduler::new(output.clone()),
                output,
                status: StatusChannel::new(),
            }
        }

        async fn connect(&mut self, config: &AgentConfiguration) -> Result<(), ConnectError> {
            self.sessions.connect(config, &mut self.status).await
        }

        async fn reconnect(&mut self, config: &AgentConfiguration) -> Result<(), ConnectError> {
            self.sessions.reconnect(config, &mut self.status).await
        }

        /// Applies every queued transport event.
        fn pump(&mut self) {
            while let Ok(event) = self.events.try_recv() {
                self.sessions
                    .handle_event(event, &mut self.scheduler, &mut self.status);
            }
        }
    }

    #[tokio::test]
    async fn test_request_carries_voice_and_trimmed_prompt() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::new(Voice::Kore, "  "))
            .await
            .unwrap();
        h.connect(&AgentConfiguration::new(Voice::Puck, "Be nice."))
            .await
            .unwrap();

        let requests = h.connector.requests();
        assert_eq!(requests[0].model, "models/test");
        assert_eq!(requests[0].response_modality, ResponseModality::Audio);
        assert_eq!(requests[0].voice, Voice::Kore);
        assert_eq!(requests[0].system_instruction, None);
        assert_eq!(requests[1].system_instruction.as_deref(), Some("Be nice."));
    }

    #[tokio::test]
    async fn test_open_then_close_transitions() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        assert_eq!(h.sessions.state(), SessionState::Connecting);
        assert_eq!(h.status.current(), "Session initialized.");
        assert!(!h.sessions.is_open());

        h.connector.last_signals().opened();
        h.pump();
        assert!(h.sessions.is_open());
        assert_eq!(h.status.current(), "Session open");

        h.connector.last_signals().closed(None);
        h.pump();
        assert_eq!(h.sessions.state(), SessionState::Closed);
        assert!(h.sessions.needs_reconnect());
        assert_eq!(h.status.current(), "Session closed: No reason given");
    }

    #[tokio::test]
    async fn test_close_reason_is_reported() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        h.connector.last_signals().closed(Some("quota exceeded".into()));
        h.pump();
        assert_eq!(h.status.current(), "Session closed: quota exceeded");
    }

    #[tokio::test]
    async fn test_error_is_terminal_and_not_retried() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        h.connector.last_signals().opened();
        h.connector.last_signals().error("socket reset");
        h.pump();

        assert_eq!(h.sessions.state(), SessionState::Errored);
        assert_eq!(h.status.current(), "Error: socket reset");
        assert_eq!(h.connector.requests().len(), 1);
        assert_eq!(h.sessions.send(encode(&[0.0; 4])), Err(SendError::NotOpen));
    }

    #[tokio::test]
    async fn test_handshake_failure_leaves_no_session() {
        let mut h = Harness::new();
        h.connector.fail_next_connect("401 Unauthorized");

        let result = h.connect(&AgentConfiguration::default()).await;
        assert!(matches!(result, Err(ConnectError::Handshake(_))));
        assert_eq!(h.sessions.state(), SessionState::Uninitialized);
        assert!(h.sessions.session().is_none());
        assert!(h.status.snapshot().is_error());
    }

    #[tokio::test]
    async fn test_reconnect_without_session_behaves_like_connect() {
        let mut h = Harness::new();
        h.reconnect(&AgentConfiguration::default()).await.unwrap();
        assert_eq!(h.connector.requests().len(), 1);
        assert_eq!(h.connector.closed_sessions(), 0);
        assert_eq!(h.sessions.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_reconnect_swallows_close_errors() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        h.connector.fail_close();
        h.reconnect(&AgentConfiguration::new(Voice::Kore, ""))
            .await
            .unwrap();

        assert_eq!(h.connector.requests().len(), 2);
        assert_eq!(h.sessions.session().unwrap().request().voice, Voice::Kore);
    }

    #[tokio::test]
    async fn test_late_events_from_discarded_session_are_ignored() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        let old = h.connector.last_signals();
        h.reconnect(&AgentConfiguration::default()).await.unwrap();
        h.connector.last_signals().opened();

        old.closed(Some("going away".into()));
        h.pump();
        assert!(h.sessions.is_open());
    }

    #[tokio::test]
    async fn test_send_requires_open_session() {
        let mut h = Harness::new();
        assert_eq!(h.sessions.send(encode(&[0.0; 4])), Err(SendError::NotOpen));

        h.connect(&AgentConfiguration::default()).await.unwrap();
        assert_eq!(h.sessions.send(encode(&[0.0; 4])), Err(SendError::NotOpen));

        h.connector.last_signals().opened();
        h.pump();
        h.sessions.send(encode(&[0.25; 4])).unwrap();
        assert_eq!(h.connector.sent().len(), 1);
        assert_eq!(h.connector.sent()[0].mime_type, "audio/pcm;rate=16000");
    }

    #[tokio::test]
    async fn test_audio_is_scheduled_in_arrival_order() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        let signals = h.connector.last_signals();
        signals.opened();
        for _ in 0..3 {
            signals.message(audio_message(0.5, false));
        }
        h.pump();

        let starts: Vec<f64> = h.output.started().iter().map(|(_, t)| *t).collect();
        assert_eq!(starts, vec![10.0, 10.5, 11.0]);
    }

    #[tokio::test]
    async fn test_interruption_flushes_before_same_message_audio() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        let signals = h.connector.last_signals();
        signals.message(audio_message(1.0, false));
        signals.message(audio_message(1.0, false));
        h.pump();
        assert_eq!(h.scheduler.active_count(), 2);

        h.output.set_time(10.25);
        signals.message(audio_message(0.5, true));
        h.pump();

        assert_eq!(h.output.stopped().len(), 2);
        let survivors: Vec<_> = h.scheduler.active_sources().copied().collect();
        assert_eq!(survivors.len(), 1);
        assert_eq!(survivors[0].start_time, 10.25);
        assert!(!h.output.stopped().contains(&survivors[0].id));
    }

    #[tokio::test]
    async fn test_undecodable_chunk_is_dropped() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        let signals = h.connector.last_signals();
        signals.message(InboundMessage {
            audio: vec![
                WireChunk {
                    mime_type: "audio/pcm;rate=24000".into(),
                    data: "%%%".into(),
                },
                encode(&[0.1; 240]),
            ],
            ..Default::default()
        });
        h.pump();

        assert_eq!(h.scheduler.active_count(), 1);
        assert!(h.status.current().starts_with("Error decoding audio"));
        assert_eq!(h.sessions.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_connect_twice_closes_the_first_session() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        let first = h.sessions.session().unwrap().id();
        h.connect(&AgentConfiguration::new(Voice::Kore, "")).await.unwrap();

        assert_eq!(h.connector.closed_sessions(), 1);
        assert_ne!(h.sessions.session().unwrap().id(), first);
        assert_eq!(h.sessions.state(), SessionState::Connecting);
    }

    #[tokio::test]
    async fn test_reconnect_queues_new_audio_after_old_playback() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        h.connector.last_signals().opened();
        h.connector.last_signals().message(audio_message(2.0, false));
        h.pump();

        h.output.set_time(10.5);
        h.reconnect(&AgentConfiguration::new(Voice::Kore, ""))
            .await
            .unwrap();
        let signals = h.connector.last_signals();
        signals.opened();
        signals.message(audio_message(0.5, false));
        h.pump();

        assert!(h.output.stopped().is_empty());
        let mut spans: Vec<(f64, f64)> = h
            .scheduler
            .active_sources()
            .map(|s| (s.start_time, s.start_time + s.duration))
            .collect();
        spans.sort_by(|a, b| a.0.total_cmp(&b.0));
        assert_eq!(spans, vec![(10.0, 12.0), (12.0, 12.5)]);
    }

    #[tokio::test]
    async fn test_reconnect_schedules_from_the_clock_when_idle() {
        let mut h = Harness::new();
        h.connect(&AgentConfiguration::default()).await.unwrap();
        h.output.set_time(42.0);
        h.reconnect(&AgentConfiguration::default()).await.unwrap();
        h.connector.last_signals().message(audio_message(0.5, false));
        h.pump();

        let starts: Vec<f64> = h.output.started().iter().map(|(_, t)| *t).collect();
        assert_eq!(starts, vec![42.0]);
    }
}
