use crate::codec::WireChunk;
use crate::config::Voice;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Modalities the remote service may answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseModality {
    Text,
    Audio,
}

/// Provider-neutral description of the session to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRequest {
    pub model: String,
    pub response_modality: ResponseModality,
    pub voice: Voice,
    /// Only present when the configured instruction is non-blank.
    pub system_instruction: Option<String>,
}

/// One message received from the remote service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// Inline audio payloads, in the order they appeared.
    pub audio: Vec<WireChunk>,
    /// The remote side asked for queued playback to be discarded.
    pub interrupted: bool,
    pub turn_complete: bool,
}

/// The four lifecycle callbacks of a session, as data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    Opened,
    Message(InboundMessage),
    Error(String),
    Closed { reason: Option<String> },
}

/// A signal tagged with the session that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session_id: Uuid,
    pub signal: SessionSignal,
}

/// Handed to a transport on connect; every callback it fires lands on the
/// agent's event loop tagged with this session's id.
#[derive(Debug, Clone)]
pub struct SignalSink {
    session_id: Uuid,
    tx: mpsc::UnboundedSender<SessionEvent>,
}

impl SignalSink {
    pub fn new(session_id: Uuid, tx: mpsc::UnboundedSender<SessionEvent>) -> Self {
        Self { session_id, tx }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn opened(&self) {
        self.emit(SessionSignal::Opened);
    }

    pub fn message(&self, message: InboundMessage) {
        self.emit(SessionSignal::Message(message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(SessionSignal::Error(message.into()));
    }

    pub fn closed(&self, reason: Option<String>) {
        self.emit(SessionSignal::Closed { reason });
    }

    fn emit(&self, signal: SessionSignal) {
        // The agent may already be gone during shutdown.
        let _ = self.tx.send(SessionEvent {
            session_id: self.session_id,
            signal,
        });
    }
}
