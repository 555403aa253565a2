//! Test doubles for the transport and the audio clock.

use crate::codec::{AudioBuffer, WireChunk, encode};
use crate::generic_types::{InboundMessage, SessionRequest, SignalSink};
use crate::scheduler::{AudioOutput, SourceId};
use crate::session::{ConnectError, LiveConnector, LiveSession, SendError, SessionError};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// An output whose clock only moves when the test says so.
#[derive(Clone, Default)]
pub struct FakeOutput {
    inner: Arc<Mutex<OutputLog>>,
}

#[derive(Default)]
struct OutputLog {
    now: f64,
    started: Vec<(SourceId, f64)>,
    stopped: Vec<SourceId>,
}

impl FakeOutput {
    pub fn at(now: f64) -> Self {
        let output = Self::default();
        output.set_time(now);
        output
    }

    pub fn set_time(&self, now: f64) {
        self.inner.lock().unwrap().now = now;
    }

    pub fn started(&self) -> Vec<(SourceId, f64)> {
        self.inner.lock().unwrap().started.clone()
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.inner.lock().unwrap().stopped.clone()
    }
}

impl AudioOutput for FakeOutput {
    fn current_time(&self) -> f64 {
        self.inner.lock().unwrap().now
    }

    fn start_source(&mut self, id: SourceId, _buffer: &AudioBuffer, start_at: f64) {
        self.inner.lock().unwrap().started.push((id, start_at));
    }

    fn stop_source(&mut self, id: SourceId) {
        self.inner.lock().unwrap().stopped.push(id);
    }
}

/// A connector that records requests and hands out in-memory sessions.
#[derive(Clone, Default)]
pub struct FakeConnector {
    inner: Arc<Mutex<ConnectorLog>>,
}

#[derive(Default)]
struct ConnectorLog {
    requests: Vec<SessionRequest>,
    signals: Vec<SignalSink>,
    sent: Vec<WireChunk>,
    closed: usize,
    fail_next_connect: Option<String>,
    fail_close: bool,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<SessionRequest> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// The callback sink handed to the most recent successful connect.
    pub fn last_signals(&self) -> SignalSink {
        self.inner
            .lock()
            .unwrap()
            .signals
            .last()
            .cloned()
            .expect("no session was connected")
    }

    pub fn sent(&self) -> Vec<WireChunk> {
        self.inner.lock().unwrap().sent.clone()
    }

    pub fn closed_sessions(&self) -> usize {
        self.inner.lock().unwrap().closed
    }

    pub fn fail_next_connect(&self, reason: &str) {
        self.inner.lock().unwrap().fail_next_connect = Some(reason.to_string());
    }

    pub fn fail_close(&self) {
        self.inner.lock().unwrap().fail_close = true;
    }
}

#[async_trait]
impl LiveConnector for FakeConnector {
    async fn connect(
        &self,
        request: SessionRequest,
        signals: SignalSink,
    ) -> Result<Box<dyn LiveSession>, ConnectError> {
        let mut log = self.inner.lock().unwrap();
        log.requests.push(request);
        if let Some(reason) = log.fail_next_connect.take() {
            return Err(ConnectError::Handshake(reason));
        }
        log.signals.push(signals);
        Ok(Box::new(FakeSession {
            log: self.inner.clone(),
            closed: false,
        }))
    }
}

struct FakeSession {
    log: Arc<Mutex<ConnectorLog>>,
    closed: bool,
}

#[async_trait]
impl LiveSession for FakeSession {
    fn send(&mut self, chunk: WireChunk) -> Result<(), SendError> {
        if self.closed {
            return Err(SendError::TransportClosed);
        }
        self.log.lock().unwrap().sent.push(chunk);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.closed = true;
        let mut log = self.log.lock().unwrap();
        log.closed += 1;
        if log.fail_close {
            return Err(SessionError::Close("socket already gone".into()));
        }
        Ok(())
    }
}

/// A server message carrying `seconds` of 24 kHz audio.
pub fn audio_message(seconds: f64, interrupted: bool) -> InboundMessage {
    let samples = vec![0.1f32; (24_000.0 * seconds) as usize];
    let mut chunk = encode(&samples);
    chunk.mime_type = "audio/pcm;rate=24000".to_string();
    InboundMessage {
        audio: vec![chunk],
        interrupted,
        turn_complete: false,
    }
}
