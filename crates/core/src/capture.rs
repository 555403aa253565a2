//! Microphone capture: device acquisition, fixed-size framing, and forwarding
//! frames to the live session.

use crate::codec;
use crate::config::AgentConfiguration;
use crate::level::LevelMeter;
use crate::session::{LiveConnector, SessionManager};
use crate::status::StatusChannel;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Samples per captured frame.
pub const FRAME_SIZE: usize = 256;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("no live session is available")]
    SessionUnavailable,
}

/// A fixed-length block of mono 16 kHz samples.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
}

/// Receives mono 16 kHz samples from a device stream and emits exact
/// [`FRAME_SIZE`] frames through the input gain stage.
#[derive(Debug)]
pub struct FrameSink {
    pending: Vec<f32>,
    frame_len: usize,
    meter: LevelMeter,
    tx: mpsc::UnboundedSender<AudioFrame>,
}

impl FrameSink {
    pub fn new(frame_len: usize, meter: LevelMeter, tx: mpsc::UnboundedSender<AudioFrame>) -> Self {
        Self {
            pending: Vec::with_capacity(frame_len * 2),
            frame_len,
            meter,
            tx,
        }
    }

    /// Buffers `samples` and emits every complete frame. Returns `false` once
    /// the pipeline has gone away.
    pub fn push_samples(&mut self, samples: &[f32]) -> bool {
        self.pending.extend_from_slice(samples);
        let mut start = 0;
        while self.pending.len() - start >= self.frame_len {
            let mut frame = self.pending[start..start + self.frame_len].to_vec();
            start += self.frame_len;
            self.meter.process(&mut frame);
            if self.tx.send(AudioFrame { samples: frame }).is_err() {
                self.pending.clear();
                return false;
            }
        }
        self.pending.drain(..start);
        true
    }
}

/// Handle to an acquired device stream.
pub trait CaptureStream {
    /// Stops the device and releases it. Called at most once.
    fn stop(&mut self);
}

/// Grants access to an input device.
#[cfg_attr(test, mockall::automock)]
pub trait Microphone {
    /// Acquires the device and starts feeding `sink`.
    fn open(&mut self, sink: FrameSink) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Requesting,
    Capturing,
}

pub struct CapturePipeline<M> {
    microphone: M,
    state: CaptureState,
    stream: Option<Box<dyn CaptureStream>>,
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
    meter: LevelMeter,
    frames_sent: u64,
    sending_failed: bool,
}

impl<M: Microphone> CapturePipeline<M> {
    /// Creates the pipeline and the receiving end of its frame stream.
    pub fn new(microphone: M) -> (Self, mpsc::UnboundedReceiver<AudioFrame>) {
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let pipeline = Self {
            microphone,
            state: CaptureState::Idle,
            stream: None,
            frame_tx,
            meter: LevelMeter::new(),
            frames_sent: 0,
            sending_failed: false,
        };
        (pipeline, frame_rx)
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Capture level handle for downstream visualization.
    pub fn level(&self) -> LevelMeter {
        self.meter.clone()
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }

    /// Starts capturing, bringing up a session first if none is usable.
    pub async fn start<C: LiveConnector>(
        &mut self,
        sessions: &mut SessionManager<C>,
        config: &AgentConfiguration,
        status: &mut StatusChannel,
    ) -> Result<(), CaptureError> {
        if self.state == CaptureState::Capturing {
            return Ok(());
        }

        if sessions.needs_reconnect() {
            status.update_status("Session is closed. Reinitializing...");
            // A failed connect already reported itself on the status channel.
            let _ = sessions.reconnect(config, status).await;
            if sessions.needs_reconnect() {
                self.state = CaptureState::Idle;
                status.update_error("Failed to start session. Cannot record.");
                return Err(CaptureError::SessionUnavailable);
            }
        }

        self.state = CaptureState::Requesting;
        status.update_status("Requesting microphone access...");

        let sink = FrameSink::new(FRAME_SIZE, self.meter.clone(), self.frame_tx.clone());
        match self.microphone.open(sink) {
            Ok(stream) => {
                info!("Microphone access granted. Starting capture");
                self.stream = Some(stream);
                self.sending_failed = false;
                self.state = CaptureState::Capturing;
                status.update_status("Recording... capturing audio.");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Error starting recording");
                self.state = CaptureState::Idle;
                status.update_error(format!("Error starting recording: {e}"));
                Err(e)
            }
        }
    }

    /// Encodes and forwards one captured frame. Send failures are reported
    /// but never stop capture.
    pub fn on_frame<C: LiveConnector>(
        &mut self,
        frame: AudioFrame,
        sessions: &mut SessionManager<C>,
        status: &mut StatusChannel,
    ) {
        if self.state != CaptureState::Capturing {
            return;
        }

        match sessions.send(codec::encode(&frame.samples)) {
            Ok(()) => {
                self.frames_sent += 1;
                if self.sending_failed {
                    info!("Audio sends resumed");
                    self.sending_failed = false;
                }
            }
            Err(e) => {
                if self.sending_failed {
                    debug!(error = %e, "Dropped audio frame");
                } else {
                    warn!(error = %e, "Error sending audio");
                    self.sending_failed = true;
                }
                status.update_error(format!("Error sending audio: {e}"));
            }
        }
    }

    /// Releases the device stream. Safe to call in any state.
    pub fn stop(&mut self, status: &mut StatusChannel) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
        let was = std::mem::replace(&mut self.state, CaptureState::Idle);
        if was != CaptureState::Idle {
            info!(frames_sent = self.frames_sent, "Recording stopped");
            status.update_status("Recording stopped. Type 'start' to begin again.");
        }
    }
}
