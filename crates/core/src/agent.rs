//! Live voice agent
//!
//! `LiveAgent` owns the session manager, the playback scheduler, the capture
//! pipeline, the configuration store, and the status channel. Every reaction
//! (transport callbacks, finished playback sources, captured frames, and user
//! commands) is applied on one task, so none of that state is shared.

use crate::Command;
use crate::capture::{AudioFrame, CaptureState, CapturePipeline, Microphone};
use crate::config::{AgentConfiguration, ConfigStore};
use crate::generic_types::SessionEvent;
use crate::level::LevelMeter;
use crate::scheduler::{AudioOutput, PlaybackScheduler, SourceId};
use crate::session::{LiveConnector, SessionManager, SessionState};
use crate::status::{StatusChannel, StatusLine};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

pub struct LiveAgent<C, O, M> {
    sessions: SessionManager<C>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    scheduler: PlaybackScheduler<O>,
    ended: mpsc::UnboundedReceiver<SourceId>,
    capture: CapturePipeline<M>,
    frames: mpsc::UnboundedReceiver<AudioFrame>,
    config: ConfigStore,
    status: StatusChannel,
}

impl<C, O, M> LiveAgent<C, O, M>
where
    C: LiveConnector,
    O: AudioOutput,
    M: Microphone,
{
    /// Wires the agent. `ended` must receive the id of every source `output`
    /// finishes playing.
    pub fn new(
        connector: C,
        model: impl Into<String>,
        output: O,
        ended: mpsc::UnboundedReceiver<SourceId>,
        microphone: M,
        initial: AgentConfiguration,
    ) -> Self {
        let (sessions, events) = SessionManager::new(connector, model);
        let (capture, frames) = CapturePipeline::new(microphone);
        Self {
            sessions,
            events,
            scheduler: PlaybackScheduler::new(output),
            ended,
            capture,
            frames,
            config: ConfigStore::new(initial),
            status: StatusChannel::new(),
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StatusLine> {
        self.status.subscribe()
    }

    /// Level handle on the capture path.
    pub fn input_level(&self) -> LevelMeter {
        self.capture.level()
    }

    pub fn config(&self) -> &ConfigStore {
        &self.config
    }

    pub fn session_state(&self) -> SessionState {
        self.sessions.state()
    }

    pub fn capture_state(&self) -> CaptureState {
        self.capture.state()
    }

    /// Runs until a `Shutdown` command arrives or every command sender is gone.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        self.initialize().await;

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => self.on_session_event(event),
                Some(id) = self.ended.recv() => self.scheduler.on_source_ended(id),
                Some(frame) = self.frames.recv() => self.on_frame(frame),
                command = commands.recv() => {
                    let Some(command) = command else {
                        info!("Command channel closed");
                        break;
                    };
                    if !self.handle_command(command).await {
                        break;
                    }
                }
            }
        }

        self.shutdown().await;
    }

    async fn initialize(&mut self) {
        self.scheduler.reset();
        // Failure is already on the status channel; `start` retries later.
        let _ = self
            .sessions
            .connect(self.config.active(), &mut self.status)
            .await;
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        self.sessions
            .handle_event(event, &mut self.scheduler, &mut self.status);
    }

    fn on_frame(&mut self, frame: AudioFrame) {
        self.capture
            .on_frame(frame, &mut self.sessions, &mut self.status);
    }

    /// Applies one command. Returns `false` when the agent should stop.
    async fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::StartCapture => {
                // Failures are reported on the status channel.
                let _ = self
                    .capture
                    .start(&mut self.sessions, self.config.active(), &mut self.status)
                    .await;
            }
            Command::StopCapture => self.capture.stop(&mut self.status),
            Command::Reset => self.reset().await,
            Command::OpenSettings => {
                let staged = self.config.stage();
                self.status
                    .update_status(format!("Editing settings (voice {}).", staged.voice));
            }
            Command::SetVoice(voice) => {
                self.ensure_editing();
                if self.config.set_voice(voice).is_ok() {
                    self.status
                        .update_status(format!("Voice set to {voice}. Apply to restart the session."));
                }
            }
            Command::SetSystemInstruction(text) => {
                self.ensure_editing();
                if self.config.set_system_instruction(text).is_ok() {
                    self.status
                        .update_status("System instruction updated. Apply to restart the session.");
                }
            }
            Command::ApplySettings => {
                if let Err(e) = self
                    .config
                    .apply(&mut self.sessions, &mut self.status)
                    .await
                {
                    warn!(error = %e, "Settings were not applied cleanly");
                    if !self.status.snapshot().is_error() {
                        self.status.update_error(format!("Error: {e}"));
                    }
                }
            }
            Command::CancelSettings => {
                if self.config.is_editing() {
                    self.config.cancel();
                    self.status.update_status("Settings discarded.");
                }
            }
            Command::Shutdown => return false,
        }
        true
    }

    fn ensure_editing(&mut self) {
        if !self.config.is_editing() {
            self.config.stage();
        }
    }

    async fn reset(&mut self) {
        self.capture.stop(&mut self.status);
        let active = self.config.active();
        if self
            .sessions
            .reconnect(active, &mut self.status)
            .await
            .is_ok()
        {
            if active.is_customized() {
                self.status
                    .update_status("Session restarted with current custom settings.");
            } else {
                self.status.update_status("Session restarted.");
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("Shutting down live agent");
        self.capture.stop(&mut self.status);
        self.sessions.close().await;
        self.scheduler.on_interrupt();
    }
}
