pub mod agent;
pub mod capture;
pub mod codec;
pub mod config;
pub mod generic_types;
pub mod level;
pub mod scheduler;
pub mod session;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::LiveAgent;
pub use config::{AgentConfiguration, Voice};

/// User intents the runtime hands to the agent.
///
/// This enum decouples whatever surface collects input (a console, a UI)
/// from the agent that acts on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Acquire the microphone and stream it to the session.
    StartCapture,
    StopCapture,
    /// Stop capture and replace the session using the active configuration.
    Reset,
    /// Begin editing a copy of the active configuration.
    OpenSettings,
    SetVoice(Voice),
    SetSystemInstruction(String),
    /// Promote the edited configuration and restart the session.
    ApplySettings,
    CancelSettings,
    Shutdown,
}
