//! Agent configuration: the voice catalog, and the active/staged settings store.

use crate::session::{ConnectError, LiveConnector, SessionManager};
use crate::status::StatusChannel;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no settings are being edited")]
    NotEditing,
    #[error("unknown voice '{0}'")]
    UnknownVoice(String),
    #[error("settings applied but the session could not be restarted: {0}")]
    Reconnect(#[from] ConnectError),
}

macro_rules! voices {
    ($($variant:ident => $label:literal),+ $(,)?) => {
        /// Prebuilt voice presets offered by the remote service.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum Voice {
            $(
                #[doc = $label]
                $variant,
            )+
        }

        impl Voice {
            pub const ALL: &'static [Voice] = &[$(Voice::$variant),+];

            /// Name sent on the wire.
            pub fn name(self) -> &'static str {
                match self {
                    $(Voice::$variant => stringify!($variant)),+
                }
            }

            /// Short description of the voice's character.
            pub fn label(self) -> &'static str {
                match self {
                    $(Voice::$variant => $label),+
                }
            }
        }
    };
}

voices! {
    Zephyr => "Bright",
    Puck => "Upbeat",
    Charon => "Informative",
    Kore => "Firm",
    Fenrir => "Excitable",
    Leda => "Youthful",
    Orus => "Firm",
    Aoede => "Breezy",
    Callirrhoe => "Easy-going",
    Autonoe => "Bright",
    Enceladus => "Breathy",
    Iapetus => "Clear",
    Umbriel => "Easy-going",
    Algieba => "Smooth",
    Despina => "Smooth",
    Erinome => "Clear",
    Algenib => "Gravelly",
    Rasalgethi => "Informative",
    Laomedeia => "Upbeat",
    Achernar => "Soft",
    Alnilam => "Firm",
    Schedar => "Even",
    Gacrux => "Mature",
    Pulcherrima => "Forward",
    Achird => "Friendly",
    Zubenelgenubi => "Casual",
    Vindemiatrix => "Gentle",
    Sadachbia => "Lively",
    Sadaltager => "Knowledgeable",
    Sulafat => "Warm",
}

impl Default for Voice {
    fn default() -> Self {
        Voice::Orus
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Voice {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Voice::ALL
            .iter()
            .copied()
            .find(|v| v.name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| ConfigError::UnknownVoice(wanted.to_string()))
    }
}

/// Voice and system prompt for a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentConfiguration {
    pub voice: Voice,
    /// Empty means "use the service default".
    pub system_instruction: String,
}

impl AgentConfiguration {
    pub fn new(voice: Voice, system_instruction: impl Into<String>) -> Self {
        Self {
            voice,
            system_instruction: system_instruction.into(),
        }
    }

    /// The instruction to send, if any.
    pub fn system_instruction_override(&self) -> Option<&str> {
        let trimmed = self.system_instruction.trim();
        (!trimmed.is_empty()).then_some(self.system_instruction.as_str())
    }

    /// True when anything differs from the service defaults.
    pub fn is_customized(&self) -> bool {
        !self.system_instruction.is_empty() || self.voice != Voice::default()
    }
}

/// Holds the active configuration and, while an edit surface is open, the
/// staged copy being edited.
#[derive(Debug, Default)]
pub struct ConfigStore {
    active: AgentConfiguration,
    staged: Option<AgentConfiguration>,
}

impl ConfigStore {
    pub fn new(active: AgentConfiguration) -> Self {
        Self {
            active,
            staged: None,
        }
    }

    pub fn active(&self) -> &AgentConfiguration {
        &self.active
    }

    pub fn staged(&self) -> Option<&AgentConfiguration> {
        self.staged.as_ref()
    }

    pub fn is_editing(&self) -> bool {
        self.staged.is_some()
    }

    /// Starts an edit from the last applied state.
    pub fn stage(&mut self) -> &AgentConfiguration {
        self.staged.insert(self.active.clone())
    }

    pub fn set_voice(&mut self, voice: Voice) -> Result<(), ConfigError> {
        self.staged.as_mut().ok_or(ConfigError::NotEditing)?.voice = voice;
        Ok(())
    }

    pub fn set_system_instruction(&mut self, text: impl Into<String>) -> Result<(), ConfigError> {
        self.staged
            .as_mut()
            .ok_or(ConfigError::NotEditing)?
            .system_instruction = text.into();
        Ok(())
    }

    /// Discards the staged edit.
    pub fn cancel(&mut self) {
        self.staged = None;
    }

    /// Promotes the staged edit to active and replaces the running session.
    ///
    /// The active configuration is updated even when the reconnect fails; the
    /// failure is already on the status channel.
    pub async fn apply<C: LiveConnector>(
        &mut self,
        sessions: &mut SessionManager<C>,
        status: &mut StatusChannel,
    ) -> Result<(), ConfigError> {
        let staged = self.staged.take().ok_or(ConfigError::NotEditing)?;
        info!(voice = %staged.voice, custom_prompt = !staged.system_instruction.is_empty(), "Applying settings");
        self.active = staged;

        sessions.reconnect(&self.active, status).await?;
        status.update_status("Settings applied. Session restarted.");
        Ok(())
    }
}
