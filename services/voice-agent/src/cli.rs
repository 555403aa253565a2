use clap::Parser;
use live_voice_core::Voice;

/// Talk to a Gemini Live model through the default microphone and speakers.
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct Cli {
    /// Initial voice (overrides AGENT_VOICE).
    #[arg(long)]
    pub voice: Option<Voice>,

    /// Initial system instruction (overrides AGENT_SYSTEM_PROMPT).
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Model id (overrides GEMINI_MODEL).
    #[arg(long)]
    pub model: Option<String>,

    /// Input device name (overrides AGENT_INPUT_DEVICE).
    #[arg(long)]
    pub input_device: Option<String>,

    /// Print the voice catalog and exit.
    #[arg(long)]
    pub list_voices: bool,
}
