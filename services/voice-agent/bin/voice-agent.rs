//! Main entrypoint for the live voice agent
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and command line.
//! 2. Opening the speaker and microphone.
//! 3. Wiring the agent to the Gemini Live transport.
//! 4. Running the console and the agent until `quit`, EOF, or Ctrl+C.

use anyhow::Context;
use clap::Parser;
use gemini_realtime::GeminiLiveConnector;
use live_voice_agent::{
    cli::Cli,
    config::AppConfig,
    console::{self, Meters},
};
use live_voice_core::{Command, LiveAgent};
use live_voice_native::{CpalMicrophone, CpalOutput};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Forwards `Ctrl+C` to the agent as a shutdown request.
async fn shutdown_signal(commands: mpsc::Sender<Command>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal. Shutting down gracefully...");
            let _ = commands.send(Command::Shutdown).await;
        }
        Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
    }
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let (ended_tx, ended_rx) = mpsc::unbounded_channel();
    let output = CpalOutput::open(ended_tx).context("Failed to open audio output")?;
    let output_level = output.level();
    let microphone = CpalMicrophone::new(config.input_device.clone());
    let connector =
        GeminiLiveConnector::new(config.api_key.clone()).with_url(config.live_url.clone());

    let agent = LiveAgent::new(
        connector,
        config.model.clone(),
        output,
        ended_rx,
        microphone,
        config.initial_agent_config(),
    );

    let (commands_tx, commands_rx) = mpsc::channel(32);
    let meters = Meters {
        input: agent.input_level(),
        output: output_level,
    };
    tokio::spawn(console::print_status(agent.subscribe_status()));
    tokio::spawn(console::run(
        commands_tx.clone(),
        agent.subscribe_status(),
        meters,
    ));
    tokio::spawn(shutdown_signal(commands_tx));

    println!("{}", console::HELP);
    agent.run(commands_rx).await;

    info!("Agent has shut down.");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.list_voices {
        println!("{}", console::voice_catalog());
        return Ok(());
    }

    // --- 1. Load Configuration ---
    let mut config = AppConfig::from_env().context("Failed to load configuration")?;
    config.apply_overrides(&cli);

    // --- 2. Initialize Logging ---
    let filter = EnvFilter::new(format!(
        "{},tungstenite=warn,tokio_tungstenite=warn,rustls=warn",
        config.log_level.as_str().to_ascii_lowercase()
    ));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();
    info!(
        model = %config.model,
        voice = %config.voice,
        custom_prompt = !config.system_prompt.is_empty(),
        "Configuration loaded. Starting live voice agent..."
    );

    // Audio streams are bound to the thread that opened them.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build the async runtime")?;
    runtime.block_on(run(config))
}
