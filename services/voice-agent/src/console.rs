//! Line-oriented command console on stdin.

use live_voice_core::Command;
use live_voice_core::Voice;
use live_voice_core::level::LevelMeter;
use live_voice_core::status::StatusLine;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub const HELP: &str = "\
Commands:
  start              start streaming the microphone
  stop               stop streaming the microphone
  reset              stop and restart the session
  settings           begin editing voice and system instruction
  voice <name>       stage a voice (see 'voices')
  prompt <text...>   stage a system instruction (empty for the default)
  apply              apply staged settings and restart the session
  cancel             discard staged settings
  voices             list available voices
  status             show the current status
  levels             show input and output levels
  help               show this help
  quit               exit";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleInput {
    Agent(Command),
    ListVoices,
    Status,
    Levels,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConsoleError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("'{0}' needs an argument")]
    MissingArgument(&'static str),
    #[error("unknown voice '{0}'; type 'voices' for the list")]
    UnknownVoice(String),
}

/// Parses one line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ConsoleInput>, ConsoleError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let input = match word.to_ascii_lowercase().as_str() {
        "start" => ConsoleInput::Agent(Command::StartCapture),
        "stop" => ConsoleInput::Agent(Command::StopCapture),
        "reset" => ConsoleInput::Agent(Command::Reset),
        "settings" => ConsoleInput::Agent(Command::OpenSettings),
        "voice" => {
            if rest.is_empty() {
                return Err(ConsoleError::MissingArgument("voice"));
            }
            let voice = rest
                .parse::<Voice>()
                .map_err(|_| ConsoleError::UnknownVoice(rest.to_string()))?;
            ConsoleInput::Agent(Command::SetVoice(voice))
        }
        "prompt" => ConsoleInput::Agent(Command::SetSystemInstruction(rest.to_string())),
        "apply" => ConsoleInput::Agent(Command::ApplySettings),
        "cancel" => ConsoleInput::Agent(Command::CancelSettings),
        "voices" => ConsoleInput::ListVoices,
        "status" => ConsoleInput::Status,
        "levels" => ConsoleInput::Levels,
        "help" | "?" => ConsoleInput::Help,
        "quit" | "exit" => ConsoleInput::Agent(Command::Shutdown),
        other => return Err(ConsoleError::UnknownCommand(other.to_string())),
    };
    Ok(Some(input))
}

pub fn voice_catalog() -> String {
    Voice::ALL
        .iter()
        .map(|voice| {
            let marker = if *voice == Voice::default() { " (default)" } else { "" };
            format!("  {:<14} {}{}", voice.name(), voice.label(), marker)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Level handles shown by the `levels` command.
#[derive(Debug, Clone)]
pub struct Meters {
    pub input: LevelMeter,
    pub output: LevelMeter,
}

/// Reads stdin until EOF or `quit`, forwarding agent commands.
pub async fn run(
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<StatusLine>,
    meters: Meters,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Console input closed");
                break;
            }
            Err(e) => {
                info!(error = %e, "Failed to read console input");
                break;
            }
        };

        match parse_line(&line) {
            Ok(None) => {}
            Ok(Some(ConsoleInput::Agent(command))) => {
                let quitting = command == Command::Shutdown;
                if commands.send(command).await.is_err() || quitting {
                    return;
                }
            }
            Ok(Some(ConsoleInput::ListVoices)) => println!("{}", voice_catalog()),
            Ok(Some(ConsoleInput::Status)) => println!("{}", status.borrow().current()),
            Ok(Some(ConsoleInput::Levels)) => println!(
                "input {:.3}  output {:.3}",
                meters.input.level(),
                meters.output.level()
            ),
            Ok(Some(ConsoleInput::Help)) => println!("{HELP}"),
            Err(e) => println!("{e}\n{HELP}"),
        }
    }
    // Closing stdin ends the program the same way 'quit' does.
    let _ = commands.send(Command::Shutdown).await;
}

/// Prints the status line each time its visible text changes.
pub async fn print_status(mut status: watch::Receiver<StatusLine>) {
    let mut last = String::new();
    while status.changed().await.is_ok() {
        let line = status.borrow_and_update().clone();
        if line.current() != last {
            last = line.current().to_string();
            if line.is_error() {
                println!("! {last}");
            } else {
                println!("> {last}");
            }
        }
    }
}
