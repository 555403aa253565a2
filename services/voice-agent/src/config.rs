use crate::cli::Cli;
use gemini_realtime::{DEFAULT_MODEL, DEFAULT_URL};
use live_voice_core::{AgentConfiguration, Voice};
use secrecy::SecretString;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub api_key: SecretString,
    pub model: String,
    pub live_url: String,
    pub voice: Voice,
    pub system_prompt: String,
    pub input_device: Option<String>,
    pub log_level: Level,
}

impl AppConfig {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let model = std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let live_url = std::env::var("GEMINI_LIVE_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        if !(live_url.starts_with("wss://") || live_url.starts_with("ws://")) {
            return Err(ConfigError::InvalidValue(
                "GEMINI_LIVE_URL".to_string(),
                format!("'{live_url}' is not a websocket URL"),
            ));
        }

        let voice = match std::env::var("AGENT_VOICE") {
            Ok(name) => name
                .parse::<Voice>()
                .map_err(|e| ConfigError::InvalidValue("AGENT_VOICE".to_string(), e.to_string()))?,
            Err(_) => Voice::default(),
        };

        let system_prompt = std::env::var("AGENT_SYSTEM_PROMPT").unwrap_or_default();
        let input_device = std::env::var("AGENT_INPUT_DEVICE").ok();

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            api_key,
            model,
            live_url,
            voice,
            system_prompt,
            input_device,
            log_level,
        })
    }

    /// Command-line flags take precedence over the environment.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(voice) = cli.voice {
            self.voice = voice;
        }
        if let Some(prompt) = &cli.system_prompt {
            self.system_prompt = prompt.clone();
        }
        if let Some(model) = &cli.model {
            self.model = model.clone();
        }
        if let Some(device) = &cli.input_device {
            self.input_device = Some(device.clone());
        }
    }

    /// The configuration the first session is opened with.
    pub fn initial_agent_config(&self) -> AgentConfiguration {
        AgentConfiguration::new(self.voice, self.system_prompt.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::env;

    fn clear_env_vars() {
        unsafe {
            env::remove_var("GEMINI_API_KEY");
            env::remove_var("GEMINI_MODEL");
            env::remove_var("GEMINI_LIVE_URL");
            env::remove_var("AGENT_VOICE");
            env::remove_var("AGENT_SYSTEM_PROMPT");
            env::remove_var("AGENT_INPUT_DEVICE");
            env::remove_var("RUST_LOG");
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("GEMINI_API_KEY", "test-gemini-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_minimal() {
        clear_env_vars();
        set_minimal_env();

        let config = AppConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.api_key.expose_secret(), "test-gemini-key");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.live_url, DEFAULT_URL);
        assert_eq!(config.voice, Voice::Orus);
        assert_eq!(config.system_prompt, "");
        assert_eq!(config.input_device, None);
        assert_eq!(config.log_level, Level::INFO);
        assert!(!config.initial_agent_config().is_customized());
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("GEMINI_MODEL", "models/custom");
            env::set_var("GEMINI_LIVE_URL", "ws://localhost:9000/live");
            env::set_var("AGENT_VOICE", "kore");
            env::set_var("AGENT_SYSTEM_PROMPT", "Answer in French.");
            env::set_var("RUST_LOG", "debug");
        }

        let config = AppConfig::from_env().expect("Config should load successfully");

        assert_eq!(config.model, "models/custom");
        assert_eq!(config.live_url, "ws://localhost:9000/live");
        assert_eq!(config.voice, Voice::Kore);
        assert_eq!(config.system_prompt, "Answer in French.");
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_api_key() {
        clear_env_vars();

        let err = AppConfig::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(msg) => assert!(msg.contains("GEMINI_API_KEY")),
            _ => panic!("Expected MissingVar for GEMINI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_blank_api_key_is_missing() {
        clear_env_vars();
        unsafe {
            env::set_var("GEMINI_API_KEY", "   ");
        }

        assert!(matches!(
            AppConfig::from_env(),
            Err(ConfigError::MissingVar(_))
        ));
    }

    #[test]
    #[serial]
    fn test_config_invalid_voice() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("AGENT_VOICE", "Bob");
        }

        let err = AppConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, reason) => {
                assert_eq!(var, "AGENT_VOICE");
                assert!(reason.contains("Bob"));
            }
            _ => panic!("Expected InvalidValue for AGENT_VOICE"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_url() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("GEMINI_LIVE_URL", "https://example.com");
        }

        let err = AppConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "GEMINI_LIVE_URL"),
            _ => panic!("Expected InvalidValue for GEMINI_LIVE_URL"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = AppConfig::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }

    #[test]
    #[serial]
    fn test_cli_overrides_environment() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("AGENT_VOICE", "Puck");
        }
        let mut config = AppConfig::from_env().expect("Config should load successfully");

        let cli = Cli::parse_from([
            "voice-agent",
            "--voice",
            "Leda",
            "--system-prompt",
            "Be brief.",
        ]);
        config.apply_overrides(&cli);

        assert_eq!(config.voice, Voice::Leda);
        assert_eq!(config.system_prompt, "Be brief.");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert!(config.initial_agent_config().is_customized());
    }
}
