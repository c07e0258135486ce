use parley_core::generic_types::TurnMode;
use std::path::PathBuf;
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
pub struct Config {
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub realtime_url: String,
    pub realtime_model: String,
    pub title_model: String,
    /// `None` when input transcription is disabled.
    pub transcription_model: Option<String>,
    pub turn_detection: TurnMode,
    pub data_dir: PathBuf,
    pub prompts_path: PathBuf,
    pub log_level: Level,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        let openai_api_base = var_or("OPENAI_API_BASE", "https://api.openai.com/v1");
        let realtime_url = var_or("REALTIME_URL", "wss://api.openai.com/v1/realtime");
        if !realtime_url.starts_with("ws://") && !realtime_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "REALTIME_URL".to_string(),
                format!("'{}' is not a websocket URL", realtime_url),
            ));
        }
        let realtime_model = var_or("REALTIME_MODEL", "gpt-4o-realtime-preview-2024-10-01");
        let title_model = var_or("TITLE_MODEL", "gpt-4o-mini");

        let transcription_model = match std::env::var("TRANSCRIPTION_MODEL") {
            Ok(model) if model.trim().is_empty() => None,
            Ok(model) => Some(model),
            Err(_) => Some("whisper-1".to_string()),
        };

        let turn_detection_str = var_or("TURN_DETECTION", "automatic");
        let turn_detection = match turn_detection_str.to_lowercase().as_str() {
            "automatic" | "auto" | "server_vad" => TurnMode::Automatic,
            "manual" | "push_to_talk" => TurnMode::Manual,
            other => {
                return Err(ConfigError::InvalidValue(
                    "TURN_DETECTION".to_string(),
                    format!("'{}' is neither 'manual' nor 'automatic'", other),
                ));
            }
        };

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let prompts_path = std::env::var("PROMPTS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./prompts"));

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            openai_api_key,
            openai_api_base,
            realtime_url,
            realtime_model,
            title_model,
            transcription_model,
            turn_detection,
            data_dir,
            prompts_path,
            log_level,
        })
    }
}
