use std::net::SocketAddr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Which realization of the Live duplex connection to use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportBinding {
    /// Raw message pump over the Live socket, inspecting inbound JSON.
    Socket,
    /// Structured binding that decodes inbound frames into typed events.
    Stream,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: String,
    pub transport: TransportBinding,
    pub live_model: String,
    pub voice_name: String,
    pub scheduler_base_url: String,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables. A missing API key is
    /// a startup failure here, never a late transport error.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let transport_str =
            std::env::var("VOICE_TRANSPORT").unwrap_or_else(|_| "socket".to_string());
        let transport = match transport_str.to_lowercase().as_str() {
            "socket" => TransportBinding::Socket,
            "stream" => TransportBinding::Stream,
            other => {
                return Err(ConfigError::InvalidValue(
                    "VOICE_TRANSPORT".to_string(),
                    format!("'{}' is not a known transport binding", other),
                ));
            }
        };

        let live_model = std::env::var("LIVE_MODEL")
            .unwrap_or_else(|_| "models/gemini-2.5-flash-native-audio-preview-12-2025".to_string());
        let voice_name = std::env::var("VOICE_NAME").unwrap_or_else(|_| "Zephyr".to_string());

        let scheduler_base_url = std::env::var("SCHEDULER_BASE_URL")
            .map_err(|_| ConfigError::MissingVar("SCHEDULER_BASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            gemini_api_key,
            transport,
            live_model,
            voice_name,
            scheduler_base_url,
            log_level,
        })
    }
}
