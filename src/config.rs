//! Service configuration: defaults, optional JSON file, then CLI/env overrides.

use std::path::Path;

use axum::http::HeaderValue;
use serde::{Deserialize, Serialize};

use crate::error::MarketAiError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub completion: CompletionConfig,

    #[serde(default)]
    pub gate: GateConfig,

    #[serde(default)]
    pub history: HistoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// The single origin allowed by CORS
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origin: default_allowed_origin(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a query waits for a pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
        }
    }
}

/// OpenAI-compatible completion service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature (0.0 to 2.0); kept low for stable SQL
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key: String::new(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Also require statements to parse as read-only queries
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, MarketAiError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Load `path` when given, otherwise start from defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, MarketAiError> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), MarketAiError> {
        if self.server.port == 0 {
            return Err(MarketAiError::Config("server.port must be non-zero".into()));
        }
        if HeaderValue::from_str(&self.server.allowed_origin).is_err() {
            return Err(MarketAiError::Config(format!(
                "server.allowed_origin is not a valid header value: {:?}",
                self.server.allowed_origin
            )));
        }
        if self.database.max_connections == 0 {
            return Err(MarketAiError::Config(
                "database.max_connections must be at least 1".into(),
            ));
        }
        if !(0.0..=2.0).contains(&self.completion.temperature) {
            return Err(MarketAiError::Config(format!(
                "completion.temperature must be between 0.0 and 2.0, got {}",
                self.completion.temperature
            )));
        }
        if self.history.max_entries == 0 {
            return Err(MarketAiError::Config(
                "history.max_entries must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_allowed_origin() -> String {
    "http://localhost:5173".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_acquire_timeout_secs() -> u64 {
    30
}

fn default_endpoint() -> String {
    "https://api.openai.com".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_temperature() -> f32 {
    0.2
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_entries() -> usize {
    100
}
