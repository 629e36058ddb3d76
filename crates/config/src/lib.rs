//! Configuration loading and validation for tabforge.
//!
//! Loads configuration from a TOML file with environment variable
//! overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the LLM provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// LLM provider ("openai", "openrouter", "ollama", or "custom")
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL for a custom OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model to drive the stage agents
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Pipeline settings
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Sandboxed script execution settings
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("pipeline", &self.pipeline)
            .field("sandbox", &self.sandbox)
            .finish()
    }
}

/// Settings shared by the three stage loops and the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Hard ceiling on agent iterations per stage
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Directory for intermediate CSVs, reports, and the audit log
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_max_iterations() -> u32 {
    25
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            data_dir: default_data_dir(),
        }
    }
}

/// Settings for the training-script sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter used to run generated scripts
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Wall-clock limit per script, in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_interpreter() -> String {
    "python3".into()
}
fn default_timeout_secs() -> u64 {
    300
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a file path, then apply environment
    /// variable overrides:
    /// - `TABFORGE_API_KEY` (highest priority)
    /// - `OPENAI_API_KEY`
    /// - `TABFORGE_MODEL`, `TABFORGE_PROVIDER`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("TABFORGE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("TABFORGE_PROVIDER") {
            config.provider = provider;
        }

        if let Ok(model) = std::env::var("TABFORGE_MODEL") {
            config.model = model;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path without env overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.pipeline.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "pipeline.max_iterations must be at least 1".into(),
            ));
        }

        if self.sandbox.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sandbox.timeout_secs must be at least 1".into(),
            ));
        }

        if self.provider == "custom" && self.api_url.is_none() {
            return Err(ConfigError::ValidationError(
                "provider 'custom' requires api_url".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init` command).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            api_url: None,
            model: default_model(),
            temperature: default_temperature(),
            pipeline: PipelineConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
