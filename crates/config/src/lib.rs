//! Configuration loading, validation, and management for Scarlett.
//!
//! Loads configuration from `~/.scarlett/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.scarlett/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider name, used in logs and status output
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Base URL of the OpenAI-compatible endpoint
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Max tokens per model response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

fn default_provider() -> String {
    "cerebras".into()
}
fn default_base_url() -> String {
    "https://api.cerebras.ai/v1".into()
}
fn default_model() -> String {
    "qwen-3-235b-a22b-instruct-2507".into()
}
fn default_temperature() -> f32 {
    0.45
}
fn default_top_p() -> f32 {
    0.95
}
fn default_max_tokens() -> u32 {
    8192
}

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
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("max_tokens", &self.max_tokens)
            .field("agent", &self.agent)
            .field("retry", &self.retry)
            .field("gateway", &self.gateway)
            .field("tools", &self.tools)
            .finish()
    }
}

/// Agent loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum decide calls per turn before the answer is forced
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Number of user/assistant exchanges kept in the session history
    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Inline persona prompt. Takes precedence over `system_prompt_path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_path: Option<PathBuf>,
}

fn default_max_tool_rounds() -> usize {
    5
}
fn default_max_history() -> usize {
    50
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            max_history: default_max_history(),
            system_prompt: None,
            system_prompt_path: None,
        }
    }
}

/// Backoff settings for calls to the completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts for a decide call
    #[serde(default = "default_decide_max_retries")]
    pub decide_max_retries: u32,

    /// Total attempts for establishing a plain answer stream
    #[serde(default = "default_stream_max_retries")]
    pub stream_max_retries: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_decide_max_retries() -> u32 {
    5
}
fn default_stream_max_retries() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    16_000
}

impl RetrySettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            decide_max_retries: default_decide_max_retries(),
            stream_max_retries: default_stream_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_port() -> u16 {
    8000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Settings for the built-in tools.
#[derive(Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tavily_api_key: Option<String>,

    /// UTC offset used by `get_current_time` when none is given
    #[serde(default = "default_timezone")]
    pub default_timezone: String,

    /// Default character budget for `fetch_url`
    #[serde(default = "default_fetch_max_length")]
    pub fetch_max_length: usize,

    /// Upper bound for every outbound HTTP call a tool makes
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

fn default_timezone() -> String {
    "+09:00".into()
}
fn default_fetch_max_length() -> usize {
    5000
}
fn default_http_timeout_secs() -> u64 {
    15
}

impl ToolsConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

impl std::fmt::Debug for ToolsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolsConfig")
            .field("tavily_api_key", &redact(&self.tavily_api_key))
            .field("default_timezone", &self.default_timezone)
            .field("fetch_max_length", &self.fetch_max_length)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            default_timezone: default_timezone(),
            fetch_max_length: default_fetch_max_length(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.scarlett/config.toml).
    ///
    /// Falls back to defaults if the file doesn't exist.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path.
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

    /// Environment variable overrides (highest priority for everything but
    /// the API keys, which only fill in when the file has none).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("SCARLETT_API_KEY").or_else(|| lookup("CEREBRAS_API_KEY"));
        }
        if let Some(model) = lookup("SCARLETT_MODEL") {
            self.model = model;
        }
        if let Some(base_url) = lookup("SCARLETT_BASE_URL") {
            self.base_url = base_url;
        }
        if self.tools.tavily_api_key.is_none() {
            self.tools.tavily_api_key = lookup("TAVILY_API_KEY");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".scarlett")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.top_p <= 0.0 || self.top_p > 1.0 {
            return Err(ConfigError::ValidationError("top_p must be in (0.0, 1.0]".into()));
        }

        if self.agent.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError("agent.max_tool_rounds must be >= 1".into()));
        }

        if self.retry.decide_max_retries == 0 || self.retry.stream_max_retries == 0 {
            return Err(ConfigError::ValidationError(
                "retry attempt bounds must be >= 1".into(),
            ));
        }

        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.max_delay_ms must be >= retry.base_delay_ms".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Resolve the persona prompt: inline text, then file, then nothing.
    pub fn system_prompt(&self) -> Result<Option<String>, ConfigError> {
        if let Some(prompt) = &self.agent.system_prompt {
            return Ok(Some(prompt.clone()));
        }
        match &self.agent.system_prompt_path {
            Some(path) => std::fs::read_to_string(path)
                .map(Some)
                .map_err(|e| ConfigError::ReadError {
                    path: path.clone(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            agent: AgentSettings::default(),
            retry: RetrySettings::default(),
            gateway: GatewayConfig::default(),
            tools: ToolsConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.model, "qwen-3-235b-a22b-instruct-2507");
        assert_eq!(config.gateway.port, 8000);
        assert_eq!(config.agent.max_tool_rounds, 5);
        assert_eq!(config.retry.decide_max_retries, 5);
        assert_eq!(config.retry.stream_max_retries, 3);
        assert_eq!(config.tools.default_timezone, "+09:00");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.retry.max_delay_ms, config.retry.max_delay_ms);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let parsed: AppConfig = toml::from_str(
            r#"
model = "llama-4-scout"

[agent]
max_tool_rounds = 2
"#,
        )
        .unwrap();
        assert_eq!(parsed.model, "llama-4-scout");
        assert_eq!(parsed.agent.max_tool_rounds, 2);
        assert_eq!(parsed.agent.max_history, 50);
        assert_eq!(parsed.base_url, "https://api.cerebras.ai/v1");
    }

    #[test]
    fn invalid_values_rejected() {
        let hot = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(hot.validate().is_err());

        let mut no_rounds = AppConfig::default();
        no_rounds.agent.max_tool_rounds = 0;
        assert!(no_rounds.validate().is_err());

        let mut inverted = AppConfig::default();
        inverted.retry.max_delay_ms = 10;
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider, "cerebras");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "temperature = 0.2\n[gateway]\nport = 9100\n").unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert!((config.temperature - 0.2).abs() < f32::EPSILON);
        assert_eq!(config.gateway.port, 9100);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "temperature = \"warm\"").unwrap();
        assert!(matches!(AppConfig::load_from(&path), Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CEREBRAS_API_KEY", "csk-123"),
            ("SCARLETT_MODEL", "gpt-oss-120b"),
            ("TAVILY_API_KEY", "tvly-1"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.api_key.as_deref(), Some("csk-123"));
        assert_eq!(config.model, "gpt-oss-120b");
        assert_eq!(config.tools.tavily_api_key.as_deref(), Some("tvly-1"));
        assert!(config.has_api_key());
    }

    #[test]
    fn file_api_key_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|key| (key == "SCARLETT_API_KEY").then(|| "from-env".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig {
            api_key: Some("csk-secret".into()),
            ..AppConfig::default()
        };
        config.tools.tavily_api_key = Some("tvly-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("csk-secret"));
        assert!(!debug.contains("tvly-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn inline_system_prompt_wins() {
        let mut config = AppConfig::default();
        config.agent.system_prompt = Some("You are Scarlett.".into());
        config.agent.system_prompt_path = Some(PathBuf::from("/nonexistent/prompt.md"));
        assert_eq!(config.system_prompt().unwrap().as_deref(), Some("You are Scarlett."));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("qwen-3-235b-a22b-instruct-2507"));
        assert!(toml_str.contains("[retry]"));
        assert!(!toml_str.contains("api_key"));
    }
}
