//! Configuration loading, validation, and management for Pincer.
//!
//! Loads configuration from `~/.pincer/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tokens always held back from the context window for the reply.
/// The configured window must be larger than this.
pub const COMPACTION_RESERVE_TOKENS: u32 = 8_000;

/// The root configuration structure.
///
/// Maps directly to `~/.pincer/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the model provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Workspace directory holding bootstrap documents and memory files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,

    /// Turn loop settings
    #[serde(default)]
    pub agent: AgentSettings,

    /// Background subagent settings
    #[serde(default)]
    pub subagent: SubagentSettings,

    /// Inbound/outbound queue settings
    #[serde(default)]
    pub hub: HubSettings,

    /// Built-in tool settings
    #[serde(default)]
    pub tools: ToolSettings,
}

fn default_provider() -> String {
    "stub".into()
}
fn default_model() -> String {
    "stub-model".into()
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
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("workspace", &self.workspace)
            .field("agent", &self.agent)
            .field("subagent", &self.subagent)
            .field("hub", &self.hub)
            .field("tools", &self.tools)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Model context window, in tokens
    #[serde(default = "default_context_window_tokens")]
    pub context_window_tokens: u32,

    /// Model calls per turn that may request tools before the turn is cut off
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// How many ranked memories to inject
    #[serde(default = "default_memory_top_k")]
    pub memory_top_k: usize,

    /// Re-prompts per turn when an answer promises an action it never took
    #[serde(default = "default_max_incomplete_action_nudges")]
    pub max_incomplete_action_nudges: u32,

    /// Deadline for a direct (single-shot) turn
    #[serde(default = "default_direct_timeout_secs")]
    pub direct_timeout_secs: u64,
}

fn default_context_window_tokens() -> u32 {
    128_000
}
fn default_max_tool_iterations() -> u32 {
    20
}
fn default_memory_top_k() -> usize {
    5
}
fn default_max_incomplete_action_nudges() -> u32 {
    1
}
fn default_direct_timeout_secs() -> u64 {
    120
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            context_window_tokens: default_context_window_tokens(),
            max_tool_iterations: default_max_tool_iterations(),
            memory_top_k: default_memory_top_k(),
            max_incomplete_action_nudges: default_max_incomplete_action_nudges(),
            direct_timeout_secs: default_direct_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubagentSettings {
    /// Deadline for a spawned run when the model does not pass one
    #[serde(default = "default_subagent_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_subagent_timeout_secs() -> u64 {
    120
}

impl Default for SubagentSettings {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_subagent_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Bounded capacity of the inbound and outbound queues
    #[serde(default = "default_hub_capacity")]
    pub capacity: usize,
}

fn default_hub_capacity() -> usize {
    100
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            capacity: default_hub_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    #[serde(default = "default_web_fetch_timeout_secs")]
    pub web_fetch_timeout_secs: u64,

    /// Response bodies beyond this many bytes are cut before truncation
    #[serde(default = "default_web_fetch_max_bytes")]
    pub web_fetch_max_bytes: usize,
}

fn default_web_fetch_timeout_secs() -> u64 {
    30
}
fn default_web_fetch_max_bytes() -> usize {
    2 * 1024 * 1024
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            web_fetch_timeout_secs: default_web_fetch_timeout_secs(),
            web_fetch_max_bytes: default_web_fetch_max_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.pincer/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `PINCER_API_KEY`
    /// - `PINCER_PROVIDER`
    /// - `PINCER_MODEL`
    /// - `PINCER_WORKSPACE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("PINCER_API_KEY").ok();
        }

        if let Ok(provider) = std::env::var("PINCER_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("PINCER_MODEL") {
            config.default_model = model;
        }

        if let Ok(workspace) = std::env::var("PINCER_WORKSPACE") {
            config.workspace = Some(PathBuf::from(workspace));
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
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

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".pincer")
    }

    /// The workspace in effect: configured, else `~/.pincer/workspace`.
    pub fn workspace_dir(&self) -> PathBuf {
        self.workspace
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("workspace"))
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.context_window_tokens <= COMPACTION_RESERVE_TOKENS {
            return Err(ConfigError::ValidationError(format!(
                "agent.context_window_tokens must be greater than {COMPACTION_RESERVE_TOKENS}"
            )));
        }

        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be > 0".into(),
            ));
        }

        if self.hub.capacity == 0 {
            return Err(ConfigError::ValidationError(
                "hub.capacity must be > 0".into(),
            ));
        }

        if self.subagent.default_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "subagent.default_timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            workspace: None,
            agent: AgentSettings::default(),
            subagent: SubagentSettings::default(),
            hub: HubSettings::default(),
            tools: ToolSettings::default(),
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

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert_eq!(config.default_provider, "stub");
        assert_eq!(config.agent.context_window_tokens, 128_000);
        assert_eq!(config.subagent.default_timeout_secs, 120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.hub.capacity, config.hub.capacity);
    }

    #[test]
    fn window_smaller_than_reserve_rejected() {
        let config = AppConfig {
            agent: AgentSettings {
                context_window_tokens: 4_000,
                ..AgentSettings::default()
            },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_hub_capacity_rejected() {
        let config = AppConfig {
            hub: HubSettings { capacity: 0 },
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().default_provider, "stub");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
default_model = "gpt-4o-mini"
workspace = "/srv/pincer"

[agent]
context_window_tokens = 32000

[subagent]
default_timeout_secs = 45
"#,
        )
        .unwrap();

        let config = AppConfig::load_from(&path).unwrap();
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.agent.context_window_tokens, 32_000);
        assert_eq!(config.agent.max_tool_iterations, 20);
        assert_eq!(config.subagent.default_timeout_secs, 45);
        assert_eq!(config.workspace_dir(), PathBuf::from("/srv/pincer"));
    }

    #[test]
    fn invalid_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "agent = 5").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("stub-model"));
        assert!(toml_str.contains("128000"));
    }
}
