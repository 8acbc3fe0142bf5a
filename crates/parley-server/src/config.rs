//! Configuration file support

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use parley_ai::{McpServer, ModelConfig, ToolConfig};
use parley_session::{OrchestratorConfig, ProtocolConfig};
use serde::{Deserialize, Serialize};

/// Configuration for the parley server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to listen on
    pub listen: String,
    /// Directory holding index.html and static assets
    pub static_dir: PathBuf,
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    /// API key (alternative to environment variables)
    pub api_key: Option<String>,
    /// Default system prompt, base64 encoded
    pub system_prompt: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub turn_timeout_secs: u64,
    pub keepalive_secs: u64,
    /// Lifetime of the session cookie
    pub session_ttl_hours: u32,
    pub chat_options: ChatOptions,
    /// Extra headers sent with each generation request
    pub headers: HashMap<String, String>,
    /// Tool integrations forwarded to the backend
    pub mcp_servers: Vec<McpServer>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatOptions {
    /// Initial history flag for new sessions
    pub chat_history: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self { chat_history: true }
    }
}

impl Default for Config {
    fn default() -> Self {
        let model = ModelConfig::default();
        Self {
            listen: "0.0.0.0:8080".to_string(),
            static_dir: PathBuf::from("/usr/local/share/parley/html"),
            base_url: model.base_url,
            api_key: None,
            system_prompt: String::new(),
            model: model.id,
            temperature: model.temperature.unwrap_or(0.7),
            max_tokens: model.max_tokens.unwrap_or(4096),
            turn_timeout_secs: 300,
            keepalive_secs: 60,
            session_ttl_hours: 12,
            chat_options: ChatOptions::default(),
            headers: HashMap::new(),
            mcp_servers: Vec::new(),
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("parley")
    }

    /// Resolve the config file path: explicit, then env, then default
    pub fn config_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var("PARLEY_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("no config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.default_system_prompt()?;
        Ok(config)
    }

    /// Write the example config if no file exists yet
    pub fn init(path: &Path) -> Result<PathBuf> {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        fs::write(path, example_config())
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path.to_path_buf())
    }

    /// The decoded default system prompt
    pub fn default_system_prompt(&self) -> Result<String> {
        let bytes = STANDARD
            .decode(self.system_prompt.trim())
            .context("system_prompt is not valid base64")?;
        String::from_utf8(bytes).context("system_prompt is not valid UTF-8")
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            id: self.model.clone(),
            base_url: self.base_url.trim_end_matches('/').to_string(),
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
            headers: self.headers.clone(),
        }
    }

    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            mcp_servers: self.mcp_servers.clone(),
            ..ToolConfig::default()
        }
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig> {
        Ok(OrchestratorConfig {
            default_system_prompt: self.default_system_prompt()?,
            model: self.model_config(),
            tools: self.tool_config(),
            turn_timeout: Duration::from_secs(self.turn_timeout_secs),
        })
    }

    pub fn session_max_age(&self) -> time::Duration {
        time::Duration::hours(i64::from(self.session_ttl_hours))
    }

    pub fn protocol_config(&self) -> ProtocolConfig {
        ProtocolConfig {
            keepalive: Duration::from_secs(self.keepalive_secs.max(1)),
            history_default: self.chat_options.chat_history,
        }
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# parley configuration file
# Place at ~/.config/parley/config.toml (Linux) or pass --config

# Address to listen on
listen = "0.0.0.0:8080"

# Directory with index.html and static assets
static_dir = "/usr/local/share/parley/html"

# OpenAI-compatible endpoint
base_url = "https://api.openai.com/v1"
model = "gpt-4o-mini"
temperature = 0.7
max_tokens = 4096

# API key (optional - PARLEY_API_KEY or OPENAI_API_KEY are used otherwise)
# api_key = "sk-..."

# Default system prompt, base64 encoded ("You are a helpful assistant.")
system_prompt = "WW91IGFyZSBhIGhlbHBmdWwgYXNzaXN0YW50Lg=="

# Whole-turn timeout and keepalive ping interval, in seconds
turn_timeout_secs = 300
keepalive_secs = 60

# How long the browser keeps its session cookie, in hours
session_ttl_hours = 12

[chat_options]
# Remember the last exchange for new sessions
chat_history = true

[headers]
"X-TFY-LOGGING-CONFIG" = '{"enabled": true}'

# Tool integrations forwarded to the gateway
# [[mcp_servers]]
# integration_fqn = "truefoundry:default:mcp-server-group:github"
# enable_all_tools = false
# tools = [{ name = "search_repositories" }]
"#
}
