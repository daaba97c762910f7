//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.threadbot/config.json`) and environment.
//! Secrets (Slack token, signing secret, model API key) can come from either; env wins.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// HTTP server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Slack workspace credentials and API base.
    #[serde(default)]
    pub slack: SlackConfig,

    /// Model selection, prompt and lock cooldown.
    #[serde(default)]
    pub agent: AgentConfig,

    /// External services exposed to the agent as tool bindings.
    #[serde(default)]
    pub tools: Vec<ToolBindingConfig>,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook endpoint (default 3000). Overridden by THREADBOT_GATEWAY_PORT.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "127.0.0.1").
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "127.0.0.1".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Slack app settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SlackConfig {
    /// Bot user OAuth token (xoxb-...). Overridden by SLACK_ACCESS_TOKEN env when set.
    pub access_token: Option<String>,
    /// Signing secret for X-Slack-Signature verification. Overridden by SLACK_SIGNING_SECRET.
    /// When unset, inbound requests are not verified (loopback bind only).
    pub signing_secret: Option<String>,
    /// Web API base URL (default https://slack.com/api). Mostly for tests.
    pub api_base: Option<String>,
}

/// Agent settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    /// Chat-completions model name (default "gpt-4o-mini").
    #[serde(default = "default_model")]
    pub model: String,
    /// Model API key. Overridden by OPENAI_API_KEY env.
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL (default https://api.openai.com/v1).
    pub base_url: Option<String>,
    /// Extra instructions appended to the generated system prompt.
    pub system_prompt: Option<String>,
    /// Workspace root; AGENTS.md there is appended to the system prompt (default ~/.threadbot/workspace).
    pub workspace: Option<PathBuf>,
    /// Delay between the end of a thread's cycle and the thread becoming eligible again.
    #[serde(default = "default_lock_cooldown_ms")]
    pub lock_cooldown_ms: u64,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_lock_cooldown_ms() -> u64 {
    1000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: None,
            base_url: None,
            system_prompt: None,
            workspace: None,
            lock_cooldown_ms: default_lock_cooldown_ms(),
        }
    }
}

impl AgentConfig {
    pub fn lock_cooldown(&self) -> Duration {
        Duration::from_millis(self.lock_cooldown_ms)
    }
}

/// One external service bound as a tool: declared operations plus where to send calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolBindingConfig {
    /// Binding name; operation wire names are `{name}__{operation}`.
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Operation calls are POSTed to `{baseUrl}/{operation}` with the arguments as JSON body.
    pub base_url: String,
    /// Name of the env var holding a bearer token for this service, if any.
    #[serde(default)]
    pub token_env: Option<String>,
    #[serde(default)]
    pub operations: Vec<ToolOperationConfig>,
}

/// A declared operation of a tool binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolOperationConfig {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// JSON schema of the arguments object.
    #[serde(default = "empty_object_schema")]
    pub parameters: serde_json::Value,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object", "properties": {} })
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn config_non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the Slack bot token: env SLACK_ACCESS_TOKEN overrides config.
pub fn resolve_slack_token(config: &Config) -> Option<String> {
    env_non_empty("SLACK_ACCESS_TOKEN").or_else(|| config_non_empty(config.slack.access_token.as_ref()))
}

/// Resolve the Slack signing secret: env SLACK_SIGNING_SECRET overrides config.
pub fn resolve_signing_secret(config: &Config) -> Option<String> {
    env_non_empty("SLACK_SIGNING_SECRET")
        .or_else(|| config_non_empty(config.slack.signing_secret.as_ref()))
}

/// Resolve the model API key: env OPENAI_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    env_non_empty("OPENAI_API_KEY").or_else(|| config_non_empty(config.agent.api_key.as_ref()))
}

/// Resolve a tool binding's bearer token from its configured env var.
pub fn resolve_tool_token(binding: &ToolBindingConfig) -> Option<String> {
    binding.token_env.as_deref().and_then(env_non_empty)
}

/// True if the bind address is loopback (127.0.0.1, ::1, etc.).
pub fn is_loopback_bind(bind: &str) -> bool {
    let b = bind.trim();
    b == "127.0.0.1" || b == "::1" || b == "localhost"
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("THREADBOT_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".threadbot").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Resolve workspace directory for operator prompt context (AGENTS.md).
pub fn resolve_workspace_dir(config: &Config) -> Option<PathBuf> {
    config
        .agent
        .workspace
        .clone()
        .or_else(|| dirs::home_dir().map(|h| h.join(".threadbot").join("workspace")))
}

/// Load config from the given path (or the default). Missing file => default config.
/// THREADBOT_GATEWAY_PORT overrides the configured port.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        parse_config_file(&path)?
    };
    if let Some(port) = env_non_empty("THREADBOT_GATEWAY_PORT") {
        config.gateway.port = port
            .parse()
            .with_context(|| format!("invalid THREADBOT_GATEWAY_PORT: {}", port))?;
    }
    Ok((config, path))
}

fn parse_config_file(path: &Path) -> Result<Config> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}
