//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.line-relay/config.json`) and environment.
//! Credentials are normally supplied through the environment; the file is optional.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Gateway server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Channel settings (LINE).
    #[serde(default)]
    pub channels: ChannelsConfig,

    /// Completion service settings.
    #[serde(default)]
    pub completion: CompletionConfig,
}

/// Gateway bind and port.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// HTTP port (default 3000). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; the chat platform must reach the webhook).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
        }
    }
}

/// Per-channel config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelsConfig {
    #[serde(default)]
    pub line: LineChannelConfig,
}

/// LINE Messaging API config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineChannelConfig {
    /// Long-lived channel access token. Overridden by CHANNEL_ACCESS_TOKEN or LINE_CHANNEL_ACCESS_TOKEN env.
    pub channel_access_token: Option<String>,
    /// Channel secret used to verify x-line-signature. Overridden by CHANNEL_SECRET or LINE_CHANNEL_SECRET env.
    pub channel_secret: Option<String>,
    /// Messaging API base URL (default https://api.line.me).
    pub api_base: Option<String>,
}

/// Completion service config (OpenAI-compatible completions endpoint).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionConfig {
    /// API key. Overridden by OPENAI_API_KEY env.
    pub api_key: Option<String>,
    /// API base URL including the version segment (default https://api.openai.com/v1).
    pub api_base: Option<String>,
    /// Model id sent with every request (default text-davinci-003).
    pub model: Option<String>,
}

/// First non-empty trimmed value among the given env vars.
fn env_nonempty(names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| {
        std::env::var(name)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })
}

fn nonempty(value: Option<&String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Resolve the LINE channel access token: env overrides config.
pub fn resolve_channel_access_token(config: &Config) -> Option<String> {
    env_nonempty(&["CHANNEL_ACCESS_TOKEN", "LINE_CHANNEL_ACCESS_TOKEN"])
        .or_else(|| nonempty(config.channels.line.channel_access_token.as_ref()))
}

/// Resolve the LINE channel secret: env overrides config.
pub fn resolve_channel_secret(config: &Config) -> Option<String> {
    env_nonempty(&["CHANNEL_SECRET", "LINE_CHANNEL_SECRET"])
        .or_else(|| nonempty(config.channels.line.channel_secret.as_ref()))
}

/// Resolve the completion API key: env OPENAI_API_KEY overrides config.
pub fn resolve_completion_api_key(config: &Config) -> Option<String> {
    env_nonempty(&["OPENAI_API_KEY"]).or_else(|| nonempty(config.completion.api_key.as_ref()))
}

/// Resolve the listen port: env PORT overrides config. An unparsable PORT is ignored.
pub fn resolve_port(config: &Config) -> u16 {
    match env_nonempty(&["PORT"]) {
        Some(raw) => match raw.parse::<u16>() {
            Ok(port) => port,
            Err(_) => {
                log::warn!("ignoring invalid PORT value: {}", raw);
                config.gateway.port
            }
        },
        None => config.gateway.port,
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("LINE_RELAY_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".line-relay").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or LINE_RELAY_CONFIG_PATH / default). Missing file => default config.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
