use crate::error::{ProxyError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub limits: TokenLimits,
    #[serde(default)]
    pub normalize: NormalizeConfig,
    #[serde(default)]
    pub models: ModelsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// Token-limit policy applied to `max_tokens` on every outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLimits {
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u64,
    #[serde(default = "default_low_threshold")]
    pub low_threshold: u64,
    #[serde(default = "default_floor")]
    pub floor: u64,
    #[serde(default = "default_ceiling")]
    pub ceiling: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizeConfig {
    #[serde(default)]
    pub reasoning_policy: ReasoningPolicy,
}

/// How the upstream `reasoning_content` channel is merged into `content`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningPolicy {
    /// Keep `content`; fall back to the reasoning text only when `content` is empty.
    #[default]
    ContentFirst,
    /// Emit `reasoning\n\ncontent` when both are present.
    Concatenate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    #[serde(default = "default_fallback_models")]
    pub fallback: Vec<String>,
}

fn default_port() -> u16 {
    8000
}

fn default_base_url() -> String {
    "https://integrate.api.nvidia.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "NVIDIA_API_KEY".to_string()
}

fn default_model() -> String {
    "deepseek/deepseek-r1".to_string()
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_tokens() -> u64 {
    8192
}

fn default_low_threshold() -> u64 {
    500
}

fn default_floor() -> u64 {
    2048
}

fn default_ceiling() -> u64 {
    65536
}

fn default_fallback_models() -> Vec<String> {
    [
        "deepseek/deepseek-r1",
        "deepseek/deepseek-r1-distill-llama-70b",
        "deepseek/deepseek-r1-distill-qwen-32b",
        "deepseek/deepseek-r1-distill-llama-8b",
        "nvidia/llama-3.1-nemotron-70b-instruct",
        "meta/llama-3.1-8b-instruct",
        "meta/llama-3.1-70b-instruct",
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig::default(),
            limits: TokenLimits::default(),
            normalize: NormalizeConfig::default(),
            models: ModelsConfig::default(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for TokenLimits {
    fn default() -> Self {
        Self {
            default_max_tokens: default_max_tokens(),
            low_threshold: default_low_threshold(),
            floor: default_floor(),
            ceiling: default_ceiling(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            fallback: default_fallback_models(),
        }
    }
}

impl ProxyConfig {
    /// Load config from a TOML file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using built-in defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream.base_url.trim().is_empty() {
            return Err(ProxyError::config("upstream.base_url must not be empty"));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ProxyError::config("upstream.timeout_secs must be greater than 0"));
        }
        if self.limits.floor > self.limits.ceiling {
            return Err(ProxyError::config(format!(
                "limits.floor ({}) must not exceed limits.ceiling ({})",
                self.limits.floor, self.limits.ceiling
            )));
        }
        Ok(())
    }

    /// Upstream base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.upstream.base_url.trim_end_matches('/')
    }

    /// Resolve the API key from the configured environment variable
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.upstream.api_key_env).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your NVIDIA API key.",
                self.upstream.api_key_env
            ))
        })
    }
}

#[must_use]
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("nim-proxy.toml")];

    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        paths.push(PathBuf::from(xdg).join("nim-proxy").join("config.toml"));
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(".config").join("nim-proxy").join("config.toml"));
        paths.push(home.join(".nim-proxy.toml"));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
