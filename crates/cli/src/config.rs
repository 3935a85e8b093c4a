//! `iching.toml` configuration.
//!
//! Every field has a default, so a missing file and an empty file both yield a
//! working local setup. The upstream credential is never read from the file;
//! `upstream.api_key_env` names the environment variable that holds it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::num::NonZeroUsize;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use client::RetryOptions;
use divination::{RateLimitSettings, ResponseFormat};
use llm::{ChatCompletionsConfig, OPENROUTER_ENDPOINT};
use serde::Deserialize;
use server::ServerSettings;

/// Looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "iching.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub port: u16,
    /// CORS origins. Empty allows any origin.
    pub allowed_origins: Vec<String>,
    pub response_format: ResponseFormat,
    /// Key the limiter on `X-Forwarded-For` instead of the peer address.
    /// Enable only behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub rate_limit: RateLimitConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 8080,
            allowed_origins: Vec::new(),
            response_format: ResponseFormat::default(),
            trust_forwarded_for: false,
            rate_limit: RateLimitConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: usize,
    pub max_clients: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 5,
            max_clients: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub referer: Option<String>,
    pub title: Option<String>,
    /// Environment variable holding the bearer credential.
    pub api_key_env: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: OPENROUTER_ENDPOINT.to_string(),
            model: "deepseek/deepseek-chat-v3.1:free".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            timeout_secs: 30,
            referer: None,
            title: Some("I-Ching Divination AI".to_string()),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
    pub base_url: String,
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            max_retries: 3,
            base_delay_ms: 1000,
            timeout_secs: 60,
        }
    }
}

impl AppConfig {
    /// Loads `path`, or [`DEFAULT_CONFIG_FILE`] if it exists, or the defaults.
    ///
    /// An explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path,
            None if Path::new(DEFAULT_CONFIG_FILE).is_file() => Path::new(DEFAULT_CONFIG_FILE),
            None => {
                tracing::debug!("no configuration file, using defaults");
                return Ok(Self::default());
            }
        };

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;
        let config = Self::from_toml(&text)
            .with_context(|| format!("invalid configuration file {}", path.display()))?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn server_settings(&self) -> anyhow::Result<ServerSettings> {
        let limits = &self.server.rate_limit;
        if limits.window_secs == 0 {
            bail!("server.rate_limit.window_secs must be greater than zero");
        }
        let Some(max_clients) = NonZeroUsize::new(limits.max_clients) else {
            bail!("server.rate_limit.max_clients must be greater than zero");
        };

        Ok(ServerSettings {
            addr: SocketAddr::new(self.server.host, self.server.port),
            allowed_origins: self.server.allowed_origins.clone(),
            response_format: self.server.response_format,
            rate_limit: RateLimitSettings {
                window: Duration::from_secs(limits.window_secs),
                max_requests: limits.max_requests,
                max_clients,
            },
            trust_forwarded_for: self.server.trust_forwarded_for,
        })
    }

    /// Upstream provider settings around a credential already read from the
    /// environment.
    pub fn chat_completions(&self, api_key: String) -> ChatCompletionsConfig {
        let upstream = &self.upstream;
        ChatCompletionsConfig {
            endpoint: upstream.endpoint.clone(),
            api_key,
            model: upstream.model.clone(),
            temperature: upstream.temperature,
            max_tokens: upstream.max_tokens,
            timeout: Duration::from_secs(upstream.timeout_secs),
            referer: upstream.referer.clone(),
            title: upstream.title.clone(),
        }
    }

    pub fn retry_options(&self) -> RetryOptions {
        RetryOptions {
            max_retries: self.client.max_retries,
            base_delay: Duration::from_millis(self.client.base_delay_ms),
        }
    }
}
