use std::time::{Duration, Instant};

use async_trait::async_trait;
use divination::{ChatMessage, LlmProvider, PromptPayload, UpstreamError};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// OpenRouter's chat-completions endpoint.
pub const OPENROUTER_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Errors raised while constructing a provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No credential was supplied.
    #[error("upstream API key is empty")]
    MissingCredential,

    /// The HTTP client could not be built (e.g. TLS backend failure).
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[from] reqwest::Error),
}

/// Settings for [`ChatCompletionsProvider`].
#[derive(Clone)]
pub struct ChatCompletionsConfig {
    /// Full URL of the chat-completions endpoint.
    pub endpoint: String,
    /// Bearer credential.
    pub api_key: String,
    /// Model identifier, e.g. `deepseek/deepseek-chat-v3.1:free`.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion length cap.
    pub max_tokens: u32,
    /// Whole-request timeout, connect through last body byte.
    pub timeout: Duration,
    /// Sent as `HTTP-Referer` (OpenRouter app attribution).
    pub referer: Option<String>,
    /// Sent as `X-Title` (OpenRouter app attribution).
    pub title: Option<String>,
}

impl ChatCompletionsConfig {
    /// OpenRouter defaults with the given credential.
    pub fn openrouter(api_key: impl Into<String>) -> Self {
        Self {
            endpoint: OPENROUTER_ENDPOINT.to_string(),
            api_key: api_key.into(),
            model: "deepseek/deepseek-chat-v3.1:free".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
            timeout: Duration::from_secs(30),
            referer: None,
            title: Some("I-Ching Divination AI".to_string()),
        }
    }
}

// The credential must never reach logs.
impl std::fmt::Debug for ChatCompletionsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout", &self.timeout)
            .field("referer", &self.referer)
            .field("title", &self.title)
            .finish()
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    /// Some gateways report failures inside a 200 body.
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// OpenAI-compatible chat-completions provider.
pub struct ChatCompletionsProvider {
    config: ChatCompletionsConfig,
    http: reqwest::Client,
}

impl ChatCompletionsProvider {
    /// Builds a provider with its own connection pool.
    ///
    /// # Errors
    ///
    /// [`LlmError::MissingCredential`] if the key is blank, or
    /// [`LlmError::ClientBuild`] if the HTTP client cannot be created.
    pub fn new(config: ChatCompletionsConfig) -> Result<Self, LlmError> {
        if config.api_key.trim().is_empty() {
            return Err(LlmError::MissingCredential);
        }
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http })
    }

    /// The configuration in use.
    pub fn config(&self) -> &ChatCompletionsConfig {
        &self.config
    }

    fn transport_error(&self, err: &reqwest::Error) -> UpstreamError {
        let message = if err.is_timeout() {
            format!("request timed out after {}s", self.config.timeout.as_secs_f32())
        } else if err.is_connect() {
            format!("could not connect to {}: {err}", self.config.endpoint)
        } else {
            err.to_string()
        };
        UpstreamError::Transport { message }
    }
}

#[async_trait]
impl LlmProvider for ChatCompletionsProvider {
    #[tracing::instrument(skip_all, fields(model = %self.config.model, messages = prompt.messages.len()))]
    async fn complete(&self, prompt: &PromptPayload) -> Result<String, UpstreamError> {
        let body = ChatRequest {
            model: &self.config.model,
            messages: &prompt.messages,
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let mut request = self
            .http
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&body);
        if let Some(referer) = &self.config.referer {
            request = request.header("HTTP-Referer", referer);
        }
        if let Some(title) = &self.config.title {
            request = request.header("X-Title", title);
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| self.transport_error(&e))?;
        let status = response.status();
        let retry_after_secs = retry_after(response.headers());
        let text = response.text().await.map_err(|e| self.transport_error(&e))?;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        if !status.is_success() {
            let message = serde_json::from_str::<Value>(&text)
                .ok()
                .and_then(|v| error_message(&v))
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            warn!(status = status.as_u16(), elapsed_ms, %message, "upstream rejected request");
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                message,
                retry_after_secs,
            });
        }

        let parsed: ChatResponse =
            serde_json::from_str(&text).map_err(|e| UpstreamError::MalformedBody {
                message: e.to_string(),
            })?;

        if let Some(error) = parsed.error.as_ref().filter(|_| parsed.choices.is_empty()) {
            let status = error
                .get("code")
                .and_then(Value::as_u64)
                .and_then(|c| u16::try_from(c).ok())
                .filter(|c| (400..600).contains(c))
                .unwrap_or(502);
            let message = error_message(&serde_json::json!({ "error": error }))
                .unwrap_or_else(|| "upstream reported an error".to_string());
            warn!(status, elapsed_ms, %message, "upstream reported an error in a success body");
            return Err(UpstreamError::Rejected {
                status,
                message,
                retry_after_secs,
            });
        }

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .and_then(|message| message.content)
            .ok_or(UpstreamError::MissingContent)?;

        debug!(elapsed_ms, content_len = content.len(), "upstream completion received");
        Ok(content)
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Seconds from a delta-seconds `Retry-After` header.
fn retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Pulls a message out of `{"error": {"message": ...}}` or `{"error": "..."}`.
fn error_message(body: &Value) -> Option<String> {
    match body.get("error")? {
        Value::String(message) => Some(message.clone()),
        Value::Object(error) => error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    }
}
