use std::time::Duration;

use divination::{HexagramResult, InterpretationRequest, InterpretationResult};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// Route the client posts to, relative to the base URL.
pub const INTERPRETATION_PATH: &str = "/api/v1/get-interpretation";

/// Wait reported for a 429 that carries neither a `retryAfter` field nor a
/// `Retry-After` header. Matches the server's window width.
pub const DEFAULT_RATE_LIMIT_WAIT_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Retry options
// ---------------------------------------------------------------------------

/// Retry budget for one [`InterpretationClient::get_interpretation`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Retries after the first attempt. Total attempts are `max_retries + 1`.
    pub max_retries: u32,
    /// Wait after the first failed attempt; doubled after each further one.
    pub base_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryOptions {
    /// Wait after failed attempt `attempt` (1-based): `base_delay * 2^(attempt-1)`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The server's JSON error body. `error` is required so that arbitrary JSON
/// objects are not mistaken for it.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: String,
    suggestion: Option<String>,
    retry_after: Option<u64>,
    raw: Option<String>,
}

/// HTTP client for the interpretation server.
#[derive(Debug, Clone)]
pub struct InterpretationClient {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl InterpretationClient {
    /// Builds a client for the server at `base_url` (e.g. `http://127.0.0.1:8080`).
    ///
    /// `timeout` bounds each attempt, not the whole call.
    ///
    /// # Errors
    ///
    /// [`ClientError::Transport`] if the HTTP client cannot be created.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Transport {
                message: format!("failed to build HTTP client: {e}"),
            })?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            base_url,
            timeout,
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Asks the server to interpret `hexagram` for `question`.
    ///
    /// Invalid input fails before any request is sent. Otherwise attempts run
    /// strictly one after another; a retryable failure is followed by the
    /// backoff from [`RetryOptions::delay_after`], and once the budget is spent
    /// the last failure is returned as is.
    ///
    /// # Errors
    ///
    /// The terminal [`ClientError`]; see the crate docs for the classification.
    #[tracing::instrument(
        skip_all,
        fields(
            gua = %hexagram.hexagram_name,
            yao = hexagram.line_index.get(),
            max_retries = options.max_retries,
        )
    )]
    pub async fn get_interpretation(
        &self,
        question: &str,
        hexagram: &HexagramResult,
        options: &RetryOptions,
    ) -> Result<InterpretationResult, ClientError> {
        let request = InterpretationRequest::new(question, hexagram)?;
        let url = format!("{}{INTERPRETATION_PATH}", self.base_url);
        let total_attempts = options.max_retries.saturating_add(1);

        let mut attempt = 1;
        loop {
            match self.attempt(&url, &request).await {
                Ok(result) => {
                    info!(attempt, "interpretation received");
                    return Ok(result);
                }
                Err(err) if err.retry_policy().is_retryable() && attempt < total_attempts => {
                    let delay = options.delay_after(attempt);
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "interpretation attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    warn!(attempt, error = %err, "interpretation failed");
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, url: &str, request: &InterpretationRequest) -> Result<InterpretationResult, ClientError> {
        let response = self
            .http
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;
        let status = response.status();
        let header_retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        let text = response.text().await.map_err(|e| self.transport_error(&e))?;

        if status.is_success() {
            return Ok(normalise(&text));
        }
        Err(classify(status, header_retry_after, text))
    }

    fn transport_error(&self, err: &reqwest::Error) -> ClientError {
        let message = if err.is_timeout() {
            format!("request timed out after {}s", self.timeout.as_secs_f32())
        } else if err.is_connect() {
            format!("could not connect to {}: {err}", self.base_url)
        } else {
            err.to_string()
        };
        ClientError::Transport { message }
    }
}

/// Maps a 2xx body onto an [`InterpretationResult`], keeping unrecognised
/// bodies verbatim.
fn normalise(text: &str) -> InterpretationResult {
    serde_json::from_str(text).unwrap_or_else(|e| {
        debug!(error = %e, len = text.len(), "response body has no known shape, keeping raw text");
        InterpretationResult::Raw(text.to_string())
    })
}

fn classify(status: StatusCode, header_retry_after: Option<u64>, text: String) -> ClientError {
    let body = serde_json::from_str::<ErrorBody>(&text).ok();

    match (status, body) {
        (StatusCode::BAD_REQUEST, Some(body)) => ClientError::Validation { details: body.details },
        (StatusCode::UNAUTHORIZED, Some(body)) => ClientError::CredentialInvalid {
            details: body.details,
            suggestion: body.suggestion,
        },
        (StatusCode::UNAUTHORIZED, None) => ClientError::CredentialInvalid {
            details: text,
            suggestion: None,
        },
        (StatusCode::TOO_MANY_REQUESTS, body) => {
            let (retry_after, details) = match body {
                Some(body) => (body.retry_after, body.details),
                None => (None, text),
            };
            ClientError::RateLimited {
                retry_after_secs: retry_after
                    .or(header_retry_after)
                    .unwrap_or(DEFAULT_RATE_LIMIT_WAIT_SECS),
                details,
            }
        }
        (status, Some(body)) if status.is_server_error() => ClientError::Server {
            status: status.as_u16(),
            error: body.error,
            details: body.details,
            raw: body.raw,
        },
        (status, _) => ClientError::UnexpectedStatus {
            status: status.as_u16(),
            body: text,
        },
    }
}
