use std::time::Duration;

use divination::{RetryPolicy, ValidationError};
use thiserror::Error;

/// Outcome of a failed interpretation call, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The request was rejected as malformed, locally or by the server (400).
    #[error("invalid request: {details}")]
    Validation { details: String },

    /// The server's per-client limit was hit (429).
    #[error("rate limited by the interpretation server; retry after {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
        details: String,
    },

    /// The server's upstream credential was refused (401).
    #[error("interpretation server credential rejected: {details}")]
    CredentialInvalid {
        details: String,
        suggestion: Option<String>,
    },

    /// The server answered 5xx with a structured error body.
    #[error("interpretation server error (HTTP {status}): {error}: {details}")]
    Server {
        status: u16,
        error: String,
        details: String,
        /// Model text that failed to parse, when the server attached it.
        raw: Option<String>,
    },

    /// No HTTP response was obtained.
    #[error("could not reach the interpretation server: {message}")]
    Transport { message: String },

    /// Any other status, or an error body that was not the server's JSON shape.
    #[error("unexpected response from the interpretation server (HTTP {status}): {body}")]
    UnexpectedStatus { status: u16, body: String },
}

impl From<ValidationError> for ClientError {
    fn from(err: ValidationError) -> Self {
        ClientError::Validation {
            details: err.to_string(),
        }
    }
}

impl ClientError {
    /// Retry decision within a single `get_interpretation` call.
    ///
    /// A rate-limit rejection is `NonRetryable` here even though it clears by
    /// itself: the caller waits [`ClientError::retry_after`] and re-invokes.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            ClientError::Validation { .. }
            | ClientError::RateLimited { .. }
            | ClientError::CredentialInvalid { .. } => RetryPolicy::NonRetryable,
            ClientError::Server { .. } | ClientError::Transport { .. } | ClientError::UnexpectedStatus { .. } => {
                RetryPolicy::Retryable { after: None }
            }
        }
    }

    /// How long the server asked the caller to wait, for rate-limit rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ClientError::RateLimited { retry_after_secs, .. } => Some(Duration::from_secs(*retry_after_secs)),
            _ => None,
        }
    }

    /// Human-readable hint on what to do about this error.
    pub fn remediation(&self) -> String {
        match self {
            ClientError::Validation { .. } => {
                "Enter a non-empty question and cast a hexagram before asking for an interpretation.".to_string()
            }
            ClientError::RateLimited { retry_after_secs, .. } => {
                format!("Too many requests. Wait {retry_after_secs} seconds and try again.")
            }
            ClientError::CredentialInvalid { suggestion, .. } => suggestion.clone().unwrap_or_else(|| {
                "The server's upstream API key is missing, invalid or expired. \
                 Ask the operator to configure a valid key and restart the server."
                    .to_string()
            }),
            ClientError::Server { raw: Some(_), .. } => {
                "The model answered in an unexpected format. Try again; the raw answer is attached.".to_string()
            }
            ClientError::Server { .. } => {
                "The interpretation service failed. Try again in a moment.".to_string()
            }
            ClientError::Transport { .. } => {
                "Check that the interpretation server is running and that the configured base URL is correct."
                    .to_string()
            }
            ClientError::UnexpectedStatus { .. } => {
                "The interpretation server returned an unexpected response. Try again later.".to_string()
            }
        }
    }
}
