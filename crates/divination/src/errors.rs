//! Error taxonomy and retry-policy types for the interpretation domain.
//!
//! The taxonomy separates failures by who can fix them:
//!
//! - [`ValidationError`]: malformed caller input. Never retried.
//! - [`UpstreamError`]: the upstream LLM endpoint failed or answered with
//!   something unusable. Some variants are transient, one (a rejected
//!   credential) needs operator intervention.
//! - [`ResponseShapeError`]: the model answered, but its text did not match
//!   the requested output contract. Carries the raw text so callers can
//!   degrade gracefully.
//!
//! Rate limiting is reported as a [`crate::RateDecision`] rather than an error;
//! the server turns it into a 429 response.
//!
//! None of these decide retries. The server reports them once as an HTTP
//! status, and the interpretation client, which owns the retry budget,
//! classifies what it receives into a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Produced by the retry owner (the interpretation client) for each failed
/// attempt.
///
/// ## Rules
///
/// - `Retryable` errors: network failures, timeouts, 5xx responses,
///   unparseable bodies, model output that missed the format.
/// - `NonRetryable` errors: invalid input, rejected credentials, rate-limit
///   rejections seen by the client (the caller waits and re-invokes manually).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried within the current invocation.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, RetryPolicy::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Caller input
// ---------------------------------------------------------------------------

/// The inbound interpretation request was malformed.
///
/// Produced by [`crate::InterpretationRequest::from_json`]. Variants are listed
/// in the order the checks run: the question is validated before the
/// divination payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// The request body was not a JSON document.
    #[error("request body is not valid JSON: {reason}")]
    BodyNotJson {
        /// Parser diagnostic.
        reason: String,
    },

    /// `question` was missing, not a string, or blank after trimming.
    #[error("question must be a non-empty string")]
    MissingQuestion,

    /// `divinationData` was missing or not an object.
    #[error("divinationData must be an object")]
    MissingDivinationData,

    /// `divinationData.guaName` was missing, not a string, or empty.
    #[error("divinationData.guaName must be a non-empty string")]
    MissingHexagramName,

    /// `divinationData.yaoIndex` was missing, not an integer, or outside `1..=6`.
    #[error("divinationData.yaoIndex must be an integer between 1 and 6, got {found}")]
    LineIndexOutOfRange {
        /// The offending value rendered as JSON (or `"missing"`).
        found: String,
    },

    /// `divinationData.yaoText` was present but not a string.
    #[error("divinationData.yaoText must be a string when present")]
    InvalidLineText,
}

// ---------------------------------------------------------------------------
// Upstream LLM endpoint
// ---------------------------------------------------------------------------

/// The upstream chat-completions call did not yield message content.
///
/// Produced by [`crate::LlmProvider`] implementations. The server maps each
/// variant onto a response status; it never retries the upstream itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// The upstream answered with a non-2xx status.
    #[error("upstream rejected the request with HTTP {status}: {message}")]
    Rejected {
        /// HTTP status returned by the upstream.
        status: u16,
        /// The upstream's own error message, or `HTTP <status>` if it sent none.
        message: String,
        /// Seconds from the upstream `Retry-After` header, if present.
        retry_after_secs: Option<u64>,
    },

    /// The request never produced a response (connect failure, timeout, TLS).
    #[error("upstream transport failure: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// The upstream answered 2xx but the body was not valid JSON.
    #[error("upstream response body is not valid JSON: {message}")]
    MalformedBody {
        /// Parser diagnostic.
        message: String,
    },

    /// The upstream JSON carried no `choices[0].message.content`.
    #[error("upstream response contained no message content")]
    MissingContent,
}

impl UpstreamError {
    /// Returns `true` if the upstream rejected the configured credential.
    pub fn is_credential_rejected(&self) -> bool {
        matches!(self, UpstreamError::Rejected { status: 401, .. })
    }
}

// ---------------------------------------------------------------------------
// Model output
// ---------------------------------------------------------------------------

/// The model's message content did not match the requested output contract.
///
/// Every variant keeps the raw model text so the caller can fall back to
/// displaying it unparsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResponseShapeError {
    /// The model returned an empty (or whitespace-only) message.
    #[error("model returned an empty message")]
    Empty,

    /// The content is not syntactically valid JSON.
    #[error("model output is not valid JSON: {reason}")]
    NotJson {
        /// Parser diagnostic.
        reason: String,
        /// The unparsed model text.
        raw: String,
    },

    /// The content is JSON but does not have the required keys or types.
    #[error("model output does not match the interpretation schema: {reason}")]
    SchemaMismatch {
        /// Deserialiser diagnostic (names the missing or mistyped key).
        reason: String,
        /// The unparsed model text.
        raw: String,
    },
}

impl ResponseShapeError {
    /// Returns the raw model text that failed to parse.
    pub fn raw(&self) -> &str {
        match self {
            ResponseShapeError::Empty => "",
            ResponseShapeError::NotJson { raw, .. } | ResponseShapeError::SchemaMismatch { raw, .. } => {
                raw
            }
        }
    }
}
