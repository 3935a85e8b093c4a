use std::net::SocketAddr;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use divination::{ResponseShapeError, UpstreamError, ValidationError};
use serde::Serialize;
use thiserror::Error;

/// Hint returned with a 401 so an operator knows what to fix.
pub const CREDENTIAL_SUGGESTION: &str =
    "Check the upstream API key configured on the server (OPENROUTER_API_KEY by default) and restart it.";

/// Everything a request handler can fail with, mapped onto HTTP in
/// [`IntoResponse`].
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("too many requests: retry after {retry_after_secs}s")]
    RateLimited {
        retry_after_secs: u64,
        max_requests: usize,
        window_secs: u64,
    },

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error(transparent)]
    ResponseShape(#[from] ResponseShapeError),
}

/// JSON error body: `{ error, details, suggestion?, retryAfter?, raw? }`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub error: String,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

impl ErrorBody {
    fn new(error: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            details: details.into(),
            suggestion: None,
            retry_after: None,
            raw: None,
        }
    }
}

impl ApiError {
    /// Status code this error is reported with.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(UpstreamError::Rejected { status, .. }) => StatusCode::from_u16(*status)
                .ok()
                .filter(|s| s.is_client_error() || s.is_server_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            ApiError::Upstream(_) | ApiError::ResponseShape(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            ApiError::RateLimited {
                retry_after_secs,
                max_requests,
                window_secs,
            } => ErrorBody {
                retry_after: Some(*retry_after_secs),
                ..ErrorBody::new(
                    "Too many requests",
                    format!("Each client may send at most {max_requests} requests every {window_secs} seconds."),
                )
            },
            ApiError::Validation(e) => ErrorBody::new("Invalid request parameters", e.to_string()),
            ApiError::Upstream(e) if e.is_credential_rejected() => {
                let details = match e {
                    UpstreamError::Rejected { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                ErrorBody {
                    suggestion: Some(CREDENTIAL_SUGGESTION.to_string()),
                    ..ErrorBody::new("Upstream API key is invalid or expired", details)
                }
            }
            ApiError::Upstream(UpstreamError::Rejected {
                status,
                message,
                retry_after_secs,
            }) => ErrorBody {
                retry_after: if *status == 429 { *retry_after_secs } else { None },
                ..ErrorBody::new("Upstream LLM call failed", message.clone())
            },
            ApiError::Upstream(e @ UpstreamError::Transport { .. }) => {
                ErrorBody::new("Upstream LLM is unreachable", e.to_string())
            }
            ApiError::Upstream(e) => ErrorBody::new("Upstream LLM returned an unusable response", e.to_string()),
            ApiError::ResponseShape(e) => ErrorBody {
                raw: Some(e.raw().to_string()),
                ..ErrorBody::new("Failed to parse the model response", e.to_string())
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.body();
        let retry_after = body.retry_after;

        let mut response = (status, Json(body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

/// Failures starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server terminated: {0}")]
    Serve(#[source] std::io::Error),
}
