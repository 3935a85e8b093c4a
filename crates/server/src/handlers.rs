//! Request handlers.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{Extensions, HeaderMap};
use axum::Json;
use divination::{
    parse_response, render, ClientId, InterpretationRequest, InterpretationResult, RateDecision,
    RequestId, Timestamp, ValidationError,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn, Instrument};

use crate::error::ApiError;
use crate::state::AppState;

/// Upper bound on an interpretation request body.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// `POST /api/v1/get-interpretation`
///
/// Body: `{ "question": string, "divinationData": { "guaName": string, "yaoIndex": 1..=6, "yaoText"?: string } }`.
/// Responds 200 with an [`InterpretationResult`], or an [`ApiError`] body.
pub async fn get_interpretation(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<InterpretationResult>, ApiError> {
    let request_id = RequestId::new_random();
    let client = client_id(request.headers(), request.extensions(), state.trust_forwarded_for);
    let span = tracing::info_span!("get_interpretation", %request_id, %client);

    let outcome = interpret(&state, &client, request).instrument(span.clone()).await;

    span.in_scope(|| match &outcome {
        Ok(_) => info!("interpretation completed"),
        Err(ApiError::RateLimited { retry_after_secs, .. }) => {
            warn!(retry_after_secs, "rate limit exceeded");
        }
        Err(e) if e.status().is_server_error() => {
            error!(status = e.status().as_u16(), error = %e, "interpretation failed");
        }
        Err(e) => warn!(status = e.status().as_u16(), error = %e, "interpretation rejected"),
    });
    outcome.map(Json)
}

async fn interpret(
    state: &AppState,
    client: &ClientId,
    request: Request,
) -> Result<InterpretationResult, ApiError> {
    if let RateDecision::Limited { retry_after_secs } = state.limiter.check(client, Timestamp::now()) {
        let settings = state.limiter.settings();
        return Err(ApiError::RateLimited {
            retry_after_secs,
            max_requests: settings.max_requests,
            window_secs: settings.window.as_secs(),
        });
    }

    let bytes = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|e| ValidationError::BodyNotJson { reason: e.to_string() })?;
    let body: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ValidationError::BodyNotJson { reason: e.to_string() })?;
    let request = InterpretationRequest::from_json(&body)?;

    let data = &request.divination_data;
    info!(
        gua = %data.gua_name,
        yao = data.yao_index.get(),
        format = %state.format,
        model = state.provider.model(),
        "forwarding interpretation request upstream"
    );

    let prompt = render(&request, state.format);
    let content = state.provider.complete(&prompt).await?;
    Ok(parse_response(state.format, &content)?)
}

/// Resolves the rate-limit key for a request.
///
/// Order: first `X-Forwarded-For` entry (when trusted), then the peer
/// address, then [`ClientId::unknown`].
fn client_id(headers: &HeaderMap, extensions: &Extensions, trust_forwarded_for: bool) -> ClientId {
    let forwarded = trust_forwarded_for
        .then(|| headers.get("x-forwarded-for"))
        .flatten()
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .and_then(ClientId::new);

    forwarded
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .and_then(|ConnectInfo(addr)| ClientId::new(addr.ip().to_string()))
        })
        .unwrap_or_else(ClientId::unknown)
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: Timestamp,
    pub version: &'static str,
}

/// `GET /api/health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Timestamp::now(),
        version: env!("CARGO_PKG_VERSION"),
    })
}
