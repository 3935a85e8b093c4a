//! Interpretation server.
//!
//! The trusted intermediary that holds the upstream credential. For every
//! `POST /api/v1/get-interpretation` it:
//!
//! 1. checks the caller against the per-client sliding-window limiter (429),
//! 2. validates the question and divination payload (400),
//! 3. renders the prompt for the configured [`divination::ResponseFormat`],
//! 4. makes one upstream call through [`divination::LlmProvider`] (status
//!    mirrored, 401 augmented with a credential hint, transport failures 500),
//! 5. parses the model text into an [`divination::InterpretationResult`] (500
//!    with the raw text attached on mismatch).
//!
//! The server never retries the upstream itself and keeps no session state;
//! the only mutable shared state is the rate limiter.
//!
//! ## Routes
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | `POST` | `/api/v1/get-interpretation` | [`handlers::get_interpretation`] |
//! | `POST` | `/api/get-interpretation` | alias of the v1 route |
//! | `GET`  | `/api/health` | [`handlers::health`] |
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP framing, CORS, client identification and status
//! mapping live here. Domain rules come from the [`divination`] crate.

pub mod error;
pub mod handlers;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use divination::{LlmProvider, RateLimitSettings, ResponseFormat, SlidingWindowLimiter, Timestamp};
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub use error::{ApiError, ServerError};
pub use routes::router;
pub use state::AppState;

/// Everything the server needs besides the upstream provider.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Listen address.
    pub addr: SocketAddr,
    /// Origins allowed by CORS. Empty means any origin.
    pub allowed_origins: Vec<String>,
    /// Output contract requested from the model.
    pub response_format: ResponseFormat,
    /// Per-client limiter tunables.
    pub rate_limit: RateLimitSettings,
    /// Use the first `X-Forwarded-For` entry as the client identifier
    /// (default `false`, keying on the peer address).
    ///
    /// Enable only behind a proxy that sets the header; otherwise callers can
    /// pick their own rate-limit key.
    pub trust_forwarded_for: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            allowed_origins: Vec::new(),
            response_format: ResponseFormat::default(),
            rate_limit: RateLimitSettings::default(),
            trust_forwarded_for: false,
        }
    }
}

/// Binds `settings.addr` and serves until Ctrl+C or SIGTERM.
///
/// # Errors
///
/// [`ServerError::Bind`] if the address is unavailable, [`ServerError::Serve`]
/// if the accept loop fails.
pub async fn serve(settings: ServerSettings, provider: Arc<dyn LlmProvider>) -> Result<(), ServerError> {
    let limiter = Arc::new(SlidingWindowLimiter::new(settings.rate_limit.clone()));
    let state = AppState::new(provider.clone(), limiter.clone(), settings.response_format)
        .trust_forwarded_for(settings.trust_forwarded_for);
    let app = router(state, &settings.allowed_origins);

    let listener = TcpListener::bind(settings.addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: settings.addr,
            source,
        })?;

    let sweeper = spawn_sweeper(limiter, settings.rate_limit.window);

    info!(
        addr = %settings.addr,
        model = provider.model(),
        format = %settings.response_format,
        max_requests = settings.rate_limit.max_requests,
        window_secs = settings.rate_limit.window.as_secs(),
        "interpretation server listening"
    );
    info!("  POST /api/v1/get-interpretation");
    info!("  GET  /api/health");

    let result = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    sweeper.abort();
    result.map_err(ServerError::Serve)
}

/// Periodically drops rate-limit records for clients idle for a full window.
pub fn spawn_sweeper(limiter: Arc<SlidingWindowLimiter>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_secs(1)));
        // The first tick completes immediately; there is nothing to sweep yet.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.sweep(Timestamp::now());
            debug!(removed, tracked = limiter.tracked_clients(), "rate-limit sweep");
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, shutting down gracefully");
        },
        _ = terminate => {
            info!("received SIGTERM, shutting down gracefully");
        },
    }
}
