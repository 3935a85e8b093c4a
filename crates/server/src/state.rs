use std::sync::Arc;

use divination::{LlmProvider, ResponseFormat, SlidingWindowLimiter};

/// Shared, cheaply clonable handler state.
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<dyn LlmProvider>,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub format: ResponseFormat,
    pub trust_forwarded_for: bool,
}

impl AppState {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        limiter: Arc<SlidingWindowLimiter>,
        format: ResponseFormat,
    ) -> Self {
        Self {
            provider,
            limiter,
            format,
            trust_forwarded_for: false,
        }
    }

    /// Whether `X-Forwarded-For` identifies the client (default `false`).
    ///
    /// Enable only behind a proxy that overwrites the header.
    pub fn trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}
