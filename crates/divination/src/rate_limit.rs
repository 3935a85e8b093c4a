//! Bounded sliding-window rate limiter keyed by [`ClientId`].
//!
//! Each client has a list of the timestamps of its accepted requests. A check
//! first drops timestamps that have left the window, then rejects the request
//! if the client already has `max_requests` inside it. The reset time reported
//! on rejection is derived from the oldest retained timestamp, which makes
//! this a rolling window rather than fixed buckets.
//!
//! Memory is bounded two ways: the per-client records live in an LRU capped at
//! `max_clients` (the least recently active client is evicted first), and
//! [`SlidingWindowLimiter::sweep`] drops clients with no request inside the
//! window. State is per process; separate instances do not share counts.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::identifiers::ClientId;
use crate::types::Timestamp;

/// Tunables for [`SlidingWindowLimiter`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Width of the rolling window.
    pub window: Duration,
    /// Requests allowed per client inside one window.
    pub max_requests: usize,
    /// Number of distinct clients tracked before the least recently active
    /// one is evicted.
    pub max_clients: NonZeroUsize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(60),
            max_requests: 5,
            max_clients: NonZeroUsize::new(10_000).unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Outcome of [`SlidingWindowLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request was recorded and may proceed.
    Allowed {
        /// Requests the client may still make inside the current window.
        remaining: usize,
    },
    /// The client is over its quota. Nothing was recorded.
    Limited {
        /// Whole seconds until the oldest retained request leaves the window.
        /// Always at least 1.
        retry_after_secs: u64,
    },
}

impl RateDecision {
    /// Returns `true` for [`RateDecision::Allowed`].
    pub fn is_allowed(self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Per-client sliding-window limiter, safe to share between tasks.
pub struct SlidingWindowLimiter {
    settings: RateLimitSettings,
    clients: Mutex<LruCache<ClientId, VecDeque<Timestamp>>>,
}

impl SlidingWindowLimiter {
    /// Creates an empty limiter.
    pub fn new(settings: RateLimitSettings) -> Self {
        let clients = Mutex::new(LruCache::new(settings.max_clients));
        Self { settings, clients }
    }

    /// Returns the settings this limiter was built with.
    pub fn settings(&self) -> &RateLimitSettings {
        &self.settings
    }

    fn window_millis(&self) -> i64 {
        i64::try_from(self.settings.window.as_millis()).unwrap_or(i64::MAX)
    }

    /// Records a request from `client` at `now` if it is within quota.
    pub fn check(&self, client: &ClientId, now: Timestamp) -> RateDecision {
        let window_ms = self.window_millis();
        let max = self.settings.max_requests;
        let mut clients = self.clients.lock();

        let Some(history) = clients.get_mut(client) else {
            if max == 0 {
                return RateDecision::Limited {
                    retry_after_secs: ceil_secs(window_ms),
                };
            }
            clients.put(client.clone(), VecDeque::from([now]));
            return RateDecision::Allowed { remaining: max - 1 };
        };

        history.retain(|&t| now.millis_since(t) < window_ms);

        if history.len() >= max {
            let retry_after_secs = match history.iter().min() {
                Some(&oldest) => ceil_secs(window_ms - now.millis_since(oldest)),
                None => ceil_secs(window_ms),
            };
            return RateDecision::Limited { retry_after_secs };
        }

        history.push_back(now);
        RateDecision::Allowed {
            remaining: max - history.len(),
        }
    }

    /// Drops every client with no request inside the window ending at `now`.
    ///
    /// Returns the number of clients removed.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let window_ms = self.window_millis();
        let mut clients = self.clients.lock();

        let idle: Vec<ClientId> = clients
            .iter()
            .filter(|(_, history)| history.iter().all(|&t| now.millis_since(t) >= window_ms))
            .map(|(client, _)| client.clone())
            .collect();

        for client in &idle {
            clients.pop(client);
        }
        if !idle.is_empty() {
            tracing::debug!(removed = idle.len(), remaining = clients.len(), "swept idle rate-limit records");
        }
        idle.len()
    }

    /// Number of clients currently tracked.
    pub fn tracked_clients(&self) -> usize {
        self.clients.lock().len()
    }
}

/// Rounds a positive millisecond span up to whole seconds (minimum 1).
fn ceil_secs(millis: i64) -> u64 {
    let secs = (millis.max(1) + 999) / 1000;
    u64::try_from(secs).unwrap_or(1)
}
