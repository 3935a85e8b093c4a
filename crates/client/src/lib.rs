//! Interpretation client adapter.
//!
//! Calls the interpretation server's `POST /api/v1/get-interpretation` and
//! owns the whole retry budget: the server makes exactly one upstream call
//! per request, so every retry decision in the system is taken here.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, status classification, backoff and
//! result normalisation live here. Request validation and the result types
//! come from the [`divination`] crate.
//!
//! ## Classification
//!
//! | Server answer | [`ClientError`] | Retried |
//! |---------------|-----------------|---------|
//! | 400 with a JSON error body | `Validation` | no |
//! | 401 | `CredentialInvalid` | no |
//! | 429 | `RateLimited` (carries `retryAfter`) | no |
//! | 5xx with a JSON error body | `Server` | yes |
//! | connection failure / timeout | `Transport` | yes |
//! | any other status, or an unparseable error body | `UnexpectedStatus` | yes |
//!
//! Attempt *k* (1-based) that fails retryably is followed by a wait of
//! `base_delay * 2^(k-1)`. After `max_retries` retries the last error is
//! returned unchanged.

mod error;
mod interpretation;

pub use error::ClientError;
pub use interpretation::{InterpretationClient, RetryOptions, DEFAULT_RATE_LIMIT_WAIT_SECS, INTERPRETATION_PATH};
