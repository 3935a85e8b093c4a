//! Core interpretation domain for the I-Ching divination service.
//!
//! This crate contains every domain concept, newtype identifier, value type,
//! and cross-cutting error type used by the interpretation pipeline. The
//! infrastructure crates (`llm`, `server`, `client`) implement or consume the
//! traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate performs no network I/O.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ClientId`, `RequestId`) |
//! | [`types`] | Value types (`HexagramResult`, `InterpretationRequest`, `InterpretationResult`, `Timestamp`, etc.) |
//! | [`errors`] | Error taxonomy and retry-policy types |
//! | [`hexagram`] | Number-casting of a hexagram and its changing line |
//! | [`prompt`] | Deterministic prompt rendering for both response formats |
//! | [`parser`] | Conversion of raw model text into an [`InterpretationResult`] |
//! | [`rate_limit`] | Bounded sliding-window limiter keyed by [`ClientId`] |
//! | [`provider`] | The [`LlmProvider`] port implemented by the `llm` crate |

pub mod errors;
pub mod hexagram;
pub mod identifiers;
pub mod parser;
pub mod prompt;
pub mod provider;
pub mod rate_limit;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{ResponseShapeError, RetryPolicy, UpstreamError, ValidationError};
pub use hexagram::compute_hexagram;
pub use identifiers::{ClientId, RequestId};
pub use parser::{parse_response, parse_sections, FALLBACK_SECTION_TITLE};
pub use prompt::{render, ChatMessage, ChatRole, PromptPayload};
pub use provider::LlmProvider;
pub use rate_limit::{RateDecision, RateLimitSettings, SlidingWindowLimiter};
pub use types::{
    DivinationData, HexagramAnalysis, HexagramOverview, HexagramResult, InterpretationRequest,
    InterpretationResult, LineIndex, ProblemAnalysis, QuestionBackground, ResponseFormat, Section,
    StructuredInterpretation, Timestamp,
};
