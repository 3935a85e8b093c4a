//! Upstream LLM provider infrastructure adapter.
//!
//! Implements the [`divination::LlmProvider`] trait for any OpenAI-compatible
//! chat-completions endpoint (OpenRouter by default). Other providers are
//! added as new implementations in this crate without any changes to the
//! `divination` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, bearer authentication, request
//! formatting, the request timeout, and extraction of the first completion's
//! message content live here. The [`divination`] crate sees only
//! [`divination::LlmProvider`] and [`divination::UpstreamError`].
//!
//! A provider makes exactly one upstream request per
//! [`complete`](divination::LlmProvider::complete) call. It never retries.

mod chat_completions;

pub use chat_completions::{ChatCompletionsConfig, ChatCompletionsProvider, LlmError, OPENROUTER_ENDPOINT};
