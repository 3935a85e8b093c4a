//! Port trait for the upstream LLM endpoint.
//!
//! The `llm` crate supplies the HTTP implementation; tests supply fakes.

use async_trait::async_trait;

use crate::errors::UpstreamError;
use crate::prompt::PromptPayload;

/// A chat-completions capable model behind some transport.
///
/// One call is one upstream request. Implementations must not retry: retry
/// policy is owned by the interpretation client.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Sends `prompt` and returns the text of the first completion choice.
    ///
    /// # Errors
    ///
    /// An [`UpstreamError`] describing why no message content was obtained.
    async fn complete(&self, prompt: &PromptPayload) -> Result<String, UpstreamError>;

    /// Model identifier sent upstream, for logging.
    fn model(&self) -> &str;
}
