//! Provider trait for LLM API providers.

use crate::{ApiError, CompletionRequest, CompletionResponse};
use std::future::Future;
use std::pin::Pin;

/// Trait for LLM API providers (Anthropic, OpenAI, etc.).
///
/// Prompt hooks see a provider only as "send messages, get text back".
/// Dyn-compatible so runners work with `Arc<dyn Provider>`.
pub trait Provider: Send + Sync {
    /// Send a completion request and wait for the full response text.
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, ApiError>> + Send + 'a>>;

    /// Provider name for logging/display (e.g., "anthropic").
    fn name(&self) -> &str;
}
