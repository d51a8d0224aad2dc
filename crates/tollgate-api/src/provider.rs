//! Anthropic Messages API provider implementation.

use crate::client::ApiClient;
use crate::retry::RetryConfig;
use std::future::Future;
use std::pin::Pin;
use tollgate_types::{ApiError, CompletionRequest, CompletionResponse, Provider};

/// Anthropic Messages API provider.
///
/// Wraps `ApiClient` and implements the `Provider` trait. Retry logic stays
/// in `ApiClient`; the prompt hook's own timeout bounds the whole exchange.
#[derive(Clone)]
pub struct AnthropicProvider {
    client: ApiClient,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ApiError> {
        Ok(Self {
            client: ApiClient::new(api_key, base_url)?,
        })
    }

    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.client = self.client.with_retry_config(config);
        self
    }
}

impl Provider for AnthropicProvider {
    fn complete<'a>(
        &'a self,
        request: &'a CompletionRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CompletionResponse, ApiError>> + Send + 'a>> {
        Box::pin(self.client.complete(request))
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}
