//! Anthropic Messages API provider for Tollgate prompt hooks.

mod client;
mod provider;
mod retry;

pub use client::ApiClient;
pub use provider::AnthropicProvider;
pub use retry::RetryConfig;
