//! Text-completion services used by the translator.
//!
//! The completion service is opaque: a prompt goes in, free-form text comes
//! out. `openai` talks to any OpenAI-compatible chat-completions endpoint.

use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

pub mod openai;

#[cfg(test)]
pub mod mock;

/// Errors raised while talking to a completion service
#[derive(Error, Debug)]
pub enum ProviderError {
    /// The request never produced a response (DNS, TLS, timeout...)
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// The service answered with a non-success status
    #[error("API responded with error: {status_code} - {message}")]
    ApiError { status_code: u16, message: String },

    /// The response body was not the expected shape
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// A successful response with no text in it
    #[error("API returned no completion text")]
    EmptyCompletion,
}

/// A service that completes a single prompt.
#[async_trait]
pub trait CompletionProvider: Send + Sync + Debug {
    /// Request one completion for `prompt` at the given sampling temperature.
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, ProviderError>;

    /// Short name for logs.
    fn name(&self) -> &str;
}
