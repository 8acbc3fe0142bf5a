//! Completion backend implementations

pub mod openai;

use crate::{ChatRequest, CompletionEventStream, Error, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// A streaming chat completion backend.
///
/// Implementations must stop producing events promptly once `cancel`
/// fires; dropping the returned stream closes the underlying request.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Submit a request and stream back incremental events
    async fn stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionEventStream>;
}

/// Get an API key from a provided value or from the first set environment variable
pub fn get_api_key(provided: Option<&str>, env_vars: &[&str]) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    env_vars
        .iter()
        .find_map(|var| std::env::var(var).ok().filter(|v| !v.is_empty()))
        .ok_or(Error::InvalidApiKey)
}
