//! parley-ai: Streaming chat completion backend abstraction
//!
//! This crate defines the chat message and request types, the incremental
//! completion event stream, and an OpenAI-compatible streaming backend.

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use providers::CompletionBackend;
pub use stream::{ChunkAccumulator, CompletionEvent, CompletionEventStream};
pub use types::*;
