//! parley-session: Conversational event protocol over a duplex connection
//!
//! This crate provides the wire codec, the streamed-content segmenter, the
//! completion orchestrator and the per-connection session protocol that
//! ties them to a conversation state.

pub mod codec;
pub mod conversation;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod protocol;
pub mod render;
pub mod segmenter;
pub mod store;
pub mod stream_handle;

pub use codec::Frame;
pub use conversation::{ConversationState, Exchange};
pub use error::{Error, Result};
pub use events::EventCode;
pub use orchestrator::{CompletionOrchestrator, OrchestratorConfig};
pub use protocol::{ProtocolConfig, SessionProtocol};
pub use render::{MarkdownRenderer, Renderer};
pub use segmenter::{ContentSegmenter, Segment};
pub use store::{InMemorySessionStore, SessionId, SessionStore};
pub use stream_handle::{StreamHandle, TurnStatus};
