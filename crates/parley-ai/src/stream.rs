//! Streaming event types and utilities

use crate::types::Usage;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted during completion streaming
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CompletionEvent {
    /// Incremental assistant text
    Delta { text: String },
    /// The assistant text block ended
    ContentFinished,
    /// A refusal block ended
    RefusalFinished { refusal: String },
    /// A tool call finished streaming its arguments
    ToolCallFinished { name: String, arguments: String },
    /// Token usage totals
    Usage(Usage),
    /// Stream completed successfully
    Done,
    /// Error occurred
    Error { message: String },
}

impl CompletionEvent {
    /// Check if this is a completion marker rather than renderable output
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            CompletionEvent::ContentFinished
                | CompletionEvent::RefusalFinished { .. }
                | CompletionEvent::ToolCallFinished { .. }
        )
    }
}

/// A stream of completion events
pub type CompletionEventStream = Pin<Box<dyn Stream<Item = CompletionEvent> + Send>>;

/// One provider chunk, normalized
#[derive(Debug, Clone, Default)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub refusal: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
}

/// Partial tool call data carried by one chunk
#[derive(Debug, Clone, Default)]
pub struct ToolCallDelta {
    pub index: u32,
    pub name: Option<String>,
    pub arguments: Option<String>,
}

#[derive(Debug, Default)]
enum Phase {
    #[default]
    Idle,
    Content,
    Refusal(String),
    ToolCall {
        index: u32,
        name: String,
        arguments: String,
    },
}

/// Accumulates provider chunks and reports when a content block,
/// refusal, or tool call has just finished.
#[derive(Debug, Default)]
pub struct ChunkAccumulator {
    phase: Phase,
}

impl ChunkAccumulator {
    /// Create a new accumulator
    pub fn new() -> Self {
        Self::default()
    }

    /// Process one chunk, returning the events it produced in order
    pub fn process(&mut self, delta: &StreamDelta) -> Vec<CompletionEvent> {
        let mut events = Vec::new();

        if let Some(text) = delta.content.as_deref().filter(|t| !t.is_empty()) {
            if !matches!(self.phase, Phase::Content) {
                self.close(&mut events);
                self.phase = Phase::Content;
            }
            events.push(CompletionEvent::Delta {
                text: text.to_string(),
            });
        }

        if let Some(refusal) = delta.refusal.as_deref().filter(|r| !r.is_empty()) {
            if !matches!(self.phase, Phase::Refusal(_)) {
                self.close(&mut events);
                self.phase = Phase::Refusal(String::new());
            }
            if let Phase::Refusal(ref mut buf) = self.phase {
                buf.push_str(refusal);
            }
        }

        for tc in &delta.tool_calls {
            let same_call = matches!(self.phase, Phase::ToolCall { index, .. } if index == tc.index);
            if !same_call {
                self.close(&mut events);
                self.phase = Phase::ToolCall {
                    index: tc.index,
                    name: String::new(),
                    arguments: String::new(),
                };
            }
            if let Phase::ToolCall {
                ref mut name,
                ref mut arguments,
                ..
            } = self.phase
            {
                if let Some(ref n) = tc.name {
                    name.push_str(n);
                }
                if let Some(ref args) = tc.arguments {
                    arguments.push_str(args);
                }
            }
        }

        if delta.finish_reason.is_some() {
            self.close(&mut events);
        }

        events
    }

    /// Close whatever block is still open at end of stream
    pub fn finish(&mut self) -> Vec<CompletionEvent> {
        let mut events = Vec::new();
        self.close(&mut events);
        events
    }

    fn close(&mut self, events: &mut Vec<CompletionEvent>) {
        match std::mem::take(&mut self.phase) {
            Phase::Idle => {}
            Phase::Content => events.push(CompletionEvent::ContentFinished),
            Phase::Refusal(refusal) => events.push(CompletionEvent::RefusalFinished { refusal }),
            Phase::ToolCall {
                name, arguments, ..
            } => events.push(CompletionEvent::ToolCallFinished { name, arguments }),
        }
    }
}
