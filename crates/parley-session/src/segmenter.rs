//! Re-segmentation of streamed deltas into renderable units.
//!
//! Prose deltas are buffered and rendered through Markdown in one piece so
//! that constructs split across deltas (lists, code fences, links) render
//! correctly. A delta that looks like a structured tool result flushes the
//! buffer and is rendered on its own inside a collapsible wrapper.
//!
//! Tool detection is a heuristic keyed to how the upstream gateway inlines
//! tool results into the content stream; it is not a JSON parser.

use std::sync::Arc;

use serde::Deserialize;

use crate::render::{Renderer, escape_html};

/// Prefix the gateway emits when it stringifies an untyped struct.
const RAW_STRUCT_MARKER: &str = "undefined: {";
/// Substring of a stringified Go map carrying a tool command.
const MAP_LITERAL_MARKER: &str = "map[command:";

/// A completed renderable unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Buffered prose, with its rendered HTML
    Prose { text: String, html: String },
    /// A structured tool result, already wrapped
    ToolPayload { html: String },
}

impl Segment {
    /// The HTML fragment to send to the client
    pub fn into_html(self) -> String {
        match self {
            Segment::Prose { html, .. } | Segment::ToolPayload { html } => html,
        }
    }
}

/// Classification of a single delta
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaKind {
    Prose,
    ToolCandidate,
}

/// Decide whether a delta starts a structured tool payload
pub fn classify(delta: &str) -> DeltaKind {
    if delta.starts_with('{')
        || delta.starts_with(RAW_STRUCT_MARKER)
        || delta.contains(MAP_LITERAL_MARKER)
    {
        DeltaKind::ToolCandidate
    } else {
        DeltaKind::Prose
    }
}

#[derive(Debug, Default, Deserialize)]
struct ToolEnvelope {
    #[serde(rename = "Content", alias = "content", default)]
    content: Vec<ToolContent>,
}

#[derive(Debug, Default, Deserialize)]
struct ToolContent {
    #[serde(rename = "Text", alias = "text", default)]
    text: String,
}

/// Wrap tool output in the collapsible block the client styles.
fn tool_block(text: &str) -> String {
    format!(
        r#"<details class="chat"><summary class="chat">tool call</summary><div class="chat"><textarea class="chat" id="toolCall" rows="12" cols="128">{}</textarea></div></details>"#,
        escape_html(text)
    )
}

/// Splits a turn's deltas into prose and tool segments, in arrival order.
pub struct ContentSegmenter {
    renderer: Arc<dyn Renderer>,
    pending: String,
}

impl ContentSegmenter {
    pub fn new(renderer: Arc<dyn Renderer>) -> Self {
        Self {
            renderer,
            pending: String::new(),
        }
    }

    /// Consume one delta, returning any segments it completed
    pub fn feed(&mut self, delta: &str) -> Vec<Segment> {
        if delta.is_empty() {
            return Vec::new();
        }

        match classify(delta) {
            DeltaKind::Prose => {
                self.pending.push_str(delta);
                Vec::new()
            }
            DeltaKind::ToolCandidate => {
                let mut segments = Vec::with_capacity(2);
                if let Some(prose) = self.flush() {
                    segments.push(prose);
                }
                match parse_tool_payload(delta) {
                    Some(html) => segments.push(Segment::ToolPayload { html }),
                    None => {
                        tracing::debug!(len = delta.len(), "dropping unparseable tool payload")
                    }
                }
                segments
            }
        }
    }

    /// Flush buffered prose at end of stream
    pub fn finish(&mut self) -> Option<Segment> {
        self.flush()
    }

    /// Drop buffered prose without rendering it; returns the dropped length
    pub fn discard(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        dropped
    }

    fn flush(&mut self) -> Option<Segment> {
        if self.pending.is_empty() {
            return None;
        }
        let text = std::mem::take(&mut self.pending);
        let html = self.renderer.to_html(&text);
        Some(Segment::Prose { text, html })
    }
}

/// Render the first content item of a tool envelope, if the delta is one
fn parse_tool_payload(delta: &str) -> Option<String> {
    let envelope: ToolEnvelope = serde_json::from_str(delta).ok()?;
    envelope
        .content
        .into_iter()
        .next()
        .map(|item| tool_block(&item.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MarkdownRenderer;

    fn segmenter() -> ContentSegmenter {
        ContentSegmenter::new(Arc::new(MarkdownRenderer))
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("{\"Content\":[]}"), DeltaKind::ToolCandidate);
        assert_eq!(classify("undefined: {foo}"), DeltaKind::ToolCandidate);
        assert_eq!(
            classify("ran map[command:ls args:[-la]]"),
            DeltaKind::ToolCandidate
        );
        assert_eq!(classify("Hello"), DeltaKind::Prose);
        assert_eq!(classify(" {not first}"), DeltaKind::Prose);
    }

    #[test]
    fn test_prose_deltas_merge_into_one_segment() {
        let mut seg = segmenter();
        assert!(seg.feed("Hello ").is_empty());
        assert!(seg.feed("world").is_empty());
        assert_eq!(
            seg.finish(),
            Some(Segment::Prose {
                text: "Hello world".into(),
                html: "<p>Hello world</p>\n".into(),
            })
        );
        assert_eq!(seg.finish(), None);
    }

    #[test]
    fn test_tool_payload_as_first_delta() {
        let mut seg = segmenter();
        let segments = seg.feed(r#"{"Content":[{"Type":"text","Text":"result"}]}"#);
        assert_eq!(segments.len(), 1);
        match &segments[0] {
            Segment::ToolPayload { html } => {
                assert!(html.contains("result"));
                assert!(html.starts_with("<details class=\"chat\">"));
                assert!(html.contains("<textarea"));
            }
            other => panic!("expected tool payload, got {other:?}"),
        }
        assert_eq!(seg.finish(), None);
    }

    #[test]
    fn test_tool_payload_flushes_prose_first() {
        let mut seg = segmenter();
        seg.feed("Let me check.");
        let segments = seg.feed(r#"{"content":[{"type":"text","text":"42"}]}"#);
        assert_eq!(segments.len(), 2);
        assert!(matches!(&segments[0], Segment::Prose { text, .. } if text == "Let me check."));
        assert!(matches!(&segments[1], Segment::ToolPayload { html } if html.contains(">42<")));
        assert_eq!(seg.finish(), None);
    }

    #[test]
    fn test_unparseable_candidate_is_dropped() {
        let mut seg = segmenter();
        seg.feed("before ");
        let segments = seg.feed("undefined: {broken");
        assert_eq!(segments.len(), 1);
        assert!(matches!(&segments[0], Segment::Prose { .. }));
        seg.feed("after");
        assert!(matches!(seg.finish(), Some(Segment::Prose { text, .. }) if text == "after"));
    }

    #[test]
    fn test_empty_tool_content_emits_nothing() {
        let mut seg = segmenter();
        assert!(seg.feed(r#"{"Content":[]}"#).is_empty());
    }

    #[test]
    fn test_tool_text_is_escaped() {
        let mut seg = segmenter();
        let mut segments = seg.feed(r#"{"Content":[{"Type":"text","Text":"</textarea><script>"}]}"#);
        let html = segments.remove(0).into_html();
        assert!(html.contains("&lt;/textarea&gt;&lt;script&gt;"));
        assert_eq!(html.matches("</textarea>").count(), 1);
    }

    #[test]
    fn test_discard_drops_pending() {
        let mut seg = segmenter();
        seg.feed("half a thought");
        assert_eq!(seg.discard(), "half a thought".len());
        assert_eq!(seg.finish(), None);
    }
}
