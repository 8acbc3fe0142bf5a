//! Markdown to HTML rendering

use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, TagEnd, html};
use pulldown_cmark_escape::escape_href;

/// Converts assistant Markdown into an HTML fragment.
pub trait Renderer: Send + Sync {
    fn to_html(&self, markdown: &str) -> String;
}

/// CommonMark renderer with the usual GitHub-flavoured extensions.
/// Links open in a new tab.
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRenderer;

impl MarkdownRenderer {
    fn options() -> Options {
        Options::ENABLE_TABLES
            | Options::ENABLE_STRIKETHROUGH
            | Options::ENABLE_TASKLISTS
            | Options::ENABLE_FOOTNOTES
            | Options::ENABLE_HEADING_ATTRIBUTES
    }
}

impl Renderer for MarkdownRenderer {
    fn to_html(&self, markdown: &str) -> String {
        let parser = Parser::new_ext(markdown, Self::options()).map(|event| match event {
            Event::Start(Tag::Link {
                dest_url, title, ..
            }) => {
                // Writes into a String never fail
                let mut open = String::from("<a href=\"");
                let _ = escape_href(&mut open, &dest_url);
                open.push('"');
                if !title.is_empty() {
                    open.push_str(" title=\"");
                    let _ = pulldown_cmark_escape::escape_html(&mut open, &title);
                    open.push('"');
                }
                open.push_str(" target=\"_blank\">");
                Event::InlineHtml(CowStr::from(open))
            }
            Event::End(TagEnd::Link) => Event::InlineHtml(CowStr::Borrowed("</a>")),
            other => other,
        });

        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, parser);
        out
    }
}

/// Escape text for inclusion in HTML element content or attribute values
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let _ = pulldown_cmark_escape::escape_html(&mut out, text);
    out
}
