//! `<code>:<payload>` frame encoding

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::events::EventCode;

/// Leading ASCII digit run followed by the first colon.
static FRAME_PREFIX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^([0-9]+):").unwrap());

/// A decoded frame. `code` keeps the digits exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub code: String,
    pub payload: String,
}

impl Frame {
    /// Resolve the code against the known event set
    pub fn event(&self) -> Result<EventCode> {
        EventCode::from_code(&self.code).ok_or_else(|| Error::UnknownEvent(self.encode()))
    }

    /// Re-encode exactly as received
    pub fn encode(&self) -> String {
        format!("{}:{}", self.code, self.payload)
    }
}

/// Split a raw frame into code and payload.
///
/// Only the first colon is significant; the payload may contain more.
pub fn decode(frame: &str) -> Result<Frame> {
    let caps = FRAME_PREFIX
        .captures(frame)
        .ok_or_else(|| Error::MalformedFrame(frame.to_string()))?;
    let prefix = caps.get(0).map_or(0, |m| m.end());
    let code = caps.get(1).map_or("", |m| m.as_str());

    Ok(Frame {
        code: code.to_string(),
        payload: frame[prefix..].to_string(),
    })
}

/// Build an outbound frame. No escaping is applied to the payload.
pub fn encode(code: EventCode, payload: &str) -> String {
    let mut out = String::with_capacity(code.as_str().len() + 1 + payload.len());
    out.push_str(code.as_str());
    out.push(':');
    out.push_str(payload);
    out
}
