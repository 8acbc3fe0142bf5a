//! Wire event codes

use std::fmt;

/// Event codes carried in the `<code>:<payload>` frame prefix.
///
/// The numeric values are a stable wire contract shared with the browser
/// client. Code 13 is unassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    /// Client submits a new turn
    UserPrompt,
    /// Client sets the system prompt override
    SystemPrompt,
    /// More assistant output is pending
    AssistantWait,
    /// One rendered HTML fragment
    AssistantOutput,
    /// The stream for the current turn is over
    AssistantFinish,
    Ping,
    Pong,
    /// Protocol or backend error, HTML wrapped
    Diagnostic,
    /// Acknowledges the event whose code is the payload
    Confirmed,
    ResetHistory,
    EnableHistory,
    DisableHistory,
    /// Abort the active stream
    CancelUserPrompt,
    /// Fetch the effective system prompt
    LoadSystemPrompt,
}

impl EventCode {
    /// All codes, in wire order
    pub const ALL: [EventCode; 14] = [
        EventCode::UserPrompt,
        EventCode::SystemPrompt,
        EventCode::AssistantWait,
        EventCode::AssistantOutput,
        EventCode::AssistantFinish,
        EventCode::Ping,
        EventCode::Pong,
        EventCode::Diagnostic,
        EventCode::Confirmed,
        EventCode::ResetHistory,
        EventCode::EnableHistory,
        EventCode::DisableHistory,
        EventCode::CancelUserPrompt,
        EventCode::LoadSystemPrompt,
    ];

    /// The two-digit wire code
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCode::UserPrompt => "01",
            EventCode::SystemPrompt => "02",
            EventCode::AssistantWait => "03",
            EventCode::AssistantOutput => "04",
            EventCode::AssistantFinish => "05",
            EventCode::Ping => "06",
            EventCode::Pong => "07",
            EventCode::Diagnostic => "08",
            EventCode::Confirmed => "09",
            EventCode::ResetHistory => "10",
            EventCode::EnableHistory => "11",
            EventCode::DisableHistory => "12",
            EventCode::CancelUserPrompt => "14",
            EventCode::LoadSystemPrompt => "15",
        }
    }

    /// Look up a code by its wire representation
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == code)
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(EventCode::UserPrompt.as_str(), "01");
        assert_eq!(EventCode::Confirmed.as_str(), "09");
        assert_eq!(EventCode::DisableHistory.as_str(), "12");
        assert_eq!(EventCode::CancelUserPrompt.as_str(), "14");
        assert_eq!(EventCode::LoadSystemPrompt.as_str(), "15");
    }

    #[test]
    fn test_from_code_inverts_as_str() {
        for code in EventCode::ALL {
            assert_eq!(EventCode::from_code(code.as_str()), Some(code));
        }
    }

    #[test]
    fn test_unassigned_and_unpadded_codes() {
        assert_eq!(EventCode::from_code("13"), None);
        assert_eq!(EventCode::from_code("1"), None);
        assert_eq!(EventCode::from_code("001"), None);
        assert_eq!(EventCode::from_code("99"), None);
    }
}
