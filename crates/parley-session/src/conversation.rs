//! Per-session conversation state: prompt override, history flag, transcript.

use parley_ai::ChatMessage;
use serde::{Deserialize, Serialize};

/// One finished turn, ready to be remembered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub system_prompt: String,
    pub user: String,
    pub assistant: String,
}

/// Conversation state owned by a single session.
///
/// The transcript holds at most the last committed turn. `reset_pending`
/// is the only signal used to decide whether the next turn continues the
/// transcript or starts fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationState {
    system_prompt: String,
    history_enabled: bool,
    messages: Vec<ChatMessage>,
    reset_pending: bool,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self {
            system_prompt: String::new(),
            history_enabled: true,
            messages: Vec::new(),
            reset_pending: true,
        }
    }
}

impl ConversationState {
    /// Fresh state with the given history default
    pub fn with_history(enabled: bool) -> Self {
        Self {
            history_enabled: enabled,
            ..Self::default()
        }
    }

    /// The session override; empty means "use the server default"
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// The override if set, else `default`
    pub fn effective_system_prompt<'a>(&'a self, default: &'a str) -> &'a str {
        if self.system_prompt.is_empty() {
            default
        } else {
            &self.system_prompt
        }
    }

    pub fn history_enabled(&self) -> bool {
        self.history_enabled
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn reset_pending(&self) -> bool {
        self.reset_pending
    }

    /// Whether the next turn appends to the stored transcript
    pub fn continues_transcript(&self) -> bool {
        self.history_enabled && !self.reset_pending && !self.messages.is_empty()
    }

    /// A new connection always starts a fresh transcript
    pub fn mark_connected(&mut self) {
        self.reset_pending = true;
    }

    /// Store an override, clearing the transcript
    pub fn set_system_prompt(&mut self, text: impl Into<String>) {
        self.system_prompt = text.into();
        self.clear();
    }

    /// Clear the transcript. Returns `false` if it was already reset.
    pub fn reset_history(&mut self) -> bool {
        if self.reset_pending {
            return false;
        }
        self.clear();
        true
    }

    pub fn enable_history(&mut self) {
        self.history_enabled = true;
    }

    /// Suppress commits without clearing what is stored
    pub fn disable_history(&mut self) {
        self.history_enabled = false;
    }

    /// Replace the transcript with exactly this turn
    pub fn commit_exchange(&mut self, exchange: &Exchange) {
        self.messages = vec![
            ChatMessage::system(exchange.system_prompt.as_str()),
            ChatMessage::user(exchange.user.as_str()),
            ChatMessage::assistant(exchange.assistant.as_str()),
        ];
        self.reset_pending = false;
    }

    /// Forget the transcript after a cancelled turn
    pub fn cancel_exchange(&mut self) {
        self.clear();
    }

    fn clear(&mut self) {
        self.messages.clear();
        self.reset_pending = true;
    }
}
