//! Core types for chat completion requests

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message roles in a chat transcript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a chat transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Token usage reported at the end of a stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt: u32,
    pub completion: u32,
    pub total: u32,
}

/// Model and sampling parameters for a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model identifier (e.g., "gpt-4o-mini")
    pub id: String,
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: "gpt-4o-mini".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(4096),
            headers: HashMap::new(),
        }
    }
}

/// A tool exposed by an MCP server
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpTool {
    pub name: String,
}

/// An MCP server integration forwarded to the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpServer {
    pub integration_fqn: String,
    pub enable_all_tools: bool,
    pub tools: Vec<McpTool>,
}

/// Session-level tool/integration configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolConfig {
    pub mcp_servers: Vec<McpServer>,
    /// Upper bound on backend-side tool iterations per request
    pub iteration_limit: u32,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            mcp_servers: Vec::new(),
            iteration_limit: 20,
        }
    }
}

impl ToolConfig {
    /// Whether any integration is configured
    pub fn is_empty(&self) -> bool {
        self.mcp_servers.is_empty()
    }
}

/// A complete streaming chat request
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: ModelConfig,
    pub messages: Vec<ChatMessage>,
    pub tools: ToolConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_string(&ChatMessage::assistant("hi")).unwrap();
        assert_eq!(json, r#"{"role":"assistant","content":"hi"}"#);
    }

    #[test]
    fn test_mcp_server_defaults_missing_fields() {
        let server: McpServer =
            serde_json::from_str(r#"{"integration_fqn":"acme:github"}"#).unwrap();
        assert_eq!(server.integration_fqn, "acme:github");
        assert!(!server.enable_all_tools);
        assert!(server.tools.is_empty());
    }
}
