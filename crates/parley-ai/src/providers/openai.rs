//! OpenAI-compatible Chat Completions streaming backend

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::{
    error::{Error, Result},
    providers::CompletionBackend,
    stream::{ChunkAccumulator, CompletionEvent, CompletionEventStream, StreamDelta, ToolCallDelta},
    types::{ChatMessage, ChatRequest, McpServer, Usage},
};

/// Streaming client for any OpenAI-compatible `/chat/completions` endpoint
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAiBackend {
    /// Create a new backend with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    fn headers(&self, request: &ChatRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|_| Error::InvalidApiKey)?;
        headers.insert(reqwest::header::AUTHORIZATION, auth);
        headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        for (key, value) in &request.model.headers {
            let name = key
                .parse::<HeaderName>()
                .map_err(|e| Error::InvalidConfig(format!("header name {key:?}: {e}")))?;
            let val = value
                .parse::<HeaderValue>()
                .map_err(|e| Error::InvalidConfig(format!("header value for {key:?}: {e}")))?;
            headers.insert(name, val);
        }

        Ok(headers)
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    async fn stream(
        &self,
        request: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<CompletionEventStream> {
        let body = build_request(request);
        let url = format!(
            "{}/chat/completions",
            request.model.base_url.trim_end_matches('/')
        );
        let headers = self.headers(request)?;

        tracing::debug!(
            model = %request.model.id,
            messages = request.messages.len(),
            mcp_servers = request.tools.mcp_servers.len(),
            "submitting streaming completion"
        );

        let request_builder = self.client.post(&url).headers(headers).json(&body);
        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, cancel)))
    }
}

fn build_request(request: &ChatRequest) -> OpenAIRequest<'_> {
    let (mcp_servers, iteration_limit) = if request.tools.is_empty() {
        (None, None)
    } else {
        (
            Some(request.tools.mcp_servers.as_slice()),
            Some(request.tools.iteration_limit),
        )
    };

    OpenAIRequest {
        model: &request.model.id,
        messages: &request.messages,
        stream: true,
        stream_options: StreamOptions {
            include_usage: true,
        },
        max_tokens: request.model.max_tokens,
        temperature: request.model.temperature,
        mcp_servers,
        iteration_limit,
    }
}

fn create_stream(
    mut event_source: EventSource,
    cancel: CancellationToken,
) -> impl futures::Stream<Item = CompletionEvent> {
    stream! {
        let mut accumulator = ChunkAccumulator::new();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => None,
                event = event_source.next() => Some(event),
            };

            let Some(event) = next else {
                event_source.close();
                yield CompletionEvent::Error { message: Error::Aborted.to_string() };
                return;
            };
            let Some(event) = event else { break };

            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    let chunk: StreamChunk = match serde_json::from_str(&msg.data) {
                        Ok(chunk) => chunk,
                        Err(e) => {
                            event_source.close();
                            yield CompletionEvent::Error {
                                message: Error::Json(e).to_string(),
                            };
                            return;
                        }
                    };

                    if let Some(err) = chunk.error {
                        event_source.close();
                        let api = Error::api(err.error_type.unwrap_or_else(|| "api_error".into()), err.message);
                        yield CompletionEvent::Error { message: api.to_string() };
                        return;
                    }

                    if let Some(choice) = chunk.choices.into_iter().next() {
                        for event in accumulator.process(&choice.into_delta()) {
                            yield event;
                        }
                    }

                    if let Some(usage) = chunk.usage {
                        yield CompletionEvent::Usage(Usage {
                            prompt: usage.prompt_tokens,
                            completion: usage.completion_tokens,
                            total: usage.total_tokens,
                        });
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    event_source.close();
                    let body = response.text().await.unwrap_or_default();
                    yield CompletionEvent::Error {
                        message: Error::api(format!("http_{}", status.as_u16()), format!("{}: {}", status, body)).to_string(),
                    };
                    return;
                }
                Err(e) => {
                    event_source.close();
                    yield CompletionEvent::Error {
                        message: Error::Sse(e.to_string()).to_string(),
                    };
                    return;
                }
            }
        }

        event_source.close();
        for event in accumulator.finish() {
            yield event;
        }
        yield CompletionEvent::Done;
    }
}

// Request types

#[derive(Debug, Serialize)]
struct OpenAIRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mcp_servers: Option<&'a [McpServer]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    iteration_limit: Option<u32>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: ChoiceDelta,
    finish_reason: Option<String>,
}

impl StreamChoice {
    fn into_delta(self) -> StreamDelta {
        StreamDelta {
            content: self.delta.content,
            refusal: self.delta.refusal,
            tool_calls: self
                .delta
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|tc| ToolCallDelta {
                    index: tc.index,
                    name: tc.function.as_ref().and_then(|f| f.name.clone()),
                    arguments: tc.function.and_then(|f| f.arguments),
                })
                .collect(),
            finish_reason: self.finish_reason,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ChoiceDelta {
    content: Option<String>,
    refusal: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    #[serde(default)]
    index: u32,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{McpTool, ModelConfig, ToolConfig};

    fn request(tools: ToolConfig) -> ChatRequest {
        ChatRequest {
            model: ModelConfig::default(),
            messages: vec![ChatMessage::system("be brief"), ChatMessage::user("2+2?")],
            tools,
        }
    }

    #[test]
    fn test_request_body_without_tools() {
        let req = request(ToolConfig::default());
        let body = serde_json::to_value(build_request(&req)).unwrap();
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["stream_options"]["include_usage"], true);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "2+2?");
        assert!(body.get("mcp_servers").is_none());
        assert!(body.get("iteration_limit").is_none());
    }

    #[test]
    fn test_request_body_with_mcp_servers() {
        let tools = ToolConfig {
            mcp_servers: vec![McpServer {
                integration_fqn: "acme:mcp:github".into(),
                enable_all_tools: false,
                tools: vec![McpTool {
                    name: "search_issues".into(),
                }],
            }],
            iteration_limit: 20,
        };
        let req = request(tools);
        let body = serde_json::to_value(build_request(&req)).unwrap();
        assert_eq!(body["iteration_limit"], 20);
        assert_eq!(body["mcp_servers"][0]["integration_fqn"], "acme:mcp:github");
        assert_eq!(body["mcp_servers"][0]["tools"][0]["name"], "search_issues");
    }

    #[test]
    fn test_chunk_parsing_into_delta() {
        let data = r#"{"choices":[{"delta":{"content":"Hi","tool_calls":[{"index":1,"function":{"name":"f","arguments":"{}"}}]},"finish_reason":null}]}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        let delta = chunk.choices.into_iter().next().unwrap().into_delta();
        assert_eq!(delta.content.as_deref(), Some("Hi"));
        assert_eq!(delta.tool_calls.len(), 1);
        assert_eq!(delta.tool_calls[0].index, 1);
        assert_eq!(delta.tool_calls[0].name.as_deref(), Some("f"));
    }

    #[test]
    fn test_usage_only_chunk() {
        let data = r#"{"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":5,"total_tokens":8}}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        assert!(chunk.choices.is_empty());
        assert_eq!(chunk.usage.unwrap().total_tokens, 8);
    }

    #[test]
    fn test_error_chunk() {
        let data = r#"{"error":{"message":"model not found","type":"invalid_request_error"}}"#;
        let chunk: StreamChunk = serde_json::from_str(data).unwrap();
        let err = chunk.error.unwrap();
        assert_eq!(err.message, "model not found");
        assert_eq!(err.error_type.as_deref(), Some("invalid_request_error"));
    }

    #[test]
    fn test_bad_header_is_config_error() {
        let backend = OpenAiBackend::new("sk-test");
        let mut req = request(ToolConfig::default());
        req.model
            .headers
            .insert("bad header".into(), "value".into());
        let err = backend.headers(&req).unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }
}
