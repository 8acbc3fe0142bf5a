//! Drives one completion: submit, pump, segment, summarize.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parley_ai::{
    ChatMessage, ChatRequest, CompletionBackend, CompletionEvent, ModelConfig, ToolConfig, Usage,
};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::conversation::{ConversationState, Exchange};
use crate::error::Error;
use crate::render::Renderer;
use crate::segmenter::ContentSegmenter;
use crate::stream_handle::{StreamHandle, TurnStatus};

/// Rendered chunks buffered between the producer and the connection writer
const CHUNK_BUFFER: usize = 32;

/// Server-wide settings applied to every turn
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Used when the session has no override
    pub default_system_prompt: String,
    pub model: ModelConfig,
    pub tools: ToolConfig,
    /// Wall-clock cap on a whole turn
    pub turn_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_system_prompt: String::new(),
            model: ModelConfig::default(),
            tools: ToolConfig::default(),
            turn_timeout: Duration::from_secs(300),
        }
    }
}

/// Starts completions against a backend.
///
/// Never touches conversation state: a finished turn is reported on the
/// handle and the owner decides whether to commit it.
#[derive(Clone)]
pub struct CompletionOrchestrator {
    backend: Arc<dyn CompletionBackend>,
    renderer: Arc<dyn Renderer>,
    config: Arc<OrchestratorConfig>,
}

impl CompletionOrchestrator {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        renderer: Arc<dyn Renderer>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            backend,
            renderer,
            config: Arc::new(config),
        }
    }

    /// The system prompt a turn would use for this state
    pub fn effective_system_prompt<'a>(&'a self, state: &'a ConversationState) -> &'a str {
        state.effective_system_prompt(&self.config.default_system_prompt)
    }

    /// Outgoing message list for a new user turn
    pub fn build_messages(&self, state: &ConversationState, prompt: &str) -> Vec<ChatMessage> {
        if state.continues_transcript() {
            let mut messages = state.messages().to_vec();
            messages.push(ChatMessage::user(prompt));
            messages
        } else {
            vec![
                ChatMessage::system(self.effective_system_prompt(state)),
                ChatMessage::user(prompt),
            ]
        }
    }

    /// Start a turn. Must be called from within a tokio runtime.
    pub fn start(&self, state: &ConversationState, prompt: &str) -> StreamHandle {
        let system_prompt = self.effective_system_prompt(state).to_string();
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: self.build_messages(state, prompt),
            tools: self.config.tools.clone(),
        };
        tracing::debug!(
            messages = request.messages.len(),
            continues = state.continues_transcript(),
            "starting completion"
        );

        let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
        let cancel = CancellationToken::new();
        let turn = Turn {
            backend: Arc::clone(&self.backend),
            segmenter: ContentSegmenter::new(Arc::clone(&self.renderer)),
            cancel: cancel.clone(),
            tx,
            timeout: self.config.turn_timeout,
            system_prompt,
            user: prompt.to_string(),
        };

        let task = tokio::spawn(turn.run(request));
        StreamHandle::new(rx, cancel, task)
    }
}

/// State of one running turn, moved into its task
struct Turn {
    backend: Arc<dyn CompletionBackend>,
    segmenter: ContentSegmenter,
    cancel: CancellationToken,
    tx: mpsc::Sender<String>,
    /// Wall-clock cap, measured from the start of the turn
    timeout: Duration,
    system_prompt: String,
    user: String,
}

/// What woke a turn waiting on the backend
enum Wake<T> {
    Cancelled,
    Deadline,
    Ready(T),
}

impl Turn {
    async fn run(mut self, request: ChatRequest) -> TurnStatus {
        let deadline = tokio::time::sleep_until(Instant::now() + self.timeout);
        tokio::pin!(deadline);

        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Wake::Cancelled,
            _ = &mut deadline => Wake::Deadline,
            opened = self.backend.stream(&request, self.cancel.child_token()) => Wake::Ready(opened),
        };
        let mut events = match opened {
            Wake::Cancelled => return TurnStatus::Cancelled,
            Wake::Deadline => return self.timed_out().await,
            Wake::Ready(Ok(events)) => events,
            Wake::Ready(Err(e)) => {
                tracing::error!("LLM stream response error: {}", e);
                return TurnStatus::Error(e.to_string());
            }
        };

        let mut deltas = String::new();
        let mut usage: Option<Usage> = None;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Wake::Cancelled,
                _ = &mut deadline => Wake::Deadline,
                event = events.next() => Wake::Ready(event),
            };
            let event = match next {
                Wake::Cancelled => return self.cancelled(),
                Wake::Deadline => return self.timed_out().await,
                Wake::Ready(event) => event,
            };

            match event {
                Some(CompletionEvent::Delta { text }) => {
                    deltas.push_str(&text);
                    for segment in self.segmenter.feed(&text) {
                        if !self.publish(segment.into_html()).await {
                            return self.cancelled();
                        }
                    }
                }
                Some(CompletionEvent::Usage(u)) => usage = Some(u),
                Some(CompletionEvent::Error { message }) => {
                    tracing::error!("LLM stream response error: {}", message);
                    self.flush().await;
                    return TurnStatus::Error(message);
                }
                Some(CompletionEvent::Done) | None => break,
                Some(marker) => {
                    debug_assert!(marker.is_marker());
                    tracing::trace!(?marker, "swallowing completion marker");
                }
            }
        }

        if !self.flush().await {
            return self.cancelled();
        }

        if let Some(usage) = usage.filter(|u| u.total > 0) {
            tracing::info!("finished completion streaming, total tokens: {}", usage.total);
        }

        TurnStatus::Ok {
            exchange: Exchange {
                system_prompt: self.system_prompt,
                user: self.user,
                assistant: deltas,
            },
            usage,
        }
    }

    /// Send one chunk; `false` if the turn was cancelled or the consumer left
    async fn publish(&self, html: String) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.tx.send(html) => sent.is_ok(),
        }
    }

    async fn flush(&mut self) -> bool {
        match self.segmenter.finish() {
            Some(segment) => self.publish(segment.into_html()).await,
            None => true,
        }
    }

    /// Render what is buffered, then report the timeout like a backend error
    async fn timed_out(mut self) -> TurnStatus {
        let err = Error::Timeout(self.timeout);
        tracing::error!("LLM stream response error: {}", err);
        self.flush().await;
        TurnStatus::Error(err.to_string())
    }

    fn cancelled(mut self) -> TurnStatus {
        let dropped = self.segmenter.discard();
        tracing::debug!(dropped, "completion cancelled");
        TurnStatus::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::MarkdownRenderer;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use parley_ai::{CompletionEventStream, Role};

    /// Replays scripted events, optionally hanging afterwards.
    struct MockBackend {
        events: Vec<CompletionEvent>,
        hang: bool,
        requests: Arc<Mutex<Vec<ChatRequest>>>,
    }

    impl MockBackend {
        fn new(events: Vec<CompletionEvent>) -> Self {
            Self {
                events,
                hang: false,
                requests: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn hanging(events: Vec<CompletionEvent>) -> Self {
            Self {
                hang: true,
                ..Self::new(events)
            }
        }
    }

    #[async_trait]
    impl CompletionBackend for MockBackend {
        async fn stream(
            &self,
            request: &ChatRequest,
            _cancel: CancellationToken,
        ) -> parley_ai::Result<CompletionEventStream> {
            self.requests.lock().push(request.clone());
            let events = self.events.clone();
            let hang = self.hang;
            let stream: CompletionEventStream = Box::pin(async_stream::stream! {
                for event in events {
                    yield event;
                }
                if hang {
                    std::future::pending::<()>().await;
                }
            });
            Ok(stream)
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl CompletionBackend for FailingBackend {
        async fn stream(
            &self,
            _request: &ChatRequest,
            _cancel: CancellationToken,
        ) -> parley_ai::Result<CompletionEventStream> {
            Err(parley_ai::Error::api("server_error", "upstream unavailable"))
        }
    }

    fn delta(text: &str) -> CompletionEvent {
        CompletionEvent::Delta {
            text: text.to_string(),
        }
    }

    fn orchestrator(backend: impl CompletionBackend + 'static) -> CompletionOrchestrator {
        CompletionOrchestrator::new(
            Arc::new(backend),
            Arc::new(MarkdownRenderer),
            OrchestratorConfig {
                default_system_prompt: "default prompt".into(),
                ..OrchestratorConfig::default()
            },
        )
    }

    async fn drain(handle: &mut StreamHandle) -> Vec<String> {
        let mut chunks = Vec::new();
        while let Some(chunk) = handle.next_chunk().await {
            chunks.push(chunk);
        }
        chunks
    }

    #[tokio::test]
    async fn test_completed_turn_joins_deltas() {
        let orch = orchestrator(MockBackend::new(vec![
            delta("Hello "),
            CompletionEvent::ContentFinished,
            delta("world"),
            CompletionEvent::Usage(Usage {
                prompt: 3,
                completion: 2,
                total: 5,
            }),
            CompletionEvent::Done,
        ]));

        let mut handle = orch.start(&ConversationState::default(), "hi");
        let chunks = drain(&mut handle).await;
        assert_eq!(chunks, vec!["<p>Hello world</p>\n".to_string()]);

        match handle.finish().await {
            TurnStatus::Ok { exchange, usage } => {
                assert_eq!(exchange.system_prompt, "default prompt");
                assert_eq!(exchange.user, "hi");
                assert_eq!(exchange.assistant, "Hello world");
                assert_eq!(usage.map(|u| u.total), Some(5));
            }
            other => panic!("expected ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_payload_in_order() {
        let orch = orchestrator(MockBackend::new(vec![
            delta("Checking."),
            delta(r#"{"Content":[{"Type":"text","Text":"result"}]}"#),
            delta("Done."),
            CompletionEvent::Done,
        ]));

        let mut handle = orch.start(&ConversationState::default(), "run it");
        let chunks = drain(&mut handle).await;
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], "<p>Checking.</p>\n");
        assert!(chunks[1].contains("<textarea") && chunks[1].contains("result"));
        assert_eq!(chunks[2], "<p>Done.</p>\n");

        match handle.finish().await {
            TurnStatus::Ok { exchange, .. } => assert!(exchange.assistant.contains("result")),
            other => panic!("expected ok, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fresh_transcript_uses_override() {
        let backend = MockBackend::new(vec![CompletionEvent::Done]);
        let requests = Arc::clone(&backend.requests);
        let orch = orchestrator(backend);

        let mut state = ConversationState::default();
        state.set_system_prompt("You are terse.");
        let handle = orch.start(&state, "2+2?");
        handle.finish().await;

        let requests = requests.lock();
        assert_eq!(
            requests[0].messages,
            vec![
                ChatMessage::system("You are terse."),
                ChatMessage::user("2+2?")
            ]
        );
    }

    #[test]
    fn test_build_messages_continues_committed_turn() {
        let orch = orchestrator(MockBackend::new(Vec::new()));
        let mut state = ConversationState::default();
        state.commit_exchange(&Exchange {
            system_prompt: "sys".into(),
            user: "hi".into(),
            assistant: "hello".into(),
        });

        let messages = orch.build_messages(&state, "again");
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[3], ChatMessage::user("again"));

        state.disable_history();
        let messages = orch.build_messages(&state, "again");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::system("default prompt"));

        state.enable_history();
        state.mark_connected();
        let messages = orch.build_messages(&state, "again");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::User);
    }

    #[tokio::test]
    async fn test_cancel_discards_buffered_prose() {
        let orch = orchestrator(MockBackend::hanging(vec![
            delta("first"),
            delta(r#"{"Content":[{"Text":"one"}]}"#),
            delta("second"),
            delta(r#"{"Content":[{"Text":"two"}]}"#),
            delta("never rendered"),
        ]));

        let mut handle = orch.start(&ConversationState::default(), "go");
        let mut chunks = Vec::new();
        for _ in 0..4 {
            chunks.push(handle.next_chunk().await.unwrap());
        }
        assert_eq!(chunks[0], "<p>first</p>\n");
        assert_eq!(chunks[2], "<p>second</p>\n");

        handle.cancel();
        assert_eq!(handle.next_chunk().await, None);
        assert_eq!(handle.finish().await, TurnStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_backend_error_flushes_then_reports() {
        let orch = orchestrator(MockBackend::new(vec![
            delta("partial"),
            CompletionEvent::Error {
                message: "boom".into(),
            },
        ]));

        let mut handle = orch.start(&ConversationState::default(), "go");
        assert_eq!(drain(&mut handle).await, vec!["<p>partial</p>\n".to_string()]);
        assert_eq!(handle.finish().await, TurnStatus::Error("boom".into()));
    }

    #[tokio::test]
    async fn test_backend_refuses_request() {
        let orch = orchestrator(FailingBackend);
        let mut handle = orch.start(&ConversationState::default(), "go");
        assert!(drain(&mut handle).await.is_empty());
        match handle.finish().await {
            TurnStatus::Error(detail) => assert!(detail.contains("upstream unavailable")),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_timeout_flushes_buffered_prose() {
        let orch = orchestrator(MockBackend::hanging(vec![delta("partial answer")]));

        let mut handle = orch.start(&ConversationState::default(), "go");
        assert_eq!(
            drain(&mut handle).await,
            vec!["<p>partial answer</p>\n".to_string()]
        );
        match handle.finish().await {
            TurnStatus::Error(detail) => assert!(detail.contains("timed out after 300s")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    /// Backend that never finishes opening its stream
    struct StalledBackend;

    #[async_trait]
    impl CompletionBackend for StalledBackend {
        async fn stream(
            &self,
            _request: &ChatRequest,
            _cancel: CancellationToken,
        ) -> parley_ai::Result<CompletionEventStream> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_turn_timeout_while_opening() {
        let orch = orchestrator(StalledBackend);
        let mut handle = orch.start(&ConversationState::default(), "go");
        assert!(drain(&mut handle).await.is_empty());
        match handle.finish().await {
            TurnStatus::Error(detail) => assert!(detail.contains("timed out after 300s")),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
