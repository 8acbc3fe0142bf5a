//! Connection-level event protocol.
//!
//! One actor per connection owns the conversation state. Inbound frames,
//! turn reports from the stream forwarder and writer failures all arrive at
//! that actor, so state is never shared between tasks. A single writer task
//! owns the outbound sink and interleaves keepalive pings with the frames it
//! is handed; frame order on the wire is channel order.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;

use crate::codec;
use crate::conversation::ConversationState;
use crate::error::{Error, Result};
use crate::events::EventCode;
use crate::orchestrator::CompletionOrchestrator;
use crate::render::escape_html;
use crate::store::{SessionId, SessionStore};
use crate::stream_handle::{StreamHandle, TurnStatus};

/// Outbound frames queued ahead of the writer
const OUTBOUND_BUFFER: usize = 64;

/// Per-connection settings
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Interval between unsolicited `ping` frames
    pub keepalive: Duration,
    /// History flag for sessions seen for the first time
    pub history_default: bool,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(60),
            history_default: true,
        }
    }
}

/// HTML-wrapped protocol error for a `diagnostic` frame
pub fn websocket_error_html(message: &str) -> String {
    format!(
        r#"<p style="color: red;"><strong>Websocket error: </strong>{}</p>"#,
        escape_html(message)
    )
}

/// HTML-wrapped backend error for a `diagnostic` frame
pub fn stream_error_html(detail: &str) -> String {
    format!(
        r#"<p style="color: red;"><strong>LLM stream response error: </strong>{}</p>"#,
        escape_html(detail)
    )
}

/// The turn currently streaming on this connection
struct ActiveTurn {
    cancel: CancellationToken,
    /// The user asked to cancel
    cancelled: bool,
    /// A later mutation invalidated the turn's transcript
    discarded: bool,
}

/// Event protocol for one connection.
pub struct SessionProtocol {
    id: SessionId,
    orchestrator: CompletionOrchestrator,
    store: Arc<dyn SessionStore>,
    config: ProtocolConfig,
    state: ConversationState,
}

impl SessionProtocol {
    /// Load (or create) the session's state and mark it freshly connected
    pub fn new(
        id: SessionId,
        orchestrator: CompletionOrchestrator,
        store: Arc<dyn SessionStore>,
        config: ProtocolConfig,
    ) -> Self {
        let mut state = store
            .load(&id)
            .unwrap_or_else(|| ConversationState::with_history(config.history_default));
        state.mark_connected();
        store.save(&id, &state);

        Self {
            id,
            orchestrator,
            store,
            config,
            state,
        }
    }

    /// Serve the connection until the peer leaves or a fatal error occurs.
    ///
    /// `inbound` yields raw text frames; `outbound` receives encoded frames.
    /// The outbound sink is closed on return.
    pub async fn run<I, E, O>(self, inbound: I, outbound: O) -> Result<()>
    where
        I: Stream<Item = std::result::Result<String, E>> + Unpin,
        E: Display,
        O: Sink<String> + Unpin + Send + 'static,
        O::Error: Display,
    {
        let (out, frames) = mpsc::channel(OUTBOUND_BUFFER);
        let (reports_tx, reports) = mpsc::channel(1);
        let shutdown = CancellationToken::new();

        let writer = tokio::spawn(write_loop(
            outbound,
            frames,
            self.config.keepalive,
            shutdown.clone(),
        ));

        let mut actor = Actor {
            session: self,
            out,
            reports_tx,
            active: None,
        };
        let result = actor.serve(inbound, reports, &shutdown).await;

        let Actor { session, out, .. } = actor;
        drop(out);
        if let Err(e) = writer.await {
            tracing::warn!("writer task failed: {}", e);
        }
        tracing::info!(session = %session.id, "connection closed");
        result
    }

    fn persist(&self) {
        self.store.save(&self.id, &self.state);
    }
}

/// Owns the outbound sink. Ends when every frame sender is gone.
async fn write_loop<O>(
    mut sink: O,
    mut frames: mpsc::Receiver<String>,
    keepalive: Duration,
    shutdown: CancellationToken,
) where
    O: Sink<String> + Unpin,
    O::Error: Display,
{
    let mut ticker = time::interval_at(Instant::now() + keepalive, keepalive);

    loop {
        let frame = tokio::select! {
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            _ = ticker.tick() => codec::encode(EventCode::Ping, "ping"),
        };

        if let Err(e) = sink.send(frame).await {
            tracing::warn!("connection write failed: {}", e);
            shutdown.cancel();
            return;
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("closing connection: {}", e);
    }
}

struct Actor {
    session: SessionProtocol,
    out: mpsc::Sender<String>,
    reports_tx: mpsc::Sender<TurnStatus>,
    active: Option<ActiveTurn>,
}

impl Actor {
    async fn serve<I, E>(
        &mut self,
        mut inbound: I,
        mut reports: mpsc::Receiver<TurnStatus>,
        shutdown: &CancellationToken,
    ) -> Result<()>
    where
        I: Stream<Item = std::result::Result<String, E>> + Unpin,
        E: Display,
    {
        let result = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    break Err(Error::ConnectionClosed("connection write failed".into()));
                }
                Some(status) = reports.recv() => {
                    if let Err(e) = self.finish_turn(status).await {
                        break Err(e);
                    }
                }
                frame = inbound.next() => match frame {
                    Some(Ok(text)) => {
                        if let Err(e) = self.handle_frame(&text).await {
                            if e.is_fatal() {
                                break Err(e);
                            }
                            tracing::warn!("{}", e);
                        }
                    }
                    Some(Err(e)) => break Err(Error::ConnectionClosed(e.to_string())),
                    None => break Ok(()),
                },
            }
        };

        if let Some(turn) = self.active.as_mut() {
            tracing::debug!("connection ending mid-stream, cancelling turn");
            turn.cancel.cancel();
            turn.cancelled = true;
            if let Some(status) = reports.recv().await {
                self.settle(status);
                self.active = None;
            }
        }

        result
    }

    async fn handle_frame(&mut self, text: &str) -> Result<()> {
        let frame = match codec::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("{}", e);
                self.emit(EventCode::Diagnostic, &websocket_error_html(&e.to_string()))
                    .await?;
                return Err(e);
            }
        };

        let event = match frame.event() {
            Ok(event) => event,
            Err(e) => return self.unrecognized(e).await,
        };
        tracing::debug!(code = %event, len = frame.payload.len(), "event received");

        match event {
            EventCode::Ping => self.emit(EventCode::Pong, "pong").await,
            EventCode::Pong => {
                tracing::trace!("pong received");
                Ok(())
            }
            EventCode::UserPrompt => self.user_prompt(&frame.payload).await,
            EventCode::CancelUserPrompt => self.cancel_user_prompt().await,
            EventCode::SystemPrompt => {
                self.session.state.set_system_prompt(frame.payload);
                self.discard_active();
                self.session.persist();
                self.confirm(EventCode::SystemPrompt).await
            }
            EventCode::ResetHistory => {
                if !self.session.state.reset_history() {
                    tracing::debug!("history already reset");
                }
                self.discard_active();
                self.session.persist();
                self.confirm(EventCode::ResetHistory).await
            }
            EventCode::EnableHistory => {
                self.session.state.enable_history();
                self.session.persist();
                self.confirm(EventCode::EnableHistory).await
            }
            EventCode::DisableHistory => {
                self.session.state.disable_history();
                self.session.persist();
                self.confirm(EventCode::DisableHistory).await
            }
            EventCode::LoadSystemPrompt => {
                let prompt = self
                    .session
                    .orchestrator
                    .effective_system_prompt(&self.session.state)
                    .to_string();
                self.emit(EventCode::LoadSystemPrompt, &prompt).await
            }
            EventCode::AssistantWait
            | EventCode::AssistantOutput
            | EventCode::AssistantFinish
            | EventCode::Diagnostic
            | EventCode::Confirmed => {
                self.unrecognized(Error::UnknownEvent(frame.encode())).await
            }
        }
    }

    async fn unrecognized(&self, err: Error) -> Result<()> {
        tracing::warn!("{}", err);
        self.emit(EventCode::Diagnostic, &websocket_error_html(&err.to_string()))
            .await
    }

    async fn user_prompt(&mut self, prompt: &str) -> Result<()> {
        if self.active.is_some() {
            tracing::warn!("rejecting user prompt while streaming");
            return self
                .emit(
                    EventCode::Diagnostic,
                    &websocket_error_html("received user prompt while a response is still streaming"),
                )
                .await;
        }

        self.confirm(EventCode::UserPrompt).await?;

        let handle = self.session.orchestrator.start(&self.session.state, prompt);
        self.active = Some(ActiveTurn {
            cancel: handle.cancel_token(),
            cancelled: false,
            discarded: false,
        });
        tokio::spawn(forward(handle, self.out.clone(), self.reports_tx.clone()));
        Ok(())
    }

    async fn cancel_user_prompt(&mut self) -> Result<()> {
        let Some(turn) = self.active.as_mut() else {
            tracing::debug!("cancel received while idle");
            return Ok(());
        };

        turn.cancel.cancel();
        turn.cancelled = true;
        self.session.state.cancel_exchange();
        self.session.persist();
        self.confirm(EventCode::CancelUserPrompt).await
    }

    fn discard_active(&mut self) {
        if let Some(turn) = self.active.as_mut() {
            turn.discarded = true;
        }
    }

    /// Apply a turn's result to the conversation state
    fn settle(&mut self, status: TurnStatus) -> TurnStatus {
        let Some(turn) = self.active.as_ref() else {
            return status;
        };

        if turn.cancelled {
            if !matches!(status, TurnStatus::Cancelled) {
                tracing::debug!("turn finished after cancellation, discarding");
            }
            self.session.state.cancel_exchange();
            self.session.persist();
            return TurnStatus::Cancelled;
        }

        match &status {
            TurnStatus::Ok { exchange, .. } if turn.discarded => {
                tracing::debug!(user = %exchange.user, "conversation changed mid-stream, not committing");
            }
            TurnStatus::Ok { exchange, .. } => {
                if self.session.state.history_enabled() {
                    self.session.state.commit_exchange(exchange);
                    self.session.persist();
                }
            }
            TurnStatus::Cancelled => {
                self.session.state.cancel_exchange();
                self.session.persist();
            }
            TurnStatus::Error(_) => {}
        }
        status
    }

    async fn finish_turn(&mut self, status: TurnStatus) -> Result<()> {
        if self.active.is_none() {
            tracing::warn!("turn report without an active turn");
            return Ok(());
        }

        let status = self.settle(status);
        self.active = None;

        if let TurnStatus::Error(detail) = &status {
            self.emit(EventCode::Diagnostic, &stream_error_html(detail))
                .await?;
        }
        self.emit(EventCode::AssistantFinish, status.finish_payload())
            .await
    }

    async fn confirm(&self, code: EventCode) -> Result<()> {
        self.emit(EventCode::Confirmed, code.as_str()).await
    }

    async fn emit(&self, code: EventCode, payload: &str) -> Result<()> {
        self.out
            .send(codec::encode(code, payload))
            .await
            .map_err(|_| Error::ConnectionClosed("writer closed".into()))
    }
}

/// Pump rendered chunks to the writer, then report the final status
async fn forward(
    mut handle: StreamHandle,
    out: mpsc::Sender<String>,
    reports: mpsc::Sender<TurnStatus>,
) {
    while let Some(chunk) = handle.next_chunk().await {
        let wait = codec::encode(EventCode::AssistantWait, "");
        if out
            .send(codec::encode(EventCode::AssistantOutput, &chunk))
            .await
            .is_err()
            || out.send(wait).await.is_err()
        {
            handle.cancel();
            break;
        }
    }

    let status = handle.finish().await;
    if reports.send(status).await.is_err() {
        tracing::debug!("session ended before turn report");
    }
}

/// Spawn a protocol on a task, returning its join handle.
pub fn spawn<I, E, O>(protocol: SessionProtocol, inbound: I, outbound: O) -> JoinHandle<Result<()>>
where
    I: Stream<Item = std::result::Result<String, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
    O: Sink<String> + Unpin + Send + 'static,
    O::Error: Display,
{
    tokio::spawn(protocol.run(inbound, outbound))
}
