//! Handle to one in-flight completion.

use parley_ai::Usage;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::conversation::Exchange;

/// Final status of a turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnStatus {
    /// The stream completed; the exchange is ready to commit
    Ok {
        exchange: Exchange,
        usage: Option<Usage>,
    },
    /// The user discarded the turn
    Cancelled,
    /// Backend failure or timeout
    Error(String),
}

impl TurnStatus {
    /// Payload of the `assistant-finish` frame for this status
    pub fn finish_payload(&self) -> &'static str {
        match self {
            TurnStatus::Ok { .. } => "",
            TurnStatus::Cancelled => "cancelled",
            TurnStatus::Error(_) => "error",
        }
    }
}

/// A cancellable handle over the rendered chunks of one turn.
///
/// Chunks arrive in segment order. Once cancelled, no further chunk is
/// yielded even if some are still buffered.
pub struct StreamHandle {
    chunks: mpsc::Receiver<String>,
    cancel: CancellationToken,
    task: JoinHandle<TurnStatus>,
}

impl StreamHandle {
    pub(crate) fn new(
        chunks: mpsc::Receiver<String>,
        cancel: CancellationToken,
        task: JoinHandle<TurnStatus>,
    ) -> Self {
        Self {
            chunks,
            cancel,
            task,
        }
    }

    /// Next rendered HTML chunk, or `None` once the turn is over
    pub async fn next_chunk(&mut self) -> Option<String> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            chunk = self.chunks.recv() => chunk,
        }
    }

    /// Request cancellation. The turn stops at the next chunk boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token shared with the producing task
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop consuming and wait for the final status.
    ///
    /// Dropping the receiver unblocks a producer waiting on a full channel;
    /// it then reports the turn as cancelled.
    pub async fn finish(self) -> TurnStatus {
        let Self {
            chunks,
            cancel: _,
            task,
        } = self;
        drop(chunks);

        match task.await {
            Ok(status) => status,
            Err(e) if e.is_cancelled() => TurnStatus::Cancelled,
            Err(e) => {
                tracing::error!("completion task failed: {}", e);
                TurnStatus::Error(format!("completion task failed: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_with(
        chunks: Vec<&'static str>,
        status: TurnStatus,
    ) -> (StreamHandle, CancellationToken) {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(async move {
            for chunk in chunks {
                let _ = tx.send(chunk.to_string()).await;
            }
            status
        });
        (StreamHandle::new(rx, cancel.clone(), task), cancel)
    }

    #[tokio::test]
    async fn test_chunks_then_status() {
        let (mut handle, _) = handle_with(vec!["<p>a</p>", "<p>b</p>"], TurnStatus::Cancelled);
        assert_eq!(handle.next_chunk().await.as_deref(), Some("<p>a</p>"));
        assert_eq!(handle.next_chunk().await.as_deref(), Some("<p>b</p>"));
        assert_eq!(handle.next_chunk().await, None);
        assert_eq!(handle.finish().await, TurnStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_stops_chunks() {
        let (mut handle, token) = handle_with(vec!["<p>a</p>"], TurnStatus::Cancelled);
        handle.cancel();
        assert!(token.is_cancelled());
        assert_eq!(handle.next_chunk().await, None);
    }

    #[test]
    fn test_finish_payload() {
        assert_eq!(TurnStatus::Cancelled.finish_payload(), "cancelled");
        assert_eq!(TurnStatus::Error("x".into()).finish_payload(), "error");
        let ok = TurnStatus::Ok {
            exchange: Exchange {
                system_prompt: String::new(),
                user: String::new(),
                assistant: String::new(),
            },
            usage: None,
        };
        assert_eq!(ok.finish_payload(), "");
    }
}
