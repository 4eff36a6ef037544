//! Producer-side handle given to turn sources.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::state::SessionState;
use crate::error::StreamError;
use crate::sse::StreamEvent;

pub(crate) type EventSender = mpsc::Sender<Result<StreamEvent, StreamError>>;

/// Why a source must stop producing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Halt {
    /// The session was cancelled.
    Cancelled,
    /// The consumer dropped its end of the channel.
    ConsumerGone,
}

/// Write end of a session's event channel.
///
/// Sends are raced against the session's cancellation token, so a full
/// channel never keeps a cancelled producer alive.
pub struct EventSink {
    session_id: String,
    tx: EventSender,
    state: Arc<watch::Sender<SessionState>>,
    streamed: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl EventSink {
    pub(crate) fn new(
        session_id: String,
        tx: EventSender,
        state: Arc<watch::Sender<SessionState>>,
        streamed: Arc<AtomicBool>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            session_id,
            tx,
            state,
            streamed,
            cancel,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Record that the upstream answered and content may now flow.
    pub fn mark_streaming(&self) {
        self.streamed.store(true, Ordering::Release);
        self.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Streaming;
                true
            } else {
                false
            }
        });
    }

    /// Resolves when the session is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Forward one event, giving up if the session is cancelled first.
    pub async fn emit(&self, event: StreamEvent) -> Result<(), Halt> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Halt::Cancelled),
            sent = self.tx.send(Ok(event)) => sent.map_err(|_| Halt::ConsumerGone),
        }
    }

    /// Forward one event even though the session is cancelled.
    ///
    /// Used for the final flush of an instant-complete reveal.
    pub async fn deliver(&self, event: StreamEvent) -> Result<(), Halt> {
        self.tx
            .send(Ok(event))
            .await
            .map_err(|_| Halt::ConsumerGone)
    }
}
