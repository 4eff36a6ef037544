//! Downstream publisher.
//!
//! Drains a turn's event stream into a [`UiSink`]: payloads are appended to
//! a running buffer and pushed in batches, then one final notification
//! carries the full text and the turn's final status. Every notification is
//! awaited before more events are read, so a slow UI slows the relay down
//! instead of growing a queue.

mod batch;

pub use batch::{BatchPolicy, Coalescer};

use std::sync::Arc;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{StreamError, CONNECTION_TROUBLE_MESSAGE};
use crate::models::{TurnStatus, UiUpdate};
use crate::session::SessionState;
use crate::traits::{SinkError, UiSink};
use crate::turn::Turn;

/// Result of publishing one turn.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    pub status: TurnStatus,
    pub text: String,
    pub payloads: usize,
    pub notifications: usize,
    /// The UI went away before the turn ended.
    pub disconnected: bool,
    pub failure: Option<StreamError>,
}

/// Pushes turn updates to a UI sink.
#[derive(Clone)]
pub struct Publisher {
    sink: Arc<dyn UiSink>,
    policy: BatchPolicy,
}

impl Publisher {
    pub fn new(sink: Arc<dyn UiSink>, policy: BatchPolicy) -> Self {
        Self { sink, policy }
    }

    /// Relay `turn` to the UI until its stream ends or the UI disconnects.
    ///
    /// On disconnect (the `disconnect` token fires or the sink reports
    /// [`SinkError::Disconnected`]) notifying stops and the session is
    /// cancelled right away.
    pub async fn publish(
        &self,
        session_id: &str,
        turn: Turn,
        disconnect: &CancellationToken,
    ) -> PublishOutcome {
        let Turn {
            session,
            mut events,
            ..
        } = turn;

        let mut batch = Coalescer::new(&self.policy);
        let mut notifications = 0usize;
        let mut failure: Option<StreamError> = None;
        let mut disconnected = false;

        loop {
            let deadline = batch.flush_deadline();
            let due = tokio::select! {
                biased;
                _ = disconnect.cancelled() => {
                    info!(session_id, "UI disconnected, cancelling stream");
                    disconnected = true;
                    break;
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => true,
                item = events.next() => match item {
                    Some(Ok(event)) => batch.push(&event.payload, Instant::now()),
                    Some(Err(err)) => {
                        failure = Some(err);
                        false
                    }
                    None => break,
                },
            };

            if due {
                let update = UiUpdate {
                    session_id: session_id.to_string(),
                    text: batch.text().to_string(),
                    status: TurnStatus::Streaming,
                };
                match self.sink.notify(update).await {
                    Ok(()) => notifications += 1,
                    Err(SinkError::Disconnected) => {
                        info!(session_id, "UI sink gone, cancelling stream");
                        disconnected = true;
                        break;
                    }
                    Err(SinkError::Rejected(reason)) => {
                        warn!(session_id, reason = %reason, "UI rejected update");
                    }
                }
                batch.mark_notified();
            }
        }

        let payloads = batch.payloads();
        let text = batch.into_text();

        if disconnected {
            session.cancel();
            drop(events);
            session.wait_terminal().await;
            return PublishOutcome {
                status: TurnStatus::Stopped,
                text,
                payloads,
                notifications,
                disconnected,
                failure,
            };
        }

        let state = session.wait_terminal().await;
        let failure = failure.or_else(|| session.failure());
        let status = final_status(state, failure.as_ref());
        debug!(session_id, state = %state, payloads, "Turn stream drained");

        if self
            .finish(session_id, text.clone(), status.clone())
            .await
            .is_ok()
        {
            notifications += 1;
        }

        PublishOutcome {
            status,
            text,
            payloads,
            notifications,
            disconnected,
            failure,
        }
    }

    /// Send the final notification of a turn.
    pub async fn finish(
        &self,
        session_id: &str,
        text: String,
        status: TurnStatus,
    ) -> Result<(), SinkError> {
        let update = UiUpdate {
            session_id: session_id.to_string(),
            text,
            status,
        };
        self.sink.notify(update).await.map_err(|err| {
            warn!(session_id, error = %err, "Final UI update not delivered");
            err
        })
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn final_status(state: SessionState, failure: Option<&StreamError>) -> TurnStatus {
    match (failure, state) {
        (Some(err), _) => TurnStatus::Failed {
            message: err.user_message(),
        },
        (None, SessionState::Cancelled) => TurnStatus::Stopped,
        (None, SessionState::Failed) => TurnStatus::Failed {
            message: CONNECTION_TROUBLE_MESSAGE.to_string(),
        },
        (None, _) => TurnStatus::Complete,
    }
}
