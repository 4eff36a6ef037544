//! Turn runner.
//!
//! Drives one conversational turn through its connect attempts: installs a
//! fresh session per attempt, waits for the upstream to answer, and on a
//! connect-phase failure asks the retry policy whether to go again. The
//! backoff wait is abandoned as soon as the turn is cancelled.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::models::TurnRequest;
use crate::registry::SessionRegistry;
use crate::session::{EventStream, StreamSession};
use crate::traits::TurnSource;

/// A turn whose upstream answered.
#[derive(Debug)]
pub struct Turn {
    pub session: Arc<StreamSession>,
    pub events: EventStream,
    /// Connect attempts made, this one included.
    pub attempts: u32,
    /// Cancels the turn, including any later retry.
    pub token: CancellationToken,
    /// Claim on the session key, released with [`SessionRegistry::end_turn`].
    pub turn_id: Uuid,
}

/// Outcome of starting a turn.
#[derive(Debug)]
pub enum TurnStart {
    /// The upstream answered; content is flowing.
    Started(Turn),
    /// The turn was cancelled before the upstream answered.
    Stopped { attempts: u32 },
    /// The upstream could not be reached.
    Failed { attempts: u32, error: RelayError },
}

/// Runs turns against a [`SessionRegistry`].
#[derive(Debug, Clone)]
pub struct TurnRunner {
    registry: SessionRegistry,
    config: Arc<RelayConfig>,
}

impl TurnRunner {
    pub fn new(registry: SessionRegistry, config: Arc<RelayConfig>) -> Self {
        Self { registry, config }
    }

    /// Start a turn for `session_id`, retrying Transient connect failures.
    ///
    /// `parent` is the token the turn's token derives from, normally the UI
    /// connection's. Only lifecycle misuse (shutdown, double start) is
    /// returned as `Err`; upstream failures come back as
    /// [`TurnStart::Failed`]. A started turn keeps its claim on the key
    /// until the caller passes [`Turn::turn_id`] to
    /// [`SessionRegistry::end_turn`]; every other outcome releases it here.
    pub async fn start_turn(
        &self,
        session_id: &str,
        request: TurnRequest,
        source: Arc<dyn TurnSource>,
        parent: &CancellationToken,
    ) -> RelayResult<TurnStart> {
        if self.registry.is_closed() {
            return Err(RelayError::Shutdown);
        }
        let token = parent.child_token();
        let turn_id = Uuid::new_v4();
        self.registry.begin_turn(session_id, turn_id, token.clone());

        info!(session_id, %turn_id, source = source.name(), "Starting turn");

        let outcome = self
            .connect(session_id, &request, source, token, turn_id)
            .await;
        if !matches!(outcome, Ok(TurnStart::Started(_))) {
            self.registry.end_turn(session_id, turn_id);
        }
        outcome
    }

    async fn connect(
        &self,
        session_id: &str,
        request: &TurnRequest,
        source: Arc<dyn TurnSource>,
        token: CancellationToken,
        turn_id: Uuid,
    ) -> RelayResult<TurnStart> {
        let policy = &self.config.retry;
        let mut attempts = 0u32;

        loop {
            if token.is_cancelled() {
                return Ok(TurnStart::Stopped { attempts });
            }

            let installed = self
                .registry
                .replace(session_id, turn_id, || {
                    StreamSession::new(session_id, source.clone(), self.config.clone())
                        .with_cancellation(token.child_token())
                        .with_turn_id(turn_id)
                })
                .await?;
            let Some(session) = installed else {
                debug!(session_id, %turn_id, "Turn superseded before connecting");
                return Ok(TurnStart::Stopped { attempts });
            };
            attempts += 1;
            let events = session.start(request.clone())?;

            let err = match session.wait_connected().await {
                Ok(state) => {
                    debug!(session_id, attempt = attempts, state = %state, "Upstream answered");
                    return Ok(TurnStart::Started(Turn {
                        session,
                        events,
                        attempts,
                        token,
                        turn_id,
                    }));
                }
                Err(err) => err,
            };

            let decision = policy.should_retry(err.class(), attempts);
            if !decision.retry {
                let error = if err.is_retryable() {
                    RelayError::RetriesExhausted {
                        attempts,
                        last: err,
                    }
                } else {
                    RelayError::Stream(err)
                };
                return Ok(TurnStart::Failed { attempts, error });
            }

            warn!(
                session_id,
                attempt = attempts,
                delay_ms = decision.delay.as_millis() as u64,
                error = %err,
                "Upstream connect failed, retrying"
            );

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    debug!(session_id, attempt = attempts, "Turn cancelled during backoff");
                    return Ok(TurnStart::Stopped { attempts });
                }
                _ = tokio::time::sleep(decision.delay) => {}
            }
        }
    }
}
