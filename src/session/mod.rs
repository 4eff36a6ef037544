//! Stream session: one relay operation from upstream to consumer.
//!
//! A session owns a producer task that runs a [`TurnSource`] and feeds a
//! bounded channel. Everything that must happen when the operation ends
//! (upstream release, terminal state, registry removal, closing the
//! channel) is attached to the task, so it runs on completion, failure,
//! cancellation, consumer drop and forced abort alike.
//!
//! # Module structure
//! - `state` - SessionState
//! - `sink` - EventSink handed to sources
//! - `guard` - UpstreamHandle and its release guard
//! - `stream` - EventStream returned to consumers

mod guard;
mod sink;
mod state;
mod stream;

pub use guard::{ReleaseGuard, UpstreamHandle};
pub use sink::{EventSink, Halt};
pub use state::SessionState;
pub use stream::EventStream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult, StreamError};
use crate::models::TurnRequest;
use crate::traits::{SourceExit, TurnSource};

type Finalizer = Box<dyn FnOnce() + Send>;

/// Lock a std mutex, ignoring poisoning. The guarded data stays consistent
/// because no critical section in this crate can panic halfway.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Move a live state to `next`. Terminal states are never overwritten.
fn settle(state: &watch::Sender<SessionState>, next: SessionState) -> bool {
    state.send_if_modified(|current| {
        if current.is_live() {
            *current = next;
            true
        } else {
            false
        }
    })
}

fn run_finalizer(finalizer: &Mutex<Option<Finalizer>>) {
    let finalizer = lock(finalizer).take();
    if let Some(finalizer) = finalizer {
        finalizer();
    }
}

/// One upstream-to-consumer relay operation.
pub struct StreamSession {
    session_id: String,
    instance_id: Uuid,
    turn_id: Uuid,
    source: Arc<dyn TurnSource>,
    config: Arc<RelayConfig>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    state_tx: Arc<watch::Sender<SessionState>>,
    state_rx: watch::Receiver<SessionState>,
    failure: Arc<Mutex<Option<StreamError>>>,
    streamed: Arc<AtomicBool>,
    started: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    finalizer: Arc<Mutex<Option<Finalizer>>>,
}

impl StreamSession {
    pub fn new(
        session_id: impl Into<String>,
        source: Arc<dyn TurnSource>,
        config: Arc<RelayConfig>,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
        Self {
            session_id: session_id.into(),
            instance_id: Uuid::new_v4(),
            turn_id: Uuid::new_v4(),
            source,
            config,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            state_tx: Arc::new(state_tx),
            state_rx,
            failure: Arc::new(Mutex::new(None)),
            streamed: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            task: Mutex::new(None),
            finalizer: Arc::new(Mutex::new(None)),
        }
    }

    /// Use `token` (typically a child of the turn's token) for cancellation.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Tag the session with the turn it belongs to. Retries of one turn
    /// share the id.
    pub fn with_turn_id(mut self, turn_id: Uuid) -> Self {
        self.turn_id = turn_id;
        self
    }

    /// Spawn the producer task on `tracker`.
    pub fn with_tracker(mut self, tracker: TaskTracker) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn turn_id(&self) -> Uuid {
        self.turn_id
    }

    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    pub fn is_live(&self) -> bool {
        self.state().is_live()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// The failure that ended the session, if it failed.
    pub fn failure(&self) -> Option<StreamError> {
        lock(&self.failure).clone()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Install the callback run once, right after the terminal transition.
    pub fn set_finalizer(&self, finalizer: impl FnOnce() + Send + 'static) {
        *lock(&self.finalizer) = Some(Box::new(finalizer));
    }

    /// Begin relaying. The returned stream yields payload events in upstream
    /// order and ends once the session reached a terminal state.
    pub fn start(&self, request: TurnRequest) -> RelayResult<EventStream> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(RelayError::AlreadyStarted {
                session_id: self.session_id.clone(),
            });
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity);
        let pump = Pump {
            session_id: self.session_id.clone(),
            instance_id: self.instance_id,
            source: self.source.clone(),
            cancel: self.cancel.clone(),
            state: self.state_tx.clone(),
            failure: self.failure.clone(),
            streamed: self.streamed.clone(),
            finalizer: self.finalizer.clone(),
            overall_timeout: self.config.overall_timeout,
        };

        info!(
            session_id = %self.session_id,
            instance_id = %self.instance_id,
            source = self.source.name(),
            "Starting stream session"
        );

        let handle = self.tracker.spawn(pump.run(request, tx));
        *lock(&self.task) = Some(handle);
        Ok(EventStream::new(rx))
    }

    /// Request cancellation. Safe to call any number of times, in any state.
    pub fn cancel(&self) {
        self.cancel.cancel();
        if !self.is_started() && settle(&self.state_tx, SessionState::Cancelled) {
            debug!(session_id = %self.session_id, "Cancelled before start");
            run_finalizer(&self.finalizer);
        }
    }

    /// Wait until the session is terminal and return that state.
    pub async fn wait_terminal(&self) -> SessionState {
        let mut rx = self.state_rx.clone();
        let reached = rx.wait_for(SessionState::is_terminal).await.map(|s| *s);
        reached.unwrap_or_else(|_| self.state())
    }

    /// True once the upstream answered and content could flow.
    pub fn has_streamed(&self) -> bool {
        self.streamed.load(Ordering::Acquire)
    }

    /// Wait until the upstream answered or the session ended.
    ///
    /// Returns the recorded failure if the session failed before streaming.
    /// A failure after streaming began is left to the consumer, which reads
    /// it as the last item of the event stream.
    pub async fn wait_connected(&self) -> Result<SessionState, StreamError> {
        let mut rx = self.state_rx.clone();
        let reached = rx
            .wait_for(|s| *s != SessionState::Connecting)
            .await
            .map(|s| *s);
        let state = reached.unwrap_or_else(|_| self.state());

        if state == SessionState::Failed && !self.has_streamed() {
            return Err(self.failure().unwrap_or(StreamError::UpstreamProtocol {
                status: None,
                message: "session failed without a recorded cause".to_string(),
            }));
        }
        Ok(state)
    }

    /// Force-dispose the producer task.
    pub async fn abort(&self) {
        self.cancel.cancel();
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        settle(&self.state_tx, SessionState::Cancelled);
        run_finalizer(&self.finalizer);
    }

    /// Wait for the producer task to exit.
    pub async fn join(&self) {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("session_id", &self.session_id)
            .field("instance_id", &self.instance_id)
            .field("state", &self.state())
            .finish()
    }
}

/// State moved into the producer task.
struct Pump {
    session_id: String,
    instance_id: Uuid,
    source: Arc<dyn TurnSource>,
    cancel: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
    failure: Arc<Mutex<Option<StreamError>>>,
    streamed: Arc<AtomicBool>,
    finalizer: Arc<Mutex<Option<Finalizer>>>,
    overall_timeout: std::time::Duration,
}

impl Pump {
    async fn run(self, request: TurnRequest, tx: sink::EventSender) {
        let mut exit = ExitGuard {
            state: self.state.clone(),
            finalizer: self.finalizer.clone(),
            outcome: None,
        };

        let sink = EventSink::new(
            self.session_id.clone(),
            tx.clone(),
            self.state.clone(),
            self.streamed.clone(),
            self.cancel.clone(),
        );

        let result = if self.cancel.is_cancelled() {
            Ok(SourceExit::Cancelled)
        } else {
            match tokio::time::timeout(self.overall_timeout, self.source.produce(request, &sink)).await
            {
                Ok(result) => result,
                Err(_) => Err(StreamError::overall(self.overall_timeout)),
            }
        };
        drop(sink);

        let outcome = match result {
            Ok(SourceExit::Completed) => SessionState::Completed,
            Ok(SourceExit::Cancelled) => SessionState::Cancelled,
            Err(_) if self.cancel.is_cancelled() => SessionState::Cancelled,
            Err(err) => {
                *lock(&self.failure) = Some(err.clone());
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {}
                    _ = tx.send(Err(err)) => {}
                }
                SessionState::Failed
            }
        };

        info!(
            session_id = %self.session_id,
            instance_id = %self.instance_id,
            state = %outcome,
            "Stream session finished"
        );

        exit.outcome = Some(outcome);
        drop(exit);
        drop(tx);
    }
}

/// Records the terminal state and runs the finalizer when the producer task
/// ends, including when it is aborted mid-flight.
struct ExitGuard {
    state: Arc<watch::Sender<SessionState>>,
    finalizer: Arc<Mutex<Option<Finalizer>>>,
    outcome: Option<SessionState>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        settle(&self.state, self.outcome.unwrap_or(SessionState::Cancelled));
        run_finalizer(&self.finalizer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sse::StreamEvent;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Emits its script, then optionally fails or hangs.
    struct ScriptSource {
        payloads: Vec<&'static str>,
        then: Then,
    }

    enum Then {
        Complete,
        Fail(StreamError),
        Hang,
    }

    #[async_trait]
    impl TurnSource for ScriptSource {
        fn name(&self) -> &'static str {
            "script"
        }

        async fn produce(
            &self,
            _request: TurnRequest,
            sink: &EventSink,
        ) -> Result<SourceExit, StreamError> {
            if let Then::Fail(err) = &self.then {
                if self.payloads.is_empty() {
                    return Err(err.clone());
                }
            }
            sink.mark_streaming();
            for payload in &self.payloads {
                if sink.emit(StreamEvent::payload(*payload)).await.is_err() {
                    return Ok(SourceExit::Cancelled);
                }
            }
            match &self.then {
                Then::Complete => Ok(SourceExit::Completed),
                Then::Fail(err) => Err(err.clone()),
                Then::Hang => {
                    sink.cancelled().await;
                    Ok(SourceExit::Cancelled)
                }
            }
        }
    }

    fn session(payloads: Vec<&'static str>, then: Then) -> StreamSession {
        StreamSession::new(
            "s1",
            Arc::new(ScriptSource { payloads, then }),
            Arc::new(RelayConfig::default()),
        )
    }

    fn refused() -> StreamError {
        StreamError::UpstreamConnect {
            url: "http://localhost:1".to_string(),
            message: "refused".to_string(),
        }
    }

    #[tokio::test]
    async fn test_events_in_order_then_completed() {
        let session = session(vec!["a", "b", "c"], Then::Complete);
        let events: Vec<_> = session
            .start(TurnRequest::new("hi"))
            .unwrap()
            .map(|item| item.unwrap().payload)
            .collect()
            .await;
        assert_eq!(events, vec!["a", "b", "c"]);
        assert_eq!(session.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let session = session(vec![], Then::Complete);
        let _events = session.start(TurnRequest::new("hi")).unwrap();
        let err = session.start(TurnRequest::new("hi")).unwrap_err();
        assert!(matches!(err, RelayError::AlreadyStarted { .. }));
    }

    #[tokio::test]
    async fn test_failure_is_last_item_and_recorded() {
        let err = StreamError::Decode {
            message: "bad".to_string(),
        };
        let session = session(vec!["a"], Then::Fail(err.clone()));
        let items: Vec<_> = session.start(TurnRequest::new("hi")).unwrap().collect().await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[1], Err(err.clone()));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(session.failure(), Some(err));
    }

    #[tokio::test]
    async fn test_wait_connected_reports_connect_failure() {
        let session = session(vec![], Then::Fail(refused()));
        let _events = session.start(TurnRequest::new("hi")).unwrap();
        assert_eq!(session.wait_connected().await, Err(refused()));
    }

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let session = session(vec!["a"], Then::Hang);
        let mut events = session.start(TurnRequest::new("hi")).unwrap();
        assert_eq!(events.next().await.unwrap().unwrap().payload, "a");

        session.cancel();
        session.cancel();
        assert_eq!(session.wait_terminal().await, SessionState::Cancelled);
        session.cancel();
        assert!(events.next().await.is_none());
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(session.failure().is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_start_runs_finalizer_once() {
        let session = session(vec!["a"], Then::Complete);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        session.set_finalizer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        session.cancel();
        session.cancel();
        assert_eq!(session.state(), SessionState::Cancelled);

        let events: Vec<_> = session.start(TurnRequest::new("hi")).unwrap().collect().await;
        assert!(events.is_empty());
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_consumer_drop_is_cancellation() {
        let session = session(vec!["a"; 100], Then::Complete);
        let mut events = session.start(TurnRequest::new("hi")).unwrap();
        events.next().await;
        drop(events);
        assert_eq!(session.wait_terminal().await, SessionState::Cancelled);
    }

    #[tokio::test]
    async fn test_abort_moves_live_session_to_cancelled() {
        let session = session(vec![], Then::Hang);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        session.set_finalizer(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let _events = session.start(TurnRequest::new("hi")).unwrap();
        session.wait_connected().await.unwrap();

        session.abort().await;
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overall_cap_fails_session() {
        let config = RelayConfig::default().with_overall_timeout(Duration::from_secs(5));
        let session = StreamSession::new(
            "s1",
            Arc::new(ScriptSource {
                payloads: vec!["a"],
                then: Then::Hang,
            }),
            Arc::new(config),
        );
        let items: Vec<_> = session.start(TurnRequest::new("hi")).unwrap().collect().await;
        assert_eq!(items.last(), Some(&Err(StreamError::overall(Duration::from_secs(5)))));
        assert_eq!(session.state(), SessionState::Failed);
    }
}
