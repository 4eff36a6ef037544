//! Buffer-then-simulate source for upstreams that cannot stream.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::debug;

use crate::config::RelayConfig;
use crate::error::StreamError;
use crate::models::TurnRequest;
use crate::session::{lock, EventSink};
use crate::simulator::{play, Reveal, RevealConfig, RevealControl, RevealExit};
use crate::sse::StreamEvent;
use crate::traits::{SourceExit, TurnSource, UpstreamClient};

/// Fetches the complete response, then reveals it at a simulated cadence.
///
/// A user stop completes the reveal instantly through
/// [`SimulatedSource::complete_now`]: the rest of the text goes out as one
/// chunk and the turn still counts as completed. Cancelling the session
/// (supersession, teardown, shutdown) stops the reveal where it is.
pub struct SimulatedSource {
    upstream: Arc<dyn UpstreamClient>,
    reveal: RevealConfig,
    controls: Mutex<HashMap<String, RevealControl>>,
}

impl SimulatedSource {
    pub fn new(upstream: Arc<dyn UpstreamClient>, config: &RelayConfig) -> Self {
        Self {
            upstream,
            reveal: config.reveal.clone(),
            controls: Mutex::new(HashMap::new()),
        }
    }

    /// Playback control of the reveal running for `session_id`, if any.
    pub fn control(&self, session_id: &str) -> Option<RevealControl> {
        lock(&self.controls).get(session_id).cloned()
    }

    /// Flush the reveal running for `session_id`. False if none is running.
    pub fn complete_now(&self, session_id: &str) -> bool {
        match self.control(session_id) {
            Some(control) if control.is_running() => {
                control.complete_now();
                true
            }
            _ => false,
        }
    }
}

/// Keeps a reveal's control reachable by session id while it plays.
struct Registered<'a> {
    controls: &'a Mutex<HashMap<String, RevealControl>>,
    session_id: &'a str,
    control: RevealControl,
}

impl<'a> Registered<'a> {
    fn new(
        controls: &'a Mutex<HashMap<String, RevealControl>>,
        session_id: &'a str,
        control: RevealControl,
    ) -> Self {
        lock(controls).insert(session_id.to_string(), control.clone());
        Self {
            controls,
            session_id,
            control,
        }
    }
}

impl Drop for Registered<'_> {
    fn drop(&mut self) {
        let mut controls = lock(self.controls);
        if controls
            .get(self.session_id)
            .is_some_and(|current| current.same(&self.control))
        {
            controls.remove(self.session_id);
        }
    }
}

#[async_trait]
impl TurnSource for SimulatedSource {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn produce(&self, request: TurnRequest, sink: &EventSink) -> Result<SourceExit, StreamError> {
        let url = self.upstream.complete_url();

        let completion = tokio::select! {
            biased;
            _ = sink.cancelled() => return Ok(SourceExit::Cancelled),
            completion = self.upstream.complete(&request) => {
                completion.map_err(|err| StreamError::from_connect(err, &url))?
            }
        };

        sink.mark_streaming();
        debug!(
            session_id = %sink.session_id(),
            chars = completion.response.chars().count(),
            total_tokens = completion.usage.total_tokens,
            "Revealing buffered response"
        );

        let control = RevealControl::new();
        let _registered = Registered::new(&self.controls, sink.session_id(), control.clone());

        let reveal = Reveal::new(&completion.response, &self.reveal);
        let exit = play(reveal, &control, sink.token(), move |chunk| async move {
            sink.deliver(StreamEvent::payload(chunk)).await.is_ok()
        })
        .await;

        match exit {
            RevealExit::Finished | RevealExit::FinishedEarly => Ok(SourceExit::Completed),
            RevealExit::Cancelled | RevealExit::ConsumerGone => Ok(SourceExit::Cancelled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockReply, MockUpstream};
    use crate::session::{SessionState, StreamSession};
    use futures::StreamExt;
    use std::time::Duration;

    fn config() -> RelayConfig {
        RelayConfig::default().with_reveal(RevealConfig::new(20, Duration::from_millis(50)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_reveals_full_response() {
        let upstream = MockUpstream::new().with_reply(MockReply::Completion("Hi. Ok".to_string()));
        let config = Arc::new(config());
        let source = Arc::new(SimulatedSource::new(Arc::new(upstream.clone()), &config));
        let session = StreamSession::new("s1", source.clone(), config);

        let chunks: Vec<String> = session
            .start(TurnRequest::new("hello"))
            .unwrap()
            .map(|item| item.unwrap().payload)
            .collect()
            .await;
        assert_eq!(chunks, vec!["H", "i", ".", " ", "O", "k"]);
        assert_eq!(session.state(), SessionState::Completed);
        assert!(source.control("s1").is_none());
        assert_eq!(upstream.calls()[0].method, "POST");
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_now_finishes_instantly() {
        let upstream = MockUpstream::new().with_reply(MockReply::Completion("Done.".to_string()));
        let config = Arc::new(config());
        let source = Arc::new(SimulatedSource::new(Arc::new(upstream), &config));
        let session = StreamSession::new("s1", source.clone(), config);

        let mut events = session.start(TurnRequest::new("hello")).unwrap();
        assert_eq!(events.next().await.unwrap().unwrap().payload, "D");
        let control = source.control("s1").unwrap();
        assert!(control.is_running());

        assert!(source.complete_now("s1"));
        assert_eq!(events.next().await.unwrap().unwrap().payload, "one.");
        assert!(events.next().await.is_none());
        assert_eq!(session.state(), SessionState::Completed);
        assert!(!control.is_running());
        assert!(!source.complete_now("s1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_reveal_without_flushing() {
        let upstream = MockUpstream::new().with_reply(MockReply::Completion("Done.".to_string()));
        let config = Arc::new(config());
        let source = Arc::new(SimulatedSource::new(Arc::new(upstream), &config));
        let session = StreamSession::new("s1", source.clone(), config);

        let mut events = session.start(TurnRequest::new("hello")).unwrap();
        assert_eq!(events.next().await.unwrap().unwrap().payload, "D");

        session.cancel();
        assert!(events.next().await.is_none());
        assert_eq!(session.state(), SessionState::Cancelled);
        assert!(source.control("s1").is_none());
    }

    #[tokio::test]
    async fn test_completion_failure_is_classified() {
        let upstream = MockUpstream::new().with_reply(MockReply::Refuse);
        let config = Arc::new(config());
        let source = Arc::new(SimulatedSource::new(Arc::new(upstream), &config));
        let session = StreamSession::new("s1", source, config);

        let _events = session.start(TurnRequest::new("hello")).unwrap();
        let err = session.wait_connected().await.unwrap_err();
        assert!(matches!(err, StreamError::UpstreamConnect { .. }));
    }
}
