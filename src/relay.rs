//! Relay facade.
//!
//! [`ChatRelay`] wires the registry, turn sources, connection hub and
//! publisher together. The hosting layer calls [`ChatRelay::submit_turn`]
//! once per user message and gets a [`TurnReport`] back when the turn ends.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::adapters::ReqwestUpstream;
use crate::config::{ConfigError, Delivery, RelayConfig};
use crate::connections::ConnectionHub;
use crate::error::{RelayError, RelayResult};
use crate::models::{TurnReport, TurnRequest, TurnStatus};
use crate::publisher::Publisher;
use crate::registry::SessionRegistry;
use crate::simulator::RevealControl;
use crate::source::{SimulatedSource, SseRelaySource};
use crate::traits::{TurnSource, UiSink, UpstreamClient};
use crate::turn::{TurnRunner, TurnStart};

/// Streaming relay between one chat backend and many UI sessions.
#[derive(Clone)]
pub struct ChatRelay {
    config: Arc<RelayConfig>,
    registry: SessionRegistry,
    hub: ConnectionHub,
    runner: TurnRunner,
    streaming: Arc<SseRelaySource>,
    simulated: Arc<SimulatedSource>,
}

impl ChatRelay {
    /// Build a relay over `upstream`. Fails if `config` does not validate.
    pub fn new(config: RelayConfig, upstream: Arc<dyn UpstreamClient>) -> RelayResult<Self> {
        config.validate().map_err(RelayError::Config)?;
        let config = Arc::new(config);
        let registry = SessionRegistry::new(config.clone());
        let hub = ConnectionHub::new(registry.clone());
        let runner = TurnRunner::new(registry.clone(), config.clone());
        let streaming = Arc::new(SseRelaySource::new(upstream.clone(), &config));
        let simulated = Arc::new(SimulatedSource::new(upstream, &config));

        Ok(Self {
            config,
            registry,
            hub,
            runner,
            streaming,
            simulated,
        })
    }

    /// Build a relay talking HTTP to `config.base_url`.
    pub fn with_reqwest(config: RelayConfig) -> RelayResult<Self> {
        let upstream = ReqwestUpstream::new(&config).map_err(|err| {
            RelayError::Config(ConfigError::InvalidValue {
                key: "base_url".to_string(),
                value: format!("{} ({})", config.base_url, err),
            })
        })?;
        Self::new(config, Arc::new(upstream))
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    /// Register a UI connection. Turns submitted for `session_id` stop
    /// when the connection is torn down.
    pub fn on_connection_established(&self, session_id: &str) -> CancellationToken {
        self.hub.on_connection_established(session_id)
    }

    pub fn on_connection_torn_down(&self, session_id: &str) {
        self.hub.on_connection_torn_down(session_id)
    }

    /// Run one turn for `session_id`, pushing updates into `sink`.
    ///
    /// A turn already running for the session is cancelled and released
    /// first. Upstream failures end in a report with a `Failed` status;
    /// only lifecycle errors (shutdown) are returned as `Err`.
    pub async fn submit_turn(
        &self,
        session_id: &str,
        request: TurnRequest,
        sink: Arc<dyn UiSink>,
    ) -> RelayResult<TurnReport> {
        let started_at = Utc::now();
        let delivery = self.config.delivery_for(&request);
        let source: Arc<dyn TurnSource> = match delivery {
            Delivery::Streaming => self.streaming.clone(),
            Delivery::Simulated => self.simulated.clone(),
        };
        let parent = self
            .hub
            .connection_token(session_id)
            .unwrap_or_else(|| self.registry.root_token().child_token());

        info!(session_id, delivery = ?delivery, "Turn submitted");

        let publisher = Publisher::new(sink, self.config.batch.clone());
        let start = self
            .runner
            .start_turn(session_id, request, source, &parent)
            .await?;

        let report = |status, text, payloads, notifications, attempts| TurnReport {
            session_id: session_id.to_string(),
            status,
            text,
            payloads,
            notifications,
            attempts,
            started_at,
            finished_at: Utc::now(),
        };

        match start {
            TurnStart::Started(turn) => {
                let attempts = turn.attempts;
                let turn_id = turn.turn_id;
                let outcome = publisher.publish(session_id, turn, &parent).await;
                self.registry.end_turn(session_id, turn_id);
                if let Some(err) = &outcome.failure {
                    error!(session_id, code = err.error_code(), error = %err, "Turn failed");
                }
                Ok(report(
                    outcome.status,
                    outcome.text,
                    outcome.payloads,
                    outcome.notifications,
                    attempts,
                ))
            }
            TurnStart::Stopped { attempts } => {
                let sent = publisher
                    .finish(session_id, String::new(), TurnStatus::Stopped)
                    .await
                    .is_ok();
                Ok(report(TurnStatus::Stopped, String::new(), 0, sent as usize, attempts))
            }
            TurnStart::Failed { attempts, error: err } => {
                error!(
                    session_id,
                    attempts,
                    code = err.error_code(),
                    error = %err,
                    "Turn failed before streaming"
                );
                let status = TurnStatus::Failed {
                    message: err.user_message(),
                };
                let sent = publisher
                    .finish(session_id, String::new(), status.clone())
                    .await
                    .is_ok();
                Ok(report(status, String::new(), 0, sent as usize, attempts))
            }
        }
    }

    /// Stop the turn running for `session_id`, if any.
    ///
    /// A simulated reveal completes instantly instead of stopping.
    pub fn cancel_turn(&self, session_id: &str) {
        if self.simulated.complete_now(session_id) {
            info!(session_id, "Reveal completed by user");
            return;
        }
        info!(session_id, "Turn cancelled by user");
        self.registry.cancel(session_id);
    }

    /// Playback control of a simulated reveal running for `session_id`.
    pub fn reveal_control(&self, session_id: &str) -> Option<RevealControl> {
        self.simulated.control(session_id)
    }

    /// Cancel every turn and wait for all producer tasks to exit.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await
    }
}

impl std::fmt::Debug for ChatRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatRelay")
            .field("base_url", &self.config.base_url)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockChunk, MockReply, MockUpstream, RecordingSink};
    use crate::error::CONNECTION_TROUBLE_MESSAGE;
    use crate::models::Attachment;
    use crate::publisher::BatchPolicy;
    use std::time::Duration;

    fn relay(config: RelayConfig, upstream: &MockUpstream) -> ChatRelay {
        ChatRelay::new(config, Arc::new(upstream.clone())).unwrap()
    }

    #[tokio::test]
    async fn test_submit_turn_streams_to_completion() {
        let upstream = MockUpstream::new()
            .with_reply(MockReply::sse(&["\"Hi\"", "\" there\"", "[DONE]"]));
        let relay = relay(RelayConfig::default(), &upstream);
        let sink = RecordingSink::new();

        let report = relay
            .submit_turn("chat", TurnRequest::new("hello"), Arc::new(sink.clone()))
            .await
            .unwrap();

        assert_eq!(report.status, TurnStatus::Complete);
        assert_eq!(report.text, "Hi there");
        assert_eq!(report.payloads, 2);
        assert_eq!(report.attempts, 1);
        assert!(report.finished_at >= report.started_at);
        assert_eq!(sink.final_status(), Some(TurnStatus::Complete));
        assert!(relay.registry().is_empty());
        assert_eq!(upstream.live_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_turn_reports_exhausted_retries() {
        let upstream = MockUpstream::new();
        upstream.set_fallback(MockReply::Refuse);
        let relay = relay(RelayConfig::default(), &upstream);
        let sink = RecordingSink::new();

        let report = relay
            .submit_turn("chat", TurnRequest::new("hello"), Arc::new(sink.clone()))
            .await
            .unwrap();

        let failed = TurnStatus::Failed {
            message: CONNECTION_TROUBLE_MESSAGE.to_string(),
        };
        assert_eq!(report.status, failed);
        assert_eq!(report.attempts, 3);
        assert_eq!(sink.updates().len(), 1);
        assert_eq!(sink.final_status(), Some(failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_delivery_when_streaming_unsupported() {
        let upstream =
            MockUpstream::new().with_reply(MockReply::Completion("Hello.".to_string()));
        let config = RelayConfig::default().with_streaming_supported(false);
        let relay = relay(config, &upstream);
        let sink = RecordingSink::new();

        let report = relay
            .submit_turn("chat", TurnRequest::new("hello"), Arc::new(sink.clone()))
            .await
            .unwrap();

        assert_eq!(report.status, TurnStatus::Complete);
        assert_eq!(report.text, "Hello.");
        assert_eq!(upstream.calls()[0].url, "http://mock.upstream/api/chat");
    }

    #[tokio::test(start_paused = true)]
    async fn test_attachments_fall_back_when_not_streamable() {
        let upstream = MockUpstream::new().with_reply(MockReply::Completion("Seen.".to_string()));
        let config = RelayConfig::default().with_stream_attachments(false);
        let relay = relay(config, &upstream);
        let request = TurnRequest::new("look")
            .with_attachment(Attachment::from_bytes("a.txt", "text/plain", b"hi"));

        let report = relay
            .submit_turn("chat", request, Arc::new(RecordingSink::new()))
            .await
            .unwrap();
        assert_eq!(report.text, "Seen.");
    }

    #[tokio::test]
    async fn test_cancel_turn_stops_stream() {
        let upstream = MockUpstream::new().with_reply(MockReply::Stream(vec![
            MockChunk::data("data: a\n"),
            MockChunk::Hang,
        ]));
        let relay = relay(RelayConfig::default().with_batch(BatchPolicy::new(1)), &upstream);
        let sink = RecordingSink::new();

        let task = {
            let relay = relay.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                relay
                    .submit_turn("chat", TurnRequest::new("hi"), Arc::new(sink))
                    .await
            })
        };
        while sink.texts().is_empty() {
            tokio::task::yield_now().await;
        }
        relay.cancel_turn("chat");

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.status, TurnStatus::Stopped);
        assert_eq!(report.text, "a");
        assert_eq!(sink.final_status(), Some(TurnStatus::Stopped));
        assert_eq!(upstream.live_handles(), 0);
        assert_eq!(relay.registry().slot_count(), 0);
    }

    #[tokio::test]
    async fn test_connection_teardown_stops_turn() {
        let upstream = MockUpstream::new().with_reply(MockReply::Stream(vec![
            MockChunk::data("data: a\n"),
            MockChunk::Hang,
        ]));
        let relay = relay(RelayConfig::default().with_batch(BatchPolicy::new(1)), &upstream);
        let sink = RecordingSink::new();
        relay.on_connection_established("chat");

        let task = {
            let relay = relay.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                relay
                    .submit_turn("chat", TurnRequest::new("hi"), Arc::new(sink))
                    .await
            })
        };
        while sink.texts().is_empty() {
            tokio::task::yield_now().await;
        }
        relay.on_connection_torn_down("chat");

        let report = task.await.unwrap().unwrap();
        assert_eq!(report.status, TurnStatus::Stopped);
        // The UI is gone, so no final notification is attempted.
        assert_eq!(sink.texts(), vec!["a"]);
        assert_eq!(upstream.live_handles(), 0);
        assert_eq!(relay.registry().slot_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_finished_turns_release_their_keys() {
        let upstream = MockUpstream::new().with_reply(MockReply::Status(502));
        upstream.set_fallback(MockReply::sse(&["\"ok\"", "[DONE]"]));
        let relay = relay(RelayConfig::default(), &upstream);

        let failed = relay
            .submit_turn("broken", TurnRequest::new("hi"), Arc::new(RecordingSink::new()))
            .await
            .unwrap();
        assert!(matches!(failed.status, TurnStatus::Failed { .. }));

        for i in 0..100 {
            let report = relay
                .submit_turn(
                    &format!("tab-{}", i),
                    TurnRequest::new("hi"),
                    Arc::new(RecordingSink::new()),
                )
                .await
                .unwrap();
            assert_eq!(report.status, TurnStatus::Complete);
        }

        assert!(relay.registry().is_empty());
        assert_eq!(relay.registry().slot_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_turn_stops_simulated_reveal() {
        let upstream = MockUpstream::new()
            .with_reply(MockReply::Completion("A long first answer.".to_string()))
            .with_reply(MockReply::Completion("Second.".to_string()));
        let config = RelayConfig::default()
            .with_streaming_supported(false)
            .with_batch(BatchPolicy::new(1));
        let relay = relay(config, &upstream);
        let first_sink = RecordingSink::new();

        let first = {
            let relay = relay.clone();
            let sink = first_sink.clone();
            tokio::spawn(async move {
                relay
                    .submit_turn("chat", TurnRequest::new("one"), Arc::new(sink))
                    .await
            })
        };
        while first_sink.texts().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        let second = relay
            .submit_turn("chat", TurnRequest::new("two"), Arc::new(RecordingSink::new()))
            .await
            .unwrap();
        let first = first.await.unwrap().unwrap();

        assert_eq!(first.status, TurnStatus::Stopped);
        assert_ne!(first.text, "A long first answer.");
        assert_eq!(second.status, TurnStatus::Complete);
        assert_eq!(second.text, "Second.");
        assert_eq!(relay.registry().slot_count(), 0);
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let upstream = MockUpstream::new();
        let relay = relay(RelayConfig::default(), &upstream);
        relay.shutdown().await;

        let result = relay
            .submit_turn("chat", TurnRequest::new("hi"), Arc::new(RecordingSink::new()))
            .await;
        assert!(matches!(result, Err(RelayError::Shutdown)));
        assert!(upstream.calls().is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = RelayConfig::default().with_inactivity_timeout(Duration::ZERO);
        let result = ChatRelay::new(config, Arc::new(MockUpstream::new()));
        assert!(matches!(result, Err(RelayError::Config(ConfigError::Zero(_)))));
    }
}
