//! Incremental relay of an upstream `text/event-stream`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::RelayConfig;
use crate::error::StreamError;
use crate::models::TurnRequest;
use crate::session::{EventSink, UpstreamHandle};
use crate::sse::{decode_line, LineBuffer, LineOutcome};
use crate::traits::{SourceExit, TurnSource, UpstreamClient};

/// Primary source: opens the event stream and forwards each decoded
/// payload as soon as its line is complete.
pub struct SseRelaySource {
    upstream: Arc<dyn UpstreamClient>,
    inactivity: Duration,
    max_line_bytes: usize,
}

enum Flow {
    Continue,
    Exit(SourceExit),
}

impl SseRelaySource {
    pub fn new(upstream: Arc<dyn UpstreamClient>, config: &RelayConfig) -> Self {
        Self {
            upstream,
            inactivity: config.inactivity_timeout,
            max_line_bytes: config.max_line_bytes,
        }
    }

    async fn relay(
        &self,
        handle: &mut UpstreamHandle,
        sink: &EventSink,
    ) -> Result<SourceExit, StreamError> {
        let mut lines = LineBuffer::new(self.max_line_bytes);
        let mut deadline = Instant::now() + self.inactivity;

        loop {
            while let Some(line) = lines.next_line() {
                if let Flow::Exit(exit) = self.handle_line(&line?, sink).await {
                    return Ok(exit);
                }
                deadline = Instant::now() + self.inactivity;
            }

            let chunk = tokio::select! {
                biased;
                _ = sink.cancelled() => return Ok(SourceExit::Cancelled),
                chunk = tokio::time::timeout_at(deadline, handle.next_chunk()) => chunk,
            };

            match chunk {
                Err(_) => {
                    debug!(
                        session_id = %sink.session_id(),
                        window_secs = self.inactivity.as_secs(),
                        "Upstream went quiet"
                    );
                    return Err(StreamError::inactivity(self.inactivity));
                }
                Ok(Some(Ok(bytes))) => lines.push(&bytes)?,
                Ok(Some(Err(err))) => return Err(StreamError::from_body(err)),
                Ok(None) => {
                    // Body ended without the sentinel; a trailing unterminated
                    // line is still content.
                    if let Some(line) = lines.finish() {
                        if let Flow::Exit(exit) = self.handle_line(&line?, sink).await {
                            return Ok(exit);
                        }
                    }
                    debug!(session_id = %sink.session_id(), "Upstream body ended");
                    return Ok(SourceExit::Completed);
                }
            }
        }
    }

    async fn handle_line(&self, line: &str, sink: &EventSink) -> Flow {
        match decode_line(line) {
            LineOutcome::Ignored => {
                trace!(session_id = %sink.session_id(), "Ignored line");
                Flow::Continue
            }
            LineOutcome::Event(event) if event.is_terminal => {
                debug!(session_id = %sink.session_id(), "Received [DONE]");
                Flow::Exit(SourceExit::Completed)
            }
            LineOutcome::Event(event) => match sink.emit(event).await {
                Ok(()) => Flow::Continue,
                Err(_) => Flow::Exit(SourceExit::Cancelled),
            },
        }
    }
}

#[async_trait]
impl TurnSource for SseRelaySource {
    fn name(&self) -> &'static str {
        "sse"
    }

    async fn produce(&self, request: TurnRequest, sink: &EventSink) -> Result<SourceExit, StreamError> {
        let url = self.upstream.stream_url();

        let opened = tokio::select! {
            biased;
            _ = sink.cancelled() => return Ok(SourceExit::Cancelled),
            opened = tokio::time::timeout(self.inactivity, self.upstream.open_stream(&request)) => opened,
        };

        let body = match opened {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => return Err(StreamError::from_connect(err, &url)),
            Err(_) => return Err(StreamError::inactivity(self.inactivity)),
        };

        let mut handle = UpstreamHandle::new(body, sink.session_id());
        sink.mark_streaming();
        debug!(session_id = %sink.session_id(), url = %url, "Upstream stream open");

        let result = self.relay(&mut handle, sink).await;
        handle.release();
        result
    }
}
