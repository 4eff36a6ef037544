//! Mock upstream for testing.
//!
//! Replies are scripted per call, in order. Every opened body carries a
//! counter that ticks when the body is dropped, so tests can assert that
//! no upstream connection outlives its session.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::models::{ChatCompletion, TokenUsage, TurnRequest};
use crate::session::lock;
use crate::traits::{ByteStream, HttpError, UpstreamClient};

const MOCK_BASE_URL: &str = "http://mock.upstream";

/// One step of a scripted response body.
#[derive(Debug, Clone)]
pub enum MockChunk {
    /// Deliver these bytes.
    Data(Bytes),
    /// Stay silent for a while.
    Delay(Duration),
    /// Fail the body read.
    Fail(HttpError),
    /// Never produce anything again.
    Hang,
}

impl MockChunk {
    pub fn data(text: &str) -> Self {
        MockChunk::Data(Bytes::copy_from_slice(text.as_bytes()))
    }
}

/// Scripted reply to one upstream call.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with a body made of these steps.
    Stream(Vec<MockChunk>),
    /// Fail before any response (connection refused).
    Refuse,
    /// Answer with a non-success status.
    Status(u16),
    /// Never send response headers.
    StallHeaders,
    /// Full response of the non-streaming endpoint.
    Completion(String),
}

impl MockReply {
    /// A body with one `data:` line per payload, each in its own chunk.
    pub fn sse(payloads: &[&str]) -> Self {
        MockReply::Stream(
            payloads
                .iter()
                .map(|p| MockChunk::data(&format!("data: {}\n\n", p)))
                .collect(),
        )
    }
}

/// A recorded upstream call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// "GET" or "POST"
    pub method: &'static str,
    pub url: String,
    pub request: TurnRequest,
}

/// Counts body drops.
struct ReleaseCounter(Arc<AtomicUsize>);

impl Drop for ReleaseCounter {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mock upstream client.
///
/// # Example
///
/// ```ignore
/// use chat_relay::adapters::mock::{MockReply, MockUpstream};
///
/// let upstream = MockUpstream::new()
///     .with_reply(MockReply::Refuse)
///     .with_reply(MockReply::sse(&["\"Hi\"", "[DONE]"]));
///
/// // ... run a turn ...
/// assert_eq!(upstream.opened(), 1);
/// assert_eq!(upstream.live_handles(), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockUpstream {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    fallback: Arc<Mutex<Option<MockReply>>>,
    calls: Arc<Mutex<Vec<RecordedCall>>>,
    opened: Arc<AtomicUsize>,
    released: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply for the next unanswered call.
    pub fn with_reply(self, reply: MockReply) -> Self {
        self.push_reply(reply);
        self
    }

    pub fn push_reply(&self, reply: MockReply) {
        lock(&self.replies).push_back(reply);
    }

    /// Reply used once the queue is empty.
    pub fn set_fallback(&self, reply: MockReply) {
        *lock(&self.fallback) = Some(reply);
    }

    /// Get all recorded calls.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Bodies handed out so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Bodies dropped so far.
    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Bodies still held by someone.
    pub fn live_handles(&self) -> usize {
        self.opened().saturating_sub(self.released())
    }

    fn next_reply(&self, method: &'static str, url: String, request: &TurnRequest) -> Option<MockReply> {
        lock(&self.calls).push(RecordedCall {
            method,
            url,
            request: request.clone(),
        });
        let queued = lock(&self.replies).pop_front();
        queued.or_else(|| lock(&self.fallback).clone())
    }

    fn body(&self, chunks: Vec<MockChunk>) -> ByteStream {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let counter = ReleaseCounter(self.released.clone());
        let steps: VecDeque<MockChunk> = chunks.into();

        Box::pin(futures::stream::unfold(
            (steps, counter),
            |(mut steps, counter)| async move {
                loop {
                    match steps.pop_front()? {
                        MockChunk::Data(bytes) => return Some((Ok(bytes), (steps, counter))),
                        MockChunk::Fail(err) => return Some((Err(err), (steps, counter))),
                        MockChunk::Delay(delay) => tokio::time::sleep(delay).await,
                        MockChunk::Hang => std::future::pending::<()>().await,
                    }
                }
            },
        ))
    }

    fn refusal() -> HttpError {
        HttpError::ConnectionFailed("connection refused".to_string())
    }

    fn status(status: u16) -> HttpError {
        HttpError::ServerError {
            status,
            message: format!("mock status {}", status),
        }
    }
}

#[async_trait]
impl UpstreamClient for MockUpstream {
    fn stream_url(&self) -> String {
        format!("{}/api/chat/stream", MOCK_BASE_URL)
    }

    fn complete_url(&self) -> String {
        format!("{}/api/chat", MOCK_BASE_URL)
    }

    async fn open_stream(&self, request: &TurnRequest) -> Result<ByteStream, HttpError> {
        let method = if request.requires_body() { "POST" } else { "GET" };
        match self.next_reply(method, self.stream_url(), request) {
            Some(MockReply::Stream(chunks)) => Ok(self.body(chunks)),
            Some(MockReply::Refuse) => Err(Self::refusal()),
            Some(MockReply::Status(status)) => Err(Self::status(status)),
            Some(MockReply::StallHeaders) => std::future::pending().await,
            Some(MockReply::Completion(_)) => Err(HttpError::Other(
                "Completion reply on stream request".to_string(),
            )),
            None => Err(HttpError::Other("No mock reply queued".to_string())),
        }
    }

    async fn complete(&self, request: &TurnRequest) -> Result<ChatCompletion, HttpError> {
        match self.next_reply("POST", self.complete_url(), request) {
            Some(MockReply::Completion(response)) => Ok(ChatCompletion {
                response,
                usage: TokenUsage::default(),
                cost: 0.0,
            }),
            Some(MockReply::Refuse) => Err(Self::refusal()),
            Some(MockReply::Status(status)) => Err(Self::status(status)),
            Some(MockReply::StallHeaders) => std::future::pending().await,
            Some(MockReply::Stream(_)) => Err(HttpError::Other(
                "Stream reply on completion request".to_string(),
            )),
            None => Err(HttpError::Other("No mock reply queued".to_string())),
        }
    }
}
