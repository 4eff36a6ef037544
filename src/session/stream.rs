//! Consumer side of a session's event channel.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use crate::error::StreamError;
use crate::sse::StreamEvent;

/// Lazy, ordered sequence of a session's events.
///
/// Ends after the producer finished its cleanup. A failure arrives as the
/// last item. Dropping it early is observed by the producer as cancellation.
pub struct EventStream {
    rx: mpsc::Receiver<Result<StreamEvent, StreamError>>,
}

impl EventStream {
    pub(crate) fn new(rx: mpsc::Receiver<Result<StreamEvent, StreamError>>) -> Self {
        Self { rx }
    }

    /// Receive the next item.
    pub async fn recv(&mut self) -> Option<Result<StreamEvent, StreamError>> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}
