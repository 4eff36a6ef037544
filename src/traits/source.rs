//! Turn source trait abstraction.
//!
//! A turn source produces the content of one turn into a session's
//! [`EventSink`]. The relaying of a live event stream and the
//! buffer-then-reveal fallback both sit behind it.

use async_trait::async_trait;

use crate::error::StreamError;
use crate::models::TurnRequest;
use crate::session::EventSink;

/// How a source finished without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceExit {
    /// All content was delivered.
    Completed,
    /// Production stopped because the session was cancelled or the
    /// consumer went away.
    Cancelled,
}

/// Producer of one turn's events.
///
/// Implementations must release every upstream resource they acquired
/// before returning, whatever the outcome.
#[async_trait]
pub trait TurnSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Produce the turn's events into `sink`.
    ///
    /// Call [`EventSink::mark_streaming`] once the upstream has answered.
    /// Cancellation is reported as `Ok(SourceExit::Cancelled)`, never as an
    /// error.
    async fn produce(&self, request: TurnRequest, sink: &EventSink) -> Result<SourceExit, StreamError>;
}
