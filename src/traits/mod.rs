//! Trait abstractions for dependency injection and testability.
//!
//! # Traits
//!
//! - [`UpstreamClient`] - chat backend (event stream and full completion)
//! - [`TurnSource`] - producer of one turn's events
//! - [`UiSink`] - receiver of UI notifications

pub mod sink;
pub mod source;
pub mod upstream;

pub use sink::{SinkError, UiSink};
pub use source::{SourceExit, TurnSource};
pub use upstream::{ByteStream, HttpError, UpstreamClient};
