//! Mock implementations for testing.
//!
//! Test doubles for the trait seams, enabling tests without network access.
//!
//! # Available Mocks
//!
//! - [`MockUpstream`] - scripted upstream replies with connection accounting
//! - [`RecordingSink`] - UI sink that records notifications

pub mod sink;
pub mod upstream;

pub use sink::RecordingSink;
pub use upstream::{MockChunk, MockReply, MockUpstream, RecordedCall};
