//! Concrete implementations of trait abstractions.
//!
//! # Adapters
//!
//! - [`ReqwestUpstream`] - chat backend client using reqwest
//!
//! # Mock Implementations
//!
//! The [`mock`] submodule provides test doubles:
//! - [`mock::MockUpstream`] - scripted upstream replies
//! - [`mock::RecordingSink`] - records UI notifications

pub mod mock;
pub mod reqwest_upstream;

pub use mock::{MockUpstream, RecordingSink};
pub use reqwest_upstream::ReqwestUpstream;
