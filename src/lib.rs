//! Chat Relay - streaming relay between an SSE chat backend and live UI sessions
//!
//! This library exposes modules for use in integration tests.

pub mod adapters;
pub mod config;
pub mod connections;
pub mod error;
pub mod models;
pub mod publisher;
pub mod registry;
pub mod relay;
pub mod retry;
pub mod session;
pub mod simulator;
pub mod source;
pub mod sse;
pub mod traits;
pub mod turn;

pub use config::{ConfigError, Delivery, RelayConfig};
pub use error::{ErrorClass, RelayError, RelayResult, StreamError};
pub use models::{Attachment, TurnReport, TurnRequest, TurnStatus, UiUpdate};
pub use relay::ChatRelay;
