//! Turn sources.
//!
//! - [`SseRelaySource`] - relays the upstream event stream line by line
//! - [`SimulatedSource`] - fetches the full response and reveals it at a
//!   simulated cadence

mod simulated;
mod sse_relay;

pub use simulated::SimulatedSource;
pub use sse_relay::SseRelaySource;
