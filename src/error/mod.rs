//! Error handling for the relay.
//!
//! - **Error Class**: Transient / Timeout / Fatal, the only input to retry decisions
//! - **Stream Errors**: what can go wrong opening, reading and decoding an upstream stream
//! - **Unified Error Type**: `RelayError` adds retry exhaustion and lifecycle misuse
//! - **Result Type Alias**: `RelayResult<T>`
//!
//! | Error | Class | Retried |
//! |-------|-------|---------|
//! | UpstreamConnect | Transient | Yes, up to the ceiling |
//! | UpstreamTimeout | Timeout | No |
//! | UpstreamProtocol | Fatal | No |
//! | Decode | Fatal | No |
//!
//! Cancellation is not an error; it is a terminal session state.

mod category;
mod relay_error;
mod result;
mod stream;

pub use category::ErrorClass;
pub use relay_error::RelayError;
pub use result::RelayResult;
pub use stream::{StreamError, CONNECTION_TROUBLE_MESSAGE};
