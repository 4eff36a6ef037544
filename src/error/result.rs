//! Result type alias for relay operations.

use super::relay_error::RelayError;

/// Type alias for Results using RelayError.
pub type RelayResult<T> = Result<T, RelayError>;
