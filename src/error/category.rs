//! Error class used by the retry policy.
//!
//! Every upstream failure maps onto exactly one class. The class alone
//! decides whether a turn is re-issued; the concrete error only feeds logs.

use std::fmt;

/// Retry-relevant classification of a relay failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Failure before any response bytes (refused, DNS, TLS).
    /// Retried up to the policy ceiling.
    Transient,

    /// The inactivity window or the overall cap expired.
    /// Never retried: the caller already waited the full window.
    Timeout,

    /// The upstream answered but the answer is unusable
    /// (non-success status, broken framing, undecodable payload).
    Fatal,
}

impl ErrorClass {
    /// Returns true if failures of this class may be re-issued automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient)
    }

    /// Returns a short label for the class suitable for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Timeout => "timeout",
            ErrorClass::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_is_retryable() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(!ErrorClass::Timeout.is_retryable());
        assert!(!ErrorClass::Fatal.is_retryable());
    }

    #[test]
    fn test_class_display() {
        assert_eq!(format!("{}", ErrorClass::Transient), "transient");
        assert_eq!(ErrorClass::Timeout.to_string(), "timeout");
        assert_eq!(ErrorClass::Fatal.as_str(), "fatal");
    }

    #[test]
    fn test_class_hash() {
        use std::collections::HashSet;
        let mut set = HashSet::new();
        set.insert(ErrorClass::Fatal);
        set.insert(ErrorClass::Timeout);
        set.insert(ErrorClass::Fatal);
        assert_eq!(set.len(), 2);
    }
}
