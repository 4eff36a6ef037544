//! Relay configuration.
//!
//! Every timeout, ceiling and batching knob lives here and is handed to the
//! registry, sessions and publisher at construction, so tests can inject
//! short values.
//!
//! # Example
//!
//! ```ignore
//! use chat_relay::config::RelayConfig;
//!
//! let config = RelayConfig::default()
//!     .with_base_url("http://localhost:5000")
//!     .with_inactivity_timeout(Duration::from_secs(10));
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::models::TurnRequest;
use crate::publisher::BatchPolicy;
use crate::retry::RetryPolicy;
use crate::simulator::RevealConfig;

/// Default backend address used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000";

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// How a turn's content reaches the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Incremental relay of the upstream event stream.
    Streaming,
    /// Fetch the full response, then reveal it at a simulated cadence.
    Simulated,
}

/// Configuration for the relay core.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Backend base URL, without trailing slash
    pub base_url: String,
    /// Path of the `text/event-stream` endpoint
    pub stream_path: String,
    /// Path of the non-streaming chat endpoint
    pub complete_path: String,
    /// Maximum silence between upstream lines (keep-alives included)
    pub inactivity_timeout: Duration,
    /// Wall-clock cap for a whole turn
    pub overall_timeout: Duration,
    /// TCP/TLS connect timeout
    pub connect_timeout: Duration,
    /// How long `replace` waits for a superseded session before forcing it
    pub replace_grace: Duration,
    /// Capacity of the channel between a session's producer and its consumer
    pub channel_capacity: usize,
    /// Longest accepted upstream line
    pub max_line_bytes: usize,
    pub retry: RetryPolicy,
    pub batch: BatchPolicy,
    pub reveal: RevealConfig,
    /// The upstream supports incremental delivery at all
    pub streaming_supported: bool,
    /// The upstream streams body-carrying (attachment) requests
    pub stream_attachments: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_path: "/api/chat/stream".to_string(),
            complete_path: "/api/chat".to_string(),
            inactivity_timeout: Duration::from_secs(30),
            overall_timeout: Duration::from_secs(300),
            connect_timeout: Duration::from_secs(10),
            replace_grace: Duration::from_secs(2),
            channel_capacity: 32,
            max_line_bytes: 1024 * 1024,
            retry: RetryPolicy::default(),
            batch: BatchPolicy::default(),
            reveal: RevealConfig::default(),
            streaming_supported: true,
            stream_attachments: true,
        }
    }
}

impl RelayConfig {
    /// Create a new RelayConfig with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `RELAY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("RELAY_BASE_URL") {
            config.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "RELAY_INACTIVITY_TIMEOUT_SECS")? {
            config.inactivity_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "RELAY_OVERALL_TIMEOUT_SECS")? {
            config.overall_timeout = Duration::from_secs(secs);
        }
        if let Some(ceiling) = parse_var::<u32, _>(&lookup, "RELAY_RETRY_CEILING")? {
            config.retry.ceiling = ceiling;
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, "RELAY_BATCH_SIZE")? {
            config.batch.batch_size = size;
        }
        if let Some(value) = lookup("RELAY_STREAMING") {
            config.streaming_supported = parse_flag("RELAY_STREAMING", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the relay hang or spin.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.inactivity_timeout.is_zero() {
            return Err(ConfigError::Zero("inactivity_timeout"));
        }
        if self.overall_timeout.is_zero() {
            return Err(ConfigError::Zero("overall_timeout"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Zero("channel_capacity"));
        }
        if self.retry.ceiling == 0 {
            return Err(ConfigError::Zero("retry.ceiling"));
        }
        if self.batch.batch_size == 0 {
            return Err(ConfigError::Zero("batch.batch_size"));
        }
        if self.reveal.chars_per_second == 0 {
            return Err(ConfigError::Zero("reveal.chars_per_second"));
        }
        Ok(())
    }

    /// Pick the delivery strategy for a request.
    pub fn delivery_for(&self, request: &TurnRequest) -> Delivery {
        if !self.streaming_supported {
            return Delivery::Simulated;
        }
        if !request.attachments.is_empty() && !self.stream_attachments {
            return Delivery::Simulated;
        }
        Delivery::Streaming
    }

    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url, self.stream_path)
    }

    pub fn complete_url(&self) -> String {
        format!("{}{}", self.base_url, self.complete_path)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn with_overall_timeout(mut self, timeout: Duration) -> Self {
        self.overall_timeout = timeout;
        self
    }

    pub fn with_replace_grace(mut self, grace: Duration) -> Self {
        self.replace_grace = grace;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_max_line_bytes(mut self, max: usize) -> Self {
        self.max_line_bytes = max;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_batch(mut self, batch: BatchPolicy) -> Self {
        self.batch = batch;
        self
    }

    pub fn with_reveal(mut self, reveal: RevealConfig) -> Self {
        self.reveal = reveal;
        self
    }

    pub fn with_streaming_supported(mut self, supported: bool) -> Self {
        self.streaming_supported = supported;
        self
    }

    pub fn with_stream_attachments(mut self, supported: bool) -> Self {
        self.stream_attachments = supported;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn parse_flag(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Attachment;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.inactivity_timeout, Duration::from_secs(30));
        assert_eq!(config.overall_timeout, Duration::from_secs(300));
        assert_eq!(config.retry.ceiling, 3);
        assert_eq!(config.retry.base_delay, Duration::from_millis(500));
        assert!(config.validate().is_ok());
        assert_eq!(config.stream_url(), "http://localhost:5000/api/chat/stream");
    }

    #[test]
    fn test_lookup_overrides() {
        let config = RelayConfig::from_lookup(lookup_from(&[
            ("RELAY_BASE_URL", "https://chat.example.com/"),
            ("RELAY_INACTIVITY_TIMEOUT_SECS", "5"),
            ("RELAY_RETRY_CEILING", "4"),
            ("RELAY_BATCH_SIZE", "1"),
            ("RELAY_STREAMING", "off"),
        ]))
        .unwrap();
        assert_eq!(config.base_url, "https://chat.example.com");
        assert_eq!(config.inactivity_timeout, Duration::from_secs(5));
        assert_eq!(config.retry.ceiling, 4);
        assert_eq!(config.batch.batch_size, 1);
        assert!(!config.streaming_supported);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = RelayConfig::from_lookup(lookup_from(&[("RELAY_RETRY_CEILING", "many")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                key: "RELAY_RETRY_CEILING".to_string(),
                value: "many".to_string()
            }
        );

        let err = RelayConfig::from_lookup(lookup_from(&[("RELAY_INACTIVITY_TIMEOUT_SECS", "0")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::Zero("inactivity_timeout"));
        assert_eq!(err.to_string(), "inactivity_timeout must be greater than zero");
    }

    #[test]
    fn test_delivery_selection() {
        let text = TurnRequest::new("hi");
        let with_file = TurnRequest::new("hi")
            .with_attachment(Attachment::from_bytes("a.png", "image/png", &[1, 2, 3]));

        let config = RelayConfig::default();
        assert_eq!(config.delivery_for(&text), Delivery::Streaming);
        assert_eq!(config.delivery_for(&with_file), Delivery::Streaming);

        let config = RelayConfig::default().with_stream_attachments(false);
        assert_eq!(config.delivery_for(&text), Delivery::Streaming);
        assert_eq!(config.delivery_for(&with_file), Delivery::Simulated);

        let config = RelayConfig::default().with_streaming_supported(false);
        assert_eq!(config.delivery_for(&text), Delivery::Simulated);
    }
}
