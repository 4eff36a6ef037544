//! Common test utilities for integration tests.
//!
//! Fixtures for building relays against a wiremock server or the scripted
//! mock upstream.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chat_relay::adapters::mock::{MockUpstream, RecordingSink};
use chat_relay::publisher::BatchPolicy;
use chat_relay::retry::RetryPolicy;
use chat_relay::{ChatRelay, RelayConfig};

/// Relay config with short timeouts, suitable for real-time HTTP tests.
pub fn fast_config(base_url: &str) -> RelayConfig {
    RelayConfig::default()
        .with_base_url(base_url)
        .with_inactivity_timeout(Duration::from_millis(500))
        .with_overall_timeout(Duration::from_secs(5))
        .with_retry(RetryPolicy::new(3, Duration::from_millis(10)))
        .with_batch(BatchPolicy::new(1))
}

/// Relay talking HTTP to `base_url`.
pub fn http_relay(config: RelayConfig) -> ChatRelay {
    ChatRelay::with_reqwest(config).expect("relay should build")
}

/// Relay over a scripted mock upstream.
pub fn mock_relay(config: RelayConfig, upstream: &MockUpstream) -> ChatRelay {
    ChatRelay::new(config, Arc::new(upstream.clone())).expect("relay should build")
}

/// Encode payloads as an SSE body, one event per payload.
pub fn sse_body(payloads: &[&str]) -> String {
    payloads
        .iter()
        .map(|payload| format!("data: {}\n\n", payload))
        .collect()
}

pub fn sink() -> (RecordingSink, Arc<RecordingSink>) {
    let sink = RecordingSink::new();
    (sink.clone(), Arc::new(sink))
}
