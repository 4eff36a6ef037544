//! Recording UI sink for testing.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::models::{TurnStatus, UiUpdate};
use crate::session::lock;
use crate::traits::{SinkError, UiSink};

/// UI sink that records every notification.
///
/// Can simulate a UI that goes away after a number of notifications, or a
/// slow transport.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    updates: Arc<Mutex<Vec<UiUpdate>>>,
    disconnect_after: Option<usize>,
    latency: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `count` notifications, then report the UI as disconnected.
    pub fn disconnecting_after(count: usize) -> Self {
        Self {
            disconnect_after: Some(count),
            ..Self::default()
        }
    }

    /// Take `latency` to accept each notification.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Get all recorded notifications.
    pub fn updates(&self) -> Vec<UiUpdate> {
        lock(&self.updates).clone()
    }

    /// Accumulated text of each notification, in order.
    pub fn texts(&self) -> Vec<String> {
        lock(&self.updates).iter().map(|u| u.text.clone()).collect()
    }

    pub fn last(&self) -> Option<UiUpdate> {
        lock(&self.updates).last().cloned()
    }

    /// Status of the last notification.
    pub fn final_status(&self) -> Option<TurnStatus> {
        self.last().map(|u| u.status)
    }
}

#[async_trait]
impl UiSink for RecordingSink {
    async fn notify(&self, update: UiUpdate) -> Result<(), SinkError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut updates = lock(&self.updates);
        if self.disconnect_after.is_some_and(|limit| updates.len() >= limit) {
            return Err(SinkError::Disconnected);
        }
        updates.push(update);
        Ok(())
    }
}
