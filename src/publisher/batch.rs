//! Notification coalescing.

use std::time::Duration;

use tokio::time::Instant;

/// When accumulated payloads are pushed to the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPolicy {
    /// Notify after this many new payloads.
    pub batch_size: usize,
    /// Notify pending payloads at the latest this long after the oldest of
    /// them arrived. `None` disables the timer.
    pub max_batch_delay: Option<Duration>,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            batch_size: 3,
            max_batch_delay: Some(Duration::from_millis(200)),
        }
    }
}

impl BatchPolicy {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size,
            ..Default::default()
        }
    }

    pub fn with_max_batch_delay(mut self, delay: Option<Duration>) -> Self {
        self.max_batch_delay = delay;
        self
    }
}

/// Running text buffer plus the bookkeeping deciding when to notify.
#[derive(Debug)]
pub struct Coalescer {
    text: String,
    payloads: usize,
    pending: usize,
    batch_size: usize,
    max_delay: Option<Duration>,
    /// Arrival of the oldest payload not yet notified.
    first_pending: Option<Instant>,
}

impl Coalescer {
    pub fn new(policy: &BatchPolicy) -> Self {
        Self {
            text: String::new(),
            payloads: 0,
            pending: 0,
            batch_size: policy.batch_size.max(1),
            max_delay: policy.max_batch_delay,
            first_pending: None,
        }
    }

    /// Append a payload that arrived at `now`. Returns true when a
    /// notification is due.
    pub fn push(&mut self, payload: &str, now: Instant) -> bool {
        self.text.push_str(payload);
        self.payloads += 1;
        self.pending += 1;
        self.first_pending.get_or_insert(now);
        self.pending >= self.batch_size
    }

    pub fn mark_notified(&mut self) {
        self.pending = 0;
        self.first_pending = None;
    }

    /// When pending payloads must go out, if the timer is enabled. Measured
    /// from the oldest pending payload.
    pub fn flush_deadline(&self) -> Option<Instant> {
        let delay = self.max_delay?;
        self.first_pending.map(|first| first + delay)
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn payloads(&self) -> usize {
        self.payloads
    }

    pub fn has_pending(&self) -> bool {
        self.pending > 0
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
