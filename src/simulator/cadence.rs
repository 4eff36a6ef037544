//! Reveal cadence.
//!
//! Pure: decides what the next chunk of a buffered response is and how long
//! to wait before the one after it. The player owns the clock.

use std::time::Duration;

/// Cadence knobs for the simulated reveal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealConfig {
    /// Nominal reveal speed.
    pub chars_per_second: u32,
    /// Timer period.
    pub tick: Duration,
    /// Ticks to wait after a sentence-ending chunk.
    pub sentence_pause_ticks: u32,
}

impl Default for RevealConfig {
    fn default() -> Self {
        Self {
            chars_per_second: 60,
            tick: Duration::from_millis(30),
            sentence_pause_ticks: 4,
        }
    }
}

impl RevealConfig {
    pub fn new(chars_per_second: u32, tick: Duration) -> Self {
        Self {
            chars_per_second,
            tick,
            ..Default::default()
        }
    }

    pub fn with_sentence_pause_ticks(mut self, ticks: u32) -> Self {
        self.sentence_pause_ticks = ticks;
        self
    }

    /// Characters revealed per tick, between 1 and 5.
    pub fn chars_per_tick(&self) -> usize {
        let raw = (f64::from(self.chars_per_second) * self.tick.as_secs_f64()).round();
        (raw as usize).clamp(1, 5)
    }
}

/// One reveal step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevealStep {
    pub chunk: String,
    /// Wait before the next step.
    pub next_delay: Duration,
}

/// Walks a buffered response chunk by chunk.
#[derive(Debug, Clone)]
pub struct Reveal {
    chars: Vec<char>,
    pos: usize,
    chars_per_tick: usize,
    tick: Duration,
    sentence_pause: Duration,
}

impl Reveal {
    pub fn new(text: &str, config: &RevealConfig) -> Self {
        Self {
            chars: text.chars().collect(),
            pos: 0,
            chars_per_tick: config.chars_per_tick(),
            tick: config.tick,
            sentence_pause: config.tick.saturating_mul(config.sentence_pause_ticks),
        }
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }

    pub fn is_done(&self) -> bool {
        self.pos >= self.chars.len()
    }

    /// Characters not yet revealed.
    pub fn remaining(&self) -> usize {
        self.chars.len().saturating_sub(self.pos)
    }

    /// Next chunk. A chunk never runs past a sentence end.
    pub fn next_step(&mut self) -> Option<RevealStep> {
        if self.is_done() {
            return None;
        }

        let end = (self.pos + self.chars_per_tick).min(self.chars.len());
        let cut = self.chars[self.pos..end]
            .iter()
            .position(|c| is_sentence_end(*c))
            .map(|i| self.pos + i + 1)
            .unwrap_or(end);

        let chunk: String = self.chars[self.pos..cut].iter().collect();
        self.pos = cut;

        let next_delay = match chunk.chars().last() {
            Some(c) if is_sentence_end(c) => self.sentence_pause,
            Some(c) if c.is_whitespace() => self.tick / 2,
            _ => self.tick,
        };

        Some(RevealStep { chunk, next_delay })
    }

    /// Everything not yet revealed, as one chunk.
    pub fn take_rest(&mut self) -> String {
        let rest: String = self.chars[self.pos.min(self.chars.len())..].iter().collect();
        self.pos = self.chars.len();
        rest
    }
}

fn is_sentence_end(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}
