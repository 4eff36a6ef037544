//! Buffer-then-simulate fallback.
//!
//! When the upstream cannot stream, the full response is fetched first and
//! revealed a few characters per tick, pausing at sentence ends, so the UI
//! still sees incremental output.

mod cadence;
mod player;

pub use cadence::{Reveal, RevealConfig, RevealStep};
pub use player::{play, Playback, RevealControl, RevealExit};
