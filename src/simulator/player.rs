//! Timer loop that plays a [`Reveal`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::cadence::Reveal;

/// Requested playback mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Playback {
    Playing,
    Paused,
    /// Emit everything left in one chunk and stop.
    FinishNow,
}

/// How a reveal ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevealExit {
    /// All chunks were played at cadence.
    Finished,
    /// The rest was flushed at once after [`RevealControl::complete_now`].
    FinishedEarly,
    /// The cancellation token fired; nothing more was emitted.
    Cancelled,
    /// The receiver went away.
    ConsumerGone,
}

/// Shared handle for pausing, resuming or completing a running reveal.
#[derive(Debug, Clone)]
pub struct RevealControl {
    inner: Arc<ControlInner>,
}

#[derive(Debug)]
struct ControlInner {
    playback: watch::Sender<Playback>,
    running: AtomicBool,
}

impl Default for RevealControl {
    fn default() -> Self {
        Self::new()
    }
}

impl RevealControl {
    pub fn new() -> Self {
        let (playback, _) = watch::channel(Playback::Playing);
        Self {
            inner: Arc::new(ControlInner {
                playback,
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn pause(&self) {
        self.set(Playback::Paused);
    }

    pub fn resume(&self) {
        self.set(Playback::Playing);
    }

    pub fn complete_now(&self) {
        self.set(Playback::FinishNow);
    }

    pub fn is_paused(&self) -> bool {
        *self.inner.playback.borrow() == Playback::Paused
    }

    /// True while the timer loop is alive.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// True if both handles control the same reveal.
    pub fn same(&self, other: &RevealControl) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn set(&self, playback: Playback) {
        self.inner.playback.send_if_modified(|current| {
            // FinishNow is final.
            if *current == playback || *current == Playback::FinishNow {
                false
            } else {
                *current = playback;
                true
            }
        });
    }

    fn subscribe(&self) -> watch::Receiver<Playback> {
        self.inner.playback.subscribe()
    }
}

/// Clears the running flag when the loop exits, whatever the path.
struct Running<'a>(&'a RevealControl);

impl<'a> Running<'a> {
    fn start(control: &'a RevealControl) -> Self {
        control.inner.running.store(true, Ordering::Release);
        Self(control)
    }
}

impl Drop for Running<'_> {
    fn drop(&mut self) {
        self.0.inner.running.store(false, Ordering::Release);
    }
}

/// Play `reveal`, handing each chunk to `emit`.
///
/// `emit` returns false when the receiver is gone. Cancellation stops the
/// loop where it is; only [`RevealControl::complete_now`] flushes the rest.
pub async fn play<F, Fut>(
    mut reveal: Reveal,
    control: &RevealControl,
    cancel: &CancellationToken,
    mut emit: F,
) -> RevealExit
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = bool>,
{
    let _running = Running::start(control);
    let mut playback = control.subscribe();
    let mut controls_open = true;
    let mut paused = false;
    let mut wait: Duration = reveal.tick();

    loop {
        let requested = *playback.borrow_and_update();
        match requested {
            Playback::FinishNow => return finish_early(&mut reveal, &mut emit).await,
            Playback::Paused => paused = true,
            Playback::Playing => paused = false,
        }

        if reveal.is_done() {
            return RevealExit::Finished;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(remaining = reveal.remaining(), "Reveal cancelled");
                return RevealExit::Cancelled;
            }
            changed = playback.changed(), if controls_open => {
                if changed.is_err() {
                    controls_open = false;
                }
            }
            _ = tokio::time::sleep(wait), if !paused => {
                if let Some(step) = reveal.next_step() {
                    if !emit(step.chunk).await {
                        return RevealExit::ConsumerGone;
                    }
                    wait = step.next_delay;
                }
            }
        }
    }
}

async fn finish_early<F, Fut>(reveal: &mut Reveal, emit: &mut F) -> RevealExit
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = bool>,
{
    let rest = reveal.take_rest();
    if rest.is_empty() || emit(rest).await {
        RevealExit::FinishedEarly
    } else {
        RevealExit::ConsumerGone
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::RevealConfig;
    use std::sync::Mutex;

    fn one_char_per_tick() -> RevealConfig {
        RevealConfig::new(20, Duration::from_millis(50))
    }

    #[tokio::test(start_paused = true)]
    async fn test_plays_whole_text_at_cadence() {
        let control = RevealControl::new();
        let cancel = CancellationToken::new();
        let chunks = Mutex::new(Vec::new());
        let started = tokio::time::Instant::now();

        let exit = play(
            Reveal::new("Hi!", &one_char_per_tick()),
            &control,
            &cancel,
            |chunk| {
                chunks.lock().unwrap().push(chunk);
                async { true }
            },
        )
        .await;

        assert_eq!(exit, RevealExit::Finished);
        assert_eq!(*chunks.lock().unwrap(), vec!["H", "i", "!"]);
        assert_eq!(started.elapsed(), Duration::from_millis(150));
        assert!(!control.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_now_flushes_and_stops_timer() {
        let control = RevealControl::new();
        let cancel = CancellationToken::new();
        let chunks = Mutex::new(Vec::new());

        let exit = play(
            Reveal::new("Done.", &one_char_per_tick()),
            &control,
            &cancel,
            |chunk| {
                let mut chunks = chunks.lock().unwrap();
                chunks.push(chunk);
                if chunks.len() == 1 {
                    assert!(control.is_running());
                    control.complete_now();
                }
                async { true }
            },
        )
        .await;

        assert_eq!(exit, RevealExit::FinishedEarly);
        assert_eq!(*chunks.lock().unwrap(), vec!["D", "one."]);
        assert!(!control.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_holds_timer_until_resume() {
        let control = RevealControl::new();
        let cancel = CancellationToken::new();
        let chunks = Arc::new(Mutex::new(Vec::new()));

        control.pause();
        let task = {
            let control = control.clone();
            let cancel = cancel.clone();
            let chunks = chunks.clone();
            tokio::spawn(async move {
                play(
                    Reveal::new("ab", &one_char_per_tick()),
                    &control,
                    &cancel,
                    move |chunk| {
                        chunks.lock().unwrap().push(chunk);
                        async { true }
                    },
                )
                .await
            })
        };

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(chunks.lock().unwrap().is_empty());
        assert!(control.is_running());
        assert!(control.is_paused());

        control.resume();
        assert_eq!(task.await.unwrap(), RevealExit::Finished);
        assert_eq!(*chunks.lock().unwrap(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_stops_without_flushing() {
        let control = RevealControl::new();
        let cancel = CancellationToken::new();
        let chunks = Mutex::new(Vec::new());

        let exit = play(
            Reveal::new("Not all of it.", &one_char_per_tick()),
            &control,
            &cancel,
            |chunk| {
                chunks.lock().unwrap().push(chunk);
                cancel.cancel();
                async { true }
            },
        )
        .await;

        assert_eq!(exit, RevealExit::Cancelled);
        assert_eq!(*chunks.lock().unwrap(), vec!["N"]);
        assert!(!control.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consumer_gone_stops() {
        let control = RevealControl::new();
        let cancel = CancellationToken::new();
        let exit = play(
            Reveal::new("abc", &one_char_per_tick()),
            &control,
            &cancel,
            |_| async { false },
        )
        .await;
        assert_eq!(exit, RevealExit::ConsumerGone);
        assert!(!control.is_running());
    }
}
