//! Session registry.
//!
//! Maps a session id to at most one live [`StreamSession`]. Installing a new
//! session cancels the previous one and waits for it to finish, so two
//! relays never write to the same conversation at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::session::{lock, StreamSession};

/// Per-key serialization point.
#[derive(Default)]
struct Slot {
    gate: tokio::sync::Mutex<()>,
    /// The turn currently owning this key and its cancellation token.
    turn: Mutex<Option<(Uuid, CancellationToken)>>,
}

#[derive(Default)]
struct RegistryInner {
    entries: Mutex<HashMap<String, Arc<StreamSession>>>,
    slots: Mutex<HashMap<String, Arc<Slot>>>,
    closed: AtomicBool,
}

impl RegistryInner {
    /// Remove `session_id` only if it still maps to `instance_id`.
    fn remove_if(&self, session_id: &str, instance_id: Uuid) {
        let mut entries = lock(&self.entries);
        if entries
            .get(session_id)
            .is_some_and(|s| s.instance_id() == instance_id)
        {
            entries.remove(session_id);
            debug!(session_id, %instance_id, "Session removed itself from registry");
        }
        drop(entries);
        self.release_slot(session_id);
    }

    /// Drop the slot of `session_id` once no turn, session or waiter uses it.
    fn release_slot(&self, session_id: &str) {
        let mut slots = lock(&self.slots);
        let idle = slots.get(session_id).is_some_and(|slot| {
            Arc::strong_count(slot) == 1
                && lock(&slot.turn).is_none()
                && !lock(&self.entries).contains_key(session_id)
        });
        if idle {
            slots.remove(session_id);
        }
    }
}

/// Registry of live stream sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    config: Arc<RelayConfig>,
    root: CancellationToken,
    tracker: TaskTracker,
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(config: Arc<RelayConfig>) -> Self {
        Self {
            config,
            root: CancellationToken::new(),
            tracker: TaskTracker::new(),
            inner: Arc::new(RegistryInner::default()),
        }
    }

    /// Ancestor of every connection, turn and session token.
    pub fn root_token(&self) -> &CancellationToken {
        &self.root
    }

    /// Tracker owning every producer task.
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn slot(&self, session_id: &str) -> Arc<Slot> {
        lock(&self.inner.slots)
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Claim `session_id` for a turn. A different turn still holding the key
    /// (for instance one waiting out a retry delay) is cancelled.
    pub fn begin_turn(&self, session_id: &str, turn_id: Uuid, token: CancellationToken) {
        let slot = self.slot(session_id);
        let previous = lock(&slot.turn).replace((turn_id, token));
        if let Some((previous_id, previous_token)) = previous {
            if previous_id != turn_id {
                debug!(session_id, %previous_id, "Superseding previous turn");
                previous_token.cancel();
            }
        }
    }

    /// Release the claim `turn_id` holds on `session_id`.
    ///
    /// A newer turn's claim is left alone. The key's slot is dropped once
    /// nothing is installed or waiting under it.
    pub fn end_turn(&self, session_id: &str, turn_id: Uuid) {
        let slot = lock(&self.inner.slots).get(session_id).cloned();
        let Some(slot) = slot else {
            return;
        };
        {
            let mut turn = lock(&slot.turn);
            if turn.as_ref().is_some_and(|(owner, _)| *owner == turn_id) {
                turn.take();
                debug!(session_id, %turn_id, "Turn released session");
            }
        }
        drop(slot);
        self.inner.release_slot(session_id);
    }

    /// Install a new session for `session_id` on behalf of `turn_id`,
    /// cancelling and awaiting the current one first.
    ///
    /// Returns `None` without touching the current session when another
    /// turn claimed the key while this call waited for it. The wait for
    /// the previous session is bounded by `replace_grace`; a session that
    /// does not stop in time is force-aborted.
    pub async fn replace<F>(
        &self,
        session_id: &str,
        turn_id: Uuid,
        factory: F,
    ) -> RelayResult<Option<Arc<StreamSession>>>
    where
        F: FnOnce() -> StreamSession,
    {
        if self.is_closed() {
            return Err(RelayError::Shutdown);
        }

        let slot = self.slot(session_id);
        let _gate = slot.gate.lock().await;
        if self.is_closed() {
            return Err(RelayError::Shutdown);
        }
        let owner = lock(&slot.turn).as_ref().map(|(owner, _)| *owner);
        if owner.is_some_and(|owner| owner != turn_id) {
            debug!(session_id, %turn_id, "Turn lost the session to a newer one");
            return Ok(None);
        }

        let previous = lock(&self.inner.entries).get(session_id).cloned();
        if let Some(previous) = previous {
            self.retire(&previous).await;
        }

        let session = Arc::new(factory().with_tracker(self.tracker.clone()));

        let inner: Weak<RegistryInner> = Arc::downgrade(&self.inner);
        let key = session_id.to_string();
        let instance_id = session.instance_id();
        session.set_finalizer(move || {
            if let Some(inner) = inner.upgrade() {
                inner.remove_if(&key, instance_id);
            }
        });

        lock(&self.inner.entries).insert(session_id.to_string(), session.clone());
        debug!(session_id, %instance_id, "Session installed");
        Ok(Some(session))
    }

    async fn retire(&self, previous: &StreamSession) {
        previous.cancel();
        if !previous.is_live() {
            return;
        }

        let grace = self.config.replace_grace;
        match tokio::time::timeout(grace, previous.wait_terminal()).await {
            Ok(state) => {
                debug!(
                    session_id = %previous.session_id(),
                    instance_id = %previous.instance_id(),
                    state = %state,
                    "Previous session stopped"
                );
            }
            Err(_) => {
                warn!(
                    session_id = %previous.session_id(),
                    instance_id = %previous.instance_id(),
                    grace_ms = grace.as_millis() as u64,
                    "Previous session ignored cancellation, forcing disposal"
                );
                previous.abort().await;
            }
        }
    }

    /// Remove and cancel whatever runs under `session_id`. Idempotent.
    pub fn remove(&self, session_id: &str) {
        let removed = lock(&self.inner.entries).remove(session_id);
        if let Some(session) = removed {
            session.cancel();
            debug!(session_id, "Session removed");
        }

        let slot = lock(&self.inner.slots).get(session_id).cloned();
        if let Some(slot) = slot {
            if let Some((_, token)) = lock(&slot.turn).take() {
                token.cancel();
            }
        }
        self.inner.release_slot(session_id);
    }

    /// Cancel the live session and the turn owning `session_id`, leaving
    /// the entry to remove itself.
    pub fn cancel(&self, session_id: &str) {
        if let Some(session) = self.get(session_id) {
            session.cancel();
        }
        let slot = lock(&self.inner.slots).get(session_id).cloned();
        if let Some(slot) = slot {
            if let Some((_, token)) = lock(&slot.turn).as_ref() {
                token.cancel();
            }
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<StreamSession>> {
        lock(&self.inner.entries).get(session_id).cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys with a turn claim, an installed session or a pending install.
    pub fn slot_count(&self) -> usize {
        lock(&self.inner.slots).len()
    }

    /// Sessions not yet in a terminal state.
    pub fn live_count(&self) -> usize {
        lock(&self.inner.entries)
            .values()
            .filter(|s| s.is_live())
            .count()
    }

    /// Cancel everything and wait for every producer task to exit.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.root.cancel();

        let sessions: Vec<_> = lock(&self.inner.entries).values().cloned().collect();
        for session in &sessions {
            session.cancel();
        }
        let slots: Vec<_> = lock(&self.inner.slots).values().cloned().collect();
        for slot in slots {
            if let Some((_, token)) = lock(&slot.turn).take() {
                token.cancel();
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
        info!(sessions = sessions.len(), "Session registry shut down");
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
