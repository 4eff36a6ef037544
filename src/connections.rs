//! UI connection lifecycle.
//!
//! Each UI connection owns a cancellation token derived from the
//! registry's root token. Turns started on behalf of that connection take
//! child tokens of it, so tearing the connection down stops every turn it
//! started.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::registry::SessionRegistry;
use crate::session::lock;

/// Tracks the live UI connections of a relay.
#[derive(Debug, Clone)]
pub struct ConnectionHub {
    registry: SessionRegistry,
    connections: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl ConnectionHub {
    pub fn new(registry: SessionRegistry) -> Self {
        Self {
            registry,
            connections: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register a UI connection and return its token.
    ///
    /// Re-establishing a connection whose token is still live returns the
    /// same token.
    pub fn on_connection_established(&self, session_id: &str) -> CancellationToken {
        let mut connections = lock(&self.connections);
        if let Some(token) = connections.get(session_id) {
            if !token.is_cancelled() {
                debug!(session_id, "UI connection already registered");
                return token.clone();
            }
        }
        let token = self.registry.root_token().child_token();
        connections.insert(session_id.to_string(), token.clone());
        info!(session_id, "UI connection established");
        token
    }

    /// Tear a UI connection down, cancelling and removing its session.
    ///
    /// Safe to call for unknown or already torn down connections.
    pub fn on_connection_torn_down(&self, session_id: &str) {
        let token = lock(&self.connections).remove(session_id);
        if let Some(token) = token {
            token.cancel();
            info!(session_id, "UI connection torn down");
        }
        self.registry.remove(session_id);
    }

    /// Token of a live connection.
    pub fn connection_token(&self, session_id: &str) -> Option<CancellationToken> {
        lock(&self.connections)
            .get(session_id)
            .filter(|token| !token.is_cancelled())
            .cloned()
    }

    pub fn len(&self) -> usize {
        lock(&self.connections).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
