//! Per-session conversation state.
//!
//! Each session has its own history behind its own async mutex. A turn
//! holds that mutex from start to finish, so turns within a session never
//! interleave while different sessions proceed independently. History is
//! only written after a turn succeeds; a failed or cancelled turn leaves
//! nothing behind.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// Oldest entries are dropped past this many.
pub const MAX_HISTORY_ENTRIES: usize = 100;

/// One conversation thread.
#[derive(Debug, Clone, Default)]
pub struct Session {
    pub key: String,
    /// `"user: …"` / `"assistant: …"` entries, oldest first
    pub history: Vec<String>,
}

impl Session {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            history: Vec::new(),
        }
    }

    /// Record a completed turn.
    pub fn record_turn(&mut self, user: &str, assistant: &str) {
        self.history.push(format!("user: {user}"));
        self.history.push(format!("assistant: {assistant}"));
        if self.history.len() > MAX_HISTORY_ENTRIES {
            let excess = self.history.len() - MAX_HISTORY_ENTRIES;
            self.history.drain(..excess);
        }
    }
}

pub type SessionHandle = Arc<AsyncMutex<Session>>;

/// All live sessions, keyed by session key.
#[derive(Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The session for `key`, created empty on first use.
    pub fn get_or_create(&self, key: &str) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sessions.entry(key.to_string()).or_insert_with(|| {
            debug!(session = %key, "Session created");
            Arc::new(AsyncMutex::new(Session::new(key)))
        }))
    }

    /// Discard a session. A turn still holding its handle finishes normally.
    pub fn remove(&self, key: &str) -> bool {
        let removed = self
            .sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some();
        if removed {
            debug!(session = %key, "Session discarded");
        }
        removed
    }

    /// Whether a turn is currently running in `key`.
    pub fn is_busy(&self, key: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|s| s.try_lock().is_err())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
