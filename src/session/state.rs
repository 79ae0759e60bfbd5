//! Shared session state
//!
//! One instance is owned by the bridge and handed to every channel handler.
//! The readiness gate is open when a usable token is held and no language
//! update is being persisted; waiters are woken through a watch channel on
//! every transition.

use std::time::Duration;

use tokio::sync::watch;

/// Snapshot of the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Token cached from the last completed token exchange
    pub token: Option<String>,
    pub token_available: bool,
    /// Number of language updates currently being persisted
    pub updating: usize,
    pub current_language: String,
}

impl SessionSnapshot {
    /// Whether a channel may sign in right now
    pub fn is_open(&self) -> bool {
        self.token_available && self.updating == 0
    }
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            token: None,
            // The primary's first readiness sign-in runs with an empty token
            token_available: true,
            updating: 0,
            current_language: String::new(),
        }
    }
}

pub struct SessionState {
    state: watch::Sender<SessionSnapshot>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self { state }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().is_open()
    }

    pub fn token(&self) -> Option<String> {
        self.state.borrow().token.clone()
    }

    pub fn token_available(&self) -> bool {
        self.state.borrow().token_available
    }

    pub fn is_updating(&self) -> bool {
        self.state.borrow().updating > 0
    }

    pub fn current_language(&self) -> String {
        self.state.borrow().current_language.clone()
    }

    /// Atomically check the gate and, if open, take what a sign-in needs.
    ///
    /// For the primary channel this also closes the gate until the next
    /// token reply. Returns the cached token (empty if none yet), or `None`
    /// when the gate is closed.
    pub fn try_begin_sign_in(&self, primary: bool) -> Option<String> {
        let mut token = None;
        self.state.send_if_modified(|s| {
            if !s.is_open() {
                return false;
            }
            token = Some(s.token.clone().unwrap_or_default());
            if primary {
                s.token_available = false;
                return true;
            }
            false
        });
        token
    }

    /// Cache a token from a completed exchange and open the token gate
    pub fn store_token(&self, token: &str) {
        self.state.send_modify(|s| {
            s.token = Some(token.to_string());
            s.token_available = true;
        });
    }

    /// Reopen the token gate without caching anything (failed exchange)
    pub fn release_token_gate(&self) {
        self.state.send_if_modified(|s| {
            let changed = !s.token_available;
            s.token_available = true;
            changed
        });
    }

    /// Mark a language update as in flight until the guard drops
    pub fn begin_update(&self) -> UpdateGuard<'_> {
        self.state.send_modify(|s| s.updating += 1);
        UpdateGuard { session: self }
    }

    pub fn set_current_language(&self, language: &str) {
        self.state.send_if_modified(|s| {
            if s.current_language == language {
                return false;
            }
            s.current_language = language.to_string();
            true
        });
    }

    /// Wait until the gate is open.
    ///
    /// Returns `false` if `limit` elapsed first.
    pub async fn wait_until_open(&self, limit: Option<Duration>) -> bool {
        let mut rx = self.state.subscribe();
        let wait = async move { rx.wait_for(SessionSnapshot::is_open).await.is_ok() };
        match limit {
            Some(limit) => tokio::time::timeout(limit, wait).await.unwrap_or(false),
            None => wait.await,
        }
    }

    /// Subscribe to every session transition
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }

    fn end_update(&self) {
        self.state.send_modify(|s| s.updating = s.updating.saturating_sub(1));
    }
}

/// Ends one language update when dropped
pub struct UpdateGuard<'a> {
    session: &'a SessionState,
}

impl Drop for UpdateGuard<'_> {
    fn drop(&mut self) {
        self.session.end_update();
    }
}
