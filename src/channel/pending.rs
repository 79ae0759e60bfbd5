//! Pending-call table
//!
//! Pairs each outbound call with its eventual inbound reply. Entries are
//! removed the first time a reply for their id arrives, so resolution is
//! at-most-once and independent of reply order.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::{BridgeError, Result};

/// Receiving end held by the caller of an outbound call
pub type Waiter = oneshot::Receiver<Result<String>>;

/// Correlation table for one channel
#[derive(Default)]
pub struct PendingCalls {
    waiters: Mutex<HashMap<String, oneshot::Sender<Result<String>>>>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a new waiter under a fresh correlation id
    pub fn register(&self) -> (String, Waiter) {
        let (tx, rx) = oneshot::channel();
        let mut waiters = self.waiters.lock();
        let id = loop {
            let candidate = Uuid::new_v4().to_string();
            if !waiters.contains_key(&candidate) {
                break candidate;
            }
        };
        waiters.insert(id.clone(), tx);
        (id, rx)
    }

    /// Resolve the waiter for `id`: failure if `error` is non-empty, else
    /// success with `payload`. Unknown ids are ignored.
    ///
    /// Returns whether an entry was resolved.
    pub fn resolve(&self, id: &str, payload: &str, error: &str) -> bool {
        let outcome = if error.is_empty() {
            Ok(payload.to_string())
        } else {
            Err(BridgeError::remote(error))
        };
        self.complete(id, outcome)
    }

    /// Remove `id` and fail it with `error`
    pub fn cancel(&self, id: &str, error: BridgeError) -> bool {
        self.complete(id, Err(error))
    }

    /// Fail every outstanding call, returning how many there were
    pub fn fail_all(&self, error: BridgeError) -> usize {
        let drained: Vec<_> = self.waiters.lock().drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    /// Drop `id` without resolving it; its waiter sees a closed channel
    pub fn discard(&self, id: &str) -> bool {
        self.waiters.lock().remove(id).is_some()
    }

    /// Guard that discards `id` when dropped, for callers that may be
    /// abandoned before a reply arrives
    pub fn guard(&self, id: &str) -> EntryGuard<'_> {
        EntryGuard {
            calls: self,
            id: id.to_string(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.waiters.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    fn complete(&self, id: &str, outcome: Result<String>) -> bool {
        // Lock released before the send so a waking caller never contends
        let Some(tx) = self.waiters.lock().remove(id) else {
            tracing::trace!(call_id = %id, "Reply for unknown call id dropped");
            return false;
        };
        // The caller may have abandoned its waiter; the entry is gone either way
        let _ = tx.send(outcome);
        true
    }
}

/// Removes its entry from the table on drop
pub struct EntryGuard<'a> {
    calls: &'a PendingCalls,
    id: String,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        if self.calls.discard(&self.id) {
            tracing::debug!(call_id = %self.id, "Abandoned call removed");
        }
    }
}
