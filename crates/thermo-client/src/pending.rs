//! Outstanding call bookkeeping
//!
//! Ids are handed out in increasing order and used as `BTreeMap` keys, so the
//! map's key order is registration order and the last entry is always the
//! most recent call.

use std::collections::BTreeMap;
use std::time::Duration;

use thermo_core::{RequestId, Response};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ClientError, Result};

/// Age after which an unanswered call is dropped on the next registration
pub const STALE_CALL_AGE: Duration = Duration::from_secs(30);

struct PendingCall {
    tx: oneshot::Sender<Response>,
    created_at: Instant,
}

/// Calls waiting for a response, keyed by request id
pub struct PendingCallTable {
    next_id: RequestId,
    calls: BTreeMap<RequestId, PendingCall>,
    max_age: Duration,
}

impl PendingCallTable {
    pub fn new() -> Self {
        Self::with_max_age(STALE_CALL_AGE)
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self {
            next_id: 0,
            calls: BTreeMap::new(),
            max_age,
        }
    }

    /// Next request id. Starts at 1; 0 never correlates.
    pub fn allocate(&mut self) -> RequestId {
        self.next_id += 1;
        self.next_id
    }

    pub fn register(&mut self, id: RequestId, tx: oneshot::Sender<Response>) -> Result<()> {
        self.register_at(id, tx, Instant::now())
    }

    /// Store a call created at `now`, first dropping calls older than the
    /// maximum age. Dropped senders surface as cancellation to their callers.
    pub fn register_at(
        &mut self,
        id: RequestId,
        tx: oneshot::Sender<Response>,
        now: Instant,
    ) -> Result<()> {
        self.sweep(now);
        if self.calls.contains_key(&id) {
            return Err(ClientError::DuplicateRequestId(id));
        }
        self.calls.insert(id, PendingCall { tx, created_at: now });
        Ok(())
    }

    /// Drop every call older than the maximum age, returning how many went
    pub fn sweep(&mut self, now: Instant) -> usize {
        let max_age = self.max_age;
        let before = self.calls.len();
        self.calls
            .retain(|_, call| now.saturating_duration_since(call.created_at) <= max_age);
        let evicted = before - self.calls.len();
        if evicted > 0 {
            debug!("Evicted {} stale call(s)", evicted);
        }
        evicted
    }

    /// Deliver `response` to the call it answers.
    ///
    /// Without a matching id the most recent call receives it instead; the
    /// firmware does not always echo ids faithfully. Returns false only when
    /// nothing is pending.
    pub fn resolve(&mut self, id: Option<RequestId>, response: Response) -> bool {
        let call = match id.and_then(|id| self.calls.remove(&id)) {
            Some(call) => call,
            None => match self.calls.pop_last() {
                Some((fallback, call)) => {
                    warn!(
                        "Response id {:?} matches no pending call, resolving most recent call {}",
                        id, fallback
                    );
                    call
                }
                None => return false,
            },
        };

        // The caller may have given up already
        let _ = call.tx.send(response);
        true
    }

    /// Remove a call without answering it
    pub fn cancel(&mut self, id: RequestId) -> bool {
        self.calls.remove(&id).is_some()
    }

    /// Drop every pending call
    pub fn clear(&mut self) {
        self.calls.clear();
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

impl Default for PendingCallTable {
    fn default() -> Self {
        Self::new()
    }
}
