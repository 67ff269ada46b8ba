//! Per-proxy request correlation.
//!
//! Every proxy owns one [`PendingRequestTable`] and one [`RequestIdGenerator`].
//! A request is registered in the table before its frame is queued for
//! writing, so a response can never arrive for an id the table has not seen.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use tether_common::{RequestId, Response, Result, TetherError, HEARTBEAT_ID};

use crate::future::ResponseFuture;

/// Largest id handed out before wrapping back to 1.
pub const MAX_REQUEST_ID: RequestId = i64::MAX as RequestId;

/// Monotonic request id source for a single proxy.
///
/// Ids start at 1, wrap from [`MAX_REQUEST_ID`] back to 1, and never yield
/// the heartbeat id 0.
#[derive(Debug)]
pub struct RequestIdGenerator {
    last: AtomicU64,
}

impl RequestIdGenerator {
    pub fn new() -> Self {
        Self::starting_after(HEARTBEAT_ID)
    }

    /// A generator whose first id is `last + 1` (or 1 after wrapping).
    pub fn starting_after(last: RequestId) -> Self {
        Self {
            last: AtomicU64::new(last),
        }
    }

    pub fn next_id(&self) -> RequestId {
        let previous = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(Self::successor(last))
            })
            .unwrap_or(HEARTBEAT_ID);
        Self::successor(previous)
    }

    /// Restarts the sequence at 1.
    pub fn reset(&self) {
        self.last.store(HEARTBEAT_ID, Ordering::Release);
    }

    fn successor(last: RequestId) -> RequestId {
        if last >= MAX_REQUEST_ID {
            1
        } else {
            last + 1
        }
    }
}

impl Default for RequestIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Map of in-flight request ids to their futures.
///
/// All mutation happens under one lock, so a [`complete`](Self::complete)
/// racing a [`drain`](Self::drain) either finds the entry and commits it, or
/// finds nothing; it can never put a drained entry back.
#[derive(Debug, Default)]
pub struct PendingRequestTable {
    entries: Mutex<HashMap<RequestId, ResponseFuture>>,
}

impl PendingRequestTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Creates and registers a future for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::InvalidFrame`] if `id` is the heartbeat id or is
    /// already pending.
    pub fn register(self: &Arc<Self>, id: RequestId) -> Result<ResponseFuture> {
        if id == HEARTBEAT_ID {
            return Err(TetherError::InvalidFrame("request id 0 is reserved".into()));
        }

        let mut entries = self.entries.lock();
        if entries.contains_key(&id) {
            return Err(TetherError::InvalidFrame(format!("request id {} already pending", id)));
        }

        let future = ResponseFuture::new(id, Arc::downgrade(self));
        entries.insert(id, future.clone());
        Ok(future)
    }

    /// Routes a response to its future.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::CorrelationNotFound`] when no future is pending
    /// under the response id (late, cancelled or unknown). Nothing is inserted.
    pub fn complete(&self, response: Response) -> Result<()> {
        let id = response.id;
        let future = self.entries.lock().remove(&id);

        match future {
            Some(future) => {
                if !future.commit(response) {
                    debug!(id, "response arrived for a request cancelled concurrently");
                }
                Ok(())
            }
            None => Err(TetherError::CorrelationNotFound(id)),
        }
    }

    /// Cancels every pending future and empties the table.
    ///
    /// Returns how many futures were cancelled by this call.
    pub fn drain(&self) -> usize {
        let drained: Vec<ResponseFuture> = {
            let mut entries = self.entries.lock();
            entries.drain().map(|(_, future)| future).collect()
        };

        drained.iter().filter(|future| future.cancel()).count()
    }

    /// Removes `future` if it is still the entry registered under its id.
    /// Removing an absent entry is a no-op.
    pub(crate) fn remove(&self, future: &ResponseFuture) {
        let mut entries = self.entries.lock();
        if entries.get(&future.id()).is_some_and(|current| current.ptr_eq(future)) {
            entries.remove(&future.id());
        }
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pending ids in ascending order.
    pub fn pending_ids(&self) -> Vec<RequestId> {
        let mut ids: Vec<RequestId> = self.entries.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
