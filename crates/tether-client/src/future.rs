//! Single-request response handles.

use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tracing::trace;

use tether_common::{RequestId, Response, Result, TetherError};

use crate::pending::PendingRequestTable;

/// Lifecycle of a [`ResponseFuture`]. `Completed` and `Cancelled` are final.
#[derive(Debug, Clone, PartialEq)]
pub enum FutureState {
    Pending,
    Completed(Response),
    Cancelled,
}

impl FutureState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FutureState::Pending)
    }
}

struct FutureInner {
    id: RequestId,
    state: watch::Sender<FutureState>,
    table: Weak<PendingRequestTable>,
}

/// Handle to the response of one request sent through a proxy.
///
/// Cloning the handle is cheap; all clones observe the same state. Exactly one
/// of [`commit`](Self::commit) and [`cancel`](Self::cancel) can take effect,
/// and whichever wins removes the entry from the owning
/// [`PendingRequestTable`].
///
/// # Waiting
///
/// [`get`](Self::get) is an async wait and must be awaited from a task, never
/// from inside a connection driver. Synchronous callers running outside the
/// runtime use [`wait_blocking`](Self::wait_blocking).
#[derive(Clone)]
pub struct ResponseFuture {
    inner: Arc<FutureInner>,
}

impl ResponseFuture {
    pub(crate) fn new(id: RequestId, table: Weak<PendingRequestTable>) -> Self {
        let (state, _) = watch::channel(FutureState::Pending);
        Self {
            inner: Arc::new(FutureInner { id, state, table }),
        }
    }

    /// A future not owned by any table.
    pub fn detached(id: RequestId) -> Self {
        Self::new(id, Weak::new())
    }

    pub fn id(&self) -> RequestId {
        self.inner.id
    }

    pub fn state(&self) -> FutureState {
        self.inner.state.borrow().clone()
    }

    pub fn is_done(&self) -> bool {
        self.inner.state.borrow().is_terminal()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(*self.inner.state.borrow(), FutureState::Cancelled)
    }

    /// The response, if the future has completed.
    pub fn try_get(&self) -> Option<Response> {
        match &*self.inner.state.borrow() {
            FutureState::Completed(response) => Some(response.clone()),
            _ => None,
        }
    }

    /// Waits until the future completes or is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Cancelled`] if the request was cancelled.
    pub async fn get(&self) -> Result<Response> {
        let mut rx = self.inner.state.subscribe();
        let state = rx
            .wait_for(FutureState::is_terminal)
            .await
            .map_err(|_| TetherError::Cancelled(self.inner.id))?;

        match &*state {
            FutureState::Completed(response) => Ok(response.clone()),
            _ => Err(TetherError::Cancelled(self.inner.id)),
        }
    }

    /// Like [`get`](Self::get) but gives up after `timeout`.
    ///
    /// A timeout leaves the future pending; the caller decides whether to
    /// [`cancel`](Self::cancel) it.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<Response> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| TetherError::Timeout(timeout.as_millis() as u64))?
    }

    /// Blocks the current thread until the future is resolved.
    ///
    /// Must not be called from inside an async runtime worker.
    pub fn wait_blocking(&self) -> Result<Response> {
        futures::executor::block_on(self.get())
    }

    /// Resolves the future with `response`.
    ///
    /// Returns `false`, leaving the state untouched, when the future was
    /// already completed or cancelled.
    pub fn commit(&self, response: Response) -> bool {
        let won = self.inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = FutureState::Completed(response);
            true
        });

        if won {
            self.detach_from_table();
        }
        won
    }

    /// Cancels the future and wakes every waiter.
    ///
    /// Returns `false` when the future was already completed or cancelled.
    pub fn cancel(&self) -> bool {
        let won = self.inner.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = FutureState::Cancelled;
            true
        });

        if won {
            trace!(id = self.inner.id, "request cancelled");
            self.detach_from_table();
        }
        won
    }

    pub(crate) fn ptr_eq(&self, other: &ResponseFuture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn detach_from_table(&self) {
        if let Some(table) = self.inner.table.upgrade() {
            table.remove(self);
        }
    }
}

impl fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}
