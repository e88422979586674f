//! # Message Correlator
//!
//! Purpose: Hand out message ids, remember who is waiting for each one, and
//! deliver every response to exactly one waiter.
//!
//! ## Design Principles
//! 1. **Register Before Send**: `allocate` inserts the table entry before the
//!    frame is written, so a fast response always finds its waiter.
//! 2. **One Critical Section per Operation**: allocate-and-insert,
//!    resolve-and-remove and drain-and-clear each take the table lock once.
//!    Waiters are completed after the lock is released.
//! 3. **Connection Scoped**: One correlator per session. Ids restart at 1 on
//!    every new connection and never collide within one.
//! 4. **Self-Cleaning Waiters**: Dropping a `Waiter` removes its entry, so a
//!    cancelled or timed-out caller cannot leak a table slot.
//!
//! ## Structure Overview
//!
//! ```text
//! Correlator
//!   └── state: Mutex<TableState>
//!         ├── next_id: u64             (monotonic, starts at 1)
//!         ├── pending: HashMap<id, oneshot::Sender>
//!         └── closed: bool             (set by drain_all, rejects allocate)
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use hpkv_common::ResponseFrame;

use crate::client::{ClientError, ClientResult};

type Completion = oneshot::Sender<ClientResult<ResponseFrame>>;

struct TableState {
    next_id: u64,
    pending: HashMap<u64, Completion>,
    closed: bool,
}

/// Pending Request Table plus the id counter for one connection.
pub(crate) struct Correlator {
    state: Mutex<TableState>,
}

impl Correlator {
    pub(crate) fn new() -> Self {
        Correlator {
            state: Mutex::new(TableState {
                next_id: 1,
                pending: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Allocates the next id and registers a waiter for it.
    ///
    /// # Errors
    /// Returns `ClientError::ConnectionClosed` once the table has been drained.
    pub(crate) fn allocate(self: &Arc<Self>) -> ClientResult<Waiter> {
        let (tx, rx) = oneshot::channel();
        let id = {
            let mut state = self.state.lock();
            if state.closed {
                return Err(ClientError::ConnectionClosed);
            }
            let id = state.next_id;
            state.next_id += 1;
            let previous = state.pending.insert(id, tx);
            debug_assert!(previous.is_none(), "message id {id} reused while pending");
            id
        };

        Ok(Waiter {
            id,
            rx,
            correlator: Arc::clone(self),
        })
    }

    /// Completes the waiter for `id` with a successful response.
    ///
    /// Returns false when no request with that id is pending.
    pub(crate) fn resolve(&self, id: u64, response: ResponseFrame) -> bool {
        self.complete(id, Ok(response))
    }

    /// Completes the waiter for `id` with `error`.
    ///
    /// Returns false when no request with that id is pending.
    pub(crate) fn reject(&self, id: u64, error: ClientError) -> bool {
        self.complete(id, Err(error))
    }

    /// Fails every pending request with `error`, empties the table and refuses
    /// further allocations. Returns the number of requests failed.
    pub(crate) fn drain_all(&self, error: ClientError) -> usize {
        let drained: Vec<(u64, Completion)> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.drain().collect()
        };

        let count = drained.len();
        for (id, tx) in drained {
            debug!(id, error = %error, "failing pending request");
            let _ = tx.send(Err(error.clone()));
        }
        count
    }

    /// True once `drain_all` has run.
    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Number of requests awaiting a response.
    pub(crate) fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn complete(&self, id: u64, result: ClientResult<ResponseFrame>) -> bool {
        let tx = self.state.lock().pending.remove(&id);
        match tx {
            // The receiver may already be gone (caller gave up); the entry is
            // removed either way.
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    fn forget(&self, id: u64) {
        self.state.lock().pending.remove(&id);
    }
}

/// One-shot completion slot for a single request.
pub(crate) struct Waiter {
    id: u64,
    rx: oneshot::Receiver<ClientResult<ResponseFrame>>,
    correlator: Arc<Correlator>,
}

impl Waiter {
    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Suspends until the request is resolved, rejected or drained.
    pub(crate) async fn wait(mut self) -> ClientResult<ResponseFrame> {
        match (&mut self.rx).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::ConnectionClosed),
        }
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        self.correlator.forget(self.id);
    }
}
