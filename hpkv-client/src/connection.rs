//! # Connection Manager
//!
//! Purpose: Own the single persistent connection, move it through its states,
//! and run exactly one receiver loop per session.
//!
//! ## Design Principles
//! 1. **Coalesced Connects**: Concurrent `connect()` callers share one dial
//!    attempt and see the same outcome.
//! 2. **Session Scoping**: Each successful dial creates a `Session` with its own
//!    correlator, cancellation token and generation number. Nothing survives a
//!    reconnect, so message ids restart at 1.
//! 3. **Drain Before Settle**: Every path out of `Connected` (explicit
//!    disconnect, transport failure, last handle dropped) fails all pending
//!    requests before the state reads `Disconnected`.
//! 4. **No Autoreconnect**: A lost connection stays down until the next verb or
//!    an explicit `connect()`.
//!
//! ## State Machine
//!
//! ```text
//! Disconnected ──connect()──> Connecting ──ok──> Connected
//!      ^                          │                 │  │
//!      └────────── err ───────────┘                 │  │ transport failure
//!      ^                                            │  │ (drain, then settle)
//!      ├──────────────────────────────────────────────┘
//!      │                                            │ disconnect()
//!      └──── drained, closed ──── Closing <─────────┘
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use parking_lot::Mutex;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use hpkv_common::{encode_request, Request};

use crate::client::{ClientError, ClientResult};
use crate::config::ClientConfig;
use crate::correlator::{Correlator, Waiter};
use crate::receiver::{self, ReceiverExit};
use crate::transport::{self, WsSink, WsSource};

/// Upper bound on the close handshake during `disconnect()`.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Observable lifecycle of a `Connection`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closing,
}

type ConnectOutcome = Option<ClientResult<()>>;

enum Slot {
    Disconnected,
    Connecting(watch::Receiver<ConnectOutcome>),
    Connected(Arc<Session>),
    Closing(watch::Receiver<bool>),
}

struct ConnectionInner {
    config: ClientConfig,
    slot: Mutex<Slot>,
    generation: AtomicU64,
}

/// Handle to the persistent connection.
///
/// Clones share the same underlying connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    /// Creates a disconnected handle.
    pub fn new(config: ClientConfig) -> Self {
        Connection {
            inner: Arc::new(ConnectionInner {
                config,
                slot: Mutex::new(Slot::Disconnected),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.inner.slot.lock() {
            Slot::Disconnected => ConnectionState::Disconnected,
            Slot::Connecting(_) => ConnectionState::Connecting,
            Slot::Connected(_) => ConnectionState::Connected,
            Slot::Closing(_) => ConnectionState::Closing,
        }
    }

    /// Size of the current session's pending request table.
    pub fn pending_requests(&self) -> usize {
        match &*self.inner.slot.lock() {
            Slot::Connected(session) => session.correlator.pending(),
            _ => 0,
        }
    }

    /// Establishes the connection if needed.
    ///
    /// Idempotent. Callers arriving while a dial is in flight wait for that
    /// dial instead of starting another one.
    ///
    /// # Errors
    /// Returns the dial error (`Connection` or `Config`) to every coalesced
    /// caller, or `ConnectionClosed` if the fresh session was lost before the
    /// caller could observe it.
    pub async fn connect(&self) -> ClientResult<()> {
        self.session().await.map(|_| ())
    }

    /// Closes the connection.
    ///
    /// Stops the receiver loop, waits for it, sends a close frame, then fails
    /// every pending request with `ClientError::ConnectionClosed`. Disconnecting
    /// an already disconnected handle is a no-op. The teardown runs on its own
    /// task and completes even if this future is dropped.
    pub async fn disconnect(&self) -> ClientResult<()> {
        loop {
            let step = {
                let mut slot = self.inner.slot.lock();
                match std::mem::replace(&mut *slot, Slot::Disconnected) {
                    Slot::Disconnected => CloseStep::Done,
                    Slot::Connecting(rx) => {
                        *slot = Slot::Connecting(rx.clone());
                        CloseStep::AwaitConnect(rx)
                    }
                    Slot::Closing(rx) if closing_settled(&rx) => CloseStep::Done,
                    Slot::Closing(rx) => {
                        *slot = Slot::Closing(rx.clone());
                        CloseStep::AwaitClose(rx)
                    }
                    Slot::Connected(session) => {
                        let (done, rx) = watch::channel(false);
                        *slot = Slot::Closing(rx.clone());
                        // Spawned so a caller that gives up cannot strand the
                        // slot in Closing.
                        tokio::spawn(teardown(Arc::clone(&self.inner), session, done));
                        CloseStep::AwaitClose(rx)
                    }
                }
            };

            match step {
                CloseStep::Done => return Ok(()),
                CloseStep::AwaitConnect(mut rx) => {
                    let _ = rx.wait_for(Option::is_some).await;
                }
                CloseStep::AwaitClose(mut rx) => {
                    // Err means the teardown task is gone; its guard has
                    // already reset the slot, so loop and re-read it.
                    if rx.wait_for(|closed| *closed).await.is_ok() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Registers a waiter for `request` and writes its frame.
    ///
    /// Connects lazily. The returned waiter resolves when the response for its
    /// id arrives.
    pub(crate) async fn submit(&self, request: &Request) -> ClientResult<Waiter> {
        let session = self.session().await?;
        let waiter = session.correlator.allocate()?;
        let frame = encode_request(request, waiter.id())?;

        debug!(
            id = waiter.id(),
            op = ?request.op(),
            key = request.key(),
            value_len = request.value().map(str::len),
            generation = session.generation,
            "sending request"
        );
        // On failure the waiter is dropped here, which removes its entry.
        session.send(frame).await?;
        Ok(waiter)
    }

    async fn session(&self) -> ClientResult<Arc<Session>> {
        loop {
            let step = {
                let mut slot = self.inner.slot.lock();
                match std::mem::replace(&mut *slot, Slot::Disconnected) {
                    Slot::Connected(session) => {
                        *slot = Slot::Connected(Arc::clone(&session));
                        return Ok(session);
                    }
                    Slot::Connecting(rx) => {
                        *slot = Slot::Connecting(rx.clone());
                        OpenStep::AwaitConnect(rx)
                    }
                    Slot::Closing(rx) if !closing_settled(&rx) => {
                        *slot = Slot::Closing(rx.clone());
                        OpenStep::AwaitClose(rx)
                    }
                    Slot::Closing(_) | Slot::Disconnected => {
                        let (done, rx) = watch::channel(None);
                        *slot = Slot::Connecting(rx.clone());
                        // Spawned so a caller that gives up cannot strand the
                        // slot in Connecting.
                        tokio::spawn(establish(Arc::clone(&self.inner), done));
                        OpenStep::AwaitConnect(rx)
                    }
                }
            };

            match step {
                OpenStep::AwaitConnect(mut rx) => {
                    let outcome = match rx.wait_for(Option::is_some).await {
                        Ok(outcome) => outcome.clone(),
                        Err(_) => Some(Err(ClientError::Connection(
                            "connect attempt abandoned".to_string(),
                        ))),
                    };
                    if let Some(Err(err)) = outcome {
                        return Err(err);
                    }
                    return match &*self.inner.slot.lock() {
                        Slot::Connected(session) => Ok(Arc::clone(session)),
                        _ => Err(ClientError::ConnectionClosed),
                    };
                }
                OpenStep::AwaitClose(mut rx) => {
                    let _ = rx.wait_for(|closed| *closed).await;
                }
            }
        }
    }
}

enum OpenStep {
    AwaitConnect(watch::Receiver<ConnectOutcome>),
    AwaitClose(watch::Receiver<bool>),
}

enum CloseStep {
    Done,
    AwaitConnect(watch::Receiver<ConnectOutcome>),
    AwaitClose(watch::Receiver<bool>),
}

/// A Closing slot whose teardown finished or whose sender is gone.
fn closing_settled(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow() || rx.has_changed().is_err()
}

async fn teardown(inner: Arc<ConnectionInner>, session: Arc<Session>, done: watch::Sender<bool>) {
    let _settle = SettleOnDrop { inner, done };
    session.shutdown().await;
}

/// Moves the slot out of Closing however the teardown task ends.
struct SettleOnDrop {
    inner: Arc<ConnectionInner>,
    done: watch::Sender<bool>,
}

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        {
            let mut slot = self.inner.slot.lock();
            if matches!(&*slot, Slot::Closing(_)) {
                *slot = Slot::Disconnected;
            }
        }
        self.done.send_replace(true);
    }
}

async fn establish(inner: Arc<ConnectionInner>, done: watch::Sender<ConnectOutcome>) {
    let outcome = match transport::dial(&inner.config).await {
        Ok((sink, source)) => {
            // Held across start_session so a receiver that fails at once still
            // finds its own session in the slot.
            let generation = {
                let mut slot = inner.slot.lock();
                let session = inner.start_session(sink, source);
                let generation = session.generation;
                *slot = Slot::Connected(session);
                generation
            };
            info!(url = %inner.config.redacted_url(), generation, "connected");
            Ok(())
        }
        Err(err) => {
            *inner.slot.lock() = Slot::Disconnected;
            warn!(url = %inner.config.redacted_url(), error = %err, "connect failed");
            Err(err)
        }
    };
    done.send_replace(Some(outcome));
}

impl ConnectionInner {
    fn start_session(self: &Arc<Self>, sink: WsSink, source: WsSource) -> Arc<Session> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let correlator = Arc::new(Correlator::new());
        let cancel = CancellationToken::new();

        let weak = Arc::downgrade(self);
        let task = tokio::spawn({
            let correlator = Arc::clone(&correlator);
            let cancel = cancel.clone();
            async move {
                let exit = receiver::run(source, correlator, cancel).await;
                if exit == ReceiverExit::TransportClosed {
                    if let Some(inner) = weak.upgrade() {
                        inner.settle_lost(generation);
                    }
                }
            }
        });

        Arc::new(Session {
            generation,
            sink: AsyncMutex::new(sink),
            correlator,
            cancel,
            receiver: Mutex::new(Some(task)),
        })
    }

    /// Marks the session lost after its receiver loop drained the table.
    ///
    /// Ignores stale notices from an older generation.
    fn settle_lost(&self, generation: u64) {
        let mut slot = self.slot.lock();
        let current = matches!(&*slot, Slot::Connected(session) if session.generation == generation);
        if current {
            *slot = Slot::Disconnected;
            info!(generation, "connection lost");
        }
    }
}

/// One live connection: write half, correlator and receiver task.
struct Session {
    generation: u64,
    sink: AsyncMutex<WsSink>,
    correlator: Arc<Correlator>,
    cancel: CancellationToken,
    receiver: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    async fn send(&self, frame: String) -> ClientResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text(frame)).await.map_err(|err| {
            // A drained session reports the same error its waiters got.
            if self.correlator.is_closed() {
                ClientError::ConnectionClosed
            } else {
                ClientError::Connection(format!("send failed: {err}"))
            }
        })
    }

    async fn shutdown(&self) {
        self.cancel.cancel();

        let task = self.receiver.lock().take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                warn!(generation = self.generation, error = %err, "receiver task ended abnormally");
            }
        }

        // Drained before the sink lock is released so a sender queued on the
        // lock finds the correlator closed.
        let drained = {
            let mut sink = self.sink.lock().await;
            match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!(error = %err, "close frame not delivered"),
                Err(_) => debug!("close handshake timed out"),
            }
            self.correlator.drain_all(ClientError::ConnectionClosed)
        };
        info!(generation = self.generation, drained, "disconnected");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Reached without shutdown() when the last handle goes away.
        self.cancel.cancel();
        self.correlator.drain_all(ClientError::ConnectionClosed);
    }
}
