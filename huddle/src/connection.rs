//! Connection lifecycle management.
//!
//! [`ConnectionManager`] owns the channel to one conversation endpoint and
//! drives the connect / reconnect state machine. When an established channel
//! drops, a reconnect is scheduled after a policy-controlled delay; this
//! repeats indefinitely until the connection succeeds or the manager is
//! closed. Inbound frames are forwarded untouched to the session layer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use crate::channel::{Channel, ChannelError, Connector};

/// Delay between reconnect attempts under the default policy.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Lifecycle state of the connection to the conversation endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No channel, and none being established.
    Disconnected,
    /// A connect attempt is in progress.
    Connecting,
    /// A live channel is established.
    Connected,
    /// The channel was lost (or an attempt failed) and a retry is pending.
    Reconnecting,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Policy controlling the delay before each reconnect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Wait the same duration before every attempt.
    Fixed(Duration),
    /// Double the delay after each failed attempt, up to `cap`.
    Exponential { initial: Duration, cap: Duration },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt number `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential { initial, cap } => {
                // Shift is clamped so the factor cannot overflow.
                let factor = 1u32 << attempt.min(16);
                (initial * factor).min(cap)
            }
        }
    }
}

/// Handles and channel owned by the currently running connection, if any.
struct Tasks<Ch> {
    chan: Option<Arc<Ch>>,
    reader: Option<JoinHandle<()>>,
    retry_timer: Option<JoinHandle<()>>,
}

impl<Ch> Default for Tasks<Ch> {
    fn default() -> Self {
        Self {
            chan: None,
            reader: None,
            retry_timer: None,
        }
    }
}

/// Manages the channel to one conversation endpoint.
///
/// Obtains channels from its [`Connector`], watches them for failure, and
/// reconnects per its [`ReconnectPolicy`]. State is published through a
/// [`watch`] channel so callers can render connection status; inbound frames
/// are pushed into the `mpsc` sender given at construction.
pub struct ConnectionManager<C: Connector> {
    connector: C,
    policy: ReconnectPolicy,
    state_tx: watch::Sender<ConnectionState>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    tasks: Mutex<Tasks<C::Chan>>,
    attempt: AtomicU32,
    scheduled_reconnects: AtomicU32,
    closed: AtomicBool,
}

impl<C: Connector> ConnectionManager<C> {
    /// Create a manager in the `Disconnected` state.
    ///
    /// Inbound frames from the live channel are forwarded to `inbound_tx`.
    /// No connect attempt is made until [`open`](Self::open) is called.
    pub fn new(connector: C, policy: ReconnectPolicy, inbound_tx: mpsc::Sender<Vec<u8>>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Arc::new(Self {
            connector,
            policy,
            state_tx,
            inbound_tx,
            tasks: Mutex::new(Tasks::default()),
            attempt: AtomicU32::new(0),
            scheduled_reconnects: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Start connecting to the conversation endpoint.
    ///
    /// No-op if the manager is closed, already connected, or already
    /// connecting. A pending retry timer is cancelled and the attempt made
    /// immediately instead.
    pub async fn open(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        match self.state() {
            ConnectionState::Connecting | ConnectionState::Connected => return,
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {}
        }
        if let Some(timer) = self.tasks.lock().await.retry_timer.take() {
            timer.abort();
        }
        self.try_connect().await;
    }

    async fn try_connect(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        self.set_state(ConnectionState::Connecting);
        match self.connector.connect().await {
            Ok(chan) => {
                if self.closed.load(Ordering::SeqCst) {
                    return;
                }
                let chan = Arc::new(chan);
                let mut tasks = self.tasks.lock().await;
                if let Some(old) = tasks.reader.take() {
                    old.abort();
                }
                if let Some(timer) = tasks.retry_timer.take() {
                    timer.abort();
                }
                tasks.chan = Some(Arc::clone(&chan));
                tasks.reader = Some(tokio::spawn(Self::reader_loop(Arc::clone(self), chan)));
                drop(tasks);
                self.attempt.store(0, Ordering::SeqCst);
                self.set_state(ConnectionState::Connected);
                tracing::info!("connected to conversation endpoint");
            }
            Err(err) => {
                tracing::warn!(err = %err, "connect attempt failed");
                self.schedule_reconnect().await;
            }
        }
    }

    /// `try_connect` and `schedule_reconnect` call into each other; the
    /// retry timer re-enters through this boxed future so the cycle stays
    /// representable as a concrete type.
    fn reconnect_future(self: &Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        let manager = Arc::clone(self);
        Box::pin(async move { manager.try_connect().await })
    }

    /// Forward inbound frames until the channel fails or the consumer drops.
    async fn reader_loop(manager: Arc<Self>, chan: Arc<C::Chan>) {
        loop {
            match chan.recv().await {
                Ok(frame) => {
                    if manager.inbound_tx.send(frame).await.is_err() {
                        tracing::debug!("inbound consumer dropped, stopping reader");
                        return;
                    }
                }
                Err(err) => {
                    if manager.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    tracing::warn!(err = %err, "channel lost");
                    manager.schedule_reconnect().await;
                    return;
                }
            }
        }
    }

    async fn schedule_reconnect(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            self.set_state(ConnectionState::Disconnected);
            return;
        }
        self.set_state(ConnectionState::Reconnecting);
        let attempt = self.attempt.fetch_add(1, Ordering::SeqCst);
        self.scheduled_reconnects.fetch_add(1, Ordering::SeqCst);
        let delay = self.policy.delay(attempt);
        tracing::info!(attempt = attempt + 1, delay = ?delay, "scheduling reconnect");

        let manager = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if manager.closed.load(Ordering::SeqCst) {
                return;
            }
            manager.reconnect_future().await;
        });

        let mut tasks = self.tasks.lock().await;
        if let Some(old) = tasks.retry_timer.take() {
            old.abort();
        }
        tasks.retry_timer = Some(timer);
    }

    /// Send one frame over the live channel.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Unavailable`] unless the state is `Connected`,
    /// or propagates the channel's own send error.
    pub async fn send(&self, frame: &[u8]) -> Result<(), ChannelError> {
        if self.state() != ConnectionState::Connected {
            return Err(ChannelError::Unavailable);
        }
        let chan = self.tasks.lock().await.chan.clone();
        match chan {
            Some(chan) => chan.send(frame).await,
            None => Err(ChannelError::Unavailable),
        }
    }

    /// Shut the connection down permanently.
    ///
    /// Cancels any pending reconnect, drops the channel, and moves to
    /// `Disconnected`. Idempotent; a closed manager ignores further `open`
    /// calls.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.tasks.lock().await;
        if let Some(timer) = tasks.retry_timer.take() {
            timer.abort();
        }
        if let Some(reader) = tasks.reader.take() {
            reader.abort();
        }
        tasks.chan = None;
        drop(tasks);
        self.set_state(ConnectionState::Disconnected);
        tracing::info!("connection closed");
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Total number of reconnects scheduled over the manager's lifetime.
    #[must_use]
    pub fn scheduled_reconnects(&self) -> u32 {
        self.scheduled_reconnects.load(Ordering::SeqCst)
    }

    fn set_state(&self, state: ConnectionState) {
        // After close the only state left to publish is Disconnected.
        if state != ConnectionState::Disconnected && self.closed.load(Ordering::SeqCst) {
            return;
        }
        let prev = self.state_tx.send_replace(state);
        if prev != state {
            tracing::debug!(from = %prev, to = %state, "connection state changed");
        }
    }
}
