//! Chat session façade.
//!
//! [`ChatSession`] is the single entry point for one open conversation. It
//! wires a [`ConnectionManager`] (live channel), a [`MessageStore`] (ordered
//! timeline), and a [`HistoryBackend`] (older pages) behind a small command
//! surface: open, send, retry, load more, close. State changes are pushed to
//! the owner as [`SessionEvent`]s; the timeline is read via
//! [`snapshot`](ChatSession::snapshot).

pub mod history;
mod send;

pub use send::MediaKind;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;

use huddle_proto::codec;
use huddle_proto::message::{
    ConversationId, Envelope, MessageId, MessageStatus, ParticipantId, ValidationError,
};

use crate::channel::Connector;
use crate::connection::{ConnectionManager, ConnectionState, ReconnectPolicy};
use crate::store::{MessageStore, StoredMessage};
use history::HistoryBackend;

/// Default number of messages per history page.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Tunables for one chat session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Messages requested per history page.
    pub page_size: usize,
    /// Capacity of the session event channel.
    pub event_buffer: usize,
    /// Capacity of the inbound frame channel.
    pub inbound_buffer: usize,
    /// Reconnect policy for the underlying connection.
    pub reconnect: ReconnectPolicy,
    /// How long one send may take before being recorded as failed.
    pub send_timeout: Duration,
    /// How long one history fetch may take before being abandoned.
    pub fetch_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            event_buffer: 64,
            inbound_buffer: 256,
            reconnect: ReconnectPolicy::default(),
            send_timeout: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

/// Errors surfaced by session commands.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Outgoing content failed validation; nothing was stored or sent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A command would move a message through an illegal status transition.
    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidStateTransition {
        id: MessageId,
        from: MessageStatus,
        to: MessageStatus,
    },

    /// The referenced message is not in the store.
    #[error("unknown message {0}")]
    UnknownMessage(MessageId),

    /// The session has been closed; no further commands are accepted.
    #[error("session is closed")]
    Closed,
}

/// Notifications pushed to the session owner as state changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A message entered the timeline (local send, live arrival, or history).
    MessageInserted { id: MessageId },
    /// A stored message changed delivery status.
    StatusChanged { id: MessageId, status: MessageStatus },
    /// The connection moved to a new lifecycle state.
    ConnectionChanged { state: ConnectionState },
    /// A history page was merged; `count` is how many messages were new.
    HistoryLoaded { count: usize, has_more: bool },
}

/// Pagination state for history loading.
struct HistoryState {
    in_flight: bool,
    has_more: bool,
}

/// Background tasks owned by an open session.
#[derive(Default)]
struct SessionTasks {
    apply: Option<JoinHandle<()>>,
    state_forwarder: Option<JoinHandle<()>>,
}

/// One open private conversation.
///
/// Created with [`new`](Self::new), started with [`open`](Self::open), and
/// shut down with [`close`](Self::close). After close, sends and retries
/// fail with [`SessionError::Closed`], `load_more` returns `false`, and late
/// network or history results are discarded.
pub struct ChatSession<C: Connector, H: HistoryBackend> {
    conversation_id: ConversationId,
    local_id: ParticipantId,
    remote_id: ParticipantId,
    config: SessionConfig,
    connection: Arc<ConnectionManager<C>>,
    history: H,
    store: parking_lot::Mutex<MessageStore>,
    event_tx: mpsc::Sender<SessionEvent>,
    retry_counts: parking_lot::Mutex<HashMap<MessageId, u32>>,
    history_state: parking_lot::Mutex<HistoryState>,
    closed: AtomicBool,
    tasks: Mutex<SessionTasks>,
    inbound_rx: Mutex<Option<mpsc::Receiver<Vec<u8>>>>,
}

impl<C: Connector, H: HistoryBackend> ChatSession<C, H> {
    /// Create a session for one conversation between two participants.
    ///
    /// Returns the session and the receiver for its [`SessionEvent`] stream.
    /// The connection is not opened until [`open`](Self::open).
    pub fn new(
        connector: C,
        history: H,
        conversation_id: ConversationId,
        local_id: ParticipantId,
        remote_id: ParticipantId,
        config: SessionConfig,
    ) -> (Arc<Self>, mpsc::Receiver<SessionEvent>) {
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_buffer);
        let connection = ConnectionManager::new(connector, config.reconnect, inbound_tx);

        let session = Arc::new(Self {
            conversation_id,
            local_id,
            remote_id,
            config,
            connection,
            history,
            store: parking_lot::Mutex::new(MessageStore::new()),
            event_tx,
            retry_counts: parking_lot::Mutex::new(HashMap::new()),
            history_state: parking_lot::Mutex::new(HistoryState {
                in_flight: false,
                has_more: true,
            }),
            closed: AtomicBool::new(false),
            tasks: Mutex::new(SessionTasks::default()),
            inbound_rx: Mutex::new(Some(inbound_rx)),
        });
        (session, event_rx)
    }

    /// Start the session: spawn the inbound apply task and the connection
    /// state forwarder, then open the connection.
    ///
    /// No-op on a closed session; calling it again on an open session only
    /// re-triggers the connection's own (idempotent) open.
    pub async fn open(self: &Arc<Self>) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut tasks = self.tasks.lock().await;
            if tasks.apply.is_none() {
                if let Some(mut inbound_rx) = self.inbound_rx.lock().await.take() {
                    let session = Arc::clone(self);
                    tasks.apply = Some(tokio::spawn(async move {
                        while let Some(frame) = inbound_rx.recv().await {
                            session.apply_frame(&frame);
                        }
                    }));
                }
                let mut state_rx = self.connection.subscribe_state();
                let session = Arc::clone(self);
                tasks.state_forwarder = Some(tokio::spawn(async move {
                    while state_rx.changed().await.is_ok() {
                        let state = *state_rx.borrow_and_update();
                        session.emit(SessionEvent::ConnectionChanged { state });
                    }
                }));
            }
        }
        self.connection.open().await;
    }

    /// Shut the session down permanently.
    ///
    /// Closes the connection, stops background tasks, and marks the session
    /// so that late send/history results are discarded. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.connection.close().await;
        let mut tasks = self.tasks.lock().await;
        if let Some(task) = tasks.apply.take() {
            task.abort();
        }
        if let Some(task) = tasks.state_forwarder.take() {
            task.abort();
        }
        drop(tasks);
        tracing::info!(conversation = %self.conversation_id, "session closed");
    }

    /// Apply one inbound frame to the store.
    fn apply_frame(&self, frame: &[u8]) {
        let envelope = match codec::decode(frame) {
            Ok(envelope) => envelope,
            Err(err) => {
                tracing::warn!(err = %err, "dropping undecodable frame");
                return;
            }
        };
        match envelope {
            Envelope::Chat(message) => {
                if message.conversation_id != self.conversation_id {
                    tracing::warn!(id = %message.id, "dropping message for foreign conversation");
                    return;
                }
                let id = message.id;
                let inserted = self.store.lock().insert(message, MessageStatus::Sent);
                if inserted {
                    self.emit(SessionEvent::MessageInserted { id });
                } else {
                    tracing::debug!(id = %id, "duplicate incoming message");
                }
            }
            Envelope::Read(receipt) => {
                // Only a sent message can become read; receipts for anything
                // else (unknown, still sending, already read) are ignored.
                let status = self.store.lock().status(&receipt.message_id);
                if status == Some(MessageStatus::Sent) {
                    self.apply_status(receipt.message_id, MessageStatus::Read);
                } else {
                    tracing::debug!(
                        id = %receipt.message_id,
                        status = ?status,
                        "ignoring read receipt"
                    );
                }
            }
        }
    }

    pub(super) fn emit(&self, event: SessionEvent) {
        // A full or dropped event channel must never block the session.
        let _ = self.event_tx.try_send(event);
    }

    /// The full ordered timeline, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StoredMessage> {
        self.store.lock().snapshot()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn subscribe_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connection.subscribe_state()
    }

    /// The underlying connection manager.
    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionManager<C>> {
        &self.connection
    }

    /// Whether older history pages may remain.
    #[must_use]
    pub fn has_more_history(&self) -> bool {
        self.history_state.lock().has_more
    }

    /// How many times a message has been retried.
    #[must_use]
    pub fn retry_count(&self, id: &MessageId) -> u32 {
        self.retry_counts.lock().get(id).copied().unwrap_or(0)
    }

    /// The conversation this session is bound to.
    #[must_use]
    pub const fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }
}
