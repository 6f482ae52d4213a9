//! History pagination tests.
//!
//! Covers merging overlapping pages into the live timeline, exhaustion via
//! short pages, the single-in-flight guard, and error containment.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use huddle::channel::Channel;
use huddle::channel::loopback::{LoopbackChannel, ScriptedConnector};
use huddle::session::history::{HistoryBackend, HistoryError};
use huddle::session::{ChatSession, SessionConfig, SessionEvent};
use huddle_proto::codec;
use huddle_proto::message::{
    ChatMessage, ConversationId, Envelope, MessageBody, MessageId, ParticipantId, Timestamp,
};

// ---------------------------------------------------------------------------
// Test backends
// ---------------------------------------------------------------------------

/// Backend that returns pre-scripted pages in order, ignoring the cursor.
#[derive(Default)]
struct PagedBackend {
    pages: parking_lot::Mutex<VecDeque<Vec<ChatMessage>>>,
    calls: AtomicUsize,
}

impl PagedBackend {
    fn with_pages(pages: impl IntoIterator<Item = Vec<ChatMessage>>) -> Self {
        Self {
            pages: parking_lot::Mutex::new(pages.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl HistoryBackend for PagedBackend {
    async fn fetch_page(
        &self,
        _conversation: &ConversationId,
        _before: Option<Timestamp>,
        _limit: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pages.lock().pop_front().unwrap_or_default())
    }
}

/// Backend that takes a while before returning its page.
struct SlowBackend {
    page: Vec<ChatMessage>,
    delay: Duration,
}

impl HistoryBackend for SlowBackend {
    async fn fetch_page(
        &self,
        _conversation: &ConversationId,
        _before: Option<Timestamp>,
        _limit: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.page.clone())
    }
}

/// Backend that always fails.
struct FailingBackend {
    calls: AtomicUsize,
}

impl HistoryBackend for FailingBackend {
    async fn fetch_page(
        &self,
        _conversation: &ConversationId,
        _before: Option<Timestamp>,
        _limit: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HistoryError::Backend("service unavailable".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn msg_at(conversation: ConversationId, millis: u64) -> ChatMessage {
    ChatMessage {
        id: MessageId::new(),
        conversation_id: conversation,
        sender_id: ParticipantId::new("bob"),
        receiver_id: ParticipantId::new("alice"),
        body: MessageBody::Text(format!("msg-{millis}")),
        created_at: Timestamp::from_millis(millis),
    }
}

fn session_with<H: HistoryBackend>(
    history: H,
    conversation: ConversationId,
    page_size: usize,
) -> (
    Arc<ScriptedConnector>,
    Arc<ChatSession<Arc<ScriptedConnector>, H>>,
    mpsc::Receiver<SessionEvent>,
) {
    let connector = Arc::new(ScriptedConnector::new());
    let config = SessionConfig {
        page_size,
        ..SessionConfig::default()
    };
    let (session, events) = ChatSession::new(
        Arc::clone(&connector),
        history,
        conversation,
        ParticipantId::new("alice"),
        ParticipantId::new("bob"),
        config,
    );
    (connector, session, events)
}

fn times<C, H>(session: &ChatSession<C, H>) -> Vec<u64>
where
    C: huddle::channel::Connector,
    H: HistoryBackend,
{
    session
        .snapshot()
        .iter()
        .map(|m| m.message.created_at.as_millis())
        .collect()
}

// ===========================================================================
// Overlap merge
// ===========================================================================

/// A history page that overlaps the live timeline merges without duplicates
/// and without reordering anything already displayed.
#[tokio::test]
async fn overlapping_page_merges_into_live_timeline() {
    let conversation = ConversationId::new();
    let live: Vec<ChatMessage> = [5u64, 6, 7]
        .iter()
        .map(|&m| msg_at(conversation, m))
        .collect();

    // Page holds {3,4} plus copies of the already-live {5,6}.
    let page = vec![
        msg_at(conversation, 3),
        msg_at(conversation, 4),
        live[0].clone(),
        live[1].clone(),
    ];
    let (connector, session, mut events) =
        session_with(PagedBackend::with_pages([page]), conversation, 4);

    // Deliver the live messages over the channel first.
    let (chan, remote) = LoopbackChannel::pair(32);
    connector.push_channel(chan);
    session.open().await;
    for msg in &live {
        let frame = codec::encode(&Envelope::Chat(msg.clone())).expect("message should encode");
        remote.send(&frame).await.expect("frame should send");
    }
    tokio::time::timeout(Duration::from_secs(5), async {
        while session.snapshot().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("live messages should arrive");

    assert!(session.load_more().await);

    assert_eq!(times(&session), vec![3, 4, 5, 6, 7]);
    let loaded = std::iter::from_fn(|| events.try_recv().ok())
        .find(|e| matches!(e, SessionEvent::HistoryLoaded { .. }));
    assert_eq!(
        loaded,
        Some(SessionEvent::HistoryLoaded {
            count: 2,
            has_more: true
        })
    );
}

// ===========================================================================
// Exhaustion
// ===========================================================================

/// A short page marks the history exhausted; further loads skip the backend.
#[tokio::test]
async fn short_page_exhausts_history() {
    let conversation = ConversationId::new();
    let page = vec![msg_at(conversation, 1), msg_at(conversation, 2)];
    let backend = Arc::new(PagedBackend::with_pages([page]));
    let (_connector, session, _events) = session_with(Arc::clone(&backend), conversation, 20);

    assert!(session.has_more_history());
    assert!(session.load_more().await);
    assert_eq!(session.snapshot().len(), 2);
    assert!(!session.has_more_history());

    assert!(!session.load_more().await);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
}

/// An empty first page means an empty conversation, not an error.
#[tokio::test]
async fn empty_history_exhausts_immediately() {
    let conversation = ConversationId::new();
    let (_connector, session, _events) =
        session_with(PagedBackend::default(), conversation, 20);

    assert!(session.load_more().await);
    assert!(session.snapshot().is_empty());
    assert!(!session.has_more_history());
}

// ===========================================================================
// In-flight guard
// ===========================================================================

/// While one load is in flight, further requests return without fetching.
#[tokio::test]
async fn concurrent_load_more_is_rejected() {
    let conversation = ConversationId::new();
    let page: Vec<ChatMessage> = (1..=5).map(|m| msg_at(conversation, m)).collect();
    let backend = SlowBackend {
        page,
        delay: Duration::from_millis(200),
    };
    let (_connector, session, _events) = session_with(backend, conversation, 5);

    let slow = {
        let session = Arc::clone(&session);
        tokio::spawn(async move { session.load_more().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Second request while the first is still fetching.
    assert!(!session.load_more().await);

    assert!(slow.await.expect("load task should not panic"));
    assert_eq!(session.snapshot().len(), 5);

    // The guard is released afterwards.
    assert!(session.load_more().await);
}

// ===========================================================================
// Error containment
// ===========================================================================

/// A backend failure leaves the session usable: nothing merged, history not
/// exhausted, and the next load hits the backend again.
#[tokio::test]
async fn backend_failure_is_contained_and_retryable() {
    let conversation = ConversationId::new();
    let backend = Arc::new(FailingBackend {
        calls: AtomicUsize::new(0),
    });
    let (_connector, session, _events) = session_with(Arc::clone(&backend), conversation, 20);

    assert!(!session.load_more().await);
    assert!(session.snapshot().is_empty());
    assert!(session.has_more_history());

    assert!(!session.load_more().await);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
}
