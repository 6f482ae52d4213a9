//! History loading.
//!
//! Older messages are fetched page by page from a [`HistoryBackend`] and
//! merged into the session's message store. Paging is cursor-based: each
//! request asks for messages strictly older than the oldest message already
//! loaded. At most one page fetch is in flight per session, and a short page
//! marks the history as exhausted.

use std::sync::atomic::Ordering;

use huddle_proto::message::{ChatMessage, ConversationId, MessageStatus, Timestamp};

use super::{ChatSession, SessionEvent};
use crate::channel::Connector;

/// Errors a history backend can return.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The backing service rejected or failed the request.
    #[error("history backend error: {0}")]
    Backend(String),
    /// The request did not complete in time.
    #[error("history request timed out")]
    Timeout,
}

/// Source of older messages for one conversation.
///
/// `fetch_page` returns up to `limit` messages strictly older than `before`
/// (or the newest messages when `before` is `None`), ordered oldest first.
/// Returning fewer than `limit` messages means the history is exhausted.
pub trait HistoryBackend: Send + Sync + 'static {
    fn fetch_page(
        &self,
        conversation: &ConversationId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMessage>, HistoryError>> + Send;
}

/// A shared backend fetches like the backend it wraps.
impl<T: HistoryBackend> HistoryBackend for std::sync::Arc<T> {
    async fn fetch_page(
        &self,
        conversation: &ConversationId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        (**self).fetch_page(conversation, before, limit).await
    }
}

/// History backend over an in-memory message list, for tests and demos.
#[derive(Default)]
pub struct InMemoryHistory {
    messages: parking_lot::Mutex<Vec<ChatMessage>>,
}

impl InMemoryHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add messages to the backing list.
    pub fn seed(&self, messages: impl IntoIterator<Item = ChatMessage>) {
        self.messages.lock().extend(messages);
    }
}

impl HistoryBackend for InMemoryHistory {
    async fn fetch_page(
        &self,
        conversation: &ConversationId,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, HistoryError> {
        let mut page: Vec<ChatMessage> = self
            .messages
            .lock()
            .iter()
            .filter(|m| m.conversation_id == *conversation)
            .filter(|m| before.is_none_or(|cursor| m.created_at < cursor))
            .cloned()
            .collect();
        page.sort_by_key(|m| m.created_at);
        // Keep the newest `limit` of what qualified, oldest first.
        let skip = page.len().saturating_sub(limit);
        Ok(page.split_off(skip))
    }
}

impl<C: Connector, H: HistoryBackend> ChatSession<C, H> {
    /// Load the next page of older messages into the store.
    ///
    /// Returns `true` if a page was fetched and merged. Returns `false` when
    /// the session is closed, a load is already in flight, the history is
    /// exhausted, or the backend failed — a failed load releases the
    /// in-flight guard so it can be retried.
    pub async fn load_more(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let cursor = {
            let mut history_state = self.history_state.lock();
            if history_state.in_flight || !history_state.has_more {
                return false;
            }
            history_state.in_flight = true;
            self.store.lock().oldest().map(|m| m.created_at)
        };
        let limit = self.config.page_size;

        let result = tokio::time::timeout(
            self.config.fetch_timeout,
            self.history.fetch_page(&self.conversation_id, cursor, limit),
        )
        .await;

        let page = match result {
            Ok(Ok(page)) => page,
            Ok(Err(err)) => {
                tracing::warn!(err = %err, "history fetch failed");
                self.history_state.lock().in_flight = false;
                return false;
            }
            Err(_) => {
                tracing::warn!("history fetch timed out");
                self.history_state.lock().in_flight = false;
                return false;
            }
        };

        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!("discarding history page, session closed");
            self.history_state.lock().in_flight = false;
            return false;
        }

        let has_more = page.len() >= limit;
        let count = {
            let mut store = self.store.lock();
            let mut count = 0;
            for message in page {
                if message.conversation_id != self.conversation_id {
                    tracing::warn!(id = %message.id, "dropping history message for foreign conversation");
                    continue;
                }
                if store.insert(message, MessageStatus::Read) {
                    count += 1;
                }
            }
            count
        };

        {
            let mut history_state = self.history_state.lock();
            history_state.in_flight = false;
            history_state.has_more = has_more;
        }
        tracing::debug!(count, has_more, "history page merged");
        self.emit(SessionEvent::HistoryLoaded { count, has_more });
        true
    }
}
