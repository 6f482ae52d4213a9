//! Ordered, deduplicated message store.
//!
//! [`MessageStore`] holds every message known to one open conversation,
//! whether sent locally, received live, or loaded from history. Messages are
//! kept sorted by creation time; equal timestamps preserve insertion order,
//! so merging overlapping history pages with the live list never reorders
//! what is already displayed. Each message id appears at most once — the
//! first insertion wins and later duplicates are dropped.

use std::collections::HashSet;

use huddle_proto::message::{ChatMessage, MessageId, MessageStatus};

/// A message together with its delivery status, as rendered in the timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub message: ChatMessage,
    pub status: MessageStatus,
}

struct Entry {
    message: ChatMessage,
    status: MessageStatus,
}

/// Ordered, deduplicated collection of one conversation's messages.
#[derive(Default)]
pub struct MessageStore {
    entries: Vec<Entry>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a message, keeping the list ordered by creation time.
    ///
    /// Returns `false` (and changes nothing) if a message with the same id is
    /// already present. Among equal timestamps the new message is placed
    /// after existing ones.
    pub fn insert(&mut self, message: ChatMessage, status: MessageStatus) -> bool {
        if !self.ids.insert(message.id) {
            tracing::debug!(id = %message.id, "dropping duplicate message");
            return false;
        }
        let at = self
            .entries
            .partition_point(|e| e.message.created_at <= message.created_at);
        self.entries.insert(at, Entry { message, status });
        true
    }

    /// Insert a batch of messages, returning how many were actually new.
    pub fn insert_many(
        &mut self,
        messages: impl IntoIterator<Item = (ChatMessage, MessageStatus)>,
    ) -> usize {
        messages
            .into_iter()
            .filter(|(message, status)| self.insert(message.clone(), *status))
            .count()
    }

    /// Set the status of a stored message.
    ///
    /// Returns `false` if no message with that id exists. Status transition
    /// rules are enforced by the caller; the store records whatever it is
    /// given.
    pub fn update_status(&mut self, id: &MessageId, status: MessageStatus) -> bool {
        match self.entries.iter_mut().find(|e| e.message.id == *id) {
            Some(entry) => {
                entry.status = status;
                true
            }
            None => {
                tracing::debug!(id = %id, %status, "status update for unknown message");
                false
            }
        }
    }

    /// The full ordered timeline, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StoredMessage> {
        self.entries
            .iter()
            .map(|e| StoredMessage {
                message: e.message.clone(),
                status: e.status,
            })
            .collect()
    }

    /// Look up a stored message by id.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&ChatMessage> {
        self.entries
            .iter()
            .find(|e| e.message.id == *id)
            .map(|e| &e.message)
    }

    /// Current status of a stored message, if present.
    #[must_use]
    pub fn status(&self, id: &MessageId) -> Option<MessageStatus> {
        self.entries
            .iter()
            .find(|e| e.message.id == *id)
            .map(|e| e.status)
    }

    /// The oldest message in the store, the cursor for history loading.
    #[must_use]
    pub fn oldest(&self) -> Option<&ChatMessage> {
        self.entries.first().map(|e| &e.message)
    }

    /// Whether a message with this id is stored.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
