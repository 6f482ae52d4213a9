//! Outgoing message pipeline.
//!
//! Sends are optimistic: the message is inserted into the store as `Sending`
//! before anything touches the network, so it appears in the timeline
//! immediately. The transmit outcome then moves it to `Sent` or `Failed`;
//! failed messages stay visible and can be retried with the same id.

use std::sync::atomic::Ordering;

use huddle_proto::codec;
use huddle_proto::message::{
    ChatMessage, Envelope, MessageBody, MessageId, MessageStatus, Timestamp, ValidationError,
    validate_text,
};

use super::{ChatSession, SessionError, SessionEvent, history::HistoryBackend};
use crate::channel::Connector;

/// Which kind of media an outgoing reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// An uploaded image.
    Image,
    /// An uploaded voice clip with its playback duration.
    Voice { duration_ms: u32 },
}

impl<C: Connector, H: HistoryBackend> ChatSession<C, H> {
    /// Send a text message.
    ///
    /// The body is trimmed and validated first; a validation failure changes
    /// nothing. On success the message is stored as `Sending` and returned
    /// immediately — the eventual `Sent`/`Failed` outcome arrives as a
    /// [`SessionEvent::StatusChanged`].
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] for empty or over-length text,
    /// or [`SessionError::Closed`] after close.
    pub async fn send_text(&self, body: &str) -> Result<MessageId, SessionError> {
        let text = validate_text(body)?;
        self.dispatch(MessageBody::Text(text)).await
    }

    /// Send a media reference (the upload itself happens elsewhere).
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Validation`] when the URI is empty, or
    /// [`SessionError::Closed`] after close.
    pub async fn send_media(&self, uri: &str, kind: MediaKind) -> Result<MessageId, SessionError> {
        if uri.trim().is_empty() {
            return Err(ValidationError::EmptyMediaUri.into());
        }
        let body = match kind {
            MediaKind::Image => MessageBody::Image {
                uri: uri.to_owned(),
            },
            MediaKind::Voice { duration_ms } => MessageBody::Voice {
                uri: uri.to_owned(),
                duration_ms,
            },
        };
        self.dispatch(body).await
    }

    /// Retry a failed message, reusing its id and original content.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::UnknownMessage`] if no message with that id is
    /// stored, [`SessionError::InvalidStateTransition`] if the message is
    /// not currently `Failed`, or [`SessionError::Closed`] after close.
    pub async fn retry(&self, id: MessageId) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let message = {
            let store = self.store.lock();
            let Some(status) = store.status(&id) else {
                return Err(SessionError::UnknownMessage(id));
            };
            if status != MessageStatus::Failed {
                return Err(SessionError::InvalidStateTransition {
                    id,
                    from: status,
                    to: MessageStatus::Sending,
                });
            }
            store
                .get(&id)
                .cloned()
                .ok_or(SessionError::UnknownMessage(id))?
        };

        self.apply_status(id, MessageStatus::Sending);
        *self.retry_counts.lock().entry(id).or_insert(0) += 1;
        tracing::debug!(id = %id, "retrying message");
        self.transmit(message).await;
        Ok(())
    }

    /// Build the outgoing message, insert it optimistically, and transmit.
    async fn dispatch(&self, body: MessageBody) -> Result<MessageId, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let message = ChatMessage {
            id: MessageId::new(),
            conversation_id: self.conversation_id,
            sender_id: self.local_id.clone(),
            receiver_id: self.remote_id.clone(),
            body,
            created_at: Timestamp::now(),
        };
        let id = message.id;

        self.store
            .lock()
            .insert(message.clone(), MessageStatus::Sending);
        self.emit(SessionEvent::MessageInserted { id });

        self.transmit(message).await;
        Ok(id)
    }

    /// Encode and send one message, then record the outcome.
    ///
    /// "Sent" means the channel accepted the frame for transmission, not that
    /// the remote side received it. Outcomes arriving after the session has
    /// closed are discarded.
    async fn transmit(&self, message: ChatMessage) {
        let id = message.id;
        let frame = match codec::encode(&Envelope::Chat(message)) {
            Ok(frame) => frame,
            Err(err) => {
                tracing::warn!(id = %id, err = %err, "failed to encode message");
                self.apply_status(id, MessageStatus::Failed);
                return;
            }
        };

        let result =
            tokio::time::timeout(self.config.send_timeout, self.connection.send(&frame)).await;

        if self.closed.load(Ordering::SeqCst) {
            tracing::debug!(id = %id, "discarding send outcome, session closed");
            return;
        }
        match result {
            Ok(Ok(())) => self.apply_status(id, MessageStatus::Sent),
            Ok(Err(err)) => {
                tracing::warn!(id = %id, err = %err, "message send failed");
                self.apply_status(id, MessageStatus::Failed);
            }
            Err(_) => {
                tracing::warn!(id = %id, "message send timed out");
                self.apply_status(id, MessageStatus::Failed);
            }
        }
    }

    /// Record a status change and notify listeners if anything changed.
    pub(super) fn apply_status(&self, id: MessageId, status: MessageStatus) {
        if self.store.lock().update_status(&id, status) {
            self.emit(SessionEvent::StatusChanged { id, status });
        }
    }
}
