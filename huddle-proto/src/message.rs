//! Wire format message types for the `Huddle` private chat protocol.
//!
//! A conversation channel carries discrete frames; every frame decodes to one
//! [`Envelope`]. The [`ChatMessage`] record here is the single message shape
//! shared by the live channel, the history API, and the session's message
//! store. Delivery status is session-local and never serialized onto the
//! wire — the wire only carries read receipts driving the `Sent -> Read`
//! transition.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of an outgoing text body, in characters.
///
/// Matches the input limit enforced by the mobile client (1000 characters).
pub const MAX_TEXT_LEN: usize = 1000;

/// Unique identifier for a message, based on UUID v7 for time-ordering.
///
/// Client-generated for outgoing messages; incoming ids are server-assigned
/// (or echoed back) and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new time-ordered message identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `MessageId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation (one private chat thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(Uuid);

impl ConversationId {
    /// Creates a new conversation identifier (UUID v7).
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `ConversationId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the inner UUID value.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a conversation participant (sender or receiver).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Creates a participant identifier from its string representation.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this participant ID.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Millisecond-precision UTC timestamp used for message ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Creates a timestamp for the current instant.
    #[must_use]
    pub fn now() -> Self {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self(u64::try_from(millis).unwrap_or(u64::MAX))
    }

    /// Creates a timestamp from milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    /// Returns the timestamp as milliseconds since the UNIX epoch.
    #[must_use]
    pub const fn as_millis(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Discriminant for the three supported message kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// An image reference.
    Image,
    /// A voice clip reference.
    Voice,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Image => write!(f, "image"),
            Self::Voice => write!(f, "voice"),
        }
    }
}

/// Content of a chat message; payload shape varies by kind.
///
/// Media bodies carry only a reference — uploading the underlying bytes is
/// the media service's concern, not the chat session's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageBody {
    /// Plain text message content.
    Text(String),
    /// An image, referenced by URI.
    Image {
        /// Location of the uploaded image.
        uri: String,
    },
    /// A voice clip, referenced by URI with its playback duration.
    Voice {
        /// Location of the uploaded clip.
        uri: String,
        /// Clip duration in milliseconds.
        duration_ms: u32,
    },
}

impl MessageBody {
    /// Returns the kind discriminant for this body.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Image { .. } => MessageKind::Image,
            Self::Voice { .. } => MessageKind::Voice,
        }
    }

    /// Short display form: the text itself, or a placeholder for media
    /// bodies (used for conversation-list previews and notifications).
    #[must_use]
    pub fn preview(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Image { .. } => "[image]",
            Self::Voice { .. } => "[voice]",
        }
    }
}

/// Error returned when outgoing content fails validation.
///
/// Validation failures are surfaced to the caller before any store insert or
/// network attempt; they never produce a `Failed` message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Text content is empty after trimming.
    #[error("message text is empty")]
    Empty,
    /// Text content exceeds the maximum allowed length.
    #[error("message too long ({len} characters, max {max})")]
    TooLong {
        /// Actual length of the content in characters.
        len: usize,
        /// Maximum allowed length in characters.
        max: usize,
    },
    /// A media body carries an empty URI.
    #[error("media reference is empty")]
    EmptyMediaUri,
}

/// Validates and normalizes an outgoing text body.
///
/// Trims surrounding whitespace, then rejects empty or over-length content.
/// Returns the trimmed body on success — the trimmed form is what goes on
/// the wire.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] when nothing remains after trimming,
/// or [`ValidationError::TooLong`] when the trimmed text exceeds
/// [`MAX_TEXT_LEN`] characters.
pub fn validate_text(raw: &str) -> Result<String, ValidationError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    let len = trimmed.chars().count();
    if len > MAX_TEXT_LEN {
        return Err(ValidationError::TooLong {
            len,
            max: MAX_TEXT_LEN,
        });
    }
    Ok(trimmed.to_string())
}

/// A complete chat message, ready for the store or the wire.
///
/// These are exactly the fields the channel protocol carries: id, sender,
/// receiver, content + kind (both in [`MessageBody`]), and timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Unique identifier for this message.
    pub id: MessageId,
    /// Which conversation this message belongs to.
    pub conversation_id: ConversationId,
    /// Who sent this message.
    pub sender_id: ParticipantId,
    /// Who the message is addressed to.
    pub receiver_id: ParticipantId,
    /// The message content.
    pub body: MessageBody,
    /// Client-observed or server-stamped creation time, used for ordering.
    pub created_at: Timestamp,
}

impl ChatMessage {
    /// Validates this message's body for sending.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] for empty/over-length text or an empty
    /// media URI.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match &self.body {
            MessageBody::Text(text) => validate_text(text).map(|_| ()),
            MessageBody::Image { uri } | MessageBody::Voice { uri, .. } => {
                if uri.trim().is_empty() {
                    Err(ValidationError::EmptyMediaUri)
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Tracks the delivery lifecycle of a message.
///
/// Transitions: `Sending -> Sent` (channel accepted the transmit),
/// `Sending -> Failed` (transmit failed or channel unavailable),
/// `Failed -> Sending` (user-triggered retry), `Sent -> Read` (read receipt).
/// `Read` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageStatus {
    /// Optimistically displayed, transmission outcome unknown.
    Sending,
    /// Accepted by the channel for transmission.
    Sent,
    /// The remote participant has read the message.
    Read,
    /// Transmission failed; the message stays visible with a retry affordance.
    Failed,
}

impl MessageStatus {
    /// Whether moving from `self` to `next` is a legal lifecycle transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Sending, Self::Sent | Self::Failed)
                | (Self::Failed, Self::Sending)
                | (Self::Sent, Self::Read)
        )
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sending => write!(f, "sending"),
            Self::Sent => write!(f, "sent"),
            Self::Read => write!(f, "read"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Notification that the remote participant has read a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// The message that was read.
    pub message_id: MessageId,
    /// When the read happened.
    pub at: Timestamp,
}

/// Top-level envelope wrapping every frame on a conversation channel.
///
/// One channel frame = one decodable `Envelope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Envelope {
    /// A chat message.
    Chat(ChatMessage),
    /// A read receipt for a previously sent message.
    Read(ReadReceipt),
}
