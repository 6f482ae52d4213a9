//! Serialization and deserialization for conversation channel frames.
//!
//! Both channel implementations are message-oriented (one frame = one
//! envelope), so no length-prefix framing is needed — a frame's payload is
//! the postcard encoding of an [`Envelope`].

use crate::message::Envelope;

/// Error type for codec encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Encodes an [`Envelope`] into a byte vector using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the envelope cannot be serialized.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(envelope).map_err(|e| CodecError::Serialization(e.to_string()))
}

/// Decodes an [`Envelope`] from a frame's bytes using postcard.
///
/// # Errors
///
/// Returns `CodecError::Serialization` if the bytes cannot be deserialized.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    postcard::from_bytes(bytes).map_err(|e| CodecError::Serialization(e.to_string()))
}
