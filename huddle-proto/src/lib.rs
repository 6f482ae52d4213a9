//! `Huddle` wire protocol — message model and frame codec.
//!
//! Everything a chat session puts on (or reads off) a conversation channel
//! lives here: identifiers, the message record, delivery status, read
//! receipts, and the postcard-based frame codec.

pub mod codec;
pub mod message;
