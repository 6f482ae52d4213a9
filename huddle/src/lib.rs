//! `Huddle` — private chat session core.
//!
//! The logic behind one open conversation screen: a [`session::ChatSession`]
//! owns a [`connection::ConnectionManager`] for the live channel and a
//! [`store::MessageStore`] holding the ordered, deduplicated message list,
//! and exposes send/retry/load-more commands plus snapshots for rendering.
//! Rendering, navigation, and media upload live elsewhere.

pub mod channel;
pub mod connection;
pub mod session;
pub mod store;
