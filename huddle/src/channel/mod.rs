//! Channel layer abstraction for `Huddle`.
//!
//! Defines the [`Channel`] and [`Connector`] traits that conversation
//! transports must satisfy. Concrete implementations:
//! - [`loopback::LoopbackChannel`] — in-process channel pair for testing
//! - [`ws::WsChannel`] — WebSocket channel for production use
//!
//! A channel is a persistent, bidirectional, message-oriented connection to
//! one conversation endpoint; inbound and outbound units are discrete frames,
//! each the encoding of one `huddle_proto` envelope. The channel layer never
//! inspects frame contents.

pub mod loopback;
pub mod ws;

/// Errors that can occur during channel operations.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Send attempted while the channel is not connected.
    #[error("channel unavailable")]
    Unavailable,

    /// The connection to the conversation endpoint has been closed.
    #[error("channel closed")]
    Closed,

    /// The operation timed out before completing.
    #[error("channel operation timed out")]
    Timeout,

    /// The conversation endpoint is not reachable.
    #[error("conversation endpoint unreachable")]
    Unreachable,

    /// An underlying I/O error occurred.
    #[error("channel I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Async channel trait carrying opaque frames for one conversation.
pub trait Channel: Send + Sync + 'static {
    /// Send one frame to the conversation endpoint.
    ///
    /// Returns `Ok(())` when the frame has been handed off to the underlying
    /// transport. This does NOT guarantee delivery.
    fn send(
        &self,
        frame: &[u8],
    ) -> impl std::future::Future<Output = Result<(), ChannelError>> + Send;

    /// Receive the next frame from the conversation endpoint.
    ///
    /// Blocks asynchronously until a frame arrives or the channel closes.
    fn recv(&self) -> impl std::future::Future<Output = Result<Vec<u8>, ChannelError>> + Send;
}

/// Factory for channels to one conversation endpoint.
///
/// A connector is constructed per conversation (the endpoint address is bound
/// at construction time) and is asked for a fresh channel on every connect
/// and reconnect attempt.
pub trait Connector: Send + Sync + 'static {
    /// The channel type this connector produces.
    type Chan: Channel;

    /// Establish a new channel to the conversation endpoint.
    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<Self::Chan, ChannelError>> + Send;
}

/// A shared connector connects like the connector it wraps.
impl<T: Connector> Connector for std::sync::Arc<T> {
    type Chan = T::Chan;

    async fn connect(&self) -> Result<Self::Chan, ChannelError> {
        (**self).connect().await
    }
}
