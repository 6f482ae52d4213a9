//! WebSocket channel for `Huddle`.
//!
//! Implements the [`Channel`] trait over a WebSocket connection to a
//! conversation endpoint. This is the production transport: the mobile
//! client opens one socket per conversation and exchanges binary frames,
//! each holding one encoded envelope.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{Channel, ChannelError, Connector};

/// Type alias for the write half of a WebSocket connection.
type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for establishing the WebSocket connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector that dials a conversation endpoint over WebSocket.
///
/// The endpoint URL (ws:// or wss://) addresses one conversation; it is
/// validated at construction so that a malformed address fails fast instead
/// of on every reconnect attempt.
pub struct WsConnector {
    endpoint: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Create a connector for the given conversation endpoint URL.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Unreachable`] if the URL does not parse.
    pub fn new(endpoint: &str) -> Result<Self, ChannelError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            tracing::warn!(url = endpoint, err = %e, "invalid conversation endpoint URL");
            ChannelError::Unreachable
        })?;
        Ok(Self {
            endpoint,
            connect_timeout: CONNECT_TIMEOUT,
        })
    }

    /// Override the connect timeout (default 10 s).
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The conversation endpoint this connector dials.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str()
    }
}

impl Connector for WsConnector {
    type Chan = WsChannel;

    async fn connect(&self) -> Result<WsChannel, ChannelError> {
        let (ws_stream, _response) = tokio::time::timeout(
            self.connect_timeout,
            connect_async(self.endpoint.as_str()),
        )
        .await
        .map_err(|_| {
            tracing::warn!(url = %self.endpoint, "WebSocket connect timed out");
            ChannelError::Timeout
        })?
        .map_err(|e| {
            tracing::warn!(url = %self.endpoint, err = %e, "WebSocket connect failed");
            map_ws_connect_error(e)
        })?;

        let (sink, reader) = ws_stream.split();
        Ok(WsChannel {
            sink: Mutex::new(sink),
            reader: Mutex::new(reader),
        })
    }
}

/// WebSocket channel implementing the [`Channel`] trait.
///
/// Frames map one-to-one onto WebSocket binary messages. Ping/pong and text
/// frames are skipped on receive.
pub struct WsChannel {
    sink: Mutex<WsSink>,
    reader: Mutex<WsReader>,
}

impl Channel for WsChannel {
    async fn send(&self, frame: &[u8]) -> Result<(), ChannelError> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Binary(frame.to_vec().into()))
            .await
            .map_err(|e| {
                tracing::warn!(err = %e, "WebSocket send failed");
                ChannelError::Closed
            })
    }

    async fn recv(&self) -> Result<Vec<u8>, ChannelError> {
        let mut reader = self.reader.lock().await;
        loop {
            match reader.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(data.to_vec()),
                Some(Ok(Message::Close(_))) | None => return Err(ChannelError::Closed),
                Some(Ok(_)) => {
                    // Ping/pong/text frames carry no envelope.
                }
                Some(Err(e)) => {
                    tracing::warn!(err = %e, "WebSocket read error");
                    return Err(ChannelError::Closed);
                }
            }
        }
    }
}

/// Map a `tokio_tungstenite` connection error to a [`ChannelError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> ChannelError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                ChannelError::Unreachable
            } else {
                ChannelError::Io(io_err)
            }
        }
        WsError::Tls(_) => ChannelError::Io(std::io::Error::other(format!("TLS error: {err}"))),
        WsError::Http(response) => ChannelError::Io(std::io::Error::other(format!(
            "endpoint HTTP error: status {}",
            response.status()
        ))),
        other => ChannelError::Io(std::io::Error::other(format!("connection error: {other}"))),
    }
}
