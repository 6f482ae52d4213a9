//! Loopback channel for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels to simulate a conversation
//! channel. [`LoopbackChannel::pair`] returns two connected endpoints —
//! frames sent on one are received by the other. [`ScriptedConnector`] plays
//! back a scripted sequence of connect outcomes, which is how reconnect
//! behavior is exercised without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Mutex, mpsc};

use super::{Channel, ChannelError, Connector};

/// In-process channel backed by `tokio::sync::mpsc`.
pub struct LoopbackChannel {
    /// Sender for outgoing frames (delivers to the peer's receiver).
    tx: mpsc::Sender<Vec<u8>>,
    /// Receiver for incoming frames (fed by the peer's sender).
    rx: Mutex<mpsc::Receiver<Vec<u8>>>,
}

impl LoopbackChannel {
    /// Create a pair of connected loopback channels.
    ///
    /// Frames sent by one end are received by the other. The `buffer`
    /// parameter controls the channel capacity for each direction.
    #[must_use]
    pub fn pair(buffer: usize) -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(buffer);
        let (tx_b, rx_b) = mpsc::channel(buffer);

        let a = Self {
            tx: tx_b,
            rx: Mutex::new(rx_a),
        };
        let b = Self {
            tx: tx_a,
            rx: Mutex::new(rx_b),
        };

        (a, b)
    }
}

impl Channel for LoopbackChannel {
    async fn send(&self, frame: &[u8]) -> Result<(), ChannelError> {
        self.tx
            .send(frame.to_vec())
            .await
            .map_err(|_| ChannelError::Closed)
    }

    async fn recv(&self) -> Result<Vec<u8>, ChannelError> {
        let mut rx = self.rx.lock().await;
        rx.recv().await.ok_or(ChannelError::Closed)
    }
}

/// One scripted outcome for [`ScriptedConnector::connect`].
enum Outcome {
    /// The connect attempt fails with `Unreachable`.
    Fail,
    /// The connect attempt succeeds with this channel.
    Channel(LoopbackChannel),
}

/// Connector that plays back a scripted sequence of connect outcomes.
///
/// Outcomes are consumed front-to-back; once the script is exhausted every
/// further attempt fails. The attempt counter lets tests assert how many
/// connects were made.
#[derive(Default)]
pub struct ScriptedConnector {
    script: parking_lot::Mutex<VecDeque<Outcome>>,
    attempts: AtomicU32,
}

impl ScriptedConnector {
    /// Create a connector with an empty script (every connect fails).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a failing connect attempt to the script.
    pub fn push_failure(&self) {
        self.script.lock().push_back(Outcome::Fail);
    }

    /// Append `n` failing connect attempts to the script.
    pub fn push_failures(&self, n: usize) {
        for _ in 0..n {
            self.push_failure();
        }
    }

    /// Append a successful connect attempt yielding `channel`.
    pub fn push_channel(&self, channel: LoopbackChannel) {
        self.script.lock().push_back(Outcome::Channel(channel));
    }

    /// Number of connect attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    type Chan = LoopbackChannel;

    async fn connect(&self) -> Result<LoopbackChannel, ChannelError> {
        // Yield once so state watchers can observe the attempt, as they
        // would with a real dial.
        tokio::task::yield_now().await;
        self.attempts.fetch_add(1, Ordering::SeqCst);
        match self.script.lock().pop_front() {
            Some(Outcome::Channel(chan)) => Ok(chan),
            Some(Outcome::Fail) | None => Err(ChannelError::Unreachable),
        }
    }
}
