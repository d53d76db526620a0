//! Loopback transport for testing.
//!
//! [`LoopbackConnector::new`] returns a connector for the client under test
//! and a [`LoopbackRelay`] handle for the test itself. Each successful dial
//! surfaces as a [`LoopbackPeer`] on the relay handle: the test reads the
//! frames the client wrote and pushes frames back. Dropping the peer closes
//! the client's connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tokio::sync::mpsc;

use super::{Connector, TransportError, TransportLink};

/// Inbound buffer size for each loopback connection.
const LOOPBACK_BUFFER: usize = 64;

/// In-process [`Connector`] backed by `tokio::sync::mpsc` channels.
pub struct LoopbackConnector {
    accepted: mpsc::UnboundedSender<LoopbackPeer>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
}

/// Test-side handle controlling a [`LoopbackConnector`].
pub struct LoopbackRelay {
    accepted: mpsc::UnboundedReceiver<LoopbackPeer>,
    refusing: Arc<AtomicBool>,
    attempts: Arc<AtomicU32>,
}

/// The relay end of one loopback connection.
pub struct LoopbackPeer {
    /// Frames written by the client.
    pub received: mpsc::UnboundedReceiver<String>,
    /// Sender feeding the client's inbound channel.
    pub deliver: mpsc::Sender<String>,
}

impl LoopbackConnector {
    /// Create a connected connector/relay pair.
    #[must_use]
    pub fn new() -> (Self, LoopbackRelay) {
        let (tx, rx) = mpsc::unbounded_channel();
        let refusing = Arc::new(AtomicBool::new(false));
        let attempts = Arc::new(AtomicU32::new(0));
        let connector = Self {
            accepted: tx,
            refusing: Arc::clone(&refusing),
            attempts: Arc::clone(&attempts),
        };
        let relay = LoopbackRelay {
            accepted: rx,
            refusing,
            attempts,
        };
        (connector, relay)
    }
}

impl Connector for LoopbackConnector {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refusing.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("loopback".to_string()));
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(LOOPBACK_BUFFER);
        let peer = LoopbackPeer {
            received: out_rx,
            deliver: in_tx,
        };
        self.accepted
            .send(peer)
            .map_err(|_| TransportError::ConnectionClosed)?;
        Ok(TransportLink::new(out_tx, in_rx))
    }
}

impl LoopbackRelay {
    /// Wait for the client's next successful dial.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.accepted.recv().await
    }

    /// Make subsequent dials fail (`true`) or succeed (`false`).
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of dials attempted so far, successful or not.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl LoopbackPeer {
    /// Wait for the next frame the client wrote.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.received.recv().await
    }

    /// Push a frame to the client.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the client dropped the
    /// connection.
    pub async fn push(&self, frame: impl Into<String>) -> Result<(), TransportError> {
        self.deliver
            .send(frame.into())
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }
}
