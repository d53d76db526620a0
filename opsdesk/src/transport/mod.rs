//! Transport layer abstraction for `OpsDesk` presence.
//!
//! A [`Connector`] dials the relay and hands back a [`TransportLink`]: a pair
//! of channels carrying JSON text frames. The link's inbound channel ending is
//! the transport's close event. Concrete implementations:
//! - [`websocket::WsConnector`]: WebSocket connection to the relay
//! - [`loopback::LoopbackConnector`]: in-process channels for testing

pub mod loopback;
pub mod websocket;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Errors that can occur while dialing or using a transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Dialing did not complete in time.
    #[error("transport operation timed out")]
    Timeout,

    /// The relay could not be reached.
    #[error("relay {0} is unreachable")]
    Unreachable(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Dials the relay.
///
/// Every successful call is one transport "open" event. The connection
/// manager calls this again for each reconnection attempt.
pub trait Connector: Send + Sync + 'static {
    /// Open a new connection.
    fn connect(
        &self,
    ) -> impl std::future::Future<Output = Result<TransportLink, TransportError>> + Send;
}

/// An open connection, expressed as text-frame channels.
///
/// Dropping the link drops the outbound sender (letting the writer close the
/// connection) and aborts any reader task attached with
/// [`with_reader`](Self::with_reader).
pub struct TransportLink {
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::Receiver<String>,
    reader: Option<JoinHandle<()>>,
}

impl TransportLink {
    /// Create a link from an outbound sender and an inbound receiver.
    #[must_use]
    pub const fn new(
        outbound: mpsc::UnboundedSender<String>,
        inbound: mpsc::Receiver<String>,
    ) -> Self {
        Self {
            outbound,
            inbound,
            reader: None,
        }
    }

    /// Attach the task feeding the inbound channel.
    #[must_use]
    pub fn with_reader(mut self, reader: JoinHandle<()>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// A handle for queueing outbound frames.
    #[must_use]
    pub fn sender(&self) -> mpsc::UnboundedSender<String> {
        self.outbound.clone()
    }

    /// Queue a frame for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] if the writer has gone.
    pub fn send(&self, frame: String) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Wait for the next inbound frame. `None` means the transport closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.recv().await
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}
