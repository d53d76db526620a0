//! WebSocket transport to the `OpsDesk` relay.
//!
//! [`WsConnector`] dials the relay with `tokio-tungstenite`, splits the
//! stream, and bridges each half to a channel: a writer task drains the
//! outbound channel into text frames, a reader task pushes inbound text
//! frames onto the inbound channel. The reader dropping its sender is how the
//! connection manager learns the socket closed.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{Connector, TransportError, TransportLink};

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the inbound frame channel per connection.
const INBOUND_BUFFER: usize = 256;

/// Dials the relay over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Create a connector for the given `ws://` or `wss://` URL.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The relay URL this connector dials.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Connector for WsConnector {
    async fn connect(&self) -> Result<TransportLink, TransportError> {
        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(self.url.as_str()))
                .await
                .map_err(|_| {
                    tracing::warn!(url = %self.url, "relay WebSocket connect timed out");
                    TransportError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = %self.url, err = %e, "relay WebSocket connect failed");
                    map_ws_connect_error(&self.url, e)
                })?;

        tracing::debug!(url = %self.url, "relay WebSocket open");

        let (ws_sender, ws_reader) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::channel(INBOUND_BUFFER);

        tokio::spawn(writer_loop(ws_sender, out_rx));
        let reader = tokio::spawn(reader_loop(ws_reader, in_tx));

        Ok(TransportLink::new(out_tx, in_rx).with_reader(reader))
    }
}

/// Forwards queued frames to the socket until every sender is dropped, then
/// closes the socket.
async fn writer_loop(mut ws_sender: WsSender, mut frames: mpsc::UnboundedReceiver<String>) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = ws_sender.send(Message::Text(frame.into())).await {
            tracing::warn!(err = %e, "relay WebSocket write failed");
            return;
        }
    }
    let _ = ws_sender.close().await;
    tracing::debug!("relay writer task exiting");
}

/// Pushes inbound frames onto the channel until the socket closes or errors.
///
/// Binary frames are passed on as text when they are valid UTF-8; anything
/// else is logged and skipped without tearing the connection down.
async fn reader_loop(mut ws_reader: WsReader, tx: mpsc::Sender<String>) {
    while let Some(msg_result) = ws_reader.next().await {
        let frame = match msg_result {
            Ok(Message::Text(text)) => text.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(err = %e, "non-UTF-8 binary frame, skipping");
                    continue;
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("relay WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(e) => {
                tracing::warn!(err = %e, "relay WebSocket read error");
                break;
            }
        };
        if tx.send(frame).await.is_err() {
            // Link dropped.
            break;
        }
    }
    tracing::debug!("relay reader task exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if io_err.kind() == std::io::ErrorKind::ConnectionRefused
                || io_err.kind() == std::io::ErrorKind::AddrNotAvailable
            {
                TransportError::Unreachable(url.to_string())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Http(response) => TransportError::Io(std::io::Error::other(format!(
            "relay HTTP error: status {}",
            response.status()
        ))),
        other => TransportError::Io(std::io::Error::other(format!(
            "relay connection error: {other}"
        ))),
    }
}
