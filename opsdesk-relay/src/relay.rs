//! Relay server core: shared state, WebSocket handler, user registry, and
//! fan-out.
//!
//! Each connection must open with a `register` envelope naming its user.
//! After that every `chat` envelope is routed by its `to` field: `"all"` goes
//! to every other connected user, anything else to the named user if online.
//! Nothing is stored; a recipient that is offline simply misses the message.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use opsdesk_proto::codec;
use opsdesk_proto::envelope::{ChatEnvelope, Destination, Envelope, Registration};

/// Default maximum accepted frame size in bytes (64 KB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024;

/// One registered connection.
struct Connection {
    id: u64,
    sender: mpsc::UnboundedSender<Message>,
}

/// Shared relay state holding the user registry.
pub struct RelayState {
    /// Maps username to the writer channel of its current connection.
    connections: RwLock<HashMap<String, Connection>>,
    next_id: AtomicU64,
    max_frame_size: usize,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates an empty registry with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates an empty registry with a custom frame size limit.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_frame_size,
        }
    }

    /// Registers a connection for `username` and returns its id.
    ///
    /// A newer registration replaces an older one; dropping the old sender
    /// ends the old connection's writer task and with it the connection.
    pub async fn register(&self, username: &str, sender: mpsc::UnboundedSender<Message>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let old = self
            .connections
            .write()
            .await
            .insert(username.to_string(), Connection { id, sender });
        if old.is_some() {
            tracing::info!(username = %username, "replaced existing connection");
        }
        id
    }

    /// Removes `username` if its current connection is `id`.
    ///
    /// Returns whether anything was removed. A connection that was replaced
    /// by a newer registration does not unregister its successor.
    pub async fn unregister(&self, username: &str, id: u64) -> bool {
        let mut conns = self.connections.write().await;
        if conns.get(username).is_some_and(|c| c.id == id) {
            conns.remove(username);
            true
        } else {
            false
        }
    }

    /// Returns a clone of the writer channel for `username`, if online.
    pub async fn get_sender(&self, username: &str) -> Option<mpsc::UnboundedSender<Message>> {
        let conns = self.connections.read().await;
        conns.get(username).map(|c| c.sender.clone())
    }

    /// Currently registered usernames, sorted.
    pub async fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self.connections.read().await.keys().cloned().collect();
        users.sort();
        users
    }

    /// Send a WebSocket Close frame to every connected user.
    ///
    /// Clients see a transport close and start their reconnect cycle.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (username, conn) in conns.iter() {
            tracing::info!(username = %username, "sending close frame");
            let _ = conn.sender.send(Message::Close(None));
        }
    }

    /// Route a chat envelope from `registration`'s user, forwarded as is.
    ///
    /// Returns the number of connections the frame was queued to.
    pub async fn route(&self, registration: &Registration, chat: ChatEnvelope) -> usize {
        let to = chat.to.clone();
        let frame = match codec::encode(&Envelope::Chat(chat)) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!(error = %e, "failed to encode chat for forwarding");
                return 0;
            }
        };

        match to {
            Destination::All => {
                let conns = self.connections.read().await;
                let mut delivered = 0;
                for (username, conn) in conns.iter() {
                    if *username == registration.username {
                        continue;
                    }
                    if conn.sender.send(Message::Text(frame.clone().into())).is_ok() {
                        delivered += 1;
                    }
                }
                tracing::debug!(from = %registration.username, delivered, "broadcast fanned out");
                delivered
            }
            Destination::Peer(to) => match self.get_sender(&to).await {
                Some(sender) if sender.send(Message::Text(frame.into())).is_ok() => 1,
                Some(_) => {
                    tracing::debug!(to = %to, "recipient connection closing, dropped");
                    0
                }
                None => {
                    tracing::debug!(to = %to, "recipient offline, dropped");
                    0
                }
            },
        }
    }
}

/// Handles an upgraded WebSocket connection for a single user.
///
/// The connection lifecycle:
/// 1. Wait for a `register` envelope.
/// 2. Register the user, replacing any older connection.
/// 3. Route `chat` envelopes until the connection closes.
/// 4. Unregister, unless a newer connection took over.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(registration) = wait_for_register(&mut ws_receiver, state.max_frame_size).await
    else {
        tracing::warn!("connection closed before registration");
        return;
    };
    let username = registration.username.clone();

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let id = state.register(&username, tx).await;
    tracing::info!(
        username = %username,
        user_type = %registration.user_type,
        log_id = %registration.log_id,
        "user registered"
    );

    let writer_username = username.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(username = %writer_username, "WebSocket write failed");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_frame(&registration, text.as_str(), &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(username = %registration.username, "received close frame");
                    break;
                }
                _ => {
                    // Ignore binary, ping and pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    if state.unregister(&username, id).await {
        tracing::info!(username = %username, "user disconnected and unregistered");
    } else {
        tracing::debug!(username = %username, "superseded connection closed");
    }
}

/// Waits for the `register` envelope that must open every connection.
///
/// Returns `None` if the connection closes or anything else arrives first.
async fn wait_for_register(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    max_frame_size: usize,
) -> Option<Registration> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) if text.len() > max_frame_size => {
                tracing::warn!(size = text.len(), "oversized registration frame");
                return None;
            }
            Message::Text(text) => match codec::decode(text.as_str()) {
                Ok(Envelope::Register(registration)) => {
                    if registration.username.trim().is_empty() {
                        tracing::warn!("received register with empty username");
                        return None;
                    }
                    return Some(registration);
                }
                Ok(other) => {
                    tracing::warn!(kind = other.kind(), "expected register, got different envelope");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode registration");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {
                // Skip ping/pong during registration.
            }
        }
    }
    None
}

/// Handles one text frame from a registered user.
async fn handle_frame(registration: &Registration, text: &str, state: &RelayState) {
    if text.len() > state.max_frame_size {
        tracing::warn!(
            username = %registration.username,
            size = text.len(),
            max = state.max_frame_size,
            "frame exceeds size limit, dropped"
        );
        return;
    }
    match codec::decode(text) {
        Ok(Envelope::Chat(chat)) => {
            state.route(registration, chat).await;
        }
        Ok(Envelope::Register(again)) => {
            tracing::warn!(
                username = %registration.username,
                new_username = %again.username,
                "ignoring register from already-registered connection"
            );
        }
        Err(e) => {
            tracing::warn!(username = %registration.username, error = %e, "discarding malformed frame");
        }
    }
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: impl tokio::net::ToSocketAddrs,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: impl tokio::net::ToSocketAddrs,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
