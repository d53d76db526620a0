//! Presence client: the surface a console embeds.
//!
//! [`PresenceClient`] wires the connection manager to the session layer.
//! Views issue calls on the client and drain [`ClientEvent`]s:
//!
//! ```text
//! view ── send_message / open_chat / focus_chat ──> PresenceClient
//!   ^                                                   │
//!   └──────────────── ClientEvent ───── dispatch task <─┘ inbound envelopes
//! ```
//!
//! All session state lives in the client; the connection manager never
//! sees it.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use opsdesk_proto::envelope::Envelope;

use crate::connection::{
    ConnectionManager, ConnectionState, ConnectionStatus, ReconnectPolicy, RegistrationInfo,
    SendError,
};
use crate::focus::{DEFAULT_SCROLL_THRESHOLD_PX, ScrollFocusCoordinator, ViewportMetrics};
use crate::router::{BroadcastRouter, Route};
use crate::session::{ChatSession, Message, PeerIdentity, SessionRegistry};
use crate::transport::Connector;

/// Default capacity of the inbound envelope channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// Everything needed to start a [`PresenceClient`].
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// Identity announced to the relay on every connection.
    pub registration: RegistrationInfo,
    /// Reconnect budget and delay.
    pub reconnect: ReconnectPolicy,
    /// Log our own relayed broadcasts under `"all"` instead of dropping them.
    pub echo_own_broadcasts: bool,
    /// Auto-scroll threshold in pixels.
    pub scroll_threshold_px: f64,
    /// Capacity of the inbound envelope channel. The event stream is
    /// unbounded so no notification is ever lost; backpressure sits on the
    /// inbound side.
    pub channel_capacity: usize,
}

impl PresenceConfig {
    /// Config with default policy and capacities.
    #[must_use]
    pub fn new(registration: RegistrationInfo) -> Self {
        Self {
            registration,
            reconnect: ReconnectPolicy::default(),
            echo_own_broadcasts: false,
            scroll_threshold_px: DEFAULT_SCROLL_THRESHOLD_PX,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

/// Notifications for the presentation surface.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The connection status changed.
    Connection(ConnectionStatus),
    /// A session came into existence.
    SessionOpened {
        /// Session key.
        peer: PeerIdentity,
    },
    /// A message was appended to a session.
    MessageAppended {
        /// Session key.
        peer: PeerIdentity,
        /// The appended line.
        message: Message,
    },
    /// A window was collapsed or expanded.
    MinimizedChanged {
        /// Session key.
        peer: PeerIdentity,
        /// New flag.
        minimized: bool,
    },
    /// A session was closed and its log discarded.
    SessionClosed {
        /// Session key.
        peer: PeerIdentity,
    },
    /// Input focus moved.
    ActivePeerChanged {
        /// The newly focused peer, if any.
        peer: Option<PeerIdentity>,
    },
    /// Scroll this window to the bottom after rendering.
    ScrollToBottom {
        /// Session key.
        peer: PeerIdentity,
    },
}

/// Session state and the event sink, shared with the dispatch task.
///
/// Lock order is registry, then focus.
struct Core {
    router: BroadcastRouter,
    registry: Mutex<SessionRegistry>,
    focus: Mutex<ScrollFocusCoordinator>,
    events: mpsc::UnboundedSender<ClientEvent>,
}

impl Core {
    fn emit(&self, event: ClientEvent) {
        // Fails only once the receiver is gone, when nobody is listening.
        if self.events.send(event).is_err() {
            tracing::trace!("client event receiver dropped");
        }
    }

    fn apply_inbound(&self, envelope: &Envelope) {
        match self.router.inbound(envelope) {
            Route::Deliver { peer, message } => self.append(&peer, message),
            Route::Discard(reason) => {
                tracing::debug!(kind = envelope.kind(), ?reason, "inbound envelope not delivered");
            }
        }
    }

    fn append(&self, peer: &PeerIdentity, message: Message) {
        let mut registry = self.registry.lock();
        let appended = registry.append_message(peer, message.clone());
        if appended.created {
            self.emit(ClientEvent::SessionOpened { peer: peer.clone() });
        }
        self.emit(ClientEvent::MessageAppended {
            peer: peer.clone(),
            message,
        });
        if let Some(scroll) = self.focus.lock().on_messages_changed(peer, &registry) {
            self.emit(ClientEvent::ScrollToBottom { peer: scroll.0 });
        }
    }
}

/// A running presence client.
pub struct PresenceClient {
    core: Arc<Core>,
    connection: ConnectionManager,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl PresenceClient {
    /// Start connecting through `connector` and return the client with its
    /// event stream. Must be called from within a tokio runtime.
    pub fn start<C: Connector>(
        config: PresenceConfig,
        connector: C,
    ) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.channel_capacity.max(1));

        let router = BroadcastRouter::new(
            &config.registration.username,
            &config.registration.user_type,
        )
        .with_echo_own_broadcasts(config.echo_own_broadcasts);
        let core = Arc::new(Core {
            router,
            registry: Mutex::new(SessionRegistry::new()),
            focus: Mutex::new(ScrollFocusCoordinator::new(config.scroll_threshold_px)),
            events: event_tx,
        });

        let connection =
            ConnectionManager::spawn(connector, config.registration, config.reconnect, inbound_tx);
        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&core),
            inbound_rx,
            connection.subscribe(),
        ));

        let client = Self {
            core,
            connection,
            dispatcher: Mutex::new(Some(dispatcher)),
        };
        (client, event_rx)
    }

    /// The local username.
    #[must_use]
    pub fn local_user(&self) -> &str {
        self.core.router.local_user()
    }

    /// Send `text` to `peer`, or to everyone with `"all"`.
    ///
    /// A direct message is appended to the peer's session once handed to
    /// the transport. A broadcast is sent as one envelope and logged
    /// nowhere locally.
    ///
    /// # Errors
    ///
    /// [`SendError::EmptyMessage`] or [`SendError::NoRecipient`] for a
    /// request that never reaches the wire, [`SendError::NotConnected`]
    /// unless the connection is `Open`.
    pub fn send_message(&self, peer: &str, text: &str) -> Result<(), SendError> {
        let peer = peer.trim();
        let envelope = self.core.router.outbound(peer, text, Utc::now())?;
        self.connection.send(&envelope)?;

        if let Envelope::Chat(chat) = envelope
            && !chat.to.is_broadcast()
        {
            let message = Message {
                from: chat.from,
                text: chat.text,
                timestamp: chat.timestamp,
            };
            self.core.append(&PeerIdentity::new(peer), message);
        }
        Ok(())
    }

    /// Open an empty chat window. Returns whether a session was created.
    pub fn open_chat(&self, peer: &PeerIdentity) -> bool {
        let created = self.core.registry.lock().ensure_session(peer).1;
        if created {
            self.core.emit(ClientEvent::SessionOpened { peer: peer.clone() });
        }
        created
    }

    /// Close a chat window and discard its log.
    pub fn close_chat(&self, peer: &PeerIdentity) -> bool {
        let mut registry = self.core.registry.lock();
        let was_active = registry.active_peer() == Some(peer);
        if registry.close_session(peer).is_none() {
            return false;
        }
        self.core.focus.lock().forget(peer);
        self.core.emit(ClientEvent::SessionClosed { peer: peer.clone() });
        if was_active {
            self.core.emit(ClientEvent::ActivePeerChanged { peer: None });
        }
        true
    }

    /// Collapse or expand a window. `None` if the peer has no session.
    pub fn toggle_minimize(&self, peer: &PeerIdentity) -> Option<bool> {
        let minimized = self.core.registry.lock().toggle_minimized(peer)?;
        self.core.emit(ClientEvent::MinimizedChanged {
            peer: peer.clone(),
            minimized,
        });
        Some(minimized)
    }

    /// Set the minimized flag. Emits an event only when it changed.
    pub fn set_minimized(&self, peer: &PeerIdentity, minimized: bool) -> bool {
        let changed = self.core.registry.lock().set_minimized(peer, minimized);
        if changed {
            self.core.emit(ClientEvent::MinimizedChanged {
                peer: peer.clone(),
                minimized,
            });
        }
        changed
    }

    /// Focus a window for input and scroll it to the bottom.
    ///
    /// Returns `false` if the peer has no session or already had focus.
    pub fn focus_chat(&self, peer: &PeerIdentity) -> bool {
        let mut registry = self.core.registry.lock();
        if !registry.set_active_peer(Some(peer)) {
            return false;
        }
        self.core.emit(ClientEvent::ActivePeerChanged {
            peer: Some(peer.clone()),
        });
        if let Some(scroll) = self.core.focus.lock().on_active_peer_changed(peer, &registry) {
            self.core.emit(ClientEvent::ScrollToBottom { peer: scroll.0 });
        }
        true
    }

    /// Drop input focus.
    pub fn clear_focus(&self) -> bool {
        let changed = self.core.registry.lock().set_active_peer(None);
        if changed {
            self.core.emit(ClientEvent::ActivePeerChanged { peer: None });
        }
        changed
    }

    /// Record a window's scroll metrics for the auto-scroll decision.
    ///
    /// Returns `false`, recording nothing, if the peer has no session.
    pub fn report_viewport(&self, peer: &PeerIdentity, metrics: ViewportMetrics) -> bool {
        let registry = self.core.registry.lock();
        self.core
            .focus
            .lock()
            .report_viewport(peer, metrics, &registry)
    }

    /// Snapshot of all sessions in creation order.
    #[must_use]
    pub fn sessions(&self) -> Vec<ChatSession> {
        self.core.registry.lock().sessions().cloned().collect()
    }

    /// Snapshot of one session.
    #[must_use]
    pub fn session(&self, peer: &PeerIdentity) -> Option<ChatSession> {
        self.core.registry.lock().get(peer).cloned()
    }

    /// The focused peer, if any.
    #[must_use]
    pub fn active_peer(&self) -> Option<PeerIdentity> {
        self.core.registry.lock().active_peer().cloned()
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Current connection status.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.connection.status()
    }

    /// Watch connection status directly.
    #[must_use]
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.subscribe()
    }

    /// Logout. Sessions stay readable; nothing more is sent or received.
    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Wait for the background tasks to exit after a disconnect or once
    /// reconnects are exhausted.
    pub async fn join(&self) {
        self.connection.join().await;
        let handle = self.dispatcher.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "client dispatch task failed");
        }
    }
}

/// Apply inbound envelopes and forward status changes until the connection
/// driver is gone.
async fn dispatch(
    core: Arc<Core>,
    mut inbound: mpsc::Receiver<Envelope>,
    mut status: watch::Receiver<ConnectionStatus>,
) {
    let initial = *status.borrow_and_update();
    core.emit(ClientEvent::Connection(initial));
    loop {
        tokio::select! {
            biased;
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                core.emit(ClientEvent::Connection(current));
            }
            envelope = inbound.recv() => match envelope {
                Some(envelope) => core.apply_inbound(&envelope),
                None => break,
            },
        }
    }
    tracing::debug!("client dispatch exiting");
}
