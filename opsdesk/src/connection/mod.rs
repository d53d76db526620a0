//! Connection manager: owns the single relay connection of a client.
//!
//! [`ConnectionManager::spawn`] starts a driver task that performs the
//! [`ConnectionMachine`]'s actions against an injected [`Connector`]:
//!
//! ```text
//! dial ──ok──> register, Open ──frames──> decode ──> inbound channel
//!   │                 │
//!   └──err──┐   close/error
//!           v         v
//!        Closed ── sleep(delay) ──> dial      (at most `max_retries` times)
//!           └──────────────> PermanentlyClosed
//! ```
//!
//! The relay link is never touched by the session layer: decoded envelopes
//! leave through the inbound channel and the current [`ConnectionStatus`]
//! through a `watch` channel.

pub mod machine;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc, watch};
use tokio::task::JoinHandle;

use opsdesk_proto::codec::{self, EncodeError};
use opsdesk_proto::envelope::Envelope;

use crate::transport::{Connector, TransportLink};

pub use machine::{
    Action, CloseReason, ConnectionMachine, ConnectionState, ConnectionStatus, ReconnectPolicy,
    RegistrationInfo,
};

/// Errors returned to callers of the send path.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    /// The connection is not `Open`. Nothing was queued.
    #[error("not connected to the relay")]
    NotConnected,

    /// The message text was empty after trimming.
    #[error("message text is empty")]
    EmptyMessage,

    /// No recipient was given.
    #[error("message has no recipient")]
    NoRecipient,

    /// The envelope could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// State shared between the driver task and callers.
///
/// The machine and the outbound sender sit behind one lock so that
/// registration is queued before any application send can observe `Open`.
struct Shared {
    machine: ConnectionMachine,
    outbound: Option<mpsc::UnboundedSender<String>>,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl Shared {
    fn publish(&self) {
        self.status_tx.send_replace(self.machine.status());
    }
}

/// Handle to the connection driver.
pub struct ConnectionManager {
    shared: Arc<Mutex<Shared>>,
    shutdown: Arc<Notify>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Start connecting and return the handle.
    ///
    /// Decoded inbound envelopes are delivered on `inbound` in transport
    /// order. Must be called from within a tokio runtime.
    pub fn spawn<C: Connector>(
        connector: C,
        registration: RegistrationInfo,
        policy: ReconnectPolicy,
        inbound: mpsc::Sender<Envelope>,
    ) -> Self {
        let machine = ConnectionMachine::new(registration, policy);
        let (status_tx, _) = watch::channel(machine.status());
        let shared = Arc::new(Mutex::new(Shared {
            machine,
            outbound: None,
            status_tx,
        }));
        let shutdown = Arc::new(Notify::new());

        let driver = Driver {
            connector,
            shared: Arc::clone(&shared),
            shutdown: Arc::clone(&shutdown),
            inbound,
        };
        let handle = tokio::spawn(driver.run());

        Self {
            shared,
            shutdown,
            driver: Mutex::new(Some(handle)),
        }
    }

    /// Hand an envelope to the transport.
    ///
    /// Fire-and-forget: succeeds only while `Open`, never waits for the
    /// connection, never queues for later.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::NotConnected`] in any other state, or
    /// [`SendError::Encode`] if the envelope cannot be serialized.
    pub fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        let frame = codec::encode(envelope)?;
        let shared = self.shared.lock();
        if !shared.machine.can_send() {
            return Err(SendError::NotConnected);
        }
        let outbound = shared.outbound.as_ref().ok_or(SendError::NotConnected)?;
        outbound.send(frame).map_err(|_| SendError::NotConnected)
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.lock().machine.state()
    }

    /// Current status snapshot.
    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        self.shared.lock().machine.status()
    }

    /// Subscribe to status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.lock().status_tx.subscribe()
    }

    /// The identity announced on every connection.
    #[must_use]
    pub fn registration(&self) -> RegistrationInfo {
        self.shared.lock().machine.registration().clone()
    }

    /// Logout: cancel any pending reconnect, close the transport, and enter
    /// `PermanentlyClosed`. The state change is visible as soon as this
    /// returns; the driver task exits shortly after.
    pub fn disconnect(&self) {
        let mut shared = self.shared.lock();
        let actions = shared.machine.disconnect();
        if actions.contains(&Action::CloseTransport) {
            shared.outbound = None;
        }
        shared.publish();
        drop(shared);

        if actions.contains(&Action::CancelReconnect) {
            tracing::info!("pending reconnect cancelled by disconnect");
        }
        if !actions.is_empty() {
            tracing::info!("relay connection closed by disconnect");
        }
        self.shutdown.notify_one();
    }

    /// Wait for the driver task to exit.
    pub async fn join(&self) {
        let handle = self.driver.lock().take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "connection driver task failed");
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// How a served connection ended.
enum Served {
    /// The transport was lost; carry on with these actions.
    Lost(Vec<Action>),
    /// `disconnect` was called.
    Shutdown,
}

/// Background task performing the machine's actions.
struct Driver<C> {
    connector: C,
    shared: Arc<Mutex<Shared>>,
    shutdown: Arc<Notify>,
    inbound: mpsc::Sender<Envelope>,
}

impl<C: Connector> Driver<C> {
    async fn run(self) {
        loop {
            let dialed = tokio::select! {
                biased;
                () = self.shutdown.notified() => break,
                result = self.connector.connect() => result,
            };

            let actions = match dialed {
                Ok(link) => match self.serve(link).await {
                    Served::Lost(actions) => actions,
                    Served::Shutdown => break,
                },
                Err(e) => {
                    tracing::warn!(error = %e, "relay dial failed");
                    let mut shared = self.shared.lock();
                    let actions = shared.machine.on_lost();
                    shared.publish();
                    actions
                }
            };

            let Some((attempt, delay)) = actions.iter().find_map(|action| match action {
                Action::ScheduleReconnect { attempt, delay } => Some((*attempt, *delay)),
                _ => None,
            }) else {
                if self.shared.lock().machine.status().is_exhausted() {
                    tracing::error!("relay reconnect attempts exhausted, giving up");
                }
                break;
            };

            tracing::info!(attempt, delay_ms = delay.as_millis(), "scheduling relay reconnect");
            tokio::select! {
                biased;
                () = self.shutdown.notified() => break,
                () = tokio::time::sleep(delay) => {}
            }

            let actions = {
                let mut shared = self.shared.lock();
                let actions = shared.machine.on_retry_elapsed();
                shared.publish();
                actions
            };
            if !actions.contains(&Action::Dial) {
                break;
            }
        }
        tracing::debug!("connection driver exiting");
    }

    /// Register on a freshly opened link and pump its frames until it
    /// closes.
    async fn serve(&self, mut link: TransportLink) -> Served {
        {
            let mut shared = self.shared.lock();
            let actions = shared.machine.on_open();
            if actions.is_empty() {
                return Served::Shutdown;
            }
            for action in actions {
                if let Action::Transmit(envelope) = action {
                    match codec::encode(&envelope) {
                        Ok(frame) => {
                            if let Err(e) = link.send(frame) {
                                tracing::warn!(error = %e, "failed to queue registration");
                            }
                        }
                        Err(e) => tracing::error!(error = %e, "failed to encode registration"),
                    }
                }
            }
            shared.outbound = Some(link.sender());
            shared.publish();
            tracing::info!(
                username = %shared.machine.registration().username,
                "connected and registered with relay"
            );
        }

        loop {
            let frame = tokio::select! {
                biased;
                () = self.shutdown.notified() => return Served::Shutdown,
                frame = link.recv() => frame,
            };
            let Some(frame) = frame else {
                break;
            };
            match codec::decode(&frame) {
                Ok(envelope) => {
                    if self.inbound.send(envelope).await.is_err() {
                        tracing::debug!("inbound consumer gone, dropping envelope");
                    }
                }
                Err(e) => tracing::warn!(error = %e, "discarding malformed frame"),
            }
        }

        let mut shared = self.shared.lock();
        shared.outbound = None;
        let actions = shared.machine.on_lost();
        shared.publish();
        tracing::warn!(retries = shared.machine.retries(), "relay connection lost");
        Served::Lost(actions)
    }
}
