//! Pure reconnection state machine.
//!
//! [`ConnectionMachine`] holds no I/O. Each transport or timer event is fed
//! in, and the machine answers with the [`Action`]s the driver must perform.
//! This keeps retry exhaustion and cancellation testable without sockets or
//! real time.

use std::fmt;
use std::time::Duration;

use opsdesk_proto::envelope::{Envelope, Registration};

/// Default number of reconnection attempts after a connection is lost.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default fixed delay before each reconnection attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(3000);

/// Lifecycle state of the single client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dialing the relay.
    Connecting,
    /// Registered and accepting sends.
    Open,
    /// Lost; a reconnect may be pending.
    Closed,
    /// Terminal; no further attempts will be made.
    PermanentlyClosed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
            Self::PermanentlyClosed => write!(f, "disconnected"),
        }
    }
}

/// Why the connection reached [`ConnectionState::PermanentlyClosed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Every reconnection attempt failed. The UI keeps a "disconnected"
    /// banner up until the user reloads or logs in again.
    ReconnectExhausted,
    /// The user logged out.
    LoggedOut,
}

/// Snapshot of the connection published to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Current state.
    pub state: ConnectionState,
    /// Reconnection attempts made since the last successful open.
    pub attempt: u32,
    /// Set once the state is terminal.
    pub reason: Option<CloseReason>,
}

impl ConnectionStatus {
    /// Whether the UI should show the persistent "disconnected" status.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.reason == Some(CloseReason::ReconnectExhausted)
    }
}

/// Bounded fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnection attempts allowed after a loss.
    pub max_retries: u32,
    /// Delay before each attempt.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Identity announced on every successful (re)connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationInfo {
    /// Local username.
    pub username: String,
    /// Local user role.
    pub user_type: String,
    /// Login session identifier.
    pub log_id: String,
}

impl RegistrationInfo {
    /// Build the `register` envelope for this identity.
    #[must_use]
    pub fn envelope(&self) -> Envelope {
        Envelope::Register(Registration {
            username: self.username.clone(),
            user_type: self.user_type.clone(),
            log_id: self.log_id.clone(),
        })
    }
}

/// Work the driver must carry out after an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a new transport connection.
    Dial,
    /// Write this envelope on the freshly opened transport.
    Transmit(Envelope),
    /// Arm the reconnect timer.
    ScheduleReconnect {
        /// Attempt number this timer will start (1-based).
        attempt: u32,
        /// How long to wait.
        delay: Duration,
    },
    /// Disarm the pending reconnect timer.
    CancelReconnect,
    /// Close the current transport, if any.
    CloseTransport,
}

/// The connection lifecycle as an explicit finite-state machine.
#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    state: ConnectionState,
    retries: u32,
    reconnect_pending: bool,
    reason: Option<CloseReason>,
    policy: ReconnectPolicy,
    registration: RegistrationInfo,
}

impl ConnectionMachine {
    /// Create a machine in `Connecting`. The caller must perform
    /// [`Action::Dial`] right away.
    #[must_use]
    pub const fn new(registration: RegistrationInfo, policy: ReconnectPolicy) -> Self {
        Self {
            state: ConnectionState::Connecting,
            retries: 0,
            reconnect_pending: false,
            reason: None,
            policy,
            registration,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnection attempts since the last successful open.
    #[must_use]
    pub const fn retries(&self) -> u32 {
        self.retries
    }

    /// Whether a reconnect timer is armed.
    #[must_use]
    pub const fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    /// The identity sent on open.
    #[must_use]
    pub const fn registration(&self) -> &RegistrationInfo {
        &self.registration
    }

    /// Whether application sends are currently allowed.
    #[must_use]
    pub fn can_send(&self) -> bool {
        self.state == ConnectionState::Open
    }

    /// Snapshot for the UI.
    #[must_use]
    pub const fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            attempt: self.retries,
            reason: self.reason,
        }
    }

    /// The transport opened.
    ///
    /// Registers, resets the retry counter and enters `Open`. Ignored unless
    /// the machine is `Connecting`.
    pub fn on_open(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.retries = 0;
        self.state = ConnectionState::Open;
        vec![Action::Transmit(self.registration.envelope())]
    }

    /// The transport closed, errored, or failed to dial.
    ///
    /// A loss reported while already `Closed` or `PermanentlyClosed` is
    /// ignored, so an error immediately followed by a close counts once.
    pub fn on_lost(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Open => {}
            ConnectionState::Closed | ConnectionState::PermanentlyClosed => return Vec::new(),
        }

        self.state = ConnectionState::Closed;
        if self.retries < self.policy.max_retries {
            self.retries += 1;
            self.reconnect_pending = true;
            vec![Action::ScheduleReconnect {
                attempt: self.retries,
                delay: self.policy.delay,
            }]
        } else {
            self.state = ConnectionState::PermanentlyClosed;
            self.reason = Some(CloseReason::ReconnectExhausted);
            Vec::new()
        }
    }

    /// The reconnect timer fired.
    pub fn on_retry_elapsed(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Closed || !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;
        self.state = ConnectionState::Connecting;
        vec![Action::Dial]
    }

    /// Logout: stop everything. Idempotent.
    pub fn disconnect(&mut self) -> Vec<Action> {
        if self.state == ConnectionState::PermanentlyClosed {
            return Vec::new();
        }
        let mut actions = Vec::with_capacity(2);
        if self.reconnect_pending {
            self.reconnect_pending = false;
            actions.push(Action::CancelReconnect);
        }
        actions.push(Action::CloseTransport);
        self.state = ConnectionState::PermanentlyClosed;
        self.reason = Some(CloseReason::LoggedOut);
        actions
    }
}
