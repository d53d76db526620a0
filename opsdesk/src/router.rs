//! Broadcast router: decides where chat envelopes go.
//!
//! Outbound, the router turns a `{to, text}` request into exactly one `chat`
//! envelope; fan-out to other clients is the relay's job. Inbound, it maps an
//! envelope to the local session it belongs to, modelling a broadcast as a
//! direct message from its originator.

use chrono::{DateTime, SecondsFormat, Utc};

use opsdesk_proto::envelope::{BROADCAST, ChatEnvelope, Destination, Envelope};

use crate::connection::SendError;
use crate::session::{Message, PeerIdentity};

/// Inbound routing decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Append `message` to the session keyed by `peer`.
    Deliver {
        /// Session key.
        peer: PeerIdentity,
        /// The line to append.
        message: Message,
    },
    /// Not for this client.
    Discard(DiscardReason),
}

/// Why an inbound envelope was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Addressed to a different user.
    NotAddressed,
    /// Our own broadcast relayed back to us.
    SelfEcho,
    /// Blank text.
    EmptyText,
    /// A non-chat envelope.
    NotChat,
}

/// Routes chat envelopes for one local user.
#[derive(Debug, Clone)]
pub struct BroadcastRouter {
    local_user: String,
    user_type: String,
    echo_own_broadcasts: bool,
}

impl BroadcastRouter {
    /// Create a router for the given local identity.
    pub fn new(local_user: impl Into<String>, user_type: impl Into<String>) -> Self {
        Self {
            local_user: local_user.into(),
            user_type: user_type.into(),
            echo_own_broadcasts: false,
        }
    }

    /// Log echoed copies of our own broadcasts into a session keyed `"all"`
    /// instead of discarding them.
    #[must_use]
    pub const fn with_echo_own_broadcasts(mut self, echo: bool) -> Self {
        self.echo_own_broadcasts = echo;
        self
    }

    /// The local username.
    #[must_use]
    pub fn local_user(&self) -> &str {
        &self.local_user
    }

    /// Build the outbound envelope for a send request.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::EmptyMessage`] if `text` is blank or
    /// [`SendError::NoRecipient`] if `to` is; nothing reaches the wire in
    /// either case.
    pub fn outbound(&self, to: &str, text: &str, now: DateTime<Utc>) -> Result<Envelope, SendError> {
        if to.trim().is_empty() {
            return Err(SendError::NoRecipient);
        }
        if text.trim().is_empty() {
            return Err(SendError::EmptyMessage);
        }
        Ok(Envelope::Chat(ChatEnvelope {
            from: self.local_user.clone(),
            from_type: self.user_type.clone(),
            to: Destination::new(to),
            text: text.to_string(),
            timestamp: format_timestamp(now),
        }))
    }

    /// Decide which session, if any, an inbound envelope updates.
    #[must_use]
    pub fn inbound(&self, envelope: &Envelope) -> Route {
        let Envelope::Chat(chat) = envelope else {
            return Route::Discard(DiscardReason::NotChat);
        };
        if chat.text.trim().is_empty() {
            return Route::Discard(DiscardReason::EmptyText);
        }

        let peer = match &chat.to {
            Destination::All if chat.from != self.local_user => PeerIdentity::new(&chat.from),
            Destination::All if self.echo_own_broadcasts => PeerIdentity::new(BROADCAST),
            Destination::All => return Route::Discard(DiscardReason::SelfEcho),
            Destination::Peer(to) if *to == self.local_user => PeerIdentity::new(&chat.from),
            Destination::Peer(_) => return Route::Discard(DiscardReason::NotAddressed),
        };

        Route::Deliver {
            peer,
            message: Message {
                from: chat.from.clone(),
                text: chat.text.clone(),
                timestamp: chat.timestamp.clone(),
            },
        }
    }
}

/// Format a timestamp the way browsers do (`2026-10-14T09:30:00.000Z`).
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
