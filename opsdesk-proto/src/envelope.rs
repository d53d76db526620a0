//! Envelope types exchanged between console clients and the relay.
//!
//! Every frame on the wire is a JSON object tagged by `type`. The two
//! variants are modelled as a sum type so that consumers match exhaustively
//! instead of probing fields at runtime.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Literal destination that addresses every registered connection.
pub const BROADCAST: &str = "all";

/// A typed wire message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Sent by a client once per successful connection to bind it to a user.
    Register(Registration),
    /// A chat line addressed to one peer or broadcast to everyone.
    Chat(ChatEnvelope),
}

impl Envelope {
    /// Returns the `type` tag of this envelope.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Chat(_) => "chat",
        }
    }
}

/// Body of a `register` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    /// Username the connection is registered under.
    pub username: String,
    /// Role of the user (e.g. `agent`, `teamleader`).
    pub user_type: String,
    /// Identifier of the login session this connection belongs to.
    pub log_id: String,
}

/// Body of a `chat` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEnvelope {
    /// Username of the sender.
    pub from: String,
    /// Role of the sender.
    pub from_type: String,
    /// Recipient username or the broadcast literal.
    pub to: Destination,
    /// Message text.
    pub text: String,
    /// ISO-8601 send time. Display only, never used for ordering.
    pub timestamp: String,
}

/// Where a chat envelope is headed.
///
/// Serialized as a plain string: `"all"` for [`Destination::All`], the
/// username otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Destination {
    /// Every other registered connection.
    All,
    /// A single user.
    Peer(String),
}

impl Destination {
    /// Builds a destination from a raw address, mapping `"all"` to
    /// [`Destination::All`].
    pub fn new(address: impl Into<String>) -> Self {
        Self::from(address.into())
    }

    /// Whether this destination is the broadcast literal.
    #[must_use]
    pub const fn is_broadcast(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Returns the raw address as it appears on the wire.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::All => BROADCAST,
            Self::Peer(name) => name,
        }
    }
}

impl From<String> for Destination {
    fn from(address: String) -> Self {
        if address == BROADCAST {
            Self::All
        } else {
            Self::Peer(address)
        }
    }
}

impl From<Destination> for String {
    fn from(destination: Destination) -> Self {
        match destination {
            Destination::All => BROADCAST.to_string(),
            Destination::Peer(name) => name,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
