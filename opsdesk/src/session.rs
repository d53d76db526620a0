//! Per-peer conversation state.
//!
//! The [`SessionRegistry`] maps a [`PeerIdentity`] to its [`ChatSession`].
//! Sessions are created lazily by the first message in either direction (or
//! an explicit open) and only removed by an explicit close. Iteration follows
//! creation order so chat popups stack stably on screen.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};

/// Username identifying a chat counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerIdentity(String);

impl PeerIdentity {
    /// Create a peer identity from a username.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The username.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerIdentity {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One chat line. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Local username or the remote peer's username.
    pub from: String,
    /// Message text, non-empty after trimming.
    pub text: String,
    /// ISO-8601 timestamp, for display.
    pub timestamp: String,
}

/// Conversation state for one peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSession {
    peer: PeerIdentity,
    messages: Vec<Message>,
    minimized: bool,
    last_activity_at: DateTime<Utc>,
}

impl ChatSession {
    fn new(peer: PeerIdentity) -> Self {
        Self {
            peer,
            messages: Vec::new(),
            minimized: false,
            last_activity_at: Utc::now(),
        }
    }

    /// The counterpart of this conversation.
    #[must_use]
    pub const fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    /// Messages in arrival order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Whether the chat window is collapsed.
    #[must_use]
    pub const fn is_minimized(&self) -> bool {
        self.minimized
    }

    /// When the session last changed, by the local clock.
    #[must_use]
    pub const fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }
}

/// Result of [`SessionRegistry::append_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// The session did not exist before this append.
    pub created: bool,
    /// Length of the log after the append.
    pub len: usize,
}

/// Owner of all chat sessions of one client.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    /// Sessions keyed by creation sequence number.
    sessions: BTreeMap<u64, ChatSession>,
    /// Peer to sequence number.
    index: HashMap<PeerIdentity, u64>,
    next_seq: u64,
    active: Option<PeerIdentity>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the peer's session, creating an empty one if absent.
    ///
    /// The flag reports whether the session was created by this call.
    pub fn ensure_session(&mut self, peer: &PeerIdentity) -> (&ChatSession, bool) {
        let (seq, created) = self.ensure_seq(peer);
        // `ensure_seq` guarantees the entry.
        let session = &self.sessions[&seq];
        (session, created)
    }

    /// Append a message to the peer's session, creating it if absent.
    pub fn append_message(&mut self, peer: &PeerIdentity, message: Message) -> Appended {
        let (seq, created) = self.ensure_seq(peer);
        let len = self.sessions.get_mut(&seq).map_or(0, |session| {
            session.messages.push(message);
            session.last_activity_at = Utc::now();
            session.messages.len()
        });
        Appended { created, len }
    }

    /// Set the minimized flag. Returns whether anything changed.
    pub fn set_minimized(&mut self, peer: &PeerIdentity, minimized: bool) -> bool {
        match self.get_mut(peer) {
            Some(session) if session.minimized != minimized => {
                session.minimized = minimized;
                true
            }
            _ => false,
        }
    }

    /// Flip the minimized flag, returning the new value.
    pub fn toggle_minimized(&mut self, peer: &PeerIdentity) -> Option<bool> {
        let session = self.get_mut(peer)?;
        session.minimized = !session.minimized;
        Some(session.minimized)
    }

    /// Remove the peer's session. Clears the active peer if it was this one.
    pub fn close_session(&mut self, peer: &PeerIdentity) -> Option<ChatSession> {
        let seq = self.index.remove(peer)?;
        if self.active.as_ref() == Some(peer) {
            self.active = None;
        }
        self.sessions.remove(&seq)
    }

    /// Make `peer` the single active session, or clear it with `None`.
    ///
    /// Returns whether the active peer changed. A peer without a session
    /// cannot become active.
    pub fn set_active_peer(&mut self, peer: Option<&PeerIdentity>) -> bool {
        if let Some(p) = peer
            && !self.index.contains_key(p)
        {
            return false;
        }
        if self.active.as_ref() == peer {
            return false;
        }
        self.active = peer.cloned();
        true
    }

    /// The peer focused for input, if any.
    #[must_use]
    pub const fn active_peer(&self) -> Option<&PeerIdentity> {
        self.active.as_ref()
    }

    /// Look up a session.
    #[must_use]
    pub fn get(&self, peer: &PeerIdentity) -> Option<&ChatSession> {
        self.index.get(peer).and_then(|seq| self.sessions.get(seq))
    }

    /// Whether the peer has a session.
    #[must_use]
    pub fn contains(&self, peer: &PeerIdentity) -> bool {
        self.index.contains_key(peer)
    }

    /// Sessions in creation order.
    pub fn sessions(&self) -> impl Iterator<Item = &ChatSession> {
        self.sessions.values()
    }

    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn get_mut(&mut self, peer: &PeerIdentity) -> Option<&mut ChatSession> {
        let seq = self.index.get(peer)?;
        self.sessions.get_mut(seq)
    }

    fn ensure_seq(&mut self, peer: &PeerIdentity) -> (u64, bool) {
        if let Some(seq) = self.index.get(peer) {
            return (*seq, false);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.index.insert(peer.clone(), seq);
        self.sessions.insert(seq, ChatSession::new(peer.clone()));
        (seq, true)
    }
}
