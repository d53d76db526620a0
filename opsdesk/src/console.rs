//! Line console: a minimal presentation surface over stdin/stdout.
//!
//! Each input line is parsed into a [`Command`] and run against a
//! [`PresenceClient`]; client events are rendered as single lines. Plain text
//! without a leading `/` goes to the focused chat.

use crate::client::{ClientEvent, PresenceClient};
use crate::connection::{CloseReason, ConnectionState, ConnectionStatus, SendError};
use crate::session::PeerIdentity;

/// Help text printed by `/help`.
pub const HELP: &str = "\
commands:
  /to <peer> <text>   send a direct message
  /all <text>         broadcast to everyone
  /open <peer>        open an empty chat
  /close <peer>       close a chat and discard its log
  /min <peer>         collapse or expand a chat
  /focus <peer>       focus a chat; plain lines go to it
  /list               list open chats
  /status             show the connection status
  /quit               log out and exit
  /help               show this help";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/to <peer> <text>`
    Send {
        /// Recipient.
        peer: String,
        /// Message text.
        text: String,
    },
    /// `/all <text>`
    Broadcast(String),
    /// Plain text for the focused chat.
    Say(String),
    /// `/open <peer>`
    Open(PeerIdentity),
    /// `/close <peer>`
    Close(PeerIdentity),
    /// `/min <peer>`
    Minimize(PeerIdentity),
    /// `/focus <peer>`
    Focus(PeerIdentity),
    /// `/list`
    List,
    /// `/status`
    Status,
    /// `/quit`
    Quit,
    /// `/help`
    Help,
}

/// Why a line could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Nothing but whitespace.
    #[error("empty input")]
    Empty,
    /// A `/word` that is not a command.
    #[error("unknown command /{0} (try /help)")]
    UnknownCommand(String),
    /// A required argument was missing.
    #[error("usage: /{command} {usage}")]
    MissingArgument {
        /// Command name.
        command: &'static str,
        /// Expected arguments.
        usage: &'static str,
    },
}

/// Parse one input line.
///
/// # Errors
///
/// Returns [`ParseError`] for blank lines, unknown commands, and commands
/// missing their arguments.
pub fn parse(line: &str) -> Result<Command, ParseError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(ParseError::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Say(line.to_string()));
    };

    let (name, args) = rest
        .split_once(char::is_whitespace)
        .map_or((rest, ""), |(name, args)| (name, args.trim()));

    let peer_arg = |command: &'static str| {
        first_word(args)
            .map(|(peer, _)| PeerIdentity::new(peer))
            .ok_or(ParseError::MissingArgument {
                command,
                usage: "<peer>",
            })
    };

    match name {
        "to" => {
            let missing = ParseError::MissingArgument {
                command: "to",
                usage: "<peer> <text>",
            };
            let (peer, text) = first_word(args).ok_or_else(|| missing.clone())?;
            if text.is_empty() {
                return Err(missing);
            }
            Ok(Command::Send {
                peer: peer.to_string(),
                text: text.to_string(),
            })
        }
        "all" if args.is_empty() => Err(ParseError::MissingArgument {
            command: "all",
            usage: "<text>",
        }),
        "all" => Ok(Command::Broadcast(args.to_string())),
        "open" => peer_arg("open").map(Command::Open),
        "close" => peer_arg("close").map(Command::Close),
        "min" => peer_arg("min").map(Command::Minimize),
        "focus" => peer_arg("focus").map(Command::Focus),
        "list" => Ok(Command::List),
        "status" => Ok(Command::Status),
        "quit" | "exit" => Ok(Command::Quit),
        "help" => Ok(Command::Help),
        other => Err(ParseError::UnknownCommand(other.to_string())),
    }
}

/// Split off the first word; `None` if there is none.
fn first_word(args: &str) -> Option<(&str, &str)> {
    if args.is_empty() {
        return None;
    }
    Some(
        args.split_once(char::is_whitespace)
            .map_or((args, ""), |(word, rest)| (word, rest.trim())),
    )
}

/// Result of running a command.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Reply {
    /// Lines to print.
    pub lines: Vec<String>,
    /// The user asked to quit.
    pub quit: bool,
}

impl Reply {
    fn line(line: impl Into<String>) -> Self {
        Self {
            lines: vec![line.into()],
            quit: false,
        }
    }
}

/// Run a parsed command against the client.
pub fn run(client: &PresenceClient, command: Command) -> Reply {
    match command {
        Command::Send { peer, text } => send(client, &peer, &text),
        Command::Broadcast(text) => send(client, opsdesk_proto::envelope::BROADCAST, &text),
        Command::Say(text) => match client.active_peer() {
            Some(peer) => send(client, peer.as_str(), &text),
            None => Reply::line("no focused chat (use /focus <peer> or /to <peer> <text>)"),
        },
        Command::Open(peer) => {
            if client.open_chat(&peer) {
                Reply::default()
            } else {
                Reply::line(format!("chat with {peer} is already open"))
            }
        }
        Command::Close(peer) => {
            if client.close_chat(&peer) {
                Reply::default()
            } else {
                Reply::line(format!("no chat with {peer}"))
            }
        }
        Command::Minimize(peer) => match client.toggle_minimize(&peer) {
            Some(_) => Reply::default(),
            None => Reply::line(format!("no chat with {peer}")),
        },
        Command::Focus(peer) => {
            if client.focus_chat(&peer) || client.active_peer().as_ref() == Some(&peer) {
                Reply::default()
            } else {
                Reply::line(format!("no chat with {peer} (use /open {peer})"))
            }
        }
        Command::List => list(client),
        Command::Status => Reply::line(describe_status(&client.status())),
        Command::Quit => Reply {
            lines: Vec::new(),
            quit: true,
        },
        Command::Help => Reply::line(HELP),
    }
}

fn send(client: &PresenceClient, peer: &str, text: &str) -> Reply {
    match client.send_message(peer, text) {
        Ok(()) => Reply::default(),
        Err(SendError::NotConnected) => {
            Reply::line(format!("not sent: {}", describe_status(&client.status())))
        }
        Err(e) => Reply::line(format!("not sent: {e}")),
    }
}

fn list(client: &PresenceClient) -> Reply {
    let sessions = client.sessions();
    if sessions.is_empty() {
        return Reply::line("no open chats");
    }
    let active = client.active_peer();
    let lines = sessions
        .iter()
        .map(|session| {
            let marker = if active.as_ref() == Some(session.peer()) {
                '*'
            } else {
                ' '
            };
            let minimized = if session.is_minimized() {
                " (minimized)"
            } else {
                ""
            };
            format!(
                "{marker} {} [{} messages]{minimized}",
                session.peer(),
                session.messages().len()
            )
        })
        .collect();
    Reply { lines, quit: false }
}

/// One-line description of a connection status.
#[must_use]
pub fn describe_status(status: &ConnectionStatus) -> String {
    match (status.state, status.reason) {
        (ConnectionState::PermanentlyClosed, Some(CloseReason::ReconnectExhausted)) => {
            "disconnected from relay, reload to reconnect".to_string()
        }
        (ConnectionState::PermanentlyClosed, _) => "logged out".to_string(),
        (ConnectionState::Connecting, _) if status.attempt > 0 => {
            format!("reconnecting (attempt {})", status.attempt)
        }
        (ConnectionState::Closed, _) => "connection lost, retrying".to_string(),
        (state, _) => state.to_string(),
    }
}

/// Render a client event, or `None` for events a line console ignores.
#[must_use]
pub fn describe_event(event: &ClientEvent) -> Option<String> {
    match event {
        ClientEvent::Connection(status) => Some(format!("* {}", describe_status(status))),
        ClientEvent::SessionOpened { peer } => Some(format!("* chat with {peer} opened")),
        ClientEvent::MessageAppended { peer, message } => Some(format!(
            "[{peer}] {} {}: {}",
            message.timestamp, message.from, message.text
        )),
        ClientEvent::MinimizedChanged { peer, minimized } => Some(format!(
            "* chat with {peer} {}",
            if *minimized { "minimized" } else { "expanded" }
        )),
        ClientEvent::SessionClosed { peer } => Some(format!("* chat with {peer} closed")),
        ClientEvent::ActivePeerChanged { peer: Some(peer) } => {
            Some(format!("* now talking to {peer}"))
        }
        ClientEvent::ActivePeerChanged { peer: None } | ClientEvent::ScrollToBottom { .. } => {
            None
        }
    }
}
