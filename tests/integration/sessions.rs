// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! Integration tests for chat sessions driven through a `PresenceClient`.
//!
//! The relay end is the loopback transport: the test reads what the client
//! wrote and pushes envelopes back, as the relay would.

use std::time::Duration;

use opsdesk::client::{ClientEvent, DEFAULT_CHANNEL_CAPACITY, PresenceClient, PresenceConfig};
use opsdesk::connection::{ConnectionState, RegistrationInfo};
use opsdesk::focus::ViewportMetrics;
use opsdesk::session::{Message, PeerIdentity};
use opsdesk::transport::loopback::{LoopbackConnector, LoopbackPeer, LoopbackRelay};
use opsdesk_proto::codec;
use opsdesk_proto::envelope::{ChatEnvelope, Destination, Envelope};
use tokio::sync::mpsc;

struct Harness {
    client: PresenceClient,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    peer: LoopbackPeer,
    _relay: LoopbackRelay,
}

async fn login(username: &str, echo_own_broadcasts: bool) -> Harness {
    let mut config = PresenceConfig::new(RegistrationInfo {
        username: username.into(),
        user_type: "agent".into(),
        log_id: format!("login-{username}"),
    });
    config.echo_own_broadcasts = echo_own_broadcasts;

    let (connector, mut relay) = LoopbackConnector::new();
    let (client, events) = PresenceClient::start(config, connector);
    let mut peer = relay.accept().await.unwrap();

    let mut status = client.status_watch();
    tokio::time::timeout(
        Duration::from_secs(5),
        status.wait_for(|s| s.state == ConnectionState::Open),
    )
    .await
    .expect("client never opened")
    .unwrap();

    let register = codec::decode(&peer.next_frame().await.unwrap()).unwrap();
    assert_eq!(register.kind(), "register");

    Harness {
        client,
        events,
        peer,
        _relay: relay,
    }
}

fn chat(from: &str, to: &str, text: &str) -> String {
    codec::encode(&Envelope::Chat(ChatEnvelope {
        from: from.into(),
        from_type: "agent".into(),
        to: Destination::new(to),
        text: text.into(),
        timestamp: "2026-10-14T09:30:00.000Z".into(),
    }))
    .unwrap()
}

/// Wait for the next `MessageAppended`, skipping other events.
async fn next_message(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
) -> (PeerIdentity, Message) {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("event channel closed");
        if let ClientEvent::MessageAppended { peer, message } = event {
            return (peer, message);
        }
    }
}

/// Everything already queued on the event stream.
fn drain(events: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}

fn texts(client: &PresenceClient, peer: &str) -> Vec<String> {
    client
        .session(&PeerIdentity::new(peer))
        .map(|s| s.messages().iter().map(|m| m.text.clone()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn first_message_creates_session() {
    let mut h = login("alice", false).await;
    h.peer.push(chat("bob", "alice", "hi")).await.unwrap();

    let (peer, message) = next_message(&mut h.events).await;
    assert_eq!(peer.as_str(), "bob");
    assert_eq!(message.from, "bob");

    let sessions = h.client.sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].peer().as_str(), "bob");
    assert!(!sessions[0].is_minimized());
    assert_eq!(texts(&h.client, "bob"), ["hi"]);
}

#[tokio::test]
async fn undrained_event_stream_keeps_every_event() {
    let mut h = login("alice", false).await;
    let burst = DEFAULT_CHANNEL_CAPACITY + 144;
    for i in 0..burst {
        h.peer.push(chat("bob", "alice", &format!("line {i}"))).await.unwrap();
    }

    let bob = PeerIdentity::new("bob");
    tokio::time::timeout(Duration::from_secs(5), async {
        while h.client.session(&bob).map_or(0, |s| s.messages().len()) < burst {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("inbound burst was not applied");

    let appended: Vec<String> = drain(&mut h.events)
        .into_iter()
        .filter_map(|e| match e {
            ClientEvent::MessageAppended { message, .. } => Some(message.text),
            _ => None,
        })
        .collect();
    assert_eq!(appended.len(), burst);
    assert_eq!(appended[0], "line 0");
    assert_eq!(appended[burst - 1], format!("line {}", burst - 1));

    // The terminal status still arrives after the burst.
    h.client.disconnect();
    h.client.join().await;
    let last = drain(&mut h.events).pop();
    assert!(matches!(
        last,
        Some(ClientEvent::Connection(status)) if status.state == ConnectionState::PermanentlyClosed
    ));
}

#[tokio::test]
async fn messages_for_other_users_are_ignored() {
    let mut h = login("alice", false).await;
    h.peer.push(chat("bob", "dan", "not for alice")).await.unwrap();
    h.peer.push(chat("carol", "alice", "for alice")).await.unwrap();

    let (peer, _) = next_message(&mut h.events).await;
    assert_eq!(peer.as_str(), "carol");
    assert_eq!(h.client.sessions().len(), 1);
}

#[tokio::test]
async fn closed_session_comes_back_empty() {
    let mut h = login("alice", false).await;
    let bob = PeerIdentity::new("bob");

    h.peer.push(chat("bob", "alice", "one")).await.unwrap();
    next_message(&mut h.events).await;
    assert!(h.client.close_chat(&bob));
    assert!(h.client.session(&bob).is_none());

    h.peer.push(chat("bob", "alice", "two")).await.unwrap();
    next_message(&mut h.events).await;
    assert_eq!(texts(&h.client, "bob"), ["two"]);
}

#[tokio::test]
async fn set_minimized_twice_emits_one_change() {
    let mut h = login("alice", false).await;
    let bob = PeerIdentity::new("bob");
    h.client.open_chat(&bob);

    assert!(h.client.set_minimized(&bob, true));
    assert!(!h.client.set_minimized(&bob, true));

    let changes: Vec<_> = drain(&mut h.events)
        .into_iter()
        .filter(|e| matches!(e, ClientEvent::MinimizedChanged { .. }))
        .collect();
    assert_eq!(
        changes,
        [ClientEvent::MinimizedChanged {
            peer: bob.clone(),
            minimized: true,
        }]
    );
    assert!(h.client.session(&bob).unwrap().is_minimized());
}

#[tokio::test]
async fn broadcast_is_one_frame_and_no_local_session() {
    let mut h = login("carol", false).await;
    for name in ["alice", "bob", "dan"] {
        h.client.open_chat(&PeerIdentity::new(name));
    }

    h.client.send_message("all", "Shift starts now").unwrap();
    h.client.send_message("bob", "marker").unwrap();

    let Envelope::Chat(first) = codec::decode(&h.peer.next_frame().await.unwrap()).unwrap() else {
        panic!("expected chat");
    };
    assert_eq!(first.to, Destination::All);
    assert_eq!(first.text, "Shift starts now");

    // The very next frame is the direct message: one envelope per broadcast.
    let Envelope::Chat(second) = codec::decode(&h.peer.next_frame().await.unwrap()).unwrap() else {
        panic!("expected chat");
    };
    assert_eq!(second.text, "marker");

    let peers: Vec<_> = h
        .client
        .sessions()
        .iter()
        .map(|s| s.peer().as_str().to_string())
        .collect();
    assert_eq!(peers, ["alice", "bob", "dan"]);
    assert!(texts(&h.client, "alice").is_empty());
    assert_eq!(texts(&h.client, "bob"), ["marker"]);
}

#[tokio::test]
async fn own_broadcast_echo_is_dropped_or_logged() {
    let mut quiet = login("carol", false).await;
    quiet.peer.push(chat("carol", "all", "echo")).await.unwrap();
    quiet.peer.push(chat("bob", "carol", "after echo")).await.unwrap();
    let (peer, _) = next_message(&mut quiet.events).await;
    assert_eq!(peer.as_str(), "bob");
    assert_eq!(quiet.client.sessions().len(), 1);

    let mut echoing = login("carol", true).await;
    echoing.peer.push(chat("carol", "all", "echo")).await.unwrap();
    let (peer, message) = next_message(&mut echoing.events).await;
    assert_eq!(peer.as_str(), "all");
    assert_eq!(message.from, "carol");
}

#[tokio::test]
async fn auto_scroll_follows_the_reader() {
    let mut h = login("alice", false).await;
    let bob = PeerIdentity::new("bob");
    h.client.open_chat(&bob);
    assert!(h.client.focus_chat(&bob));
    drain(&mut h.events);

    // Scrolled up reading history: leave the view where it is.
    h.client.report_viewport(
        &bob,
        ViewportMetrics {
            scroll_top: 0.0,
            scroll_height: 1000.0,
            client_height: 400.0,
        },
    );
    h.peer.push(chat("bob", "alice", "one")).await.unwrap();
    next_message(&mut h.events).await;
    assert!(
        !drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, ClientEvent::ScrollToBottom { .. }))
    );

    // Back near the bottom: follow new messages.
    h.client.report_viewport(
        &bob,
        ViewportMetrics {
            scroll_top: 580.0,
            scroll_height: 1000.0,
            client_height: 400.0,
        },
    );
    h.peer.push(chat("bob", "alice", "two")).await.unwrap();
    next_message(&mut h.events).await;
    let scrolled = tokio::time::timeout(Duration::from_secs(5), h.events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scrolled, ClientEvent::ScrollToBottom { peer: bob });
}
