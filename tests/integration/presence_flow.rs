// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! End-to-end tests: presence clients over real WebSockets through the
//! in-process reference relay.

use std::sync::Arc;
use std::time::Duration;

use opsdesk::client::{ClientEvent, PresenceClient, PresenceConfig};
use opsdesk::connection::{CloseReason, ConnectionState, ReconnectPolicy, RegistrationInfo};
use opsdesk::session::{Message, PeerIdentity};
use opsdesk::transport::websocket::WsConnector;
use opsdesk_relay::relay::{RelayState, start_server_with_state};
use tokio::sync::mpsc;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Relay {
    url: String,
    state: Arc<RelayState>,
}

async fn start_relay() -> Relay {
    let state = Arc::new(RelayState::new());
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay");
    Relay {
        url: format!("ws://{addr}/ws"),
        state,
    }
}

async fn wait_online(relay: &Relay, username: &str) {
    tokio::time::timeout(TIMEOUT, async {
        while relay.state.get_sender(username).await.is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("{username} never registered with the relay"));
}

async fn wait_state(client: &PresenceClient, state: ConnectionState) {
    let mut rx = client.status_watch();
    tokio::time::timeout(TIMEOUT, rx.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {state}"))
        .unwrap();
}

async fn login(
    relay: &Relay,
    username: &str,
    user_type: &str,
) -> (PresenceClient, mpsc::UnboundedReceiver<ClientEvent>) {
    let mut config = PresenceConfig::new(RegistrationInfo {
        username: username.into(),
        user_type: user_type.into(),
        log_id: format!("login-{username}"),
    });
    config.reconnect = ReconnectPolicy {
        max_retries: 3,
        delay: Duration::from_millis(200),
    };

    let (client, events) = PresenceClient::start(config, WsConnector::new(relay.url.as_str()));
    wait_state(&client, ConnectionState::Open).await;
    wait_online(relay, username).await;
    (client, events)
}

async fn next_message(
    events: &mut mpsc::UnboundedReceiver<ClientEvent>,
) -> (PeerIdentity, Message) {
    loop {
        let event = tokio::time::timeout(TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for a message")
            .expect("event channel closed");
        if let ClientEvent::MessageAppended { peer, message } = event {
            return (peer, message);
        }
    }
}

async fn assert_no_message(events: &mut mpsc::UnboundedReceiver<ClientEvent>) {
    let deadline = tokio::time::sleep(Duration::from_millis(300));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            () = &mut deadline => return,
            event = events.recv() => {
                if let Some(ClientEvent::MessageAppended { peer, message }) = event {
                    panic!("unexpected message in {peer}: {message:?}");
                }
            }
        }
    }
}

fn texts(client: &PresenceClient, peer: &str) -> Vec<String> {
    client
        .session(&PeerIdentity::new(peer))
        .map(|s| s.messages().iter().map(|m| m.text.clone()).collect())
        .unwrap_or_default()
}

#[tokio::test]
async fn direct_message_opens_session_on_both_sides() {
    let relay = start_relay().await;
    let (alice, mut alice_events) = login(&relay, "alice", "agent").await;
    let (bob, _bob_events) = login(&relay, "bob", "agent").await;

    bob.send_message("alice", "hi").unwrap();

    let (peer, message) = next_message(&mut alice_events).await;
    assert_eq!(peer.as_str(), "bob");
    assert_eq!(message.from, "bob");
    assert_eq!(message.text, "hi");
    assert!(message.timestamp.ends_with('Z'));

    assert_eq!(texts(&alice, "bob"), ["hi"]);
    // Bob keeps his own copy in the session with alice.
    let bob_side = bob.session(&PeerIdentity::new("alice")).unwrap();
    assert_eq!(bob_side.messages()[0].from, "bob");
}

#[tokio::test]
async fn broadcast_reaches_everyone_as_a_chat_with_the_sender() {
    let relay = start_relay().await;
    let (carol, mut carol_events) = login(&relay, "carol", "teamleader").await;
    let (alice, mut alice_events) = login(&relay, "alice", "agent").await;
    let (bob, mut bob_events) = login(&relay, "bob", "agent").await;

    carol.send_message("all", "Shift starts now").unwrap();

    for (client, events) in [(&alice, &mut alice_events), (&bob, &mut bob_events)] {
        let (peer, message) = next_message(events).await;
        assert_eq!(peer.as_str(), "carol");
        assert_eq!(message.text, "Shift starts now");
        assert_eq!(texts(client, "carol"), ["Shift starts now"]);
    }

    assert_no_message(&mut carol_events).await;
    assert!(carol.sessions().is_empty());
}

#[tokio::test]
async fn clients_reconnect_and_reregister_after_relay_drops_them() {
    let relay = start_relay().await;
    let (alice, mut alice_events) = login(&relay, "alice", "agent").await;
    let (bob, _bob_events) = login(&relay, "bob", "agent").await;

    relay.state.close_all_connections().await;
    let mut status = alice.status_watch();
    tokio::time::timeout(TIMEOUT, status.wait_for(|s| s.state != ConnectionState::Open))
        .await
        .unwrap()
        .unwrap();

    wait_state(&alice, ConnectionState::Open).await;
    wait_state(&bob, ConnectionState::Open).await;
    // The relay only learns who is who from the re-sent registration.
    wait_online(&relay, "alice").await;
    wait_online(&relay, "bob").await;

    bob.send_message("alice", "back again").unwrap();
    let (peer, message) = next_message(&mut alice_events).await;
    assert_eq!(peer.as_str(), "bob");
    assert_eq!(message.text, "back again");
}

#[tokio::test]
async fn logout_leaves_the_relay() {
    let relay = start_relay().await;
    let (alice, _alice_events) = login(&relay, "alice", "agent").await;
    let (bob, _bob_events) = login(&relay, "bob", "agent").await;

    alice.disconnect();
    assert_eq!(alice.status().reason, Some(CloseReason::LoggedOut));
    assert!(alice.send_message("bob", "gone").is_err());
    alice.join().await;

    tokio::time::timeout(TIMEOUT, async {
        while relay.state.get_sender("alice").await.is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("alice still registered after logout");

    // Messages to an offline user are dropped without affecting the sender.
    bob.send_message("alice", "are you there?").unwrap();
    assert_eq!(bob.state(), ConnectionState::Open);
}
