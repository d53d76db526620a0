// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::missing_panics_doc,
    clippy::future_not_send
)]

//! Integration tests for bounded reconnection.
//!
//! The client runs against the loopback transport with tokio time paused, so
//! the 3 s retry delay elapses instantly and deterministically whenever the
//! runtime is idle.

use std::time::Duration;

use opsdesk::client::{ClientEvent, PresenceClient, PresenceConfig};
use opsdesk::connection::{
    CloseReason, ConnectionState, ConnectionStatus, ReconnectPolicy, RegistrationInfo, SendError,
};
use opsdesk::transport::loopback::{LoopbackConnector, LoopbackRelay};
use opsdesk_proto::codec;
use tokio::sync::mpsc;
use tokio::time::Instant;

fn registration() -> RegistrationInfo {
    RegistrationInfo {
        username: "alice".into(),
        user_type: "agent".into(),
        log_id: "login-1".into(),
    }
}

fn start(
    policy: ReconnectPolicy,
) -> (
    PresenceClient,
    mpsc::UnboundedReceiver<ClientEvent>,
    LoopbackRelay,
) {
    let mut config = PresenceConfig::new(registration());
    config.reconnect = policy;
    let (connector, relay) = LoopbackConnector::new();
    let (client, events) = PresenceClient::start(config, connector);
    (client, events, relay)
}

async fn wait_status(
    client: &PresenceClient,
    pred: impl FnMut(&ConnectionStatus) -> bool,
) -> ConnectionStatus {
    let mut rx = client.status_watch();
    let status = tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(pred))
        .await
        .expect("timed out waiting for status")
        .expect("status channel closed");
    *status
}

async fn wait_state(client: &PresenceClient, state: ConnectionState) -> ConnectionStatus {
    wait_status(client, |s| s.state == state).await
}

#[tokio::test(start_paused = true)]
async fn refused_dials_stop_after_initial_plus_three_retries() {
    let (client, _events, relay) = start(ReconnectPolicy::default());
    relay.set_refusing(true);
    let started = Instant::now();

    let status = wait_state(&client, ConnectionState::PermanentlyClosed).await;
    assert_eq!(status.reason, Some(CloseReason::ReconnectExhausted));
    assert!(status.is_exhausted());
    assert_eq!(relay.attempts(), 4);
    assert!(started.elapsed() >= Duration::from_millis(3 * 3000));

    // No timer is left behind.
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert_eq!(relay.attempts(), 4);
    client.join().await;
}

#[tokio::test(start_paused = true)]
async fn three_failed_reconnects_after_loss_are_terminal() {
    let (client, _events, mut relay) = start(ReconnectPolicy::default());
    let peer = relay.accept().await.unwrap();
    wait_state(&client, ConnectionState::Open).await;

    relay.set_refusing(true);
    drop(peer);

    let status = wait_state(&client, ConnectionState::PermanentlyClosed).await;
    assert_eq!(status.reason, Some(CloseReason::ReconnectExhausted));
    // One successful dial, then three refused reconnects.
    assert_eq!(relay.attempts(), 4);
    assert!(matches!(
        client.send_message("bob", "anyone?"),
        Err(SendError::NotConnected)
    ));
}

#[tokio::test(start_paused = true)]
async fn custom_retry_budget_is_honoured() {
    let policy = ReconnectPolicy {
        max_retries: 1,
        delay: Duration::from_millis(250),
    };
    let (client, _events, relay) = start(policy);
    relay.set_refusing(true);
    let started = Instant::now();

    wait_state(&client, ConnectionState::PermanentlyClosed).await;
    assert_eq!(relay.attempts(), 2);
    assert!(started.elapsed() >= Duration::from_millis(250));
}

#[tokio::test(start_paused = true)]
async fn successful_reconnects_reset_the_budget() {
    let (client, _events, mut relay) = start(ReconnectPolicy::default());

    for round in 0..6 {
        let mut peer = relay.accept().await.unwrap();
        // Every connection starts with the same registration.
        let first = codec::decode(&peer.next_frame().await.unwrap()).unwrap();
        assert_eq!(first, registration().envelope(), "round {round}");
        drop(peer);
    }

    let _peer = relay.accept().await.unwrap();
    let status = wait_state(&client, ConnectionState::Open).await;
    assert_eq!(status.attempt, 0);
    assert_eq!(relay.attempts(), 7);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_reconnect() {
    let (client, _events, mut relay) = start(ReconnectPolicy::default());
    let peer = relay.accept().await.unwrap();
    wait_state(&client, ConnectionState::Open).await;

    drop(peer);
    let status = wait_state(&client, ConnectionState::Closed).await;
    assert_eq!(status.attempt, 1);

    client.disconnect();
    let status = client.status();
    assert_eq!(status.state, ConnectionState::PermanentlyClosed);
    assert_eq!(status.reason, Some(CloseReason::LoggedOut));

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(relay.attempts(), 1);
    client.join().await;
}

#[tokio::test(start_paused = true)]
async fn sends_fail_until_open() {
    let (client, _events, mut relay) = start(ReconnectPolicy::default());
    relay.set_refusing(true);

    wait_state(&client, ConnectionState::Closed).await;
    assert!(matches!(
        client.send_message("bob", "hello"),
        Err(SendError::NotConnected)
    ));
    assert!(client.sessions().is_empty());

    relay.set_refusing(false);
    let mut peer = relay.accept().await.unwrap();
    wait_state(&client, ConnectionState::Open).await;
    // Registration first.
    peer.next_frame().await.unwrap();

    client.send_message("bob", "hello").unwrap();
    assert!(peer.next_frame().await.unwrap().contains("\"hello\""));
}

#[tokio::test(start_paused = true)]
async fn status_events_reach_the_event_stream() {
    let (_client, mut events, relay) = start(ReconnectPolicy::default());
    relay.set_refusing(true);

    let mut exhausted = false;
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(3600), events.recv()).await
    {
        if let ClientEvent::Connection(status) = event
            && status.is_exhausted()
        {
            exhausted = true;
            break;
        }
    }
    assert!(exhausted, "exhausted status was never reported");
}
