//! Integration tests for end-to-end room relay collaboration.
//!
//! These tests start a real server and connect real clients, verifying the
//! join protocol, verbatim operation fan-out, self-filtering, and the
//! leave/reconnect lifecycle.

use scriptorium_collab::client::{SessionClient, SessionEvent, SessionState};
use scriptorium_collab::engine::SyncEngine;
use scriptorium_collab::operation::{EditDelta, Operation};
use scriptorium_collab::protocol::UserProfile;
use scriptorium_collab::server::{RelayServer, ServerConfig};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

/// Find a free port for testing.
async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Start a server on a free port, return the port.
async fn start_test_server() -> u16 {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        max_users_per_room: 10,
        broadcast_capacity: 64,
        storage_path: None,
    };
    let server = RelayServer::new(config).unwrap();
    tokio::spawn(async move {
        server.run().await.unwrap();
    });
    // Give server time to bind
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Connect and join a client, returning it with its event stream.
async fn join_client(
    name: &str,
    doc_id: Uuid,
    url: &str,
) -> (SessionClient, mpsc::Receiver<SessionEvent>) {
    let profile = UserProfile::new(name);
    let mut client = SessionClient::new(profile, doc_id, url);
    let events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    (client, events)
}

/// Receive events until one matches, ignoring the rest.
async fn next_matching<F, T>(
    events: &mut mpsc::Receiver<SessionEvent>,
    wait: Duration,
    mut pick: F,
) -> Option<T>
where
    F: FnMut(SessionEvent) -> Option<T>,
{
    let deadline = tokio::time::Instant::now() + wait;
    while let Ok(Some(event)) = timeout_at(deadline, events.recv()).await {
        if let Some(found) = pick(event) {
            return Some(found);
        }
    }
    None
}

async fn timeout_at<F: std::future::Future>(
    deadline: tokio::time::Instant,
    fut: F,
) -> Result<F::Output, tokio::time::error::Elapsed> {
    tokio::time::timeout_at(deadline, fut).await
}

#[tokio::test]
async fn test_server_accepts_connections() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let result = tokio_tungstenite::connect_async(&url).await;
    assert!(result.is_ok(), "Should connect to server");
}

#[tokio::test]
async fn test_join_is_acknowledged_with_roster() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let doc_id = Uuid::new_v4();

    let profile = UserProfile::new("Alice");
    let alice_id = profile.user_id;
    let mut client = SessionClient::new(profile, doc_id, &url);
    let mut events = client.take_event_rx().unwrap();

    client.connect().await.unwrap();
    assert_eq!(client.state().await, SessionState::Active);

    let roster = next_matching(&mut events, Duration::from_secs(2), |e| match e {
        SessionEvent::Joined(members) => Some(members),
        _ => None,
    })
    .await
    .expect("should receive Joined with roster snapshot");

    assert!(roster.iter().any(|m| m.user_id == alice_id));
}

#[tokio::test]
async fn test_second_join_visible_to_first() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let doc_id = Uuid::new_v4();

    let (_alice, mut events_a) = join_client("Alice", doc_id, &url).await;
    let (bob, _events_b) = join_client("Bob", doc_id, &url).await;
    let bob_id = bob.profile().user_id;

    let joined = next_matching(&mut events_a, Duration::from_secs(2), |e| match e {
        SessionEvent::UserJoined(p) if p.user_id == bob_id => Some(p),
        _ => None,
    })
    .await;
    assert!(joined.is_some(), "Alice should see Bob's join");

    let roster = next_matching(&mut events_a, Duration::from_secs(2), |e| match e {
        SessionEvent::RosterRefreshed(members)
            if members.iter().any(|m| m.user_id == bob_id) =>
        {
            Some(members)
        }
        _ => None,
    })
    .await
    .expect("Alice should receive a refreshed roster naming Bob");
    assert_eq!(roster.len(), 2);
}

#[tokio::test]
async fn test_operation_fan_out_verbatim() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let doc_id = Uuid::new_v4();

    let (alice, _events_a) = join_client("Alice", doc_id, &url).await;
    let (_bob, mut events_b) = join_client("Bob", doc_id, &url).await;

    let sent = Operation::insert(0, "Hello").with_version(1);
    alice.send_operation(sent.clone()).await.unwrap();

    let received = next_matching(&mut events_b, Duration::from_secs(2), |e| match e {
        SessionEvent::RemoteOperation { operation, .. } => Some(operation),
        _ => None,
    })
    .await
    .expect("Bob should receive Alice's operation");

    // Verbatim relay: position, payload, and version stamps untouched
    assert_eq!(received, sent);
}

#[tokio::test]
async fn test_sender_does_not_receive_own_broadcast() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let doc_id = Uuid::new_v4();

    let (alice, mut events_a) = join_client("Alice", doc_id, &url).await;
    let (_bob, _events_b) = join_client("Bob", doc_id, &url).await;

    // Drain the join/roster chatter from Bob's arrival
    while let Ok(Some(_)) = timeout(Duration::from_millis(100), events_a.recv()).await {}

    alice
        .send_operation(Operation::insert(0, "echo?"))
        .await
        .unwrap();

    let echoed = next_matching(&mut events_a, Duration::from_millis(300), |e| match e {
        SessionEvent::RemoteOperation { operation, .. } => Some(operation),
        _ => None,
    })
    .await;
    assert!(echoed.is_none(), "sender must not receive its own operation");
}

#[tokio::test]
async fn test_cursor_relay() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let doc_id = Uuid::new_v4();

    let (alice, _events_a) = join_client("Alice", doc_id, &url).await;
    let (_bob, mut events_b) = join_client("Bob", doc_id, &url).await;
    let alice_id = alice.profile().user_id;

    alice.send_cursor(42).await.unwrap();

    let moved = next_matching(&mut events_b, Duration::from_secs(2), |e| match e {
        SessionEvent::CursorMoved { user_id, position } => Some((user_id, position)),
        _ => None,
    })
    .await
    .expect("Bob should see Alice's cursor");
    assert_eq!(moved, (alice_id, 42));
}

#[tokio::test]
async fn test_leave_removes_user_from_roster() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let doc_id = Uuid::new_v4();

    let (_alice, mut events_a) = join_client("Alice", doc_id, &url).await;
    let (mut bob, _events_b) = join_client("Bob", doc_id, &url).await;
    let bob_id = bob.profile().user_id;

    bob.leave().await;
    assert_eq!(bob.state().await, SessionState::Left);

    let left = next_matching(&mut events_a, Duration::from_secs(2), |e| match e {
        SessionEvent::UserLeft(id) if id == bob_id => Some(id),
        _ => None,
    })
    .await;
    assert!(left.is_some(), "Alice should see Bob leave");

    let roster = next_matching(&mut events_a, Duration::from_secs(2), |e| match e {
        SessionEvent::RosterRefreshed(members)
            if !members.iter().any(|m| m.user_id == bob_id) =>
        {
            Some(members)
        }
        _ => None,
    })
    .await
    .expect("final roster must not contain the departed user");
    assert_eq!(roster.len(), 1);
}

#[tokio::test]
async fn test_leave_twice_is_idempotent() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let doc_id = Uuid::new_v4();

    let (mut alice, _events) = join_client("Alice", doc_id, &url).await;
    alice.leave().await;
    alice.leave().await;
    assert_eq!(alice.state().await, SessionState::Left);
}

#[tokio::test]
async fn test_reconnect_after_leave_rejoins() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let doc_id = Uuid::new_v4();

    let profile = UserProfile::new("Alice");
    let mut client = SessionClient::new(profile, doc_id, &url);
    let _events = client.take_event_rx().unwrap();

    client.connect().await.unwrap();
    client.leave().await;
    assert_eq!(client.state().await, SessionState::Left);

    // Reconnection re-runs the full join sequence
    client.connect().await.unwrap();
    assert_eq!(client.state().await, SessionState::Active);
}

#[tokio::test]
async fn test_offline_operations_replay_on_join() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let doc_id = Uuid::new_v4();

    let (_bob, mut events_b) = join_client("Bob", doc_id, &url).await;

    // Alice composes edits before connecting
    let profile = UserProfile::new("Alice");
    let mut alice = SessionClient::new(profile, doc_id, &url);
    let _events_a = alice.take_event_rx().unwrap();
    alice
        .send_operation(Operation::insert(0, "queued"))
        .await
        .unwrap();
    assert_eq!(alice.offline_queue_len().await, 1);

    alice.connect().await.unwrap();
    assert_eq!(alice.offline_queue_len().await, 0);

    let replayed = next_matching(&mut events_b, Duration::from_secs(2), |e| match e {
        SessionEvent::RemoteOperation { operation, .. } => Some(operation),
        _ => None,
    })
    .await
    .expect("queued operation should replay to the room");
    assert_eq!(replayed.data.as_deref(), Some("queued"));
}

#[tokio::test]
async fn test_hello_then_delete_converges() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");
    let doc_id = Uuid::new_v4();

    let (alice, _events_a) = join_client("Alice", doc_id, &url).await;
    let (_bob, mut events_b) = join_client("Bob", doc_id, &url).await;

    // Both sides start from the same empty document at version 1
    let mut engine_a = SyncEngine::with_content("", 1);
    let mut engine_b = SyncEngine::with_content("", 1);

    // Alice types "Hello"
    for op in engine_a.apply_local(&EditDelta::new().insert("Hello")) {
        alice.send_operation(op).await.unwrap();
    }
    let op = next_matching(&mut events_b, Duration::from_secs(2), |e| match e {
        SessionEvent::RemoteOperation { operation, .. } => Some(operation),
        _ => None,
    })
    .await
    .unwrap();
    engine_b.apply_remote(&op);
    assert_eq!(engine_a.text(), "Hello");
    assert_eq!(engine_b.text(), "Hello");

    // Alice deletes two characters at position 0
    for op in engine_a.apply_local(&EditDelta::new().delete(2)) {
        alice.send_operation(op).await.unwrap();
    }
    let op = next_matching(&mut events_b, Duration::from_secs(2), |e| match e {
        SessionEvent::RemoteOperation { operation, .. } => Some(operation),
        _ => None,
    })
    .await
    .unwrap();
    engine_b.apply_remote(&op);

    assert_eq!(engine_a.text(), "llo");
    assert_eq!(engine_b.text(), "llo");
}

#[tokio::test]
async fn test_rooms_are_isolated() {
    let port = start_test_server().await;
    let url = format!("ws://127.0.0.1:{port}");

    let doc_a = Uuid::new_v4();
    let doc_b = Uuid::new_v4();

    let (alice, _ea) = join_client("Alice", doc_a, &url).await;
    let (_carol, mut events_c) = join_client("Carol", doc_b, &url).await;

    alice
        .send_operation(Operation::insert(0, "private"))
        .await
        .unwrap();

    let leaked = next_matching(&mut events_c, Duration::from_millis(300), |e| match e {
        SessionEvent::RemoteOperation { operation, .. } => Some(operation),
        _ => None,
    })
    .await;
    assert!(leaked.is_none(), "operations must not cross rooms");
}
