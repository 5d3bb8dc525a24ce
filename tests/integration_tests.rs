// Integration tests for the focuspact client.
//
// These tests exercise the system end-to-end through the library crate's
// public API: the push connection manager against a real local WebSocket
// server, the application loop against a mock HTTP server, and the challenge
// store's reconciliation behavior across views.

use std::sync::Arc;
use std::time::Duration;

use futures_util::SinkExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use focuspact::api::{ApiClient, StaticToken};
use focuspact::app::{App, UiUpdate, UserCommand};
use focuspact::challenge::{Challenge, ChallengeType, Distraction, ToggleDetails};
use focuspact::push::{
    push_endpoint, BackoffPolicy, ConnectionStatus, PushClient, PushConfig, PushEvent,
};
use focuspact::store::{ChallengeStore, ViewId};

// ===========================================================================
// Test helpers
// ===========================================================================

fn toggle_challenge(id: i64, name: &str, is_active: bool) -> Challenge {
    Challenge {
        id,
        name: name.to_string(),
        description: Some(format!("{name} description")),
        challenge_type: ChallengeType::Toggle,
        strict_mode: false,
        completed: false,
        creator_id: 1,
        time_based_details: None,
        toggle_details: Some(ToggleDetails { is_active }),
        distractions: Some(vec![Distraction {
            url: "https://news.example.com".to_string(),
            name: None,
        }]),
        participants: None,
    }
}

async fn next_event(rx: &mut mpsc::Receiver<PushEvent>) -> PushEvent {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for push event")
        .expect("push channel closed")
}

async fn next_update(rx: &mut mpsc::Receiver<UiUpdate>) -> UiUpdate {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for ui update")
        .expect("ui channel closed")
}

/// Mock platform API: answers every connection based on the request line.
/// `GET /challenges/` serves the canned list, the toggle endpoint serves the
/// toggled entity, everything else serves an empty list.
async fn spawn_api_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let Ok(n) = socket.read(&mut buf).await else {
                    return;
                };
                let head = String::from_utf8_lossy(&buf[..n]).to_string();

                let body = if head.starts_with("GET /challenges/?") {
                    serde_json::to_string(&vec![toggle_challenge(1, "Deep Work", false)]).unwrap()
                } else if head.starts_with("PATCH /challenges/1/toggle") {
                    serde_json::to_string(&toggle_challenge(1, "Deep Work", true)).unwrap()
                } else {
                    "[]".to_string()
                };
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });

    format!("http://{addr}")
}

// ===========================================================================
// Push connection manager
// ===========================================================================

#[tokio::test]
async fn push_client_connects_receives_and_reconnects() {
    // Local push origin: first connection delivers one event then closes,
    // second connection stays open until the test ends.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let frame = serde_json::json!({
            "type": "challenge_toggled",
            "challenge_id": 5,
            "is_active": true,
            "challenge": toggle_challenge(5, "Morning Run", true),
        })
        .to_string();
        ws.send(tokio_tungstenite::tungstenite::Message::Text(frame.into()))
            .await
            .unwrap();
        ws.close(None).await.unwrap();

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        // Hold the second connection open until the client is stopped.
        use futures_util::StreamExt;
        let _ = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;
    });

    let mut client = PushClient::new(PushConfig {
        endpoint: format!("ws://{addr}/challenges/ws"),
        keepalive: Duration::from_secs(30),
        backoff: BackoffPolicy {
            base: Duration::from_millis(50),
            cap: Duration::from_millis(100),
            max_jitter: Duration::ZERO,
        },
    });

    let (tx, mut rx) = mpsc::channel(16);
    assert!(client.start(tx));

    assert_eq!(next_event(&mut rx).await, PushEvent::Connected { reconnect: false });
    match next_event(&mut rx).await {
        PushEvent::ChallengeToggled {
            challenge_id,
            is_active,
            challenge,
        } => {
            assert_eq!(challenge_id, 5);
            assert!(is_active);
            assert_eq!(challenge.name, "Morning Run");
        }
        other => panic!("expected ChallengeToggled, got {other:?}"),
    }
    assert_eq!(next_event(&mut rx).await, PushEvent::Disconnected);
    // The retry loop brings the connection back without any attempt limit.
    assert_eq!(next_event(&mut rx).await, PushEvent::Connected { reconnect: true });
    assert_eq!(client.status(), ConnectionStatus::Open);

    client.stop();
    assert_eq!(client.status(), ConnectionStatus::Terminated);
}

#[test]
fn endpoint_derivation_matches_the_configured_base() {
    assert_eq!(
        push_endpoint("https://focus.example.com", "/challenges/ws"),
        "wss://focus.example.com/challenges/ws"
    );
    assert_eq!(
        push_endpoint("http://localhost:8081/", "/challenges/ws"),
        "ws://localhost:8081/challenges/ws"
    );
}

// ===========================================================================
// Application loop end-to-end
// ===========================================================================

#[tokio::test]
async fn view_switch_toggle_and_reconnect_recovery_flow() {
    let base = spawn_api_server().await;
    let api = Arc::new(
        ApiClient::new(&base, Duration::from_secs(5), Arc::new(StaticToken(None))).unwrap(),
    );

    let (ui_tx, mut ui_rx) = mpsc::channel(64);
    let (push_tx, push_rx) = mpsc::channel(16);
    let (cmd_tx, cmd_rx) = mpsc::channel(16);

    let (app, channels) = App::new(api, ui_tx);
    let handle = tokio::spawn(app.run(channels, push_rx, cmd_rx));

    // Activating a never-loaded view triggers a fetch.
    cmd_tx.send(UserCommand::SwitchView(ViewId::All)).await.unwrap();
    match next_update(&mut ui_rx).await {
        UiUpdate::ViewSnapshot { view, challenges } => {
            assert_eq!(view, ViewId::All);
            assert_eq!(challenges.len(), 1);
            assert_eq!(challenges[0].is_active(), Some(false));
        }
        other => panic!("expected ViewSnapshot, got {other:?}"),
    }

    // Toggle: the optimistic snapshot lands first, the server confirmation
    // lands second, and both show the same state (no double flip).
    cmd_tx.send(UserCommand::ToggleChallenge(1)).await.unwrap();
    for stage in ["optimistic", "confirmed"] {
        match next_update(&mut ui_rx).await {
            UiUpdate::ViewSnapshot { challenges, .. } => {
                assert_eq!(
                    challenges[0].is_active(),
                    Some(true),
                    "{stage} snapshot should show the toggled state"
                );
            }
            other => panic!("expected {stage} ViewSnapshot, got {other:?}"),
        }
    }

    // A reconnect means events may have been missed; the active view is
    // refetched from the server rather than trusting the cache.
    push_tx
        .send(PushEvent::Connected { reconnect: true })
        .await
        .unwrap();
    assert_eq!(
        next_update(&mut ui_rx).await,
        UiUpdate::ConnectionChanged { online: true }
    );
    match next_update(&mut ui_rx).await {
        UiUpdate::ViewSnapshot { challenges, .. } => {
            // Server truth wins over the locally toggled state.
            assert_eq!(challenges[0].is_active(), Some(false));
        }
        other => panic!("expected refetched ViewSnapshot, got {other:?}"),
    }

    cmd_tx.send(UserCommand::Quit).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop on Quit")
        .unwrap();
}

#[tokio::test]
async fn first_connect_produces_a_single_toast() {
    let base = spawn_api_server().await;
    let api = Arc::new(
        ApiClient::new(&base, Duration::from_secs(5), Arc::new(StaticToken(None))).unwrap(),
    );

    let (ui_tx, mut ui_rx) = mpsc::channel(64);
    let (push_tx, push_rx) = mpsc::channel(16);
    let (cmd_tx, cmd_rx) = mpsc::channel(16);

    let (app, channels) = App::new(api, ui_tx);
    let handle = tokio::spawn(app.run(channels, push_rx, cmd_rx));

    push_tx
        .send(PushEvent::Connected { reconnect: false })
        .await
        .unwrap();
    assert_eq!(
        next_update(&mut ui_rx).await,
        UiUpdate::ConnectionChanged { online: true }
    );
    assert!(matches!(next_update(&mut ui_rx).await, UiUpdate::Toast(_)));

    push_tx.send(PushEvent::Disconnected).await.unwrap();
    assert_eq!(
        next_update(&mut ui_rx).await,
        UiUpdate::ConnectionChanged { online: false }
    );

    cmd_tx.send(UserCommand::Quit).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("loop did not stop on Quit")
        .unwrap();
}

// ===========================================================================
// Store reconciliation across views
// ===========================================================================

#[test]
fn remote_update_keeps_views_consistent_and_merges_partially() {
    let mut store = ChallengeStore::new();
    store.populate(
        ViewId::All,
        vec![toggle_challenge(1, "Deep Work", false), toggle_challenge(2, "No Sugar", false)],
    );
    store.populate(ViewId::Joined, vec![toggle_challenge(1, "Deep Work", false)]);

    // Slim update: no description, no distractions.
    let mut incoming = toggle_challenge(1, "Deep Work", true);
    incoming.description = None;
    incoming.distractions = None;

    assert!(store.apply_remote_update(1, &incoming));

    for view in [ViewId::All, ViewId::Joined] {
        let entry = &store.entries(view)[0];
        assert_eq!(entry.is_active(), Some(true), "{}", view.as_str());
        // Omitted fields keep their cached values.
        assert!(entry.description.is_some(), "{}", view.as_str());
        assert!(entry.distractions.is_some(), "{}", view.as_str());
    }
    // The sibling entry is untouched.
    assert_eq!(store.entries(ViewId::All)[1].is_active(), Some(false));
}

#[test]
fn optimistic_toggle_then_confirmation_is_idempotent() {
    let mut store = ChallengeStore::new();
    store.populate(ViewId::All, vec![toggle_challenge(7, "Evening Read", false)]);

    store.apply_optimistic_toggle(7);
    let optimistic = store.entries(ViewId::All).to_vec();

    store.apply_remote_update(7, &toggle_challenge(7, "Evening Read", true));
    assert_eq!(store.entries(ViewId::All), optimistic.as_slice());
}

#[test]
fn invalidation_marks_a_view_for_refetch() {
    let mut store = ChallengeStore::new();
    store.populate(ViewId::Joined, vec![toggle_challenge(1, "A", true)]);
    assert!(!store.is_stale(ViewId::Joined));

    store.invalidate(ViewId::Joined);
    assert!(store.is_stale(ViewId::Joined));

    store.populate(ViewId::Joined, vec![]);
    assert!(!store.is_stale(ViewId::Joined));
}
