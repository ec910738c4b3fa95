//! End-to-end tests for the decision relay
//!
//! Each test starts the full router on an ephemeral port and plays the game
//! client's side of the socket.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use stairs_relay::policy::Decider;
use stairs_relay::{build_router, AppState, Config};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INTERVAL: Duration = Duration::from_millis(50);
/// Scheduling slack between the server's send and our receive on loopback
const JITTER: Duration = Duration::from_millis(5);
/// How long we listen before concluding the relay stayed silent
const SILENCE: Duration = Duration::from_millis(250);

fn test_config() -> Config {
    Config {
        static_dir: std::env::temp_dir().join("stairs-relay-no-assets"),
        min_response_interval: INTERVAL,
        ..Config::default()
    }
}

async fn spawn_relay(state: AppState) -> SocketAddr {
    let router = build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn heuristic_relay() -> (SocketAddr, AppState) {
    let state = AppState::with_decider(test_config(), Decider::heuristic(Duration::from_millis(20)));
    (spawn_relay(state.clone()).await, state)
}

async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/ws/game", addr))
        .await
        .expect("Failed to connect to relay");
    ws
}

async fn send(ws: &mut Client, frame: &str) {
    ws.send(Message::Text(frame.to_string())).await.unwrap();
}

fn agent_frame(obs: [u8; 5], player_dir: Option<u8>) -> String {
    let mut frame = serde_json::json!({
        "event": "state",
        "obs": obs,
        "score": 10,
        "ai_active": true,
    });
    if let Some(dir) = player_dir {
        frame["playerDir"] = dir.into();
    }
    frame.to_string()
}

/// Next action from the relay, or None if nothing arrives in `wait`
async fn next_action(ws: &mut Client, wait: Duration) -> Option<u8> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match timeout(remaining, ws.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => {
                let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                let object = value.as_object().unwrap();
                assert_eq!(object.len(), 1, "unexpected envelope: {}", text);
                return Some(object["action"].as_u64().unwrap() as u8);
            }
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(Some(Ok(other))) => panic!("unexpected frame: {:?}", other),
            Ok(Some(Err(e))) => panic!("socket error: {}", e),
            Ok(None) => panic!("relay closed the session"),
            Err(_) => return None,
        }
    }
}

async fn wait_for_sessions(state: &AppState, expected: usize) {
    for _ in 0..100 {
        if state.sessions.active_sessions() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {} sessions, found {}",
        expected,
        state.sessions.active_sessions()
    );
}

#[tokio::test]
async fn heuristic_decision_over_the_wire() {
    let (addr, _state) = heuristic_relay().await;
    let mut ws = connect(addr).await;

    // Next stair is Left, player faces Right -> flip
    send(&mut ws, &agent_frame([0, 1, 1, 0, 1], Some(1))).await;
    assert_eq!(next_action(&mut ws, Duration::from_secs(1)).await, Some(1));

    // Next stair is Right, player faces Right -> continue
    send(&mut ws, &agent_frame([1, 0, 0, 0, 0], Some(1))).await;
    assert_eq!(next_action(&mut ws, Duration::from_secs(1)).await, Some(0));

    // Next stair is Left, player faces Left -> continue
    send(&mut ws, &agent_frame([0, 0, 1, 1, 1], Some(0))).await;
    assert_eq!(next_action(&mut ws, Duration::from_secs(1)).await, Some(0));
}

#[tokio::test]
async fn missing_player_dir_means_right() {
    let (addr, _state) = heuristic_relay().await;
    let mut ws = connect(addr).await;

    for obs in [[0, 1, 0, 1, 0], [1, 1, 0, 0, 1]] {
        send(&mut ws, &agent_frame(obs, None)).await;
        let implicit = next_action(&mut ws, Duration::from_secs(1)).await;
        send(&mut ws, &agent_frame(obs, Some(1))).await;
        let explicit = next_action(&mut ws, Duration::from_secs(1)).await;
        assert!(implicit.is_some());
        assert_eq!(implicit, explicit);
    }
}

#[tokio::test]
async fn manual_play_gets_no_response() {
    let (addr, _state) = heuristic_relay().await;
    let mut ws = connect(addr).await;

    for obs in [[0, 0, 0, 0, 0], [1, 0, 1, 0, 1], [1, 1, 1, 1, 1]] {
        let frame = serde_json::json!({
            "event": "state",
            "obs": obs,
            "score": 3,
            "ai_active": false,
            "playerDir": 0,
        });
        send(&mut ws, &frame.to_string()).await;
    }
    send(&mut ws, r#"{"event":"restart","score":0}"#).await;
    assert_eq!(next_action(&mut ws, SILENCE).await, None);

    // Session is still serving once the agent takes over
    send(&mut ws, &agent_frame([1, 0, 0, 0, 0], Some(0))).await;
    assert_eq!(next_action(&mut ws, Duration::from_secs(1)).await, Some(1));
}

#[tokio::test]
async fn malformed_frames_do_not_close_the_session() {
    let (addr, _state) = heuristic_relay().await;
    let mut ws = connect(addr).await;

    send(&mut ws, "this is not json").await;
    send(&mut ws, r#"{"event":"state","score":1,"ai_active":true}"#).await;
    send(&mut ws, r#"{"event":"state","obs":[0,7,0,0,0],"ai_active":true}"#).await;
    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    send(&mut ws, &agent_frame([0, 1, 1, 0, 1], Some(1))).await;

    assert_eq!(next_action(&mut ws, Duration::from_secs(1)).await, Some(1));
    assert_eq!(next_action(&mut ws, SILENCE).await, None);
}

#[tokio::test]
async fn back_to_back_responses_respect_min_interval() {
    let (addr, _state) = heuristic_relay().await;
    let mut ws = connect(addr).await;

    const FRAMES: usize = 6;
    for i in 0..FRAMES {
        let obs = if i % 2 == 0 { [0, 0, 0, 0, 0] } else { [1, 1, 1, 1, 1] };
        send(&mut ws, &agent_frame(obs, Some(1))).await;
    }

    let mut received = Vec::with_capacity(FRAMES);
    for i in 0..FRAMES {
        let action = next_action(&mut ws, Duration::from_secs(2)).await;
        let expected = if i % 2 == 0 { 1 } else { 0 };
        assert_eq!(action, Some(expected), "response {} out of order", i);
        received.push(Instant::now());
    }

    for (i, pair) in received.windows(2).enumerate() {
        let gap = pair[1] - pair[0];
        assert!(
            gap + JITTER >= INTERVAL,
            "responses {} and {} only {:?} apart",
            i,
            i + 1,
            gap
        );
    }
}

#[tokio::test]
async fn one_session_pacing_does_not_stall_another() {
    let (addr, _state) = heuristic_relay().await;
    let mut busy = connect(addr).await;
    let mut quick = connect(addr).await;

    const BACKLOG: usize = 10;
    for _ in 0..BACKLOG {
        send(&mut busy, &agent_frame([1, 1, 1, 1, 1], Some(1))).await;
    }
    send(&mut quick, &agent_frame([0, 1, 1, 1, 1], Some(1))).await;

    // The busy session needs at least (BACKLOG - 1) * INTERVAL to drain
    let started = Instant::now();
    assert_eq!(next_action(&mut quick, Duration::from_secs(1)).await, Some(1));
    let waited = started.elapsed();
    assert!(waited + JITTER >= INTERVAL, "answered after only {:?}", waited);
    assert!(waited < INTERVAL * (BACKLOG as u32 - 1));

    for _ in 0..BACKLOG {
        assert_eq!(next_action(&mut busy, Duration::from_secs(2)).await, Some(0));
    }
}

#[tokio::test]
async fn first_response_is_held_back_by_min_interval() {
    let (addr, _state) = heuristic_relay().await;
    let mut ws = connect(addr).await;

    let sent = Instant::now();
    send(&mut ws, &agent_frame([0, 1, 1, 0, 1], Some(1))).await;
    assert_eq!(next_action(&mut ws, Duration::from_secs(1)).await, Some(1));
    assert!(sent.elapsed() >= INTERVAL, "answered after {:?}", sent.elapsed());
}

#[tokio::test]
async fn disconnect_abandons_pending_response() {
    let config = Config {
        min_response_interval: Duration::from_secs(5),
        ..test_config()
    };
    let state = AppState::with_decider(config, Decider::heuristic(Duration::from_millis(20)));
    let addr = spawn_relay(state.clone()).await;
    let mut ws = connect(addr).await;
    wait_for_sessions(&state, 1).await;

    send(&mut ws, &agent_frame([0, 1, 1, 0, 1], Some(1))).await;
    ws.close(None).await.unwrap();

    // Released long before the 5s pacing deadline
    wait_for_sessions(&state, 0).await;
}

#[tokio::test]
async fn sessions_are_tracked_and_released() {
    let (addr, state) = heuristic_relay().await;

    let first = connect(addr).await;
    let second = connect(addr).await;
    wait_for_sessions(&state, 2).await;

    drop(first);
    wait_for_sessions(&state, 1).await;

    let mut second = second;
    second.close(None).await.unwrap();
    wait_for_sessions(&state, 0).await;
}

#[tokio::test]
async fn shutdown_closes_open_sessions() {
    let (addr, state) = heuristic_relay().await;
    let mut ws = connect(addr).await;
    wait_for_sessions(&state, 1).await;

    state.begin_shutdown();

    let closed = timeout(Duration::from_secs(1), async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "session was not closed on shutdown");
    wait_for_sessions(&state, 0).await;
}

#[tokio::test]
async fn learned_policy_drives_decisions() {
    // Looks at the second stair instead of the first, so it disagrees with
    // the heuristic whenever those two differ
    let weights = r#"{"layers": [
        {"weights": [[0.0, -1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0, 0.0]], "bias": [0.5, 0.0], "activation": "identity"}
    ]}"#;
    let path = std::env::temp_dir().join(format!("stairs-policy-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, weights).unwrap();

    let config = Config {
        model_path: Some(path.clone()),
        ..test_config()
    };
    let state = AppState::new(config);
    assert_eq!(state.decider.source_name(), "policy");
    let addr = spawn_relay(state).await;
    let mut ws = connect(addr).await;

    // Heuristic would continue (obs[0] = Right); the policy wants Left
    send(&mut ws, &agent_frame([1, 0, 1, 1, 1], Some(1))).await;
    assert_eq!(next_action(&mut ws, Duration::from_secs(1)).await, Some(1));

    // Heuristic would flip (obs[0] = Left); the policy wants Right
    send(&mut ws, &agent_frame([0, 1, 0, 0, 0], Some(1))).await;
    assert_eq!(next_action(&mut ws, Duration::from_secs(1)).await, Some(0));

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn unloadable_policy_falls_back_to_heuristic() {
    let path = std::env::temp_dir().join(format!("stairs-policy-{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, "{\"layers\": \"nope\"}").unwrap();

    let config = Config {
        model_path: Some(path.clone()),
        ..test_config()
    };
    let state = AppState::new(config);
    assert_eq!(state.decider.source_name(), "heuristic");
    let addr = spawn_relay(state).await;
    let mut ws = connect(addr).await;

    send(&mut ws, &agent_frame([0, 1, 1, 0, 1], Some(1))).await;
    assert_eq!(next_action(&mut ws, Duration::from_secs(1)).await, Some(1));

    std::fs::remove_file(&path).unwrap();
}
