//! End-to-end integration tests for HU Arena.
//!
//! These tests drive the real supervisor and HTTP router against a scripted
//! worker (`tests/fixtures/fake_worker.sh`):
//! - A full match from `start_match` to worker exit
//! - Hand log contents
//! - Termination and automatic cleanup
//! - The HTTP flow including the SSE stream

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use arena::config::{Config, SessionConfig, WorkerConfig};
use arena::hand_log::{HandLogStore, HandRecord};
use arena::http::{self, AppState, NO_LOGS};
use arena::identity::PlayerId;
use arena::session::{SessionError, Supervisor, Viewer};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures_util::StreamExt;
use protocol::MatchSettings;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

const FAKE_WORKER: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/fake_worker.sh");

/// How long any single test waits for the worker.
const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Create a supervisor running the fake worker in the given mode.
fn create_supervisor(mode: &str) -> (Arc<Supervisor>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let mut env = BTreeMap::new();
    env.insert("FAKE_WORKER_MODE".to_string(), mode.to_string());
    let worker = WorkerConfig {
        program: "/bin/sh".to_string(),
        args: vec![FAKE_WORKER.to_string()],
        cwd: None,
        env,
        terminate_grace_ms: 300,
    };
    let limits = SessionConfig {
        max_sessions: 8,
        viewer_buffer: 64,
    };
    let store = HandLogStore::new(temp_dir.path().join("hand_logs"));
    (Arc::new(Supervisor::new(worker, limits, store)), temp_dir)
}

async fn next_event(viewer: &mut Viewer) -> Option<Value> {
    let payload = tokio::time::timeout(STEP_TIMEOUT, viewer.recv())
        .await
        .expect("timed out waiting for an event")?;
    Some(serde_json::from_str(&payload).unwrap())
}

/// Collect events up to and including the first one with the given type.
async fn read_until(viewer: &mut Viewer, event_type: &str) -> Vec<Value> {
    let mut events = Vec::new();
    while let Some(event) = next_event(viewer).await {
        let done = event["type"] == event_type;
        events.push(event);
        if done {
            return events;
        }
    }
    panic!("stream ended before {event_type}: {events:?}");
}

async fn wait_until_gone(supervisor: &Supervisor, session_id: &str) {
    for _ in 0..500 {
        if !supervisor.registry().contains(session_id) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("session {session_id} was never cleaned up");
}

fn log_records(contents: &str) -> Vec<HandRecord> {
    contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

// =============================================================================
// Supervisor Flow Tests
// =============================================================================

#[tokio::test]
async fn test_full_match_is_streamed_and_logged() {
    let (supervisor, _temp_dir) = create_supervisor("play");
    let settings = MatchSettings {
        hands: 1,
        ..MatchSettings::default()
    };

    let session_id = supervisor
        .create_session("  Ada Lovelace ", settings)
        .await
        .unwrap();
    let mut viewer = supervisor.subscribe(&session_id).await.unwrap();

    let mut events = read_until(&mut viewer, "await_human").await;
    assert_eq!(events[0]["type"], "connected");
    assert_eq!(events[0]["session_id"], session_id.as_str());

    supervisor.human_action(&session_id, 3, None).await.unwrap();
    events.extend(read_until(&mut viewer, "await_next_hand").await);

    supervisor.next_hand(&session_id, None).await.unwrap();
    while let Some(event) = next_event(&mut viewer).await {
        events.push(event);
    }

    // Worker output arrives in order.
    let stdout_types: Vec<&str> = events
        .iter()
        .filter(|e| e["type"] != "error" && e["type"] != "connected")
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert_eq!(
        stdout_types,
        [
            "match_started",
            "hand_start",
            "state",
            "action",
            "await_human",
            "action",
            "hand_end",
            "await_next_hand",
            "match_end",
            "match_end",
        ]
    );

    // The worker's own match_end carries stacks, ours carries the exit.
    let ends: Vec<&Value> = events.iter().filter(|e| e["type"] == "match_end").collect();
    assert_eq!(ends[0]["hero_stack"], 15120);
    assert_eq!(ends[1]["reason"], "process_exit");
    assert_eq!(ends[1]["code"], 0);
    assert!(ends[1]["signal"].is_null());
    assert_eq!(events.last().unwrap()["reason"], "process_exit");

    let decode_error = events
        .iter()
        .find(|e| e["type"] == "error" && e["source"] == "decode")
        .expect("decode error event");
    assert_eq!(decode_error["raw"], "this is not json");

    let stderr = events
        .iter()
        .find(|e| e["type"] == "error" && e["source"] == "stderr")
        .expect("stderr event");
    assert_eq!(stderr["message"], "worker warming up\n");

    // One record for the one completed hand.
    let player = PlayerId::parse("Ada_Lovelace").unwrap();
    let contents = supervisor.store().read(&player).await.unwrap().unwrap();
    let records = log_records(&contents);
    assert_eq!(records.len(), 1);

    let record = &records[0];
    assert_eq!(record.player, "Ada_Lovelace");
    assert_eq!(record.session_id, session_id);
    assert_eq!(record.settings.hands, 1);
    assert_eq!(record.hand.hand_num, 1);
    assert_eq!(record.hand.winner, Some(0));
    assert_eq!(record.hand.actions.len(), 2);
    assert_eq!(record.hand.actions[0].act_name, "CHECK");
    assert_eq!(record.hand.actions[1].act, 3);
    assert_eq!(record.hand.actions[1].act_name, "BET_HALF_POT");
    assert_eq!(record.hand.hero_stack_start, 14700);
    assert_eq!(record.hand.hero_stack_end, 15120);
    assert!(record.hand.started_at <= record.hand.ended_at);

    wait_until_gone(&supervisor, &session_id).await;
}

#[tokio::test]
async fn test_same_player_sessions_share_one_log() {
    let (supervisor, _temp_dir) = create_supervisor("play");

    for _ in 0..2 {
        let session_id = supervisor
            .create_session("bob", MatchSettings::default())
            .await
            .unwrap();
        let mut viewer = supervisor.subscribe(&session_id).await.unwrap();
        read_until(&mut viewer, "await_human").await;
        supervisor.human_action(&session_id, 2, Some(10)).await.unwrap();
        read_until(&mut viewer, "await_next_hand").await;
        supervisor.terminate_session(&session_id).unwrap();
    }

    let player = PlayerId::parse("bob").unwrap();
    let records = log_records(&supervisor.store().read(&player).await.unwrap().unwrap());
    assert_eq!(records.len(), 2);
    assert_ne!(records[0].session_id, records[1].session_id);
}

#[tokio::test]
async fn test_terminate_immediately_after_create() {
    let (supervisor, _temp_dir) = create_supervisor("play");

    let session_id = supervisor
        .create_session("carol", MatchSettings::default())
        .await
        .unwrap();
    let mut viewer = supervisor.subscribe(&session_id).await.unwrap();

    supervisor.terminate_session(&session_id).unwrap();
    assert!(!supervisor.registry().contains(&session_id));
    assert!(matches!(
        supervisor.next_hand(&session_id, None).await,
        Err(SessionError::UnknownSession(_))
    ));

    // Nothing from the worker is delivered after termination.
    let mut events = Vec::new();
    while let Some(event) = next_event(&mut viewer).await {
        events.push(event);
    }
    let types: Vec<&str> = events.iter().map(|e| e["type"].as_str().unwrap()).collect();
    assert_eq!(types, ["connected", "match_end"]);

    let player = PlayerId::parse("carol").unwrap();
    assert!(supervisor.store().read(&player).await.unwrap().is_none());
}

#[tokio::test]
async fn test_worker_exit_cleans_up_session() {
    let (supervisor, _temp_dir) = create_supervisor("exit_after_start");

    let session_id = supervisor
        .create_session("dave", MatchSettings::default())
        .await
        .unwrap();
    let mut viewer = supervisor.subscribe(&session_id).await.unwrap();

    let events = read_until(&mut viewer, "match_end").await;
    let end = events.last().unwrap();
    assert_eq!(end["reason"], "process_exit");
    assert_eq!(end["code"], 0);
    assert!(next_event(&mut viewer).await.is_none());

    wait_until_gone(&supervisor, &session_id).await;
    assert!(matches!(
        supervisor.subscribe(&session_id).await,
        Err(SessionError::UnknownSession(_))
    ));
}

#[tokio::test]
async fn test_stubborn_worker_is_force_killed() {
    let (supervisor, _temp_dir) = create_supervisor("stubborn");

    let session_id = supervisor
        .create_session("erin", MatchSettings::default())
        .await
        .unwrap();
    let mut viewer = supervisor.subscribe(&session_id).await.unwrap();
    read_until(&mut viewer, "match_started").await;

    supervisor.terminate_session(&session_id).unwrap();

    let events = read_until(&mut viewer, "match_end").await;
    let end = events.last().unwrap();
    assert_eq!(end["reason"], "process_exit");
    assert_eq!(end["signal"], 9);
}

#[tokio::test]
async fn test_rejections_before_spawn() {
    let (supervisor, _temp_dir) = create_supervisor("play");

    let err = supervisor
        .create_session(" \t ", MatchSettings::default())
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidIdentity(_)));
    assert!(supervisor.registry().is_empty());

    assert!(matches!(
        supervisor.human_action("no-such-session", 1, None).await,
        Err(SessionError::UnknownSession(_))
    ));
}

#[tokio::test]
async fn test_terminate_all_stops_every_session() {
    let (supervisor, _temp_dir) = create_supervisor("play");

    for player in ["p1", "p2", "p3"] {
        supervisor
            .create_session(player, MatchSettings::default())
            .await
            .unwrap();
    }
    assert_eq!(supervisor.registry().len(), 3);

    supervisor.shutdown(Duration::from_secs(5)).await;
    assert!(supervisor.registry().is_empty());
}

// =============================================================================
// HTTP Flow Tests
// =============================================================================

fn create_router(supervisor: &Arc<Supervisor>) -> Router {
    http::router(AppState::new(Arc::clone(supervisor)))
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Parses `data:` lines out of an SSE body.
struct SseReader {
    frames: axum::body::BodyDataStream,
    buffer: String,
}

impl SseReader {
    fn new(body: Body) -> Self {
        Self {
            frames: body.into_data_stream(),
            buffer: String::new(),
        }
    }

    async fn next(&mut self) -> Option<Value> {
        loop {
            if let Some(pos) = self.buffer.find("\n\n") {
                let block: String = self.buffer.drain(..pos + 2).collect();
                let data: Vec<&str> = block
                    .lines()
                    .filter_map(|line| line.strip_prefix("data:"))
                    .map(str::trim_start)
                    .collect();
                if data.is_empty() {
                    // Keep-alive comment.
                    continue;
                }
                return Some(serde_json::from_str(&data.join("\n")).unwrap());
            }
            let frame = tokio::time::timeout(STEP_TIMEOUT, self.frames.next())
                .await
                .expect("timed out waiting for SSE data")?;
            self.buffer.push_str(std::str::from_utf8(&frame.unwrap()).unwrap());
        }
    }

    async fn read_until(&mut self, event_type: &str) -> Vec<Value> {
        let mut events = Vec::new();
        while let Some(event) = self.next().await {
            let done = event["type"] == event_type;
            events.push(event);
            if done {
                return events;
            }
        }
        panic!("SSE stream ended before {event_type}: {events:?}");
    }
}

#[tokio::test]
async fn test_http_match_flow() {
    let (supervisor, _temp_dir) = create_supervisor("play");
    let app = create_router(&supervisor);

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/sessions",
            json!({ "player": "frank", "settings": { "hands": 1, "iters": 50 } }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body = axum::body::to_bytes(resp.into_body(), 1 << 16).await.unwrap();
    let session_id = serde_json::from_slice::<Value>(&body).unwrap()["session_id"]
        .as_str()
        .unwrap()
        .to_string();

    let resp = app
        .clone()
        .oneshot(empty_request("GET", &format!("/api/sessions/{session_id}/events")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let mut sse = SseReader::new(resp.into_body());

    let events = sse.read_until("await_human").await;
    assert_eq!(events[0]["type"], "connected");

    let resp = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/api/sessions/{session_id}/action"),
            json!({ "act": 0 }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    sse.read_until("await_next_hand").await;

    let resp = app
        .clone()
        .oneshot(empty_request("POST", &format!("/api/sessions/{session_id}/next")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let tail = sse.read_until("match_end").await;
    assert!(tail.last().unwrap()["reason"].is_null());
    let end = sse.next().await.unwrap();
    assert_eq!(end["reason"], "process_exit");
    assert!(sse.next().await.is_none());

    let resp = app
        .clone()
        .oneshot(empty_request("GET", "/api/logs/frank"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1 << 20).await.unwrap();
    let records = log_records(std::str::from_utf8(&body).unwrap());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].settings.iters, 50);
    assert_eq!(records[0].hand.actions[1].act_name, "FOLD");

    wait_until_gone(&supervisor, &session_id).await;
    let resp = app
        .oneshot(empty_request("GET", &format!("/api/sessions/{session_id}/events")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_http_logs_for_unknown_player() {
    let (supervisor, _temp_dir) = create_supervisor("play");
    let app = create_router(&supervisor);

    let resp = app.oneshot(empty_request("GET", "/api/logs/nobody")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = axum::body::to_bytes(resp.into_body(), 1 << 16).await.unwrap();
    assert_eq!(&body[..], NO_LOGS.as_bytes());
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_default_config_round_trips_through_toml() {
    let config = Config::default();
    let toml = config.to_toml().unwrap();
    let parsed = Config::from_toml(&toml).unwrap();
    assert_eq!(config, parsed);
    assert_eq!(parsed.session.viewer_buffer, arena::session::DEFAULT_VIEWER_BUFFER);
}
