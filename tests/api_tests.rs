// HTTP API contract tests: status codes, path safety, and control hooks,
// driven through the router without a live listener.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{TimeZone, Utc};
use futures::FutureExt;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::util::ServiceExt;

use scribed::server::{create_router, AppState, ControlHooks, Hub};
use scribed::session::SessionError;
use scribed::storage::SqliteStore;
use scribed::transcript::Segment;

struct Fixture {
    app: Router,
    store: Arc<SqliteStore>,
    _dir: TempDir,
}

fn fixture(controls: ControlHooks) -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteStore::open(dir.path().join("api.db")).unwrap());
    let app = create_router(AppState {
        store: Arc::clone(&store),
        hub: Arc::new(Hub::new()),
        controls,
    });
    Fixture {
        app,
        store,
        _dir: dir,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, body)
}

fn get(path: &str) -> Request<Body> {
    Request::builder().uri(path).body(Body::empty()).unwrap()
}

fn post(path: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn list_sessions_filters_by_date() {
    let f = fixture(ControlHooks::default());
    let day = Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap();
    f.store.create_session("a", day).await.unwrap();

    let (status, body) = send(&f.app, get("/api/sessions?date=2025-06-01")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["id"], "a");

    let (status, body) = send(&f.app, get("/api/sessions?date=2024-01-01")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn get_session_returns_session_with_segments() {
    let f = fixture(ControlHooks::default());
    f.store.create_session("abc123", Utc::now()).await.unwrap();
    f.store
        .append_segment(
            "abc123",
            &Segment {
                speaker: 0,
                text: "hello".to_string(),
                start_time: 0.0,
                end_time: 0.5,
                timestamp: Utc::now(),
            },
        )
        .await
        .unwrap();

    let (status, body) = send(&f.app, get("/api/sessions/abc123")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["id"], "abc123");
    assert_eq!(body["segments"][0]["text"], "hello");
}

#[tokio::test]
async fn unknown_session_is_404_and_bad_id_is_403() {
    let f = fixture(ControlHooks::default());

    let (status, _) = send(&f.app, get("/api/sessions/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&f.app, get("/api/sessions/%2e%2e")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn audio_rejects_traversal_and_absolute_paths() {
    let f = fixture(ControlHooks::default());

    for (id, audio_path) in [
        ("evil1", "../secrets.db"),
        ("evil2", "/etc/passwd"),
        ("evil3", "data/../../x.mp3"),
        ("evil4", "."),
    ] {
        f.store.create_session(id, Utc::now()).await.unwrap();
        f.store.end_session(id, Utc::now(), audio_path).await.unwrap();

        let (status, _) = send(&f.app, get(&format!("/api/sessions/{id}/audio"))).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "path {audio_path:?}");
    }
}

#[tokio::test]
async fn audio_missing_is_404_and_stored_file_streams_with_ranges() {
    let f = fixture(ControlHooks::default());

    f.store.create_session("noaudio", Utc::now()).await.unwrap();
    f.store.end_session("noaudio", Utc::now(), "").await.unwrap();
    let (status, _) = send(&f.app, get("/api/sessions/noaudio/audio")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // A real file, stored under a relative path.
    let rel = "test-audio-fixture.wav";
    std::fs::write(rel, b"RIFF0000WAVEfmt fixture-bytes").unwrap();
    f.store.create_session("withaudio", Utc::now()).await.unwrap();
    f.store.end_session("withaudio", Utc::now(), rel).await.unwrap();

    let (status, _) = send(&f.app, get("/api/sessions/withaudio/audio")).await;
    assert_eq!(status, StatusCode::OK);

    let ranged = Request::builder()
        .uri("/api/sessions/withaudio/audio")
        .header(header::RANGE, "bytes=0-3")
        .body(Body::empty())
        .unwrap();
    let response = f.app.clone().oneshot(ranged).await.unwrap();
    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"RIFF");

    std::fs::remove_file(rel).unwrap();
}

#[tokio::test]
async fn dates_endpoint_lists_distinct_dates() {
    let f = fixture(ControlHooks::default());
    f.store
        .create_session("a", Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap())
        .await
        .unwrap();

    let (status, body) = send(&f.app, get("/api/dates")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!(["2025-06-01"]));
}

#[tokio::test]
async fn status_reports_paused_flag_and_warnings() {
    let controls = ControlHooks {
        is_paused: Some(Arc::new(|| true)),
        warnings: Some(Arc::new(|| vec!["no api key".to_string()])),
        ..ControlHooks::default()
    };
    let f = fixture(controls);

    let (status, body) = send(&f.app, get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paused"], true);
    assert_eq!(body["warnings"][0], "no api key");
}

#[tokio::test]
async fn status_defaults_when_hooks_missing() {
    let f = fixture(ControlHooks::default());
    let (status, body) = send(&f.app, get("/api/status")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["paused"], false);
    assert_eq!(body["warnings"], serde_json::json!([]));
}

#[tokio::test]
async fn pause_and_resume_toggle_the_hook() {
    let paused = Arc::new(AtomicBool::new(false));
    let controls = ControlHooks {
        pause: Some({
            let paused = Arc::clone(&paused);
            Arc::new(move || paused.store(true, Ordering::SeqCst))
        }),
        resume: Some({
            let paused = Arc::clone(&paused);
            Arc::new(move || paused.store(false, Ordering::SeqCst))
        }),
        ..ControlHooks::default()
    };
    let f = fixture(controls);

    let (status, _) = send(&f.app, post("/api/pause", "")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(paused.load(Ordering::SeqCst));

    let (status, _) = send(&f.app, post("/api/resume", "")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(!paused.load(Ordering::SeqCst));
}

#[tokio::test]
async fn presets_lists_descriptions_only() {
    let controls = ControlHooks {
        presets: Some(Arc::new(|| {
            let mut map = BTreeMap::new();
            map.insert("default".to_string(), "General summary".to_string());
            map.insert("engineering".to_string(), "Technical notes".to_string());
            map
        })),
        ..ControlHooks::default()
    };
    let f = fixture(controls);

    let (status, body) = send(&f.app, get("/api/presets")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["default"], "General summary");
    assert_eq!(body["engineering"], "Technical notes");
}

#[tokio::test]
async fn end_session_maps_hook_results_to_status_codes() {
    // No hook wired: unavailable.
    let f = fixture(ControlHooks::default());
    let (status, _) = send(&f.app, post("/api/session/end", "")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    // Hook reports no active session: conflict.
    let controls = ControlHooks {
        end_session: Some(Arc::new(|| {
            async { Err(SessionError::NoActiveSession) }.boxed()
        })),
        ..ControlHooks::default()
    };
    let f = fixture(controls);
    let (status, _) = send(&f.app, post("/api/session/end", "")).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Hook succeeds: no content.
    let controls = ControlHooks {
        end_session: Some(Arc::new(|| async { Ok(()) }.boxed())),
        ..ControlHooks::default()
    };
    let f = fixture(controls);
    let (status, _) = send(&f.app, post("/api/session/end", "")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn resummarize_accepts_and_forwards_preset() {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let controls = ControlHooks {
        resummarize: Some(Arc::new(move |session_id: String, preset: String| {
            let tx = tx.clone();
            async move {
                let _ = tx.send((session_id, preset));
                Ok(())
            }
            .boxed()
        })),
        ..ControlHooks::default()
    };
    let f = fixture(controls);

    let (status, _) = send(
        &f.app,
        post("/api/sessions/test123/resummarize", r#"{"preset":"detailed"}"#),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (session_id, preset) = rx.recv().await.unwrap();
    assert_eq!(session_id, "test123");
    assert_eq!(preset, "detailed");

    // Empty body works too; preset defaults to empty.
    let (status, _) = send(&f.app, post("/api/sessions/test123/resummarize", "")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (_, preset) = rx.recv().await.unwrap();
    assert_eq!(preset, "");
}

#[tokio::test]
async fn resummarize_error_cases() {
    // Invalid JSON: bad request, hook never runs.
    let called = Arc::new(AtomicBool::new(false));
    let controls = ControlHooks {
        resummarize: Some({
            let called = Arc::clone(&called);
            Arc::new(move |_: String, _: String| {
                called.store(true, Ordering::SeqCst);
                async { Ok(()) }.boxed()
            })
        }),
        ..ControlHooks::default()
    };
    let f = fixture(controls);

    let (status, _) = send(
        &f.app,
        post("/api/sessions/test123/resummarize", "{invalid json"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(!called.load(Ordering::SeqCst));

    // Invalid session id: forbidden.
    let (status, _) = send(
        &f.app,
        post("/api/sessions/%2e%2e/resummarize", ""),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // No summarizer wired: unavailable.
    let f = fixture(ControlHooks::default());
    let (status, _) = send(&f.app, post("/api/sessions/test123/resummarize", "")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}
