use std::collections::BTreeMap;
use std::path::{Component, Path as FsPath};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tower::util::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{error, warn};

use crate::session::SessionError;
use crate::storage::StoreError;

use super::AppState;

/// Bound on the durable-write and audio-finalize work of a force-end.
const END_SESSION_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResummarizeRequest {
    #[serde(default)]
    preset: String,
}

/// GET /api/sessions?date=YYYY-MM-DD — sessions for a UTC date, default
/// today.
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<ListSessionsQuery>,
) -> Response {
    let date = query
        .date
        .unwrap_or_else(|| Utc::now().format("%Y-%m-%d").to_string());

    match state.store.get_sessions_by_date(&date).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(err) => {
            error!("list sessions: {err}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "list sessions failed")
        }
    }
}

/// GET /api/sessions/:id — the session row plus its ordered segments.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if !valid_session_id(&session_id) {
        return json_error(StatusCode::FORBIDDEN, "invalid session id");
    }

    let session = match state.store.get_session(&session_id).await {
        Ok(session) => session,
        Err(StoreError::NotFound) => {
            return json_error(StatusCode::NOT_FOUND, "session not found")
        }
        Err(err) => {
            error!("get session: {err}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "get session failed");
        }
    };

    let segments = match state.store.get_segments(&session_id).await {
        Ok(segments) => segments,
        Err(err) => {
            error!("get session segments: {err}");
            return json_error(StatusCode::INTERNAL_SERVER_ERROR, "get segments failed");
        }
    };

    Json(json!({ "session": session, "segments": segments })).into_response()
}

/// GET /api/sessions/:id/audio — range-supported streaming of the stored
/// audio file. The stored path must be relative and free of traversal.
pub async fn get_session_audio(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    request: Request,
) -> Response {
    if !valid_session_id(&session_id) {
        return json_error(StatusCode::FORBIDDEN, "invalid session id");
    }

    let session = match state.store.get_session(&session_id).await {
        Ok(session) => session,
        Err(_) => return json_error(StatusCode::NOT_FOUND, "session not found"),
    };

    if session.audio_path.is_empty() {
        return json_error(StatusCode::NOT_FOUND, "audio not available");
    }
    if !safe_audio_path(&session.audio_path) {
        return json_error(StatusCode::FORBIDDEN, "invalid audio path");
    }

    if !FsPath::new(&session.audio_path).is_file() {
        return json_error(StatusCode::NOT_FOUND, "audio file not found");
    }

    // ServeFile handles Range/If-Modified-Since and the audio content type.
    match ServeFile::new(&session.audio_path).oneshot(request).await {
        Ok(response) => {
            let mut response = response.map(Body::new);
            response.headers_mut().insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("public, max-age=31536000, immutable"),
            );
            response
        }
        Err(infallible) => match infallible {},
    }
}

/// GET /api/dates — distinct UTC dates with sessions, newest first.
pub async fn get_dates(State(state): State<AppState>) -> Response {
    match state.store.get_dates().await {
        Ok(dates) => Json(dates).into_response(),
        Err(err) => {
            error!("get dates: {err}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "get dates failed")
        }
    }
}

/// GET /api/status — paused flag plus configuration warnings.
pub async fn get_status(State(state): State<AppState>) -> Response {
    let paused = state
        .controls
        .is_paused
        .as_ref()
        .map(|hook| hook())
        .unwrap_or(false);
    let warnings = state
        .controls
        .warnings
        .as_ref()
        .map(|hook| hook())
        .unwrap_or_default();

    Json(json!({ "paused": paused, "warnings": warnings })).into_response()
}

/// GET /api/presets — preset name → description. Prompts stay private.
pub async fn get_presets(State(state): State<AppState>) -> Response {
    let presets = state
        .controls
        .presets
        .as_ref()
        .map(|hook| hook())
        .unwrap_or_else(BTreeMap::new);
    Json(presets).into_response()
}

/// POST /api/pause
pub async fn pause(State(state): State<AppState>) -> StatusCode {
    if let Some(hook) = &state.controls.pause {
        hook();
    }
    state.hub.broadcast_status_changed(true);
    StatusCode::NO_CONTENT
}

/// POST /api/resume
pub async fn resume(State(state): State<AppState>) -> StatusCode {
    if let Some(hook) = &state.controls.resume {
        hook();
    }
    state.hub.broadcast_status_changed(false);
    StatusCode::NO_CONTENT
}

/// POST /api/session/end — force-end the active session.
pub async fn end_session(State(state): State<AppState>) -> Response {
    let Some(hook) = &state.controls.end_session else {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "session management not available",
        );
    };

    match tokio::time::timeout(END_SESSION_TIMEOUT, hook()).await {
        Ok(Ok(())) => StatusCode::NO_CONTENT.into_response(),
        Ok(Err(SessionError::NoActiveSession)) => {
            json_error(StatusCode::CONFLICT, "no active session")
        }
        Ok(Err(err)) => {
            error!("force end session: {err:#}");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
        Err(_) => {
            warn!("force end session timed out");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
        }
    }
}

/// POST /api/sessions/:id/resummarize — enqueue async re-summarization.
/// Body is optional JSON `{"preset": "..."}`.
pub async fn resummarize(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Response {
    if !valid_session_id(&session_id) {
        return json_error(StatusCode::FORBIDDEN, "invalid session id");
    }

    let request: ResummarizeRequest = if body.is_empty() {
        ResummarizeRequest::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(request) => request,
            Err(_) => return json_error(StatusCode::BAD_REQUEST, "invalid request body"),
        }
    };

    let Some(hook) = &state.controls.resummarize else {
        return json_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "summarization not configured",
        );
    };

    let hook = hook.clone();
    tokio::spawn(async move {
        if let Err(err) = hook(session_id, request.preset).await {
            warn!("re-summarization failed: {err:#}");
        }
    });

    StatusCode::ACCEPTED.into_response()
}

fn valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// A stored audio path is only served when it is relative and never walks
/// upward.
fn safe_audio_path(path: &str) -> bool {
    let path = FsPath::new(path);
    if path.is_absolute() {
        return false;
    }
    let mut has_normal = false;
    for component in path.components() {
        match component {
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
            Component::CurDir => {}
            Component::Normal(_) => has_normal = true,
        }
    }
    has_normal
}

fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
