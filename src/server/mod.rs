//! HTTP/WS surface: the lifecycle event hub, the JSON query/control API,
//! and the websocket feed.

pub mod events;
mod handlers;
mod hub;
mod ws;

pub use hub::{Hub, Subscription};

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use futures::future::BoxFuture;
use tower_http::trace::TraceLayer;

use crate::session::SessionError;
use crate::storage::SqliteStore;

type EndSessionHook =
    Arc<dyn Fn() -> BoxFuture<'static, Result<(), SessionError>> + Send + Sync>;
type ResummarizeHook =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Control points the HTTP layer exposes into the rest of the appliance.
/// Every hook is optional; endpoints whose hook is missing answer 503 (or
/// a benign default for read-only hooks).
#[derive(Clone, Default)]
pub struct ControlHooks {
    pub pause: Option<Arc<dyn Fn() + Send + Sync>>,
    pub resume: Option<Arc<dyn Fn() + Send + Sync>>,
    pub is_paused: Option<Arc<dyn Fn() -> bool + Send + Sync>>,
    pub warnings: Option<Arc<dyn Fn() -> Vec<String> + Send + Sync>>,
    /// Preset name → human description.
    pub presets: Option<Arc<dyn Fn() -> BTreeMap<String, String> + Send + Sync>>,
    pub end_session: Option<EndSessionHook>,
    pub resummarize: Option<ResummarizeHook>,
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SqliteStore>,
    pub hub: Arc<Hub>,
    pub controls: ControlHooks,
}

/// Build the full router: REST API plus the websocket event feed.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sessions", get(handlers::list_sessions))
        .route("/api/sessions/:id", get(handlers::get_session))
        .route("/api/sessions/:id/audio", get(handlers::get_session_audio))
        .route(
            "/api/sessions/:id/resummarize",
            post(handlers::resummarize),
        )
        .route("/api/dates", get(handlers::get_dates))
        .route("/api/status", get(handlers::get_status))
        .route("/api/presets", get(handlers::get_presets))
        .route("/api/pause", post(handlers::pause))
        .route("/api/resume", post(handlers::resume))
        .route("/api/session/end", post(handlers::end_session))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
