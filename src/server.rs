//! JSON session API and download route.
//!
//! Every session lives behind its own mutex; events run on the blocking pool
//! because decoding, encoding and merging are CPU-bound and touch the
//! filesystem. Dropping a session (explicitly, after it sat idle longer
//! than [`RockitConfig::session_ttl`], or at shutdown) removes its temporary
//! directory.
//!
//! | Method | Path | |
//! |--------|------|---|
//! | POST   | `/api/sessions`                | open a session |
//! | POST   | `/api/sessions/{id}/uploads`   | stage files (data URIs) |
//! | POST   | `/api/sessions/{id}/transform` | convert or merge |
//! | POST   | `/api/sessions/{id}/reset`     | clear batch and artifacts |
//! | DELETE | `/api/sessions/{id}`           | close a session |
//! | GET    | `/download/{id}/{name}`        | fetch an artifact |
//! | GET    | `/health`                      | liveness |

use crate::config::RockitConfig;
use crate::error::RockitError;
use crate::output::EventResult;
use crate::pipeline::intake::UploadedItem;
use crate::session::{Event, Session, SessionState, TransformSpec};
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

/// Largest accepted request body. Uploads arrive base64-encoded.
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024 * 1024;

pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by the HTTP layer.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error(transparent)]
    Rockit(#[from] RockitError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::UnknownSession(_) => StatusCode::NOT_FOUND,
            ServerError::Rockit(e) => match e {
                RockitError::NotFound { .. } => StatusCode::NOT_FOUND,
                RockitError::Decode { .. } | RockitError::UnsupportedFormat { .. } => {
                    StatusCode::BAD_REQUEST
                }
                RockitError::EmptyBatch | RockitError::AllItemsFailed { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                RockitError::Io { .. } | RockitError::InvalidConfig(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServerError::UnknownSession(_) => "UNKNOWN_SESSION",
            ServerError::Rockit(e) => e.code(),
            ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(err: tokio::task::JoinError) -> Self {
        ServerError::Internal(format!("worker task failed: {err}"))
    }
}

/// One open session and when a request last touched it.
struct SessionSlot {
    session: Mutex<Session>,
    last_used: Mutex<Instant>,
}

impl SessionSlot {
    fn new(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            last_used: Mutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        if let Ok(mut t) = self.last_used.lock() {
            *t = Instant::now();
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        self.last_used
            .lock()
            .map(|t| now.saturating_duration_since(*t))
            .unwrap_or_default()
    }
}

/// Shared state: the session table plus the config every session uses.
#[derive(Clone)]
pub struct AppState {
    config: Arc<RockitConfig>,
    sessions: Arc<RwLock<HashMap<Uuid, Arc<SessionSlot>>>>,
}

impl AppState {
    pub fn new(config: RockitConfig) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of open sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Drop every session idle for longer than the configured TTL.
    /// Returns how many were evicted.
    pub async fn evict_idle(&self) -> usize {
        let ttl = self.config.session_ttl;
        let now = Instant::now();
        let evicted: Vec<(Uuid, Arc<SessionSlot>)> = {
            let mut sessions = self.sessions.write().await;
            let expired: Vec<Uuid> = sessions
                .iter()
                .filter(|(_, slot)| slot.idle_for(now) > ttl)
                .map(|(id, _)| *id)
                .collect();
            expired
                .into_iter()
                .filter_map(|id| sessions.remove(&id).map(|slot| (id, slot)))
                .collect()
        };
        for (id, _) in &evicted {
            info!("Evicted idle session {}", id);
        }
        let count = evicted.len();
        // Removing the session directories touches the filesystem.
        if count > 0 {
            tokio::task::spawn_blocking(move || drop(evicted));
        }
        count
    }

    async fn session(&self, id: &str) -> ServerResult<Arc<SessionSlot>> {
        let uuid = Uuid::parse_str(id).map_err(|_| ServerError::UnknownSession(id.to_string()))?;
        let slot = self
            .sessions
            .read()
            .await
            .get(&uuid)
            .cloned()
            .ok_or_else(|| ServerError::UnknownSession(id.to_string()))?;
        slot.touch();
        Ok(slot)
    }

    /// Run `f` against one session on the blocking pool.
    async fn with_session<T, F>(&self, id: &str, f: F) -> ServerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Session) -> T + Send + 'static,
    {
        let slot = self.session(id).await?;
        let out = tokio::task::spawn_blocking(move || {
            let mut guard = slot
                .session
                .lock()
                .map_err(|_| ServerError::Internal("session lock poisoned".into()))?;
            let out = f(&mut *guard);
            // Long transforms count as activity.
            slot.touch();
            Ok::<_, ServerError>(out)
        })
        .await??;
        Ok(out)
    }
}

// ── Request / response bodies ───────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionCreated {
    pub session_id: Uuid,
    pub state: SessionState,
}

#[derive(Debug, Deserialize)]
pub struct UploadFile {
    pub filename: String,
    /// `mime;base64,payload` data URI.
    pub contents: String,
}

#[derive(Debug, Deserialize)]
pub struct UploadRequest {
    pub files: Vec<UploadFile>,
}

/// An [`EventResult`] with its rendered status line.
#[derive(Debug, Serialize)]
pub struct EventResponse {
    #[serde(flatten)]
    pub result: EventResult,
    pub status_message: String,
}

impl From<EventResult> for EventResponse {
    fn from(result: EventResult) -> Self {
        let status_message = result.status_message();
        Self {
            result,
            status_message,
        }
    }
}

// ── Handlers ────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "rockit",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn create_session(State(state): State<AppState>) -> ServerResult<impl IntoResponse> {
    let config = state.config.clone();
    let session = tokio::task::spawn_blocking(move || Session::new(config)).await??;
    let id = Uuid::new_v4();
    state
        .sessions
        .write()
        .await
        .insert(id, Arc::new(SessionSlot::new(session)));
    info!("Opened session {}", id);
    Ok((
        StatusCode::CREATED,
        Json(SessionCreated {
            session_id: id,
            state: SessionState::Idle,
        }),
    ))
}

async fn close_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<StatusCode> {
    let uuid = Uuid::parse_str(&id).map_err(|_| ServerError::UnknownSession(id.clone()))?;
    match state.sessions.write().await.remove(&uuid) {
        Some(_) => {
            info!("Closed session {}", uuid);
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ServerError::UnknownSession(id)),
    }
}

async fn upload(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<UploadRequest>,
) -> ServerResult<Json<EventResponse>> {
    let items = req
        .files
        .into_iter()
        .map(|f| UploadedItem::from_data_uri(f.filename, &f.contents))
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Session {}: {} uploads decoded", id, items.len());
    let result = state
        .with_session(&id, move |s| s.handle(Event::Uploaded(items)))
        .await?;
    Ok(Json(result.into()))
}

async fn transform(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(spec): Json<TransformSpec>,
) -> ServerResult<Json<EventResponse>> {
    let result = state
        .with_session(&id, move |s| s.handle(Event::TransformRequested(spec)))
        .await?;
    Ok(Json(result.into()))
}

async fn reset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ServerResult<Json<EventResponse>> {
    let result = state
        .with_session(&id, |s| s.handle(Event::ResetRequested))
        .await?;
    Ok(Json(result.into()))
}

async fn download(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> ServerResult<Response> {
    let dl = state.with_session(&id, move |s| s.fetch(&name)).await??;
    let disposition = format!("attachment; filename=\"{}\"", dl.file_name);
    Ok((
        [
            (header::CONTENT_TYPE, dl.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        dl.bytes,
    )
        .into_response())
}

/// Build the router over `state`.
pub fn router(state: AppState) -> Router {
    router_with_limit(state, DEFAULT_BODY_LIMIT)
}

pub fn router_with_limit(state: AppState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", delete(close_session))
        .route("/api/sessions/{id}/uploads", post(upload))
        .route("/api/sessions/{id}/transform", post(transform))
        .route("/api/sessions/{id}/reset", post(reset))
        .route("/download/{id}/{name}", get(download))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Periodically evict idle sessions. Runs until the handle is aborted.
pub fn spawn_idle_sweeper(state: AppState) -> JoinHandle<()> {
    let ttl = state.config.session_ttl;
    let period = (ttl / 2).clamp(Duration::from_millis(10), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(ttl_secs = ttl.as_secs(), "Idle session sweep started");
        loop {
            interval.tick().await;
            let evicted = state.evict_idle().await;
            if evicted > 0 {
                let open = state.session_count().await;
                debug!(evicted, open, "Idle sweep");
            }
        }
    })
}

/// Serve until Ctrl+C / SIGTERM. Open sessions are dropped (and their
/// directories removed) on the way out.
pub async fn serve(addr: SocketAddr, config: RockitConfig) -> std::io::Result<()> {
    let state = AppState::new(config);
    let sweeper = spawn_idle_sweeper(state.clone());
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on {}", listener.local_addr()?);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    sweeper.abort();
    served?;
    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
