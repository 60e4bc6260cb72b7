//! Local status server.
//!
//! Exposes the poller's progress board over a small JSON HTTP API so a
//! browser or script can follow parse jobs while `kf serve` runs.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/documents` | Every document on the board |
//! | `GET`  | `/documents/{id}/status` | Progress, label, run state and logs |
//! | `POST` | `/documents/{id}/watch` | Start polling a document |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "conflict", "message": "document d1 is already being polled" } }
//! ```
//!
//! Error codes: `not_found` (404), `conflict` (409), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::error::PollError;
use crate::models::{LogEntry, RunStatus};
use crate::poller::{DocumentProgress, Poller, ProgressBoard};

#[derive(Clone)]
struct AppState {
    poller: Poller,
}

/// Build the router over `poller`'s board.
pub fn router(poller: Poller) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents", get(handle_list))
        .route("/documents/{id}/status", get(handle_status))
        .route("/documents/{id}/watch", post(handle_watch))
        .layer(cors)
        .with_state(AppState { poller })
}

/// Serve the status API on `[server].bind` until the process exits.
///
/// Finished documents are dropped from the board after
/// `[server].retention_secs`.
pub async fn run_server(config: &Config, poller: Poller) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    if let Some(retention) = config.server.retention() {
        spawn_eviction(poller.board().clone(), retention);
    }
    let app = router(poller);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "status server listening");
    eprintln!("Status server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically evict finished documents from `board`.
pub fn spawn_eviction(board: Arc<ProgressBoard>, retention: Duration) -> JoinHandle<()> {
    let period = retention.clamp(Duration::from_millis(10), Duration::from_secs(60));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let evicted = board.evict_finished(retention);
            if evicted > 0 {
                tracing::debug!(evicted, "evicted finished documents");
            }
        }
    })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

impl From<PollError> for AppError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::AlreadyPolling(_) => AppError {
                status: StatusCode::CONFLICT,
                code: "conflict",
                message: err.to_string(),
            },
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

/// Board entry as served to clients.
#[derive(Serialize)]
struct DocumentStatus {
    doc_id: String,
    progress: f64,
    label: String,
    running: RunStatus,
    status: RunStatus,
    polling: bool,
    logs: VecDeque<LogEntry>,
}

impl DocumentStatus {
    fn new(doc: DocumentProgress, polling: bool) -> Self {
        Self {
            label: doc.label(),
            doc_id: doc.doc_id,
            progress: doc.progress,
            running: doc.running,
            status: doc.status,
            polling,
            logs: doc.logs,
        }
    }
}

#[derive(Serialize)]
struct DocumentList {
    documents: Vec<DocumentStatus>,
}

async fn handle_list(State(state): State<AppState>) -> Json<DocumentList> {
    let documents = state
        .poller
        .board()
        .all()
        .into_iter()
        .map(|doc| {
            let polling = state.poller.is_polling(&doc.doc_id);
            DocumentStatus::new(doc, polling)
        })
        .collect();
    Json(DocumentList { documents })
}

async fn handle_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DocumentStatus>, AppError> {
    let doc = state
        .poller
        .board()
        .get(&id)
        .ok_or_else(|| not_found(format!("document {} is not being tracked", id)))?;
    let polling = state.poller.is_polling(&id);
    Ok(Json(DocumentStatus::new(doc, polling)))
}

#[derive(Serialize)]
struct WatchResponse {
    doc_id: String,
    polling: bool,
}

/// Starts a background poll; the loop outlives the request.
async fn handle_watch(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<WatchResponse>), AppError> {
    let _handle = state.poller.spawn(&id)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(WatchResponse {
            doc_id: id,
            polling: true,
        }),
    ))
}
