//! Read-only HTTP viewer.
//!
//! Browse the store over HTTP: list and filter records, inspect one record,
//! fetch aggregate stats and stream stored content back.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/files?tag=&source=` | Records matching the filter |
//! | `GET`  | `/api/stats` | Aggregate statistics |
//! | `GET`  | `/api/file/{hash}/info` | One record by digest or unique prefix |
//! | `GET`  | `/file/{hash}` | Raw stored bytes |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "ambiguous_prefix", "message": "prefix 'ab' is ambiguous: 2 records match" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `ambiguous_prefix` (409),
//! `integrity_fault` (500), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use filer_core::models::ContentRecord;
use filer_core::query::StoreStats;
use filer_core::store::MetadataStore;

use crate::config::Config;
use crate::error::FilerError;
use crate::query;
use crate::sqlite_store::SqliteStore;
use crate::stats;
use crate::storage::BlobStore;

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn MetadataStore>,
    blobs: BlobStore,
}

/// Build the viewer's router over an already open store.
pub fn router(store: Arc<dyn MetadataStore>, blobs: BlobStore) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/api/files", get(handle_files))
        .route("/api/stats", get(handle_stats))
        .route("/api/file/{hash}/info", get(handle_info))
        .route("/file/{hash}", get(handle_content))
        .layer(cors)
        .with_state(AppState { store, blobs })
}

/// Starts the viewer on `[server].bind` and runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let store = SqliteStore::open(config).await?;
    let app = router(Arc::new(store), BlobStore::from_config(&config.storage));

    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "viewer listening");
    println!("filer viewer listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
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

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<FilerError> for AppError {
    fn from(err: FilerError) -> Self {
        let (status, code) = match &err {
            FilerError::InvalidDigest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            FilerError::DigestNotFound(_) | FilerError::NotFound(_) => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            FilerError::AmbiguousPrefix { .. } => (StatusCode::CONFLICT, "ambiguous_prefix"),
            FilerError::StoreIntegrityFault { .. } => {
                error!(error = %err, "integrity fault while serving");
                (StatusCode::INTERNAL_SERVER_ERROR, "integrity_fault")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        };
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        FilerError::Store(err).into()
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

// ============ GET /api/files ============

#[derive(Deserialize)]
struct FilesQuery {
    tag: Option<String>,
    source: Option<String>,
}

#[derive(Serialize)]
struct FilesResponse {
    count: usize,
    files: Vec<ContentRecord>,
}

/// Empty query parameters (`?tag=`) mean "no filter".
fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

async fn handle_files(
    State(state): State<AppState>,
    Query(params): Query<FilesQuery>,
) -> Result<Json<FilesResponse>, AppError> {
    let files = query::search(
        state.store.as_ref(),
        non_empty(&params.tag),
        non_empty(&params.source),
    )
    .await?;
    Ok(Json(FilesResponse {
        count: files.len(),
        files,
    }))
}

// ============ GET /api/stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<StoreStats>, AppError> {
    Ok(Json(stats::collect(state.store.as_ref()).await?))
}

// ============ GET /api/file/{hash}/info ============

async fn handle_info(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Json<ContentRecord>, AppError> {
    Ok(Json(
        query::get_by_digest_or_prefix(state.store.as_ref(), &hash).await?,
    ))
}

// ============ GET /file/{hash} ============

/// Streams stored content. The content type is the recorded MIME type, or a
/// guess from the original file name.
async fn handle_content(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, AppError> {
    let record = query::get_by_digest_or_prefix(state.store.as_ref(), &hash).await?;
    let path = query::resolve_record(&state.blobs, &record).await?;

    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|e| FilerError::integrity(&record.digest, format!("cannot open content: {}", e)))?;

    let content_type = record
        .mime_type
        .clone()
        .or_else(|| {
            record
                .original_filename
                .as_ref()
                .and_then(|name| mime_guess::from_path(name).first())
                .map(|m| m.essence_str().to_string())
        })
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string());

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CONTENT_LENGTH, record.size.to_string()),
        ],
        body,
    )
        .into_response())
}
