//! HTTP surface of the conversion service (feature `server`).
//!
//! ```text
//! POST /api/conversion/convert-url      {url, targetFormat}
//! POST /api/conversion/convert-upload   multipart: file, targetFormat
//! GET  /api/conversion/formats
//! POST /api/conversion/watermark        {url, watermarkText}
//! GET  /api/conversion/health
//! POST /api/conversion/docker/start
//! POST /api/conversion/docker/stop
//! GET  /files/{name}
//! ```
//!
//! Bodies are camelCase JSON. Failures carry `success: false`, a message and,
//! for conversion failures, the error `kind`. The `url` fields take http(s)
//! URLs only; local files reach the engines through `convert-upload`.

mod handlers;

use crate::convert::Converter;
use crate::error::{ConversionError, ErrorKind, StorageError, WatermarkError};
use crate::storage::FileStorage;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

/// Shared state behind every handler.
pub struct AppState {
    pub converter: Arc<Converter>,
    pub storage: FileStorage,
    /// Parent of the per-request scratch directories; outputs sit there until
    /// they are moved into storage.
    pub work_dir: PathBuf,
    pub download_timeout_secs: u64,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/convert-url", post(handlers::convert_url))
        .route("/convert-upload", post(handlers::convert_upload))
        .route("/formats", get(handlers::formats))
        .route("/watermark", post(handlers::watermark))
        .route("/health", get(handlers::health))
        .route("/docker/start", post(handlers::docker_start))
        .route("/docker/stop", post(handlers::docker_stop));

    Router::new()
        .nest("/api/conversion", api)
        .route("/files/{name}", get(handlers::serve_file))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until `shutdown` resolves.
pub async fn serve(
    state: Arc<AppState>,
    addr: SocketAddr,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

// ── Errors ───────────────────────────────────────────────────────────────

/// Failure body shared by every endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
}

/// Handler error with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    kind: Option<ErrorKind>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            kind: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            kind: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            kind: None,
        }
    }
}

/// HTTP status for a conversion failure kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::UnsupportedFormat => StatusCode::BAD_REQUEST,
        ErrorKind::DownloadFailed => StatusCode::BAD_GATEWAY,
        ErrorKind::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::EngineError | ErrorKind::ArtifactNotFound => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ConversionError> for ApiError {
    fn from(e: ConversionError) -> Self {
        let kind = e.kind();
        Self {
            status: status_for(kind),
            message: format!("Conversion failed: {e}"),
            kind: Some(kind),
        }
    }
}

impl From<WatermarkError> for ApiError {
    fn from(e: WatermarkError) -> Self {
        let status = match &e {
            WatermarkError::EmptyText | WatermarkError::NotAPdf(_) => StatusCode::BAD_REQUEST,
            WatermarkError::Fetch { .. } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: format!("Watermark failed: {e}"),
            kind: None,
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::InvalidName(_) => Self::bad_request(e.to_string()),
            StorageError::Io { .. } => Self::internal(e.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            message: self.message,
            kind: self.kind,
        };
        (self.status, Json(body)).into_response()
    }
}
