use super::{ApiError, AppState};
use crate::job::{is_url, ConversionJob, ConversionResult, SourceLocator};
use crate::storage::content_type;
use crate::watermark::{is_pdf_locator, watermark_locator};
use axum::extract::{Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{error, info};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertUrlRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub target_format: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub watermark_text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResponse {
    pub success: bool,
    pub message: String,
    pub original_url: String,
    pub converted_url: String,
    pub original_format: String,
    pub converted_format: String,
    pub file_size: u64,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatermarkResponse {
    pub success: bool,
    pub message: String,
    pub original_url: String,
    pub watermarked_url: String,
    pub watermark_text: String,
    pub file_size: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready: Option<bool>,
}

impl StatusResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            backend: None,
            ready: None,
        }
    }
}

// ── Conversion ───────────────────────────────────────────────────────────

pub async fn convert_url(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ConvertUrlRequest>,
) -> Result<Json<ConversionResponse>, ApiError> {
    info!("Conversion request: url={} target={}", req.url, req.target_format);
    let source = remote_source(&req.url)?;
    let target = validate_target(&state, &req.target_format)?;

    let original_format = source.extension().unwrap_or_default();
    let published = convert_and_publish(&state, source, &target).await?;

    info!("Conversion completed: {}", published.url);
    Ok(Json(ConversionResponse {
        success: true,
        message: success_message(&published.result),
        original_url: req.url,
        converted_url: published.url,
        original_format,
        converted_format: target,
        file_size: published.size,
        degraded: published.result.degraded,
    }))
}

pub async fn convert_upload(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<ConversionResponse>, ApiError> {
    let mut upload: Option<(String, Vec<u8>)> = None;
    let mut target_format = String::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                let name = field.file_name().unwrap_or("upload").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {e}")))?;
                upload = Some((name, bytes.to_vec()));
            }
            Some("targetFormat") => {
                target_format = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("Invalid targetFormat: {e}")))?;
            }
            _ => {}
        }
    }

    let (file_name, bytes) = match upload {
        Some(u) if !u.1.is_empty() => u,
        _ => return Err(ApiError::bad_request("Uploaded file must not be empty")),
    };
    info!("Upload conversion request: file={} target={}", file_name, target_format);
    let target = validate_target(&state, &target_format)?;

    let stored = state.storage.store_upload(&bytes, &file_name).await?;
    let original_url = state.storage.url_for(&stored);
    let source = SourceLocator::Local(state.storage.root().join(&stored));

    let published = convert_and_publish(&state, source, &target).await?;

    info!("Upload conversion completed: {}", published.url);
    Ok(Json(ConversionResponse {
        success: true,
        message: success_message(&published.result),
        original_url,
        converted_url: published.url,
        original_format: extension_of(&file_name),
        converted_format: target,
        file_size: published.size,
        degraded: published.result.degraded,
    }))
}

pub async fn formats(State(state): State<Arc<AppState>>) -> Json<BTreeMap<String, String>> {
    Json(state.converter.supported_formats())
}

// ── Watermark ────────────────────────────────────────────────────────────

pub async fn watermark(
    State(state): State<Arc<AppState>>,
    Json(req): Json<WatermarkRequest>,
) -> Result<Json<WatermarkResponse>, ApiError> {
    info!("Watermark request: url={} text={}", req.url, req.watermark_text);
    let source = remote_source(&req.url)?;
    if req.watermark_text.trim().is_empty() {
        return Err(ApiError::bad_request("Watermark text must not be empty"));
    }
    if !is_pdf_locator(req.url.trim()) {
        return Err(ApiError::bad_request("Only PDF files can be watermarked"));
    }

    let job_dir = job_dir(&state).await?;
    let output = watermark_locator(
        &source,
        &req.watermark_text,
        job_dir.path(),
        state.download_timeout_secs,
    )
    .await
    .map_err(|e| {
        error!("Watermark failed: {}", e);
        ApiError::from(e)
    })?;

    let original_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "watermarked.pdf".to_string());
    let watermarked_url = state.storage.store(&output, &original_name).await?;
    let file_size = state.storage.size_of(stored_name(&watermarked_url)).await;

    Ok(Json(WatermarkResponse {
        success: true,
        message: "Watermark added".to_string(),
        original_url: req.url,
        watermarked_url,
        watermark_text: req.watermark_text,
        file_size,
    }))
}

// ── Engine status ────────────────────────────────────────────────────────

pub async fn health(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let ready = state.converter.is_ready().await;
    Json(StatusResponse {
        success: true,
        message: "Document conversion service is running".to_string(),
        backend: Some(state.converter.backend_kind().to_string()),
        ready: Some(ready),
    })
}

pub async fn docker_start(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    ensure_isolated(&state)?;
    state.converter.start_isolated_engine().await?;
    Ok(Json(StatusResponse::ok("Engine container started")))
}

pub async fn docker_stop(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusResponse>, ApiError> {
    ensure_isolated(&state)?;
    state.converter.stop_isolated_engine().await?;
    Ok(Json(StatusResponse::ok("Engine container stopped")))
}

// ── Files ────────────────────────────────────────────────────────────────

pub async fn serve_file(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Response, ApiError> {
    let path = state
        .storage
        .fetch(&name)?
        .ok_or_else(|| ApiError::not_found(format!("File not found: {name}")))?;
    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to read {name}: {e}")))?;

    Ok((
        [
            (header::CONTENT_TYPE, content_type(&name).to_string()),
            (header::CONTENT_DISPOSITION, format!("inline; filename=\"{name}\"")),
        ],
        bytes,
    )
        .into_response())
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn validate_target(state: &AppState, target: &str) -> Result<String, ApiError> {
    let target = crate::catalog::normalize_format(target);
    if target.is_empty() {
        return Err(ApiError::bad_request("Target format must not be empty"));
    }
    if !state.converter.is_format_supported(&target) {
        return Err(ApiError::bad_request(format!("Unsupported target format: {target}")));
    }
    Ok(target)
}

fn ensure_isolated(state: &AppState) -> Result<(), ApiError> {
    if state.converter.backend_kind() != crate::config::BackendMode::Isolated {
        return Err(ApiError::bad_request("Isolated engine mode is not enabled"));
    }
    Ok(())
}

/// Request bodies name documents by URL; server paths are refused.
fn remote_source(url: &str) -> Result<SourceLocator, ApiError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(ApiError::bad_request("URL must not be empty"));
    }
    if !is_url(url) {
        return Err(ApiError::bad_request(format!(
            "Only http:// and https:// URLs are accepted: {url}"
        )));
    }
    Ok(SourceLocator::Remote(url.to_string()))
}

/// Private scratch directory for one request under `work_dir`.
async fn job_dir(state: &AppState) -> Result<TempDir, ApiError> {
    tokio::fs::create_dir_all(&state.work_dir).await.map_err(|e| {
        ApiError::internal(format!(
            "Cannot create work directory {}: {e}",
            state.work_dir.display()
        ))
    })?;
    tempfile::Builder::new()
        .prefix("job_")
        .tempdir_in(&state.work_dir)
        .map_err(|e| ApiError::internal(format!("Cannot create job directory: {e}")))
}

struct Published {
    result: ConversionResult,
    url: String,
    size: u64,
}

/// Convert into a private job directory, then move the artifact into storage.
/// The job directory is removed once the artifact has been published.
async fn convert_and_publish(
    state: &AppState,
    source: SourceLocator,
    target: &str,
) -> Result<Published, ApiError> {
    let job_dir = job_dir(state).await?;
    let job = ConversionJob::new(source, target, job_dir.path());
    let result = state.converter.convert(&job).await.map_err(|e| {
        error!("Conversion failed: {}", e);
        ApiError::from(e)
    })?;
    let (url, size) = publish(state, &result).await?;
    Ok(Published { result, url, size })
}

/// Move the artifact into public storage; returns its URL and size.
async fn publish(state: &AppState, result: &ConversionResult) -> Result<(String, u64), ApiError> {
    let name = result
        .output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let url = state.storage.store(&result.output_path, &name).await?;
    let size = state.storage.size_of(stored_name(&url)).await;
    Ok((url, size))
}

fn stored_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}

fn extension_of(name: &str) -> String {
    std::path::Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn success_message(result: &ConversionResult) -> String {
    if result.degraded {
        "Conversion engine unavailable; source copied without conversion".to_string()
    } else {
        "Conversion succeeded".to_string()
    }
}
