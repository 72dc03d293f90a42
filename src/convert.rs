//! Conversion orchestration.
//!
//! [`Converter`] is the single entry point used by the HTTP server and the
//! CLI. It owns the format catalog and the engine chosen at startup, rejects
//! unknown formats before any engine work, delegates, and verifies that what
//! came back is a usable artifact.

use crate::catalog::FormatCatalog;
use crate::config::{BackendMode, EngineConfig};
use crate::engine::{health, BridgedEngine, EngineBackend, IsolatedEngine};
use crate::error::ConversionError;
use crate::job::{ConversionJob, ConversionResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

const ISOLATED_DISABLED: &str = "isolated engine mode is not enabled";

/// Routes conversion jobs to the configured engine.
pub struct Converter {
    backend: EngineBackend,
    catalog: Arc<FormatCatalog>,
}

impl Converter {
    pub fn new(backend: EngineBackend, catalog: Arc<FormatCatalog>) -> Self {
        Self { backend, catalog }
    }

    /// Build the backend described by `config` with the default catalog.
    ///
    /// For [`BackendMode::Bridged`] this launches the office listener; a
    /// failed launch is logged and leaves the converter in degraded mode.
    pub async fn from_config(config: &EngineConfig) -> Self {
        info!("Conversion backend: {}", config.backend);
        let backend = match config.backend {
            BackendMode::Bridged => EngineBackend::Bridged(Arc::new(
                BridgedEngine::connect(
                    &config.office_paths,
                    &config.bridge,
                    config.download_timeout_secs,
                )
                .await,
            )),
            BackendMode::Isolated => EngineBackend::Isolated(IsolatedEngine::new(
                config.isolated.clone(),
                config.download_timeout_secs,
            )),
        };
        Self::new(backend, Arc::new(FormatCatalog::default()))
    }

    /// Convert one job.
    ///
    /// # Errors
    /// - `UnsupportedFormat` when the target is not in the catalog; no engine
    ///   work happens in that case
    /// - whatever the engine reports, already classified
    /// - `ArtifactNotFound` / `EngineError` when the output is missing or empty
    pub async fn convert(&self, job: &ConversionJob) -> Result<ConversionResult, ConversionError> {
        let start = Instant::now();
        if !self.catalog.is_supported(job.target_format()) {
            warn!("Rejected unsupported target format '{}'", job.target_format());
            return Err(ConversionError::UnsupportedFormat {
                format: job.target_format().to_string(),
            });
        }

        let result = match &self.backend {
            EngineBackend::Bridged(engine) => engine.convert(job, &self.catalog).await,
            EngineBackend::Isolated(engine) => engine.convert(job, &self.catalog).await,
        };
        let result = match result {
            Ok(r) => r,
            Err(e) => {
                error!("Conversion of {} failed: {}", job.source(), e);
                return Err(e);
            }
        };

        let size = match tokio::fs::metadata(&result.output_path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                return Err(ConversionError::ArtifactNotFound {
                    expected: result.output_path,
                    detail: e.to_string(),
                })
            }
        };
        if size == 0 {
            return Err(ConversionError::engine(format!(
                "engine produced an empty file: {}",
                result.output_path.display()
            )));
        }

        info!(
            "Converted {} → {} ({} bytes, {}ms{})",
            job.source(),
            result.output_path.display(),
            size,
            start.elapsed().as_millis(),
            if result.degraded { ", DEGRADED copy" } else { "" }
        );
        Ok(ConversionResult {
            size_bytes: size,
            ..result
        })
    }

    pub fn is_format_supported(&self, format: &str) -> bool {
        self.catalog.is_supported(format)
    }

    /// Extension → engine filter, sorted by extension.
    pub fn supported_formats(&self) -> BTreeMap<String, String> {
        self.catalog.snapshot()
    }

    /// Supported extensions, sorted.
    pub fn list_formats(&self) -> Vec<String> {
        self.catalog.snapshot().into_keys().collect()
    }

    pub async fn start_isolated_engine(&self) -> Result<(), ConversionError> {
        match &self.backend {
            EngineBackend::Isolated(engine) => engine.start().await,
            EngineBackend::Bridged(_) => Err(ConversionError::unavailable(ISOLATED_DISABLED)),
        }
    }

    pub async fn stop_isolated_engine(&self) -> Result<(), ConversionError> {
        match &self.backend {
            EngineBackend::Isolated(engine) => engine.stop().await,
            EngineBackend::Bridged(_) => Err(ConversionError::unavailable(ISOLATED_DISABLED)),
        }
    }

    pub async fn is_ready(&self) -> bool {
        health::is_ready(&self.backend).await
    }

    pub fn backend_kind(&self) -> BackendMode {
        self.backend.mode()
    }

    pub fn catalog(&self) -> &FormatCatalog {
        &self.catalog
    }

    /// Release the office session, if any. Call once before exit.
    pub async fn shutdown(&self) {
        if let EngineBackend::Bridged(engine) = &self.backend {
            engine.shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::job::SourceLocator;

    fn degraded() -> Converter {
        Converter::new(
            EngineBackend::Bridged(Arc::new(BridgedEngine::new(None, 5))),
            Arc::new(FormatCatalog::default()),
        )
    }

    #[test]
    fn every_catalog_format_is_listed_and_supported() {
        let c = degraded();
        let formats = c.list_formats();
        assert_eq!(formats.len(), FormatCatalog::default().len());
        for f in &formats {
            assert!(c.is_format_supported(f));
            assert!(c.supported_formats().contains_key(f));
        }
        assert!(!c.is_format_supported("xyz"));
    }

    #[tokio::test]
    async fn unsupported_format_rejected_before_source_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let job = ConversionJob::new(SourceLocator::parse("/does/not/exist.docx"), "xyz", dir.path());
        let err = degraded().convert(&job).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    }

    #[tokio::test]
    async fn lifecycle_is_unavailable_in_bridged_mode() {
        let c = degraded();
        assert_eq!(c.backend_kind(), BackendMode::Bridged);
        let err = c.start_isolated_engine().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
        assert!(err.to_string().contains("not enabled"));
        assert!(c.stop_isolated_engine().await.is_err());
    }

    #[tokio::test]
    async fn empty_degraded_copy_is_engine_error() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("empty.docx");
        std::fs::write(&src, b"").unwrap();
        let job = ConversionJob::new(SourceLocator::Local(src), "pdf", dir.path().join("out"));
        let err = degraded().convert(&job).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EngineError);
    }

    #[tokio::test]
    async fn not_ready_without_session() {
        assert!(!degraded().is_ready().await);
    }
}
