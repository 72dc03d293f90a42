//! Bridged engine: conversions through the process-wide office session.
//!
//! The session is created once at startup ([`BridgedEngine::connect`]) and
//! never retried. If it could not be created the engine keeps answering in
//! **degraded mode**: the source is copied to `<stem>_converted.<ext>` and
//! the result is flagged `degraded`.
//!
//! The office process is not safe for parallel loads, so every real
//! conversion holds `gate` for its whole load → store → dispose sequence.

use super::locate::expected_artifact_name;
use super::soffice::SofficeSession;
use super::{DocumentHandle, OfficeSession};
use crate::catalog::FormatCatalog;
use crate::config::{BridgeOptions, OfficePaths};
use crate::error::ConversionError;
use crate::input::resolve_source;
use crate::job::{ConversionJob, ConversionResult};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Marker inserted into degraded-mode output names.
pub const DEGRADED_SUFFIX: &str = "_converted";

/// Conversion strategy backed by a long-lived office process.
pub struct BridgedEngine {
    session: Option<Arc<dyn OfficeSession>>,
    gate: Mutex<()>,
    download_timeout_secs: u64,
}

impl BridgedEngine {
    /// Wrap an already established session (or `None` for degraded mode).
    pub fn new(session: Option<Arc<dyn OfficeSession>>, download_timeout_secs: u64) -> Self {
        Self {
            session,
            gate: Mutex::new(()),
            download_timeout_secs,
        }
    }

    /// Start the office listener. Failure is logged and yields degraded mode.
    pub async fn connect(
        paths: &OfficePaths,
        options: &BridgeOptions,
        download_timeout_secs: u64,
    ) -> Self {
        info!("Initializing office bridge...");
        info!("  executable:   {}", paths.executable.display());
        info!("  installation: {}", paths.install_path.display());
        info!("  program:      {}", paths.program_path.display());
        info!("  runtime:      {}", paths.runtime_path.display());

        match SofficeSession::launch(paths, options).await {
            Ok(session) => {
                info!("Office bridge initialized successfully");
                Self::new(Some(Arc::new(session)), download_timeout_secs)
            }
            Err(fault) => {
                error!(
                    "CRITICAL: office bridge failed to initialize: {}. \
                     Bridged conversions will run in DEGRADED mode (source copied, not converted) \
                     until the process is restarted.",
                    fault.message
                );
                Self::new(None, download_timeout_secs)
            }
        }
    }

    /// Whether the session was established at startup.
    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    /// Convert `job`, or copy it in degraded mode when no session exists.
    pub async fn convert(
        &self,
        job: &ConversionJob,
        catalog: &FormatCatalog,
    ) -> Result<ConversionResult, ConversionError> {
        let Some(session) = self.session.as_ref() else {
            return self.convert_degraded(job).await;
        };

        info!("Starting conversion from {} to {}", job.source(), job.target_format());

        let resolved = resolve_source(job.source(), self.download_timeout_secs).await?;
        let filter = catalog.filter_for(job.target_format()).ok_or_else(|| {
            ConversionError::UnsupportedFormat {
                format: job.target_format().to_string(),
            }
        })?;

        tokio::fs::create_dir_all(job.work_dir()).await.map_err(|e| {
            ConversionError::engine(format!(
                "cannot create output directory {}: {e}",
                job.work_dir().display()
            ))
        })?;
        let source_name = file_name_of(resolved.path());
        let output = job
            .work_dir()
            .join(expected_artifact_name(&source_name, job.target_format()));

        let _serialized = self.gate.lock().await;
        {
            let handle = session.load_hidden(resolved.path()).await?;
            let doc = LoadedDocument {
                session: session.as_ref(),
                handle,
            };
            session.store_to(&doc.handle, &output, filter, true).await?;
        }

        let size_bytes = artifact_size(&output).await?;
        info!(
            "Document converted successfully from {} to {}",
            source_name,
            output.display()
        );
        Ok(ConversionResult {
            output_path: output,
            size_bytes,
            degraded: false,
        })
    }

    async fn convert_degraded(&self, job: &ConversionJob) -> Result<ConversionResult, ConversionError> {
        warn!(
            "Office bridge not connected: DEGRADED mode, copying {} instead of converting to {}",
            job.source(),
            job.target_format()
        );

        let resolved = resolve_source(job.source(), self.download_timeout_secs).await?;
        let output = job
            .work_dir()
            .join(degraded_output_name(&file_name_of(resolved.path()), job.target_format()));

        tokio::fs::create_dir_all(job.work_dir()).await.map_err(|e| {
            ConversionError::engine(format!(
                "cannot create output directory {}: {e}",
                job.work_dir().display()
            ))
        })?;
        tokio::fs::copy(resolved.path(), &output).await.map_err(|e| {
            ConversionError::engine(format!("degraded copy to {} failed: {e}", output.display()))
        })?;

        let size_bytes = artifact_size(&output).await?;
        warn!("Degraded copy written: {}", output.display());
        Ok(ConversionResult {
            output_path: output,
            size_bytes,
            degraded: true,
        })
    }

    /// Tear down the office session. Call once at process exit.
    pub async fn shutdown(&self) {
        if let Some(session) = &self.session {
            session.shutdown().await;
        }
    }
}

/// Disposes its document when dropped, on every exit path.
struct LoadedDocument<'a> {
    session: &'a dyn OfficeSession,
    handle: DocumentHandle,
}

impl Drop for LoadedDocument<'_> {
    fn drop(&mut self) {
        self.session.dispose(&self.handle);
    }
}

/// `<stem>_converted.<ext>`
pub fn degraded_output_name(source_name: &str, target_format: &str) -> String {
    let converted = expected_artifact_name(source_name, target_format);
    match converted.rfind('.') {
        Some(i) => format!("{}{}{}", &converted[..i], DEGRADED_SUFFIX, &converted[i..]),
        None => format!("{converted}{DEGRADED_SUFFIX}"),
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string())
}

async fn artifact_size(path: &Path) -> Result<u64, ConversionError> {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.len())
        .map_err(|e| ConversionError::ArtifactNotFound {
            expected: path.to_path_buf(),
            detail: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineFault;
    use crate::error::ErrorKind;
    use crate::job::SourceLocator;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    /// Writes the filter name into the target so tests can see what was used.
    #[derive(Default)]
    struct RecordingSession {
        next_id: AtomicU64,
        loads: AtomicUsize,
        disposals: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_store: bool,
    }

    #[async_trait]
    impl OfficeSession for RecordingSession {
        async fn load_hidden(&self, source: &Path) -> Result<DocumentHandle, EngineFault> {
            if !source.exists() {
                return Err(EngineFault::new("cannot load"));
            }
            self.loads.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            Ok(DocumentHandle::new(self.next_id.fetch_add(1, Ordering::SeqCst)))
        }

        async fn store_to(
            &self,
            _doc: &DocumentHandle,
            target: &Path,
            filter: &str,
            _overwrite: bool,
        ) -> Result<(), EngineFault> {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            if self.fail_store {
                return Err(EngineFault::new("General Error: store failed"));
            }
            tokio::fs::write(target, filter.as_bytes())
                .await
                .map_err(|e| EngineFault::new(e.to_string()))
        }

        fn dispose(&self, _doc: &DocumentHandle) {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn source_file(dir: &Path, name: &str, body: &[u8]) -> SourceLocator {
        let p = dir.join(name);
        std::fs::write(&p, body).unwrap();
        SourceLocator::Local(p)
    }

    #[test]
    fn degraded_names_are_marked() {
        assert_eq!(degraded_output_name("a.docx", "pdf"), "a_converted.pdf");
        assert_eq!(degraded_output_name("notes", "TXT"), "notes_converted.txt");
    }

    #[tokio::test]
    async fn converts_and_disposes_document() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(RecordingSession::default());
        let engine = BridgedEngine::new(Some(session.clone()), 5);
        let job = ConversionJob::new(source_file(dir.path(), "a.docx", b"doc"), "pdf", dir.path().join("out"));

        let result = engine.convert(&job, &FormatCatalog::default()).await.unwrap();

        assert_eq!(result.output_path, dir.path().join("out/a.pdf"));
        assert!(!result.degraded);
        assert_eq!(std::fs::read(&result.output_path).unwrap(), b"writer_pdf_Export");
        assert_eq!(result.size_bytes, "writer_pdf_Export".len() as u64);
        assert_eq!(session.disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn store_failure_still_disposes_document() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(RecordingSession {
            fail_store: true,
            ..RecordingSession::default()
        });
        let engine = BridgedEngine::new(Some(session.clone()), 5);
        let job = ConversionJob::new(source_file(dir.path(), "a.docx", b"doc"), "pdf", dir.path());

        let err = engine.convert(&job, &FormatCatalog::default()).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::EngineError);
        assert!(err.to_string().contains("store failed"));
        assert_eq!(session.loads.load(Ordering::SeqCst), 1);
        assert_eq!(session.disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_format_is_rejected_without_loading() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(RecordingSession::default());
        let engine = BridgedEngine::new(Some(session.clone()), 5);
        let job = ConversionJob::new(source_file(dir.path(), "a.docx", b"doc"), "xyz", dir.path());

        let err = engine.convert(&job, &FormatCatalog::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert_eq!(session.loads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_source_is_download_failure() {
        let dir = tempfile::tempdir().unwrap();
        let engine = BridgedEngine::new(Some(Arc::new(RecordingSession::default())), 5);
        let job = ConversionJob::new(SourceLocator::parse("/nope/a.docx"), "pdf", dir.path());
        let err = engine.convert(&job, &FormatCatalog::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DownloadFailed);
    }

    #[tokio::test]
    async fn concurrent_conversions_are_serialized() {
        let dir = tempfile::tempdir().unwrap();
        let session = Arc::new(RecordingSession::default());
        let engine = Arc::new(BridgedEngine::new(Some(session.clone()), 5));
        let catalog = Arc::new(FormatCatalog::default());

        let mut tasks = Vec::new();
        for i in 0..4 {
            let job = ConversionJob::new(
                source_file(dir.path(), &format!("doc{i}.docx"), b"x"),
                "pdf",
                dir.path().join("out"),
            );
            let engine = Arc::clone(&engine);
            let catalog = Arc::clone(&catalog);
            tasks.push(tokio::spawn(async move { engine.convert(&job, &catalog).await }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }
        assert_eq!(session.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(session.disposals.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn degraded_mode_copies_source_byte_for_byte() {
        let dir = tempfile::tempdir().unwrap();
        let engine = BridgedEngine::new(None, 5);
        assert!(!engine.is_connected());
        let body = b"PK\x03\x04 pretend docx";
        let job = ConversionJob::new(source_file(dir.path(), "a.docx", body), "pdf", dir.path().join("out"));

        let result = engine.convert(&job, &FormatCatalog::default()).await.unwrap();

        assert!(result.degraded);
        assert_eq!(result.output_path, dir.path().join("out/a_converted.pdf"));
        assert_eq!(std::fs::read(&result.output_path).unwrap(), body);
        assert_eq!(result.size_bytes, body.len() as u64);
    }
}
