//! Orchestrator tests over the bridged engine, using an in-memory office
//! session so no LibreOffice install is needed.

use async_trait::async_trait;
use docconv::engine::{BridgedEngine, DocumentHandle, EngineBackend, EngineFault, OfficeSession};
use docconv::{ConversionJob, Converter, ErrorKind, FormatCatalog, SourceLocator};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Pretends to export: writes a PDF-looking header followed by the source bytes.
#[derive(Default)]
struct FakeOffice {
    next: AtomicU64,
    loads: AtomicUsize,
    stores: AtomicUsize,
    disposed: AtomicUsize,
    sources: Mutex<HashMap<u64, PathBuf>>,
}

#[async_trait]
impl OfficeSession for FakeOffice {
    async fn load_hidden(&self, source: &Path) -> Result<DocumentHandle, EngineFault> {
        if !source.is_file() {
            return Err(EngineFault::new(format!("cannot open {}", source.display())));
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        let id = self.next.fetch_add(1, Ordering::SeqCst);
        self.sources.lock().unwrap().insert(id, source.to_path_buf());
        Ok(DocumentHandle::new(id))
    }

    async fn store_to(
        &self,
        doc: &DocumentHandle,
        target: &Path,
        filter: &str,
        _overwrite: bool,
    ) -> Result<(), EngineFault> {
        self.stores.fetch_add(1, Ordering::SeqCst);
        let source = self.sources.lock().unwrap()[&doc.id()].clone();
        let mut body = format!("%PDF-1.7\n% exported with {filter}\n").into_bytes();
        body.extend(std::fs::read(source).map_err(|e| EngineFault::new(e.to_string()))?);
        tokio::fs::write(target, body)
            .await
            .map_err(|e| EngineFault::new(e.to_string()))
    }

    fn dispose(&self, doc: &DocumentHandle) {
        self.sources.lock().unwrap().remove(&doc.id());
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

fn bridged(session: Option<Arc<FakeOffice>>) -> Converter {
    let session = session.map(|s| s as Arc<dyn OfficeSession>);
    Converter::new(
        EngineBackend::Bridged(Arc::new(BridgedEngine::new(session, 10))),
        Arc::new(FormatCatalog::default()),
    )
}

fn write_source(dir: &Path, name: &str, body: &[u8]) -> PathBuf {
    let p = dir.join(name);
    std::fs::write(&p, body).unwrap();
    p
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn healthy_bridge_produces_pdf() {
    let dir = tempfile::tempdir().unwrap();
    let office = Arc::new(FakeOffice::default());
    let converter = bridged(Some(office.clone()));
    let src = write_source(dir.path(), "a.docx", b"PK fake docx");

    let job = ConversionJob::new(SourceLocator::Local(src), "pdf", dir.path().join("out"));
    let result = converter.convert(&job).await.unwrap();

    assert_eq!(result.output_path, dir.path().join("out").join("a.pdf"));
    assert!(result.size_bytes > 0);
    assert!(!result.degraded);
    let body = std::fs::read_to_string(&result.output_path).unwrap();
    assert!(body.contains("writer_pdf_Export"));
    assert_eq!(office.disposed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unsupported_extension_touches_no_engine() {
    let dir = tempfile::tempdir().unwrap();
    let office = Arc::new(FakeOffice::default());
    let converter = bridged(Some(office.clone()));
    let src = write_source(dir.path(), "a.docx", b"x");

    let job = ConversionJob::new(SourceLocator::Local(src), "xyz", dir.path());
    let err = converter.convert(&job).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert_eq!(office.loads.load(Ordering::SeqCst), 0);
    assert_eq!(office.stores.load(Ordering::SeqCst), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn target_format_is_case_insensitive() {
    let dir = tempfile::tempdir().unwrap();
    let converter = bridged(Some(Arc::new(FakeOffice::default())));
    let src = write_source(dir.path(), "Sheet.XLSX", b"x");

    let job = ConversionJob::new(SourceLocator::Local(src), ".PDF", dir.path());
    let result = converter.convert(&job).await.unwrap();
    assert_eq!(result.output_path, dir.path().join("Sheet.pdf"));
}

#[tokio::test]
async fn degraded_mode_copies_and_marks_output() {
    let dir = tempfile::tempdir().unwrap();
    let converter = bridged(None);
    let body = b"PK\x03\x04 original bytes".to_vec();
    let src = write_source(dir.path(), "a.docx", &body);

    let job = ConversionJob::new(SourceLocator::Local(src), "pdf", dir.path().join("out"));
    let result = converter.convert(&job).await.unwrap();

    assert!(result.degraded);
    let name = result.output_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.contains("_converted"), "{name}");
    assert_eq!(std::fs::read(&result.output_path).unwrap(), body);
    assert!(!converter.is_ready().await);
}

#[tokio::test]
async fn missing_source_is_download_failure() {
    let dir = tempfile::tempdir().unwrap();
    let converter = bridged(Some(Arc::new(FakeOffice::default())));
    let job = ConversionJob::new(
        SourceLocator::Local(dir.path().join("absent.docx")),
        "pdf",
        dir.path(),
    );
    let err = converter.convert(&job).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DownloadFailed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_jobs_with_same_source_name_keep_their_own_output() {
    let dir = tempfile::tempdir().unwrap();
    let office = Arc::new(FakeOffice::default());
    let converter = bridged(Some(office.clone()));

    std::fs::create_dir_all(dir.path().join("alice")).unwrap();
    std::fs::create_dir_all(dir.path().join("bob")).unwrap();
    let src_a = write_source(&dir.path().join("alice"), "report.docx", b"USER-A");
    let src_b = write_source(&dir.path().join("bob"), "report.docx", b"USER-B");

    let job_a = ConversionJob::new(SourceLocator::Local(src_a), "pdf", dir.path().join("job-a"));
    let job_b = ConversionJob::new(SourceLocator::Local(src_b), "pdf", dir.path().join("job-b"));
    let (a, b) = tokio::join!(converter.convert(&job_a), converter.convert(&job_b));
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_ne!(a.output_path, b.output_path);
    assert!(std::fs::read_to_string(&a.output_path).unwrap().ends_with("USER-A"));
    assert!(std::fs::read_to_string(&b.output_path).unwrap().ends_with("USER-B"));
    assert_eq!(office.disposed.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn every_listed_format_is_supported() {
    let converter = bridged(None);
    let formats = converter.list_formats();
    assert!(formats.contains(&"pdf".to_string()));
    assert!(formats.contains(&"docx".to_string()));
    for f in formats {
        assert!(converter.is_format_supported(&f), "{f}");
    }
}
