//! Isolated-engine tests driven by a fake `docker` shell script.
//!
//! The script records every invocation in `calls.log`, answers `ps` according
//! to the scenario and emulates `exec` by writing into the host side of the
//! shared output mount.

#![cfg(unix)]

use docconv::engine::{EngineBackend, IsolatedEngine};
use docconv::{ConversionJob, Converter, ErrorKind, FormatCatalog, IsolatedConfig, SourceLocator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

// ── Test helpers ─────────────────────────────────────────────────────────────

struct FakeDocker {
    dir: tempfile::TempDir,
}

impl FakeDocker {
    /// `ps` and `exec` are shell snippets; `$root` is always set, `$name`,
    /// `$stem` and `$out` only for exec.
    fn new(ps: &str, exec: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("uploads")).unwrap();
        std::fs::create_dir_all(root.join("outputs")).unwrap();
        let script = format!(
            r#"root="{root}"
echo "$*" >> "$root/calls.log"
case "$1" in
  ps) {ps} ;;
  exec)
    for last; do :; done
    name=$(basename "$last")
    stem="${{name%.*}}"
    out="{out}"
    {exec}
    ;;
  *) exit 0 ;;
esac
"#,
            root = root.display(),
            out = root.join("outputs").display(),
        );
        std::fs::write(root.join("docker.sh"), script).unwrap();
        Self { dir }
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn config(&self) -> IsolatedConfig {
        let script = self.root().join("docker.sh").display().to_string();
        IsolatedConfig {
            container_name: "office".to_string(),
            timeout_secs: 1,
            docker_command: vec!["sh".into(), script.clone()],
            start_command: vec!["sh".into(), script.clone(), "compose-up".into()],
            stop_command: vec!["sh".into(), script, "compose-down".into()],
            shared_input_dir: self.root().join("uploads"),
            shared_output_dir: self.root().join("outputs"),
            settle_interval_ms: 10,
            artifact_grace_ms: 50,
            ..IsolatedConfig::default()
        }
    }

    fn converter(&self) -> Converter {
        Converter::new(
            EngineBackend::Isolated(IsolatedEngine::new(self.config(), 5)),
            Arc::new(FormatCatalog::default()),
        )
    }

    fn calls(&self) -> String {
        std::fs::read_to_string(self.root().join("calls.log")).unwrap_or_default()
    }

    fn source(&self, name: &str) -> SourceLocator {
        let p = self.root().join(name);
        std::fs::write(&p, b"PK fake office file").unwrap();
        SourceLocator::Local(p)
    }

    fn job(&self, source: SourceLocator, fmt: &str) -> ConversionJob {
        ConversionJob::new(source, fmt, self.root().join("ignored-work-dir"))
    }
}

const RUNNING: &str = "echo office";
const EXPORT: &str = r#"printf '%%PDF-1.4 fake' > "$out/$stem.pdf"; echo "convert $name -> $stem.pdf""#;

fn output_file(root: &Path, name: &str) -> PathBuf {
    root.join("outputs").join(name)
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn converts_inside_container() {
    let docker = FakeDocker::new(RUNNING, EXPORT);
    let converter = docker.converter();

    let result = converter
        .convert(&docker.job(docker.source("report.docx"), "pdf"))
        .await
        .unwrap();

    assert_eq!(result.output_path, output_file(docker.root(), "report.pdf"));
    assert!(result.size_bytes > 0);

    let calls = docker.calls();
    assert!(calls.contains("ps --filter name=office"));
    assert!(calls.contains(
        "exec -i office libreoffice --headless --convert-to pdf:writer_pdf_Export --outdir /app/outputs /app/uploads/report.docx"
    ));
    assert!(
        !docker.root().join("uploads/report.docx").exists(),
        "staged copy is removed after the job"
    );
    assert!(docker.root().join("report.docx").exists());
}

#[tokio::test]
async fn sources_already_in_shared_input_are_kept() {
    let docker = FakeDocker::new(RUNNING, EXPORT);
    let shared = docker.root().join("uploads/memo.odt");
    std::fs::write(&shared, b"odt").unwrap();

    docker
        .converter()
        .convert(&docker.job(SourceLocator::Local(shared.clone()), "pdf"))
        .await
        .unwrap();

    assert!(docker.calls().contains("/app/uploads/memo.odt"));
    assert!(shared.exists());
}

#[tokio::test]
async fn container_down_is_unavailable_and_never_execs() {
    let docker = FakeDocker::new("exit 0", EXPORT);
    let err = docker
        .converter()
        .convert(&docker.job(docker.source("a.docx"), "pdf"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
    assert!(!docker.calls().contains("exec"));
}

#[tokio::test]
async fn engine_exit_failure_carries_code_and_output() {
    let docker = FakeDocker::new(RUNNING, r#"echo "Error: source file could not be loaded" >&2; exit 1"#);
    let err = docker
        .converter()
        .convert(&docker.job(docker.source("a.docx"), "pdf"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::EngineError);
    let msg = err.to_string();
    assert!(msg.contains("exit code 1"), "{msg}");
    assert!(msg.contains("could not be loaded"), "{msg}");
}

#[tokio::test]
async fn hung_engine_is_killed_at_timeout() {
    let docker = FakeDocker::new(RUNNING, r#"echo $$ > "$root/engine.pid"; exec sleep 30"#);

    let start = Instant::now();
    let err = docker
        .converter()
        .convert(&docker.job(docker.source("slow.docx"), "pdf"))
        .await
        .unwrap_err();
    let elapsed = start.elapsed();

    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");

    let pid = std::fs::read_to_string(docker.root().join("engine.pid")).unwrap();
    let alive = std::process::Command::new("kill")
        .args(["-0", pid.trim()])
        .status()
        .unwrap()
        .success();
    assert!(!alive, "engine process {pid} still running after timeout");
}

#[tokio::test]
async fn missing_artifact_lists_output_directory() {
    let docker = FakeDocker::new(RUNNING, r#"echo ok > "$out/unrelated.txt""#);
    let start = Instant::now();
    let err = docker
        .converter()
        .convert(&docker.job(docker.source("a.docx"), "pdf"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ArtifactNotFound);
    assert!(err.to_string().contains("unrelated.txt"));
    assert!(start.elapsed() >= Duration::from_millis(50), "grace wait applied");
}

#[tokio::test]
async fn unsupported_format_issues_no_container_calls() {
    let docker = FakeDocker::new(RUNNING, EXPORT);
    let err = docker
        .converter()
        .convert(&docker.job(docker.source("a.docx"), "xyz"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
    assert!(docker.calls().is_empty());
}

// ── Lifecycle ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn start_runs_command_then_checks_health() {
    let docker = FakeDocker::new(RUNNING, EXPORT);
    let converter = docker.converter();

    converter.start_isolated_engine().await.unwrap();
    assert!(converter.is_ready().await);

    let calls = docker.calls();
    let up = calls.find("compose-up").unwrap();
    let ps = calls.rfind("ps --filter").unwrap();
    assert!(up < ps, "health is checked after the start command");
}

#[tokio::test]
async fn start_reports_unhealthy_container() {
    let docker = FakeDocker::new("exit 0", EXPORT);
    let err = docker.converter().start_isolated_engine().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineUnavailable);
}

#[tokio::test]
async fn failing_stop_is_engine_error() {
    let docker = FakeDocker::new(RUNNING, EXPORT);
    let mut config = docker.config();
    config.stop_command = vec!["sh".into(), "-c".into(), "echo refused >&2; exit 2".into()];
    let converter = Converter::new(
        EngineBackend::Isolated(IsolatedEngine::new(config, 5)),
        Arc::new(FormatCatalog::default()),
    );

    let err = converter.stop_isolated_engine().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::EngineError);
    assert!(err.to_string().contains("exit code 2"));
}
