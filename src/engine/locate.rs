//! Artifact location: where a conversion's output should be, with one
//! bounded wait for files written through a shared mount.
//!
//! The isolated engine gives no completion signal beyond its exit status, and
//! the host may observe the container's write a moment later. We check, wait a
//! single fixed grace interval if needed, check once more and return the path
//! either way. Deciding that a missing file is an error belongs to the caller.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File name the engine produces for `source_name` converted to `target_format`.
///
/// The last extension is stripped and the lowercased target appended:
/// `Report.final.DOCX` + `PDF` → `Report.final.pdf`.
pub fn expected_artifact_name(source_name: &str, target_format: &str) -> String {
    let file_name = Path::new(source_name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| source_name.to_string());
    let stem = match file_name.rfind('.') {
        Some(i) if i > 0 => &file_name[..i],
        _ => file_name.as_str(),
    };
    format!("{}.{}", stem, target_format.trim_start_matches('.').to_lowercase())
}

/// Resolve the expected artifact path inside `output_dir`.
///
/// Creates `output_dir` if missing. Waits at most one `grace` interval.
pub async fn locate(
    source_name: &str,
    target_format: &str,
    output_dir: &Path,
    grace: Duration,
) -> std::io::Result<PathBuf> {
    if !output_dir.exists() {
        tokio::fs::create_dir_all(output_dir).await?;
        info!("Created output directory: {}", output_dir.display());
    }

    let path = output_dir.join(expected_artifact_name(source_name, target_format));
    if path.exists() {
        debug!("Artifact present: {}", path.display());
        return Ok(path);
    }

    info!(
        "Artifact {} not visible yet, waiting {}ms for shared-mount sync",
        path.display(),
        grace.as_millis()
    );
    tokio::time::sleep(grace).await;

    if !path.exists() {
        warn!("Artifact still missing after grace period: {}", path.display());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn name_strips_last_extension_only() {
        assert_eq!(expected_artifact_name("a.docx", "pdf"), "a.pdf");
        assert_eq!(expected_artifact_name("Report.final.DOCX", "PDF"), "Report.final.pdf");
        assert_eq!(expected_artifact_name("/app/uploads/x.odt", "docx"), "x.docx");
        assert_eq!(expected_artifact_name("README", "txt"), "README.txt");
        assert_eq!(expected_artifact_name(".profile", "pdf"), ".profile.pdf");
    }

    #[tokio::test]
    async fn present_file_is_returned_without_delay_every_time() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.pdf"), b"%PDF").unwrap();
        let grace = Duration::from_secs(5);

        let start = Instant::now();
        let first = locate("a.docx", "pdf", dir.path(), grace).await.unwrap();
        let second = locate("a.docx", "pdf", dir.path(), grace).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first, dir.path().join("a.pdf"));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn missing_file_waits_once_then_returns_path() {
        let dir = tempfile::tempdir().unwrap();
        let grace = Duration::from_millis(200);

        let start = Instant::now();
        let path = locate("b.pptx", "pdf", dir.path(), grace).await.unwrap();
        let elapsed = start.elapsed();

        assert_eq!(path, dir.path().join("b.pdf"));
        assert!(!path.exists());
        assert!(elapsed >= grace, "should wait the grace interval");
        assert!(elapsed < Duration::from_secs(2), "must not poll repeatedly");
    }

    #[tokio::test]
    async fn file_appearing_during_grace_is_found() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("c.pdf");
        let writer_target = target.clone();
        let writer = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tokio::fs::write(writer_target, b"late").await.unwrap();
        });

        let path = locate("c.doc", "pdf", dir.path(), Duration::from_millis(400))
            .await
            .unwrap();
        writer.await.unwrap();
        assert_eq!(path, target);
        assert!(path.exists());
    }

    #[tokio::test]
    async fn output_directory_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("outputs/nested");
        let _ = locate("a.docx", "pdf", &nested, Duration::from_millis(1))
            .await
            .unwrap();
        assert!(nested.is_dir());
    }
}
