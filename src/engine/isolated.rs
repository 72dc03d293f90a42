//! Isolated engine: conversions executed inside a managed container.
//!
//! ```text
//! health check ─▶ stage into shared input ─▶ docker exec (timeout) ─▶ locate in shared output
//! ```
//!
//! The host and the container see the same files through two mounts; only
//! the path prefix differs. Container lifecycle (start/stop) lives here too.

use super::command::{display_command, run_supervised, CommandFailure};
use super::health::container_running;
use super::locate::locate;
use crate::catalog::FormatCatalog;
use crate::config::IsolatedConfig;
use crate::error::ConversionError;
use crate::input::stage_source;
use crate::job::{ConversionJob, ConversionResult};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Conversion strategy backed by a container-hosted office suite.
#[derive(Debug, Clone)]
pub struct IsolatedEngine {
    config: IsolatedConfig,
    download_timeout_secs: u64,
}

impl IsolatedEngine {
    pub fn new(config: IsolatedConfig, download_timeout_secs: u64) -> Self {
        Self {
            config,
            download_timeout_secs,
        }
    }

    pub fn config(&self) -> &IsolatedConfig {
        &self.config
    }

    /// Convert `job` inside the container.
    ///
    /// The artifact always lands in the shared output directory; the job's
    /// `work_dir` is not used. Copies and downloads staged into the shared
    /// input directory are removed when the job ends.
    pub async fn convert(
        &self,
        job: &ConversionJob,
        catalog: &FormatCatalog,
    ) -> Result<ConversionResult, ConversionError> {
        if !container_running(&self.config).await {
            return Err(ConversionError::unavailable(format!(
                "container '{}' is not running; start it with `docconv engine start`",
                self.config.container_name
            )));
        }

        let filter = catalog.filter_for(job.target_format()).ok_or_else(|| {
            ConversionError::UnsupportedFormat {
                format: job.target_format().to_string(),
            }
        })?;

        let staged = stage_source(
            job.source(),
            &self.config.shared_input_dir,
            self.download_timeout_secs,
        )
        .await?;
        let staged_name = staged
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let container_path = self.container_path(staged.path());

        tokio::fs::create_dir_all(&self.config.shared_output_dir)
            .await
            .map_err(|e| {
                ConversionError::engine(format!(
                    "cannot create shared output directory {}: {e}",
                    self.config.shared_output_dir.display()
                ))
            })?;

        let argv = self.exec_command(&container_path, job.target_format(), filter);
        info!("Executing conversion in container: {}", display_command(&argv));

        let out = match run_supervised(&argv, Some(self.config.timeout())).await {
            Ok(out) => out,
            Err(CommandFailure::TimedOut { output, .. }) => {
                error!(
                    "Conversion of {} exceeded {}s and was terminated. Output:\n{}",
                    staged_name, self.config.timeout_secs, output
                );
                return Err(ConversionError::Timeout {
                    secs: self.config.timeout_secs,
                });
            }
            Err(e) => {
                return Err(ConversionError::engine(format!(
                    "could not run container command: {e}"
                )))
            }
        };

        if !out.success {
            error!(
                "Container conversion failed with exit code {:?}: {}",
                out.exit_code, out.output
            );
            return Err(ConversionError::EngineError {
                message: "container conversion failed".to_string(),
                exit_code: out.exit_code,
                output: out.output,
            });
        }
        info!("Container conversion finished: {}", out.output.trim());

        let output_path = locate(
            &staged_name,
            job.target_format(),
            &self.config.shared_output_dir,
            self.config.artifact_grace(),
        )
        .await
        .map_err(|e| ConversionError::engine(format!("cannot inspect output directory: {e}")))?;

        let size_bytes = match tokio::fs::metadata(&output_path).await {
            Ok(meta) => meta.len(),
            Err(_) => {
                let detail = format!(
                    "Files in {}: {}",
                    self.config.shared_output_dir.display(),
                    list_dir(&self.config.shared_output_dir).await
                );
                return Err(ConversionError::ArtifactNotFound {
                    expected: output_path,
                    detail,
                });
            }
        };

        info!("Document converted successfully: {}", output_path.display());
        Ok(ConversionResult {
            output_path,
            size_bytes,
            degraded: false,
        })
    }

    /// Run the configured start command, wait, then confirm health.
    pub async fn start(&self) -> Result<(), ConversionError> {
        info!("Starting engine container: {}", display_command(&self.config.start_command));
        self.run_lifecycle(&self.config.start_command, "start").await?;

        info!(
            "Waiting {}ms for container '{}' to settle",
            self.config.settle_interval_ms, self.config.container_name
        );
        tokio::time::sleep(self.config.settle_interval()).await;

        if container_running(&self.config).await {
            info!("Engine container '{}' is running", self.config.container_name);
            Ok(())
        } else {
            Err(ConversionError::unavailable(format!(
                "container '{}' did not become healthy after start",
                self.config.container_name
            )))
        }
    }

    /// Run the configured stop command.
    pub async fn stop(&self) -> Result<(), ConversionError> {
        info!("Stopping engine container: {}", display_command(&self.config.stop_command));
        self.run_lifecycle(&self.config.stop_command, "stop").await?;
        info!("Engine container stopped");
        Ok(())
    }

    async fn run_lifecycle(&self, argv: &[String], action: &str) -> Result<(), ConversionError> {
        let out = run_supervised(argv, None).await.map_err(|e| {
            ConversionError::engine(format!("failed to {action} engine container: {e}"))
        })?;
        if out.success {
            return Ok(());
        }
        warn!("Container {} failed: {}", action, out.output);
        Err(ConversionError::EngineError {
            message: format!("failed to {action} engine container"),
            exit_code: out.exit_code,
            output: out.output,
        })
    }

    /// `docker exec -i <container> <engine> --headless --convert-to ext:filter --outdir <out> <src>`
    pub(crate) fn exec_command(&self, container_path: &str, target_format: &str, filter: &str) -> Vec<String> {
        let mut argv = self.config.docker_command.clone();
        argv.extend([
            "exec".to_string(),
            "-i".to_string(),
            self.config.container_name.clone(),
            self.config.engine_program.clone(),
            "--headless".to_string(),
            "--convert-to".to_string(),
            format!("{target_format}:{filter}"),
            "--outdir".to_string(),
            self.config.container_output_dir.clone(),
            container_path.to_string(),
        ]);
        argv
    }

    /// Map a host path under the shared input mount to the container's view.
    pub(crate) fn container_path(&self, host_path: &Path) -> String {
        let shared = std::fs::canonicalize(&self.config.shared_input_dir)
            .unwrap_or_else(|_| self.config.shared_input_dir.clone());
        let host = std::fs::canonicalize(host_path).unwrap_or_else(|_| host_path.to_path_buf());

        let relative = match host.strip_prefix(&shared) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => host.file_name().map(PathBuf::from).unwrap_or_default(),
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!(
            "{}/{}",
            self.config.container_input_dir.trim_end_matches('/'),
            relative
        )
    }
}

async fn list_dir(dir: &Path) -> String {
    let mut names = Vec::new();
    if let Ok(mut entries) = tokio::fs::read_dir(dir).await {
        while let Ok(Some(entry)) = entries.next_entry().await {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    if names.is_empty() {
        return "(empty)".to_string();
    }
    names.sort();
    names.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine_in(dir: &Path) -> IsolatedEngine {
        IsolatedEngine::new(
            IsolatedConfig {
                container_name: "office".to_string(),
                shared_input_dir: dir.join("uploads"),
                shared_output_dir: dir.join("outputs"),
                ..IsolatedConfig::default()
            },
            5,
        )
    }

    #[test]
    fn exec_command_shape() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());
        let argv = engine.exec_command("/app/uploads/a.docx", "pdf", "writer_pdf_Export");
        assert_eq!(
            argv,
            vec![
                "docker", "exec", "-i", "office", "libreoffice", "--headless", "--convert-to",
                "pdf:writer_pdf_Export", "--outdir", "/app/outputs", "/app/uploads/a.docx",
            ]
        );
    }

    #[test]
    fn host_paths_translate_to_container_paths() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());
        let uploads = dir.path().join("uploads/sub");
        std::fs::create_dir_all(&uploads).unwrap();
        let file = uploads.join("a b.docx");
        std::fs::write(&file, b"x").unwrap();

        assert_eq!(engine.container_path(&file), "/app/uploads/sub/a b.docx");
    }

    #[test]
    fn foreign_paths_keep_only_the_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());
        assert_eq!(
            engine.container_path(Path::new("/somewhere/else/x.odt")),
            "/app/uploads/x.odt"
        );
    }
}
