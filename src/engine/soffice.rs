//! [`OfficeSession`] backed by a headless LibreOffice listener.
//!
//! Launching starts one long-lived `soffice --accept=pipe,...` process that
//! keeps the installation warm and owns the user profile for the lifetime of
//! the service. Nothing connects to its pipe: documents are never opened
//! inside the listener.
//!
//! * `load_hidden` only checks that the source is a readable file and
//!   registers it under a handle. The office suite has not parsed it yet, so a
//!   corrupt document is accepted here.
//! * `store_to` runs a short-lived `--convert-to` against the same
//!   installation and profile, bounded by `BridgeOptions::store_timeout_secs`.
//!   This is where the document is first opened and where parse failures
//!   surface. The produced file is then moved onto the requested target.

use super::command::{display_command, run_supervised, CommandFailure};
use super::locate::expected_artifact_name;
use super::{DocumentHandle, EngineFault, OfficeSession};
use crate::config::{BridgeOptions, OfficePaths};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

#[cfg(target_os = "macos")]
const LIBRARY_PATH_VAR: &str = "DYLD_LIBRARY_PATH";
#[cfg(not(target_os = "macos"))]
const LIBRARY_PATH_VAR: &str = "LD_LIBRARY_PATH";

/// A running office listener plus the documents registered against it.
pub struct SofficeSession {
    executable: PathBuf,
    program_path: PathBuf,
    runtime_path: PathBuf,
    profile_url: String,
    _profile_dir: Option<TempDir>,
    store_timeout: Duration,
    listener: Mutex<Option<Child>>,
    documents: Mutex<HashMap<u64, PathBuf>>,
    next_id: AtomicU64,
}

impl SofficeSession {
    /// Start the listener and wait for it to settle.
    pub async fn launch(paths: &OfficePaths, options: &BridgeOptions) -> Result<Self, EngineFault> {
        if !paths.executable.exists() {
            return Err(EngineFault::new(format!(
                "office executable not found at {}",
                paths.executable.display()
            )));
        }

        let (profile_path, profile_dir) = match &options.profile_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| {
                    EngineFault::new(format!("cannot create profile dir {}: {e}", dir.display()))
                })?;
                (dir.clone(), None)
            }
            None => {
                let tmp = TempDir::new()
                    .map_err(|e| EngineFault::new(format!("cannot create profile dir: {e}")))?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };
        let profile_url = format!("file://{}", profile_path.display());

        let mut cmd = Command::new(&paths.executable);
        cmd.arg(format!("-env:UserInstallation={profile_url}"))
            .args(["--headless", "--invisible", "--nologo", "--norestore", "--nodefault"])
            .arg(format!("--accept=pipe,name=docconv_{};urp;", std::process::id()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        apply_environment(&mut cmd, &paths.program_path, &paths.runtime_path);

        let mut child = cmd
            .spawn()
            .map_err(|e| EngineFault::new(format!("failed to start office listener: {e}")))?;
        info!(
            "Office listener started (pid {:?}), waiting {}ms",
            child.id(),
            options.startup_wait_ms
        );
        tokio::time::sleep(Duration::from_millis(options.startup_wait_ms)).await;

        if let Ok(Some(status)) = child.try_wait() {
            return Err(EngineFault {
                message: "office listener exited during startup".to_string(),
                exit_code: status.code(),
                output: String::new(),
            });
        }

        Ok(Self {
            executable: paths.executable.clone(),
            program_path: paths.program_path.clone(),
            runtime_path: paths.runtime_path.clone(),
            profile_url,
            _profile_dir: profile_dir,
            store_timeout: Duration::from_secs(options.store_timeout_secs),
            listener: Mutex::new(Some(child)),
            documents: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    fn document_path(&self, doc: &DocumentHandle) -> Result<PathBuf, EngineFault> {
        let docs = self
            .documents
            .lock()
            .map_err(|_| EngineFault::new("document registry poisoned"))?;
        docs.get(&doc.id())
            .cloned()
            .ok_or_else(|| EngineFault::new(format!("document {} is not loaded", doc.id())))
    }
}

fn apply_environment(cmd: &mut Command, program_path: &Path, runtime_path: &Path) {
    if program_path.is_dir() {
        cmd.current_dir(program_path);
    }
    let mut library_path = runtime_path.as_os_str().to_os_string();
    if let Some(existing) = std::env::var_os(LIBRARY_PATH_VAR) {
        library_path.push(":");
        library_path.push(existing);
    }
    cmd.env(LIBRARY_PATH_VAR, library_path);
}

#[async_trait]
impl OfficeSession for SofficeSession {
    /// Register a readable source; the content is not parsed until the store.
    async fn load_hidden(&self, source: &Path) -> Result<DocumentHandle, EngineFault> {
        let source = tokio::fs::canonicalize(source)
            .await
            .map_err(|e| EngineFault::new(format!("cannot load {}: {e}", source.display())))?;
        if !source.is_file() {
            return Err(EngineFault::new(format!("cannot load {}: not a file", source.display())));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.documents
            .lock()
            .map_err(|_| EngineFault::new("document registry poisoned"))?
            .insert(id, source.clone());
        debug!("Loaded document {} from {}", id, source.display());
        Ok(DocumentHandle::new(id))
    }

    async fn store_to(
        &self,
        doc: &DocumentHandle,
        target: &Path,
        filter: &str,
        overwrite: bool,
    ) -> Result<(), EngineFault> {
        let source = self.document_path(doc)?;
        if target.exists() && !overwrite {
            return Err(EngineFault::new(format!("{} already exists", target.display())));
        }
        let ext = target
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .ok_or_else(|| EngineFault::new(format!("{} has no extension", target.display())))?;

        let scratch = TempDir::new()
            .map_err(|e| EngineFault::new(format!("cannot create scratch dir: {e}")))?;
        let argv = vec![
            self.executable.to_string_lossy().into_owned(),
            format!("-env:UserInstallation={}", self.profile_url),
            "--headless".to_string(),
            "--convert-to".to_string(),
            format!("{ext}:{filter}"),
            "--outdir".to_string(),
            scratch.path().to_string_lossy().into_owned(),
            source.to_string_lossy().into_owned(),
        ];
        debug!("Storing document {}: {}", doc.id(), display_command(&argv));

        let out = match run_supervised(&argv, Some(self.store_timeout)).await {
            Ok(out) => out,
            Err(CommandFailure::TimedOut { limit, output }) => {
                return Err(EngineFault {
                    message: format!("store timed out after {}s", limit.as_secs()),
                    exit_code: None,
                    output,
                })
            }
            Err(e) => return Err(EngineFault::new(format!("store failed: {e}"))),
        };
        if !out.success {
            return Err(EngineFault {
                message: "store failed".to_string(),
                exit_code: out.exit_code,
                output: out.output,
            });
        }

        let produced = scratch
            .path()
            .join(expected_artifact_name(&source.to_string_lossy(), &ext));
        if !produced.exists() {
            return Err(EngineFault {
                message: format!("engine produced no {ext} output"),
                exit_code: out.exit_code,
                output: out.output,
            });
        }
        if let Err(e) = tokio::fs::rename(&produced, target).await {
            debug!("rename failed ({e}), copying instead");
            tokio::fs::copy(&produced, target).await.map_err(|e| {
                EngineFault::new(format!("cannot write {}: {e}", target.display()))
            })?;
        }
        Ok(())
    }

    fn dispose(&self, doc: &DocumentHandle) {
        match self.documents.lock() {
            Ok(mut docs) => {
                docs.remove(&doc.id());
                debug!("Disposed document {}", doc.id());
            }
            Err(_) => warn!("Document registry poisoned while disposing {}", doc.id()),
        }
    }

    async fn shutdown(&self) {
        let child = match self.listener.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(mut child) = child {
            info!("Shutting down office listener");
            if let Err(e) = child.kill().await {
                warn!("Failed to stop office listener: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for SofficeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SofficeSession")
            .field("executable", &self.executable)
            .field("program_path", &self.program_path)
            .field("runtime_path", &self.runtime_path)
            .finish_non_exhaustive()
    }
}
