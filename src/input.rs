//! Source resolution: turn a [`SourceLocator`] into a readable local file.
//!
//! Two flavours exist because the engines need the file in different places:
//!
//! * [`resolve_source`]: for the bridged engine. Remote sources are downloaded
//!   into a private `TempDir` that lives exactly as long as the returned
//!   [`ResolvedSource`], so cleanup happens on every exit path.
//! * [`stage_source`]: for the isolated engine. The file must sit under the
//!   shared input mount so the container can see it. Copies and downloads made
//!   for the job are removed when the returned [`StagedSource`] is dropped.
//!
//! Every failure here surfaces as [`ConversionError::DownloadFailed`].

use crate::error::ConversionError;
use crate::job::SourceLocator;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// The resolved source: a local path or a downloaded temp file.
pub enum ResolvedSource {
    /// Source was already a local file.
    Local(PathBuf),
    /// Source was a URL; the file sits in a temp directory kept alive here.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedSource {
    /// Get the path to the file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedSource::Local(p) => p,
            ResolvedSource::Downloaded { path, .. } => path,
        }
    }
}

/// A source placed under the shared input directory.
#[derive(Debug)]
pub struct StagedSource {
    path: PathBuf,
    /// Whether the file was created for this job and must be removed.
    owned: bool,
}

impl StagedSource {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedSource {
    fn drop(&mut self) {
        if !self.owned {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("Removed staged source {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove staged source {}: {}", self.path.display(), e),
        }
    }
}

/// Resolve a source for in-process use, downloading remote files to a temp dir.
pub async fn resolve_source(
    source: &SourceLocator,
    timeout_secs: u64,
) -> Result<ResolvedSource, ConversionError> {
    match source {
        SourceLocator::Remote(url) => {
            let temp_dir =
                TempDir::new().map_err(|e| ConversionError::download(url.as_str(), e))?;
            let dest = temp_dir.path().join(filename_from_url(url));
            download_url(url, &dest, timeout_secs).await?;
            Ok(ResolvedSource::Downloaded {
                path: dest,
                _temp_dir: temp_dir,
            })
        }
        SourceLocator::Local(path) => resolve_local(path).map(ResolvedSource::Local),
    }
}

/// Place the source under `staging_dir`.
///
/// Remote sources are downloaded as `downloaded_<millis>_<uuid8>_<name>`.
/// Local files already below `staging_dir` are used in place and kept; others
/// are copied in, keeping their name unless that would clobber an existing
/// file.
pub async fn stage_source(
    source: &SourceLocator,
    staging_dir: &Path,
    timeout_secs: u64,
) -> Result<StagedSource, ConversionError> {
    tokio::fs::create_dir_all(staging_dir)
        .await
        .map_err(|e| ConversionError::download(source.to_string(), e))?;

    match source {
        SourceLocator::Remote(url) => {
            let staged = StagedSource {
                path: staging_dir.join(unique_name("downloaded", &filename_from_url(url))),
                owned: true,
            };
            download_url(url, &staged.path, timeout_secs).await?;
            Ok(staged)
        }
        SourceLocator::Local(path) => {
            let path = resolve_local(path)?;
            if is_within(&path, staging_dir) {
                debug!("Source already staged: {}", path.display());
                return Ok(StagedSource { path, owned: false });
            }

            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "source".to_string());
            let mut dest = staging_dir.join(&name);
            if dest.exists() {
                dest = staging_dir.join(unique_name("staged", &name));
            }
            let staged = StagedSource {
                path: dest,
                owned: true,
            };
            tokio::fs::copy(&path, &staged.path)
                .await
                .map_err(|e| ConversionError::download(path.display().to_string(), e))?;
            debug!("Staged {} → {}", path.display(), staged.path.display());
            Ok(staged)
        }
    }
}

/// Validate that a local path exists and is a readable file.
fn resolve_local(path: &Path) -> Result<PathBuf, ConversionError> {
    let shown = path.display().to_string();
    if !path.exists() {
        return Err(ConversionError::download(shown, "file not found"));
    }
    if !path.is_file() {
        return Err(ConversionError::download(shown, "not a regular file"));
    }
    match std::fs::File::open(path) {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ConversionError::download(shown, "permission denied"));
        }
        Err(e) => return Err(ConversionError::download(shown, e)),
    }
    debug!("Resolved local source: {}", path.display());
    Ok(path.to_path_buf())
}

/// Stream a URL to `dest`.
async fn download_url(url: &str, dest: &Path, timeout_secs: u64) -> Result<(), ConversionError> {
    info!("Downloading source from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ConversionError::download(url, e))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            ConversionError::download(url, format!("timed out after {timeout_secs}s"))
        } else {
            ConversionError::download(url, e)
        }
    })?;

    if !response.status().is_success() {
        return Err(ConversionError::download(
            url,
            format!("HTTP {}", response.status()),
        ));
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| ConversionError::download(url, format!("cannot create {}: {e}", dest.display())))?;

    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ConversionError::download(url, e))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| ConversionError::download(url, e))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| ConversionError::download(url, e))?;

    info!("Downloaded {} bytes to: {}", written, dest.display());
    Ok(())
}

/// Extract a file name from the last URL path segment.
pub fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() {
                    return sanitize(last);
                }
            }
        }
    }
    "downloaded_file".to_string()
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}

fn is_within(path: &Path, dir: &Path) -> bool {
    match (path.canonicalize(), dir.canonicalize()) {
        (Ok(p), Ok(d)) => p.starts_with(d),
        _ => false,
    }
}

/// `<prefix>_<millis>_<uuid8>_<name>`
fn unique_name(prefix: &str, name: &str) -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}_{}_{name}", unix_millis(), &id[..8])
}

pub(crate) fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
