//! Public file store for uploads and conversion outputs.
//!
//! Files are kept flat in one directory under generated names
//! (`<yyyyMMdd_HHmmss>_<uuid8>.<ext>`) and exposed as
//! `<base_url>/files/<name>`. Callers never choose the stored name, and names
//! coming back in from a URL are validated before touching the filesystem.

use crate::error::StorageError;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Flat directory of publicly served files.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    base_url: String,
}

impl FileStorage {
    /// Create the store, making `root` if it does not exist.
    pub fn new(root: impl Into<PathBuf>, base_url: impl Into<String>) -> Result<Self, StorageError> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| StorageError::Io {
            path: root.clone(),
            source,
        })?;
        Ok(Self {
            root,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Public URL of a stored file.
    pub fn url_for(&self, name: &str) -> String {
        format!("{}/files/{}", self.base_url, name)
    }

    /// Move `file` into the store and return its public URL.
    ///
    /// The extension is taken from `original_name`. Falls back to copy + delete
    /// when a rename crosses filesystems.
    pub async fn store(&self, file: &Path, original_name: &str) -> Result<String, StorageError> {
        let name = generate_name(original_name);
        let dest = self.root.join(&name);
        if tokio::fs::rename(file, &dest).await.is_err() {
            tokio::fs::copy(file, &dest)
                .await
                .map_err(|source| StorageError::Io {
                    path: dest.clone(),
                    source,
                })?;
            if let Err(e) = tokio::fs::remove_file(file).await {
                warn!("Could not remove {} after copying: {}", file.display(), e);
            }
        }
        info!("Stored {} as {}", original_name, name);
        Ok(self.url_for(&name))
    }

    /// Write uploaded bytes into the store. Returns the stored name.
    pub async fn store_upload(&self, bytes: &[u8], original_name: &str) -> Result<String, StorageError> {
        let name = generate_name(original_name);
        let dest = self.root.join(&name);
        tokio::fs::write(&dest, bytes)
            .await
            .map_err(|source| StorageError::Io { path: dest, source })?;
        info!("Stored upload {} ({} bytes) as {}", original_name, bytes.len(), name);
        Ok(name)
    }

    /// Path of a stored file, if it exists.
    pub fn fetch(&self, name: &str) -> Result<Option<PathBuf>, StorageError> {
        let path = self.resolve(name)?;
        Ok(path.is_file().then_some(path))
    }

    /// Size in bytes, 0 when the file cannot be read.
    pub async fn size_of(&self, name: &str) -> u64 {
        let path = match self.resolve(name) {
            Ok(p) => p,
            Err(e) => {
                warn!("{}", e);
                return 0;
            }
        };
        match tokio::fs::metadata(&path).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                warn!("Cannot read size of {}: {}", path.display(), e);
                0
            }
        }
    }

    /// Remove a stored file. Returns whether something was deleted.
    pub async fn delete(&self, name: &str) -> bool {
        let Ok(path) = self.resolve(name) else {
            return false;
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                true
            }
            Err(_) => false,
        }
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.contains('\0')
        {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }
}

/// MIME type for a stored file, by extension.
pub fn content_type(name: &str) -> &'static str {
    let ext = Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "pdf" => "application/pdf",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xls" => "application/vnd.ms-excel",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "ppt" => "application/vnd.ms-powerpoint",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "rtf" => "application/rtf",
        "txt" => "text/plain",
        "html" | "htm" => "text/html",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

fn generate_name(original_name: &str) -> String {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let id = Uuid::new_v4().simple().to_string();
    let ext = Path::new(original_name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()));
    match ext {
        Some(ext) => format!("{}_{}.{}", stamp, &id[..8], ext),
        None => format!("{}_{}", stamp, &id[..8]),
    }
}
