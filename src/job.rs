//! Conversion job and result types.

use crate::catalog::normalize_format;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Where the document to convert lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceLocator {
    /// HTTP/HTTPS URL; downloaded before conversion.
    Remote(String),
    /// Path on the local filesystem.
    Local(PathBuf),
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

impl SourceLocator {
    /// Classify a user-supplied string as a URL or a local path.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        if is_url(input) {
            SourceLocator::Remote(input.to_string())
        } else {
            SourceLocator::Local(PathBuf::from(input))
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, SourceLocator::Remote(_))
    }

    /// Lowercase extension of the source name, if any.
    pub fn extension(&self) -> Option<String> {
        let name = match self {
            SourceLocator::Remote(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                path.rsplit('/').next().unwrap_or("").to_string()
            }
            SourceLocator::Local(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        match name.rfind('.') {
            Some(i) if i > 0 && i < name.len() - 1 => Some(name[i + 1..].to_lowercase()),
            _ => None,
        }
    }
}

impl fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocator::Remote(url) => f.write_str(url),
            SourceLocator::Local(p) => write!(f, "{}", p.display()),
        }
    }
}

/// One conversion request. Immutable once built.
#[derive(Debug, Clone)]
pub struct ConversionJob {
    source: SourceLocator,
    target_format: String,
    work_dir: PathBuf,
}

impl ConversionJob {
    pub fn new(source: SourceLocator, target_format: &str, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            source,
            target_format: normalize_format(target_format),
            work_dir: work_dir.into(),
        }
    }

    pub fn source(&self) -> &SourceLocator {
        &self.source
    }

    /// Normalised (lowercase, no leading dot) target extension.
    pub fn target_format(&self) -> &str {
        &self.target_format
    }

    /// Directory the bridged engine writes its output into. The artifact name
    /// depends only on the source name, so jobs that may run concurrently need
    /// their own directory.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }
}

/// A completed conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub output_path: PathBuf,
    pub size_bytes: u64,
    /// True when the bridged engine was unavailable and the source was copied
    /// instead of converted.
    #[serde(default)]
    pub degraded: bool,
}
