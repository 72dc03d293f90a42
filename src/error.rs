//! Error types for the docconv library.
//!
//! The conversion path has exactly one error type, [`ConversionError`], whose
//! six variants are the complete failure taxonomy a caller can observe. Every
//! backend fault (I/O, process spawn, join failure, engine diagnostics) is
//! mapped onto one of them at the strategy boundary, so the HTTP layer and the
//! CLI never need to know which engine handled a request.
//!
//! The peripheral services have their own small enums:
//!
//! * [`WatermarkError`]: pdfium binding and PDF editing failures.
//! * [`StorageError`]: the public file store.
//! * [`ConfigError`]: builder validation at startup.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Classified failure of a single conversion job.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// The target format has no entry in the format catalog.
    #[error("Unsupported target format '{format}'\nRun `docconv formats` to list the supported extensions.")]
    UnsupportedFormat { format: String },

    /// The source could not be fetched or staged locally.
    #[error("Failed to fetch source '{source_ref}': {reason}")]
    DownloadFailed { source_ref: String, reason: String },

    /// The engine cannot accept work right now.
    #[error("Conversion engine unavailable: {reason}")]
    EngineUnavailable { reason: String },

    /// The engine ran but reported a failure.
    #[error("{}", engine_error_message(.message, .exit_code, .output))]
    EngineError {
        message: String,
        exit_code: Option<i32>,
        output: String,
    },

    /// The external conversion command exceeded its wall-clock budget.
    #[error("Conversion timed out after {secs}s; the engine command was terminated")]
    Timeout { secs: u64 },

    /// The engine finished but the expected artifact never appeared.
    #[error("Output file not found after conversion: expected '{expected}'\n{detail}")]
    ArtifactNotFound { expected: PathBuf, detail: String },
}

fn engine_error_message(message: &str, exit_code: &Option<i32>, output: &str) -> String {
    let mut s = format!("Engine error: {message}");
    if let Some(code) = exit_code {
        s.push_str(&format!(" (exit code {code})"));
    }
    let output = output.trim();
    if !output.is_empty() {
        s.push_str("\nOutput: ");
        s.push_str(output);
    }
    s
}

/// Serialisable kind of a [`ConversionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    UnsupportedFormat,
    DownloadFailed,
    EngineUnavailable,
    EngineError,
    Timeout,
    ArtifactNotFound,
}

impl ConversionError {
    /// The kind of this failure, for structured responses.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConversionError::UnsupportedFormat { .. } => ErrorKind::UnsupportedFormat,
            ConversionError::DownloadFailed { .. } => ErrorKind::DownloadFailed,
            ConversionError::EngineUnavailable { .. } => ErrorKind::EngineUnavailable,
            ConversionError::EngineError { .. } => ErrorKind::EngineError,
            ConversionError::Timeout { .. } => ErrorKind::Timeout,
            ConversionError::ArtifactNotFound { .. } => ErrorKind::ArtifactNotFound,
        }
    }

    /// Engine failure carrying only a message (no process involved).
    pub(crate) fn engine(message: impl Into<String>) -> Self {
        ConversionError::EngineError {
            message: message.into(),
            exit_code: None,
            output: String::new(),
        }
    }

    pub(crate) fn unavailable(reason: impl Into<String>) -> Self {
        ConversionError::EngineUnavailable {
            reason: reason.into(),
        }
    }

    pub(crate) fn download(source_ref: impl Into<String>, reason: impl ToString) -> Self {
        ConversionError::DownloadFailed {
            source_ref: source_ref.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures while stamping a watermark onto a PDF.
#[derive(Debug, Error)]
pub enum WatermarkError {
    #[error("Watermark text must not be empty")]
    EmptyText,

    #[error("Only PDF files can be watermarked: '{0}'")]
    NotAPdf(String),

    #[error("Failed to fetch PDF '{source_ref}': {reason}")]
    Fetch { source_ref: String, reason: String },

    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or install pdfium system-wide."
    )]
    PdfiumUnavailable(String),

    #[error("PDF '{path}' could not be watermarked: {detail}")]
    Pdf { path: PathBuf, detail: String },

    #[error("Failed to write watermarked PDF '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures of the public file store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Invalid stored file name '{0}'")]
    InvalidName(String),

    #[error("Storage I/O failed for '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Builder validation failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Unknown backend mode '{0}' (expected 'bridged' or 'isolated')")]
    UnknownBackend(String),
}
