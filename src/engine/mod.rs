//! Conversion engines and their supporting pieces.
//!
//! Two strategies implement the same contract: take a [`ConversionJob`],
//! produce a [`ConversionResult`] or a classified error:
//!
//! ```text
//!                        ┌─▶ bridged   long-lived office process (OfficeSession)
//! convert::Converter ────┤
//!                        └─▶ isolated  `docker exec` into a managed container
//!                                        │
//!                 health ◀───────────────┤   is the container up?
//!                 command ◀──────────────┤   spawn / capture / timeout / kill
//!                 locate  ◀──────────────┘   where did the artifact land?
//! ```
//!
//! 1. [`bridged`]: drives an [`OfficeSession`] created once at startup;
//!    falls back to a marked copy when no session exists
//! 2. [`isolated`]: stages the source into the shared mount, runs the
//!    engine inside the container under a timeout, finds the artifact
//! 3. [`health`]: readiness queries for both variants
//! 4. [`command`]: supervised subprocess runner
//! 5. [`locate`]: expected artifact path with one bounded wait
//! 6. [`soffice`]: the real [`OfficeSession`] backed by a headless listener
//!
//! [`ConversionJob`]: crate::job::ConversionJob
//! [`ConversionResult`]: crate::job::ConversionResult

pub mod bridged;
pub mod command;
pub mod health;
pub mod isolated;
pub mod locate;
pub mod soffice;

use crate::config::BackendMode;
use crate::error::ConversionError;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use bridged::BridgedEngine;
pub use isolated::IsolatedEngine;

/// The engine selected for this deployment.
pub enum EngineBackend {
    Bridged(Arc<BridgedEngine>),
    Isolated(IsolatedEngine),
}

impl EngineBackend {
    pub fn mode(&self) -> BackendMode {
        match self {
            EngineBackend::Bridged(_) => BackendMode::Bridged,
            EngineBackend::Isolated(_) => BackendMode::Isolated,
        }
    }
}

/// Opaque reference to a document loaded inside the office process.
///
/// Not `Clone`, so exactly one owner is responsible for disposing it.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct DocumentHandle(u64);

impl DocumentHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Failure reported by the office engine itself.
#[derive(Debug, Clone, Default)]
pub struct EngineFault {
    pub message: String,
    pub exit_code: Option<i32>,
    pub output: String,
}

impl EngineFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

impl From<EngineFault> for ConversionError {
    fn from(f: EngineFault) -> Self {
        ConversionError::EngineError {
            message: f.message,
            exit_code: f.exit_code,
            output: f.output,
        }
    }
}

/// Connection to a running office process.
///
/// One session exists per process; it is created at startup and shared by
/// every bridged conversion. Implementations need not support concurrent
/// loads, [`BridgedEngine`] serializes access.
#[async_trait]
pub trait OfficeSession: Send + Sync {
    /// Load `source` into the engine without any visible window.
    async fn load_hidden(&self, source: &Path) -> Result<DocumentHandle, EngineFault>;

    /// Export a loaded document to `target` using the engine filter `filter`.
    async fn store_to(
        &self,
        doc: &DocumentHandle,
        target: &Path,
        filter: &str,
        overwrite: bool,
    ) -> Result<(), EngineFault>;

    /// Release engine-side resources of a loaded document.
    fn dispose(&self, doc: &DocumentHandle);

    /// Tear the session down at process exit.
    async fn shutdown(&self) {}
}
