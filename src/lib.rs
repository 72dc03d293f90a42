//! # docconv
//!
//! Office document conversion service: turn DOCX, XLSX, PPTX, ODT and friends
//! into PDF (or other office formats) by driving a LibreOffice engine.
//!
//! ## Two engines, one contract
//!
//! An office suite is a large, stateful, crash-prone dependency. Deployments
//! pick one of two ways to host it, once, at startup:
//!
//! | Backend    | Engine lives in            | Notes |
//! |------------|----------------------------|-------|
//! | `bridged`  | a headless listener owned by this process | one shared session, conversions serialized; falls back to a marked copy ("degraded mode") when the session cannot start |
//! | `isolated` | a separately managed container | `docker exec` per job under a wall-clock timeout; container can be started and stopped on demand |
//!
//! ## Pipeline Overview
//!
//! ```text
//! ConversionJob { source, target_format, work_dir }
//!  │
//!  ├─ 1. Validate  target format against the catalog (before any engine work)
//!  ├─ 2. Resolve   download remote sources / stage into the shared mount
//!  ├─ 3. Convert   bridged session or container exec
//!  ├─ 4. Locate    find the artifact (one bounded wait for shared mounts)
//!  └─ 5. Verify    artifact exists and is non-empty → ConversionResult
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docconv::{ConversionJob, Converter, EngineConfig, SourceLocator};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = EngineConfig::builder().build()?;
//!     let converter = Converter::from_config(&config).await;
//!     let job = ConversionJob::new(SourceLocator::parse("report.docx"), "pdf", "out");
//!     let result = converter.convert(&job).await?;
//!     println!("{} ({} bytes)", result.output_path.display(), result.size_bytes);
//!     converter.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `server` | on      | axum HTTP surface ([`server`]) |
//! | `cli`    | on      | Enables the `docconv` binary (clap + anyhow + tracing-subscriber + indicatif); implies `server` |
//!
//! Library-only use:
//! ```toml
//! docconv = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod catalog;
pub mod config;
pub mod convert;
pub mod engine;
pub mod error;
pub mod input;
pub mod job;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;
pub mod watermark;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use catalog::FormatCatalog;
pub use config::{
    BackendMode, BridgeOptions, EngineConfig, EngineConfigBuilder, IsolatedConfig, OfficePaths,
};
pub use convert::Converter;
pub use engine::{EngineBackend, OfficeSession};
pub use error::{ConfigError, ConversionError, ErrorKind, StorageError, WatermarkError};
pub use job::{ConversionJob, ConversionResult, SourceLocator};
pub use storage::FileStorage;
pub use watermark::add_text_watermark;
