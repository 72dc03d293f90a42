//! Configuration types for the conversion engines.
//!
//! Everything the orchestrator needs to pick and drive a backend lives in
//! [`EngineConfig`], built via [`EngineConfigBuilder`]. The binary resolves
//! each field from a CLI flag or its environment variable at startup and the
//! resulting config is immutable for the life of the process.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which engine strategy serves conversions. Chosen once per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// Long-lived office process on this host. (default)
    #[default]
    Bridged,
    /// Office suite inside a separately managed container.
    Isolated,
}

impl FromStr for BackendMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "bridged" | "local" | "uno" => Ok(BackendMode::Bridged),
            "isolated" | "docker" | "container" => Ok(BackendMode::Isolated),
            other => Err(ConfigError::UnknownBackend(other.to_string())),
        }
    }
}

impl fmt::Display for BackendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendMode::Bridged => f.write_str("bridged"),
            BackendMode::Isolated => f.write_str("isolated"),
        }
    }
}

/// Filesystem locations of the office installation used by the bridged engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfficePaths {
    /// The `soffice` executable.
    pub executable: PathBuf,
    /// Installation root.
    pub install_path: PathBuf,
    /// `program/` directory; the listener runs from here.
    pub program_path: PathBuf,
    /// URE shared libraries, prepended to the dynamic loader path.
    pub runtime_path: PathBuf,
}

impl OfficePaths {
    /// Platform default installation layout.
    pub fn detect() -> Self {
        if cfg!(target_os = "macos") {
            Self {
                executable: "/Applications/LibreOffice.app/Contents/MacOS/soffice".into(),
                install_path: "/Applications/LibreOffice.app/Contents".into(),
                program_path: "/Applications/LibreOffice.app/Contents/Resources/program".into(),
                runtime_path: "/Applications/LibreOffice.app/Contents/Resources/ure/lib".into(),
            }
        } else {
            Self {
                executable: "/usr/bin/libreoffice".into(),
                install_path: "/usr/lib/libreoffice".into(),
                program_path: "/usr/lib/libreoffice/program".into(),
                runtime_path: "/usr/lib/libreoffice/ure/lib".into(),
            }
        }
    }
}

impl Default for OfficePaths {
    fn default() -> Self {
        Self::detect()
    }
}

/// Settings of the long-lived office listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeOptions {
    /// Private user profile for the listener. `None` uses a temp directory.
    pub profile_dir: Option<PathBuf>,
    /// How long to wait after spawning before declaring the listener alive.
    /// Default: 3000.
    pub startup_wait_ms: u64,
    /// Wall-clock limit for one store, in seconds. Stores hold the bridged
    /// gate, so a hung store would stall every later conversion. Default: 300.
    pub store_timeout_secs: u64,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            profile_dir: None,
            startup_wait_ms: 3000,
            store_timeout_secs: 300,
        }
    }
}

/// Settings of the container-hosted engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IsolatedConfig {
    /// Name of the container running the office suite.
    /// Default: `pdf-converter-libreoffice`.
    pub container_name: String,

    /// Wall-clock limit for one conversion command, in seconds. Default: 30.
    pub timeout_secs: u64,

    /// Program (plus leading arguments) used for `ps` and `exec`.
    /// Default: `["docker"]`.
    pub docker_command: Vec<String>,

    /// Office executable inside the container. Default: `libreoffice`.
    pub engine_program: String,

    /// Command that brings the container up.
    /// Default: `docker-compose up -d libreoffice`.
    pub start_command: Vec<String>,

    /// Command that tears the container down. Default: `docker-compose down`.
    pub stop_command: Vec<String>,

    /// Local side of the shared input mount. Default: `uploads`.
    pub shared_input_dir: PathBuf,

    /// Local side of the shared output mount. Default: `outputs`.
    pub shared_output_dir: PathBuf,

    /// Container side of the input mount. Default: `/app/uploads`.
    pub container_input_dir: String,

    /// Container side of the output mount. Default: `/app/outputs`.
    pub container_output_dir: String,

    /// Pause after `start` before re-checking health, in ms. Default: 5000.
    pub settle_interval_ms: u64,

    /// Single wait before the second artifact check, in ms. Default: 2000.
    ///
    /// Writes made inside the container reach the host through the shared
    /// mount with some delay; there is no completion signal to wait on.
    pub artifact_grace_ms: u64,
}

impl Default for IsolatedConfig {
    fn default() -> Self {
        Self {
            container_name: "pdf-converter-libreoffice".to_string(),
            timeout_secs: 30,
            docker_command: vec!["docker".to_string()],
            engine_program: "libreoffice".to_string(),
            start_command: ["docker-compose", "up", "-d", "libreoffice"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            stop_command: ["docker-compose", "down"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            shared_input_dir: PathBuf::from("uploads"),
            shared_output_dir: PathBuf::from("outputs"),
            container_input_dir: "/app/uploads".to_string(),
            container_output_dir: "/app/outputs".to_string(),
            settle_interval_ms: 5000,
            artifact_grace_ms: 2000,
        }
    }
}

impl IsolatedConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn artifact_grace(&self) -> Duration {
        Duration::from_millis(self.artifact_grace_ms)
    }
}

/// Complete engine configuration.
///
/// # Example
/// ```rust
/// use docconv::{BackendMode, EngineConfig};
///
/// let config = EngineConfig::builder()
///     .backend(BackendMode::Isolated)
///     .container_name("office")
///     .isolated_timeout_secs(60)
///     .build()
///     .unwrap();
/// assert_eq!(config.isolated.timeout_secs, 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub backend: BackendMode,
    pub office_paths: OfficePaths,
    pub bridge: BridgeOptions,
    pub isolated: IsolatedConfig,
    /// Timeout for downloading remote sources, in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: BackendMode::default(),
            office_paths: OfficePaths::default(),
            bridge: BridgeOptions::default(),
            isolated: IsolatedConfig::default(),
            download_timeout_secs: 120,
        }
    }
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`EngineConfig`].
#[derive(Debug)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn backend(mut self, mode: BackendMode) -> Self {
        self.config.backend = mode;
        self
    }

    pub fn office_paths(mut self, paths: OfficePaths) -> Self {
        self.config.office_paths = paths;
        self
    }

    pub fn office_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.office_paths.executable = path.into();
        self
    }

    pub fn office_install_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.office_paths.install_path = path.into();
        self
    }

    pub fn office_program_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.office_paths.program_path = path.into();
        self
    }

    pub fn office_runtime_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.office_paths.runtime_path = path.into();
        self
    }

    pub fn bridge_profile_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.bridge.profile_dir = Some(dir.into());
        self
    }

    pub fn bridge_startup_wait_ms(mut self, ms: u64) -> Self {
        self.config.bridge.startup_wait_ms = ms;
        self
    }

    pub fn bridge_store_timeout_secs(mut self, secs: u64) -> Self {
        self.config.bridge.store_timeout_secs = secs;
        self
    }

    pub fn container_name(mut self, name: impl Into<String>) -> Self {
        self.config.isolated.container_name = name.into();
        self
    }

    pub fn isolated_timeout_secs(mut self, secs: u64) -> Self {
        self.config.isolated.timeout_secs = secs;
        self
    }

    pub fn docker_command(mut self, cmd: Vec<String>) -> Self {
        self.config.isolated.docker_command = cmd;
        self
    }

    pub fn engine_program(mut self, program: impl Into<String>) -> Self {
        self.config.isolated.engine_program = program.into();
        self
    }

    pub fn start_command(mut self, cmd: Vec<String>) -> Self {
        self.config.isolated.start_command = cmd;
        self
    }

    pub fn stop_command(mut self, cmd: Vec<String>) -> Self {
        self.config.isolated.stop_command = cmd;
        self
    }

    pub fn shared_input_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.isolated.shared_input_dir = dir.into();
        self
    }

    pub fn shared_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.isolated.shared_output_dir = dir.into();
        self
    }

    pub fn container_input_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.isolated.container_input_dir = dir.into();
        self
    }

    pub fn container_output_dir(mut self, dir: impl Into<String>) -> Self {
        self.config.isolated.container_output_dir = dir.into();
        self
    }

    pub fn settle_interval_ms(mut self, ms: u64) -> Self {
        self.config.isolated.settle_interval_ms = ms;
        self
    }

    pub fn artifact_grace_ms(mut self, ms: u64) -> Self {
        self.config.isolated.artifact_grace_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<EngineConfig, ConfigError> {
        if self.config.bridge.store_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "bridged store timeout must be ≥ 1 second".into(),
            ));
        }
        let iso = &self.config.isolated;
        if iso.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "isolated timeout must be ≥ 1 second".into(),
            ));
        }
        if iso.container_name.trim().is_empty() {
            return Err(ConfigError::Invalid("container name must not be empty".into()));
        }
        for (name, cmd) in [
            ("docker command", &iso.docker_command),
            ("start command", &iso.start_command),
            ("stop command", &iso.stop_command),
        ] {
            if cmd.first().map_or(true, |p| p.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!("{name} must not be empty")));
            }
        }
        if self.config.download_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "download timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}
