//! Engine readiness checks.
//!
//! Readiness is a plain query with no side effects. For the isolated engine it
//! is answered fresh on every call; being unable to ask counts as "not ready".

use super::command::{display_command, run_supervised};
use super::EngineBackend;
use crate::config::IsolatedConfig;
use std::time::Duration;
use tracing::{debug, error};

/// Upper bound for one `docker ps` probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether `backend` can accept a conversion right now.
pub async fn is_ready(backend: &EngineBackend) -> bool {
    match backend {
        EngineBackend::Bridged(engine) => engine.is_connected(),
        EngineBackend::Isolated(engine) => container_running(engine.config()).await,
    }
}

/// Arguments of the container status query.
pub(crate) fn status_command(config: &IsolatedConfig) -> Vec<String> {
    let mut argv = config.docker_command.clone();
    argv.extend([
        "ps".to_string(),
        "--filter".to_string(),
        format!("name={}", config.container_name),
        "--format".to_string(),
        "{{.Names}}".to_string(),
    ]);
    argv
}

/// Ask the container runtime whether the named container is running.
pub async fn container_running(config: &IsolatedConfig) -> bool {
    let argv = status_command(config);
    match run_supervised(&argv, Some(PROBE_TIMEOUT)).await {
        Ok(out) => {
            let running = out.success
                && out
                    .output
                    .lines()
                    .any(|line| line.trim() == config.container_name);
            debug!(
                "Container '{}' running: {} (exit {:?})",
                config.container_name, running, out.exit_code
            );
            running
        }
        Err(e) => {
            error!(
                "Failed to check container status with `{}`: {}",
                display_command(&argv),
                e
            );
            false
        }
    }
}
