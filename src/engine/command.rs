//! Supervised execution of external commands.
//!
//! Spawn → capture stdout and stderr as they arrive → race the exit against an
//! optional wall-clock limit → on expiry kill the child and reap it before
//! returning. The caller gets the exit code and the combined output either
//! way, so failures can carry the engine's own diagnostics.

use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// How long to keep draining output after the child is gone.
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A command that ran to completion (successfully or not).
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub success: bool,
    /// stdout and stderr lines, interleaved in arrival order.
    pub output: String,
}

/// A command that did not run to completion.
#[derive(Debug)]
pub enum CommandFailure {
    /// The argument vector was empty.
    Empty,
    /// The program could not be started.
    Spawn(std::io::Error),
    /// Waiting on the child failed.
    Wait(std::io::Error),
    /// The limit elapsed; the child has been killed and reaped.
    TimedOut { limit: Duration, output: String },
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandFailure::Empty => f.write_str("empty command"),
            CommandFailure::Spawn(e) => write!(f, "failed to start: {e}"),
            CommandFailure::Wait(e) => write!(f, "failed while waiting: {e}"),
            CommandFailure::TimedOut { limit, .. } => {
                write!(f, "timed out after {}s", limit.as_secs())
            }
        }
    }
}

/// Render an argument vector for logs.
pub fn display_command(argv: &[String]) -> String {
    argv.iter()
        .map(|a| {
            if a.is_empty() || a.contains(char::is_whitespace) {
                format!("{a:?}")
            } else {
                a.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Run `argv` to completion, killing it if `limit` elapses first.
pub async fn run_supervised(
    argv: &[String],
    limit: Option<Duration>,
) -> Result<CommandOutput, CommandFailure> {
    let (program, args) = argv.split_first().ok_or(CommandFailure::Empty)?;

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(CommandFailure::Spawn)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let mut readers = Vec::with_capacity(2);
    if let Some(out) = child.stdout.take() {
        readers.push(tokio::spawn(forward_lines(out, tx.clone())));
    }
    if let Some(err) = child.stderr.take() {
        readers.push(tokio::spawn(forward_lines(err, tx.clone())));
    }
    drop(tx);

    let status = match limit {
        Some(limit) => {
            let waited = tokio::time::timeout(limit, child.wait()).await;
            match waited {
                Ok(status) => status.map_err(CommandFailure::Wait)?,
                Err(_) => {
                    warn!(
                        "Command exceeded {}s, killing: {}",
                        limit.as_secs(),
                        display_command(argv)
                    );
                    // kill() also waits, so the process is reaped on return.
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill timed-out command: {}", e);
                    }
                    let output = collect_output(rx).await;
                    readers.iter().for_each(|r| r.abort());
                    return Err(CommandFailure::TimedOut { limit, output });
                }
            }
        }
        None => child.wait().await.map_err(CommandFailure::Wait)?,
    };

    let output = collect_output(rx).await;
    readers.iter().for_each(|r| r.abort());

    Ok(CommandOutput {
        exit_code: status.code(),
        success: status.success(),
        output,
    })
}

async fn forward_lines<R>(reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                debug!("engine output: {}", line);
                if tx.send(line).is_err() {
                    break;
                }
            }
        }
    }
}

/// Gather forwarded lines until both pipes close, bounded by [`DRAIN_GRACE`]
/// in case a grandchild still holds a pipe open.
async fn collect_output(mut rx: mpsc::UnboundedReceiver<String>) -> String {
    let mut output = String::new();
    let drain = async {
        while let Some(line) = rx.recv().await {
            output.push_str(&line);
            output.push('\n');
        }
    };
    let _ = tokio::time::timeout(DRAIN_GRACE, drain).await;
    output
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Instant;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    #[tokio::test]
    async fn captures_stdout_and_stderr() {
        let out = run_supervised(&sh("echo out; echo err 1>&2"), Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(out.success);
        assert_eq!(out.exit_code, Some(0));
        assert!(out.output.contains("out"));
        assert!(out.output.contains("err"));
    }

    #[tokio::test]
    async fn reports_non_zero_exit() {
        let out = run_supervised(&sh("echo broken; exit 3"), None).await.unwrap();
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert!(out.output.contains("broken"));
    }

    #[tokio::test]
    async fn kills_command_that_outlives_limit() {
        let start = Instant::now();
        let failure = run_supervised(&sh("echo started; exec sleep 30"), Some(Duration::from_millis(300)))
            .await
            .unwrap_err();
        assert!(start.elapsed() < Duration::from_secs(5));
        match failure {
            CommandFailure::TimedOut { output, .. } => assert!(output.contains("started")),
            other => panic!("expected timeout, got {other}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_spawn_failure() {
        let failure = run_supervised(&["/no/such/program-docconv".to_string()], None)
            .await
            .unwrap_err();
        assert!(matches!(failure, CommandFailure::Spawn(_)));
    }

    #[tokio::test]
    async fn empty_argv_is_rejected() {
        assert!(matches!(
            run_supervised(&[], None).await,
            Err(CommandFailure::Empty)
        ));
    }

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let argv = vec!["docker".to_string(), "pdf:MS Word 97".to_string()];
        assert_eq!(display_command(&argv), "docker \"pdf:MS Word 97\"");
    }
}
