//! CLI binary for docconv.
//!
//! A thin shim over the library crate: maps flags (each with an environment
//! fallback) to `EngineConfig`, then either serves the HTTP API or runs a
//! single operation and prints the result.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use docconv::server::{self, AppState};
use docconv::{
    watermark, BackendMode, ConversionJob, Converter, EngineConfig, FileStorage, FormatCatalog,
    SourceLocator,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

fn spinner(prefix: &str, message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix(prefix.to_string());
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service (bridged engine on this host)
  docconv serve --addr 0.0.0.0:8080

  # Run the HTTP service against the office container
  docconv --backend isolated serve

  # One-off conversion
  docconv convert report.docx --to pdf -o out/

  # Convert from URL, JSON result
  docconv --json convert https://example.com/slides.pptx --to pdf

  # Manage the office container
  docconv --backend isolated engine start
  docconv --backend isolated engine status

  # Stamp a watermark on every page
  docconv watermark contract.pdf "CONFIDENTIAL"

ENVIRONMENT VARIABLES:
  DOCCONV_BACKEND            bridged | isolated
  USE_DOCKER_LIBREOFFICE     "true" selects the isolated backend (legacy switch)
  DOCCONV_CONTAINER_NAME     Office container name
  DOCCONV_ISOLATED_TIMEOUT   Per-conversion timeout in seconds (isolated)
  DOCCONV_OFFICE_EXECUTABLE  Office executable (bridged)
  DOCCONV_STORE_TIMEOUT      Per-store timeout in seconds (bridged)
  PDFIUM_LIB_PATH            Path to libpdfium (watermarking)
  RUST_LOG                   Overrides the log filter

SETUP:
  Bridged:   install LibreOffice on the host.
  Isolated:  provide a compose service named `libreoffice` that mounts
             ./uploads → /app/uploads and ./outputs → /app/outputs.
"#;

/// Convert office documents through LibreOffice.
#[derive(Parser, Debug)]
#[command(
    name = "docconv",
    version,
    about = "Convert office documents (DOCX, XLSX, PPTX, ODT, …) to PDF and other formats",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    engine: EngineArgs,

    /// Output structured JSON instead of text.
    #[arg(long, global = true, env = "DOCCONV_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCCONV_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCCONV_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct EngineArgs {
    /// Engine backend: bridged or isolated.
    #[arg(long, global = true, env = "DOCCONV_BACKEND")]
    backend: Option<BackendMode>,

    /// Office container name (isolated).
    #[arg(long, global = true, env = "DOCCONV_CONTAINER_NAME")]
    container_name: Option<String>,

    /// Per-conversion timeout in seconds (isolated).
    #[arg(long, global = true, env = "DOCCONV_ISOLATED_TIMEOUT", default_value_t = 30)]
    isolated_timeout: u64,

    /// Host side of the shared input mount (isolated).
    #[arg(long, global = true, env = "DOCCONV_SHARED_INPUT")]
    shared_input: Option<PathBuf>,

    /// Host side of the shared output mount (isolated).
    #[arg(long, global = true, env = "DOCCONV_SHARED_OUTPUT")]
    shared_output: Option<PathBuf>,

    /// Office executable (bridged).
    #[arg(long, global = true, env = "DOCCONV_OFFICE_EXECUTABLE")]
    office_executable: Option<PathBuf>,

    /// Office installation root (bridged).
    #[arg(long, global = true, env = "DOCCONV_OFFICE_INSTALL")]
    office_install: Option<PathBuf>,

    /// Office program directory (bridged).
    #[arg(long, global = true, env = "DOCCONV_OFFICE_PROGRAM")]
    office_program: Option<PathBuf>,

    /// Office runtime library directory (bridged).
    #[arg(long, global = true, env = "DOCCONV_OFFICE_RUNTIME")]
    office_runtime: Option<PathBuf>,

    /// Profile directory for the office listener (bridged).
    #[arg(long, global = true, env = "DOCCONV_PROFILE_DIR")]
    profile_dir: Option<PathBuf>,

    /// Per-store timeout in seconds (bridged).
    #[arg(long, global = true, env = "DOCCONV_STORE_TIMEOUT", default_value_t = 300)]
    store_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "DOCCONV_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        /// Listen address.
        #[arg(long, env = "DOCCONV_ADDR", default_value = "0.0.0.0:8080")]
        addr: SocketAddr,

        /// Directory of publicly served files.
        #[arg(long, env = "DOCCONV_STORAGE_DIR", default_value = "files")]
        storage_dir: PathBuf,

        /// Scratch directory for outputs before they are stored.
        #[arg(long, env = "DOCCONV_WORK_DIR", default_value = "work")]
        work_dir: PathBuf,

        /// Public base URL used when building file links.
        #[arg(long, env = "DOCCONV_BASE_URL", default_value = "http://localhost:8080")]
        base_url: String,
    },

    /// Convert one document.
    Convert {
        /// Local file path or HTTP/HTTPS URL.
        input: String,

        /// Target extension (pdf, docx, odt, …).
        #[arg(long = "to", short = 't')]
        target_format: String,

        /// Output directory.
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// List supported target formats.
    Formats,

    /// Inspect or manage the conversion engine.
    Engine {
        #[command(subcommand)]
        action: EngineAction,
    },

    /// Stamp diagonal text on every page of a PDF.
    Watermark {
        /// Local PDF path or URL.
        input: String,

        /// Watermark text.
        text: String,

        /// Output directory.
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum EngineAction {
    /// Report backend and readiness.
    Status,
    /// Start the office container (isolated only).
    Start,
    /// Stop the office container (isolated only).
    Stop,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let serving = matches!(cli.command, Command::Serve { .. });
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || (!serving && !cli.json) {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = build_config(&cli.engine)?;

    match cli.command {
        Command::Serve {
            addr,
            ref storage_dir,
            ref work_dir,
            ref base_url,
        } => serve(config, addr, storage_dir.clone(), work_dir.clone(), base_url.clone()).await,
        Command::Convert {
            ref input,
            ref target_format,
            ref output_dir,
        } => convert(&cli, config, input, target_format, output_dir).await,
        Command::Formats => {
            formats(cli.json)?;
            Ok(())
        }
        Command::Engine { action } => engine(&cli, config, action).await,
        Command::Watermark {
            ref input,
            ref text,
            ref output_dir,
        } => add_watermark(&cli, &config, input, text, output_dir).await,
    }
}

/// Map CLI args to `EngineConfig`.
fn build_config(args: &EngineArgs) -> Result<EngineConfig> {
    let legacy_isolated = std::env::var("USE_DOCKER_LIBREOFFICE")
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let backend = args.backend.unwrap_or(if legacy_isolated {
        BackendMode::Isolated
    } else {
        BackendMode::Bridged
    });

    let mut builder = EngineConfig::builder()
        .backend(backend)
        .isolated_timeout_secs(args.isolated_timeout)
        .bridge_store_timeout_secs(args.store_timeout)
        .download_timeout_secs(args.download_timeout);
    if let Some(ref name) = args.container_name {
        builder = builder.container_name(name.clone());
    }
    if let Some(ref dir) = args.shared_input {
        builder = builder.shared_input_dir(dir);
    }
    if let Some(ref dir) = args.shared_output {
        builder = builder.shared_output_dir(dir);
    }
    if let Some(ref p) = args.office_executable {
        builder = builder.office_executable(p);
    }
    if let Some(ref p) = args.office_install {
        builder = builder.office_install_path(p);
    }
    if let Some(ref p) = args.office_program {
        builder = builder.office_program_path(p);
    }
    if let Some(ref p) = args.office_runtime {
        builder = builder.office_runtime_path(p);
    }
    if let Some(ref p) = args.profile_dir {
        builder = builder.bridge_profile_dir(p);
    }
    builder.build().context("Invalid engine configuration")
}

async fn serve(
    config: EngineConfig,
    addr: SocketAddr,
    storage_dir: PathBuf,
    work_dir: PathBuf,
    base_url: String,
) -> Result<()> {
    let converter = Arc::new(Converter::from_config(&config).await);
    let storage = FileStorage::new(&storage_dir, base_url)
        .with_context(|| format!("Failed to open storage at {}", storage_dir.display()))?;
    tokio::fs::create_dir_all(&work_dir)
        .await
        .with_context(|| format!("Failed to create work dir {}", work_dir.display()))?;

    let state = Arc::new(AppState {
        converter: Arc::clone(&converter),
        storage,
        work_dir,
        download_timeout_secs: config.download_timeout_secs,
    });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Shutdown requested");
    };
    let served = server::serve(state, addr, shutdown).await;
    converter.shutdown().await;
    served.with_context(|| format!("Server on {addr} failed"))
}

async fn convert(
    cli: &Cli,
    config: EngineConfig,
    input: &str,
    target_format: &str,
    output_dir: &Path,
) -> Result<()> {
    let show_progress = !cli.quiet && !cli.json;
    let bar = show_progress.then(|| spinner("Starting", "office engine…"));

    let converter = Converter::from_config(&config).await;
    if let Some(ref bar) = bar {
        bar.set_prefix("Converting");
        bar.set_message(format!("{input} → {target_format}"));
    }

    let start = Instant::now();
    let job = ConversionJob::new(SourceLocator::parse(input), target_format, output_dir);
    let outcome = converter.convert(&job).await;
    converter.shutdown().await;
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    let result = outcome.context("Conversion failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialise result")?
        );
    } else if !cli.quiet {
        let mark = if result.degraded { yellow("⚠") } else { green("✔") };
        eprintln!(
            "{}  {}  {}  {}ms",
            mark,
            bold(&result.output_path.display().to_string()),
            dim(&format!("{} bytes", result.size_bytes)),
            start.elapsed().as_millis()
        );
        if result.degraded {
            eprintln!(
                "   {}",
                yellow("office engine unavailable: the source was copied, not converted")
            );
        }
    }
    Ok(())
}

fn formats(json: bool) -> Result<()> {
    let formats = FormatCatalog::default().snapshot();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&formats).context("Failed to serialise formats")?
        );
    } else {
        for (ext, filter) in &formats {
            println!("{:<6} {}", bold(ext), dim(filter));
        }
    }
    Ok(())
}

async fn engine(cli: &Cli, config: EngineConfig, action: EngineAction) -> Result<()> {
    let converter = Converter::from_config(&config).await;
    let outcome = match action {
        EngineAction::Status => {
            let ready = converter.is_ready().await;
            if cli.json {
                println!(
                    "{}",
                    serde_json::json!({ "backend": converter.backend_kind(), "ready": ready })
                );
            } else {
                println!(
                    "Backend:  {}\nReady:    {}",
                    converter.backend_kind(),
                    if ready { green("yes") } else { red("no") }
                );
            }
            Ok(())
        }
        EngineAction::Start | EngineAction::Stop => {
            if converter.backend_kind() != BackendMode::Isolated {
                converter.shutdown().await;
                bail!("Isolated engine mode is not enabled (use --backend isolated)");
            }
            let bar = (!cli.quiet && !cli.json).then(|| {
                spinner(
                    "Engine",
                    if matches!(action, EngineAction::Start) { "starting…" } else { "stopping…" },
                )
            });
            let res = if matches!(action, EngineAction::Start) {
                converter.start_isolated_engine().await
            } else {
                converter.stop_isolated_engine().await
            };
            if let Some(bar) = bar {
                bar.finish_and_clear();
            }
            res.context("Engine lifecycle command failed").map(|()| {
                if !cli.quiet {
                    let done = if matches!(action, EngineAction::Start) { "started" } else { "stopped" };
                    eprintln!("{}  engine {}", green("✔"), done);
                }
            })
        }
    };
    converter.shutdown().await;
    outcome
}

async fn add_watermark(
    cli: &Cli,
    config: &EngineConfig,
    input: &str,
    text: &str,
    output_dir: &Path,
) -> Result<()> {
    let output = watermark::watermark_locator(
        &SourceLocator::parse(input),
        text,
        output_dir,
        config.download_timeout_secs,
    )
    .await
    .context("Watermark failed")?;

    if cli.json {
        println!("{}", serde_json::json!({ "output": output, "text": text }));
    } else if !cli.quiet {
        eprintln!("{}  {}", green("✔"), bold(&output.display().to_string()));
    }
    Ok(())
}
