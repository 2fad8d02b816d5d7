//! CLI binary for rockit.
//!
//! A thin shim over the library: each one-shot subcommand opens a session,
//! uploads the given files, runs one transform and writes the artifacts to
//! disk. `serve` exposes the same sessions over HTTP.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use rockit::{
    Event, EventResult, ProgressCallback, RockitConfig, Session, TargetFormat,
    TransformProgressCallback, TransformSpec, UploadedItem,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders a progress bar plus one log line per file.
struct CliProgressCallback {
    bar: ProgressBar,
    /// What `output_len` counts: `bytes` for a recode, `pages` for a merge.
    unit: &'static str,
    /// Per-item start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
}

impl CliProgressCallback {
    fn new(verb: &'static str, unit: &'static str) -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:42.green/238}] {pos:>3}/{len} files  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix(verb);
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            unit,
            start_times: Mutex::new(HashMap::new()),
        })
    }

    fn elapsed_secs(&self, index: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut times| times.remove(&index))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl TransformProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.reset_eta();
    }

    fn on_item_start(&self, index: usize, _total: usize, name: &str) {
        if let Ok(mut times) = self.start_times.lock() {
            times.insert(index, Instant::now());
        }
        self.bar.set_message(name.to_string());
    }

    fn on_item_complete(&self, index: usize, total: usize, name: &str, output_len: usize) {
        let secs = self.elapsed_secs(index);
        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            green("✓"),
            index + 1,
            total,
            name,
            dim(&output_size(output_len, self.unit)),
            dim(&format!("{secs:.2}s")),
        ));
        self.bar.inc(1);
    }

    fn on_item_error(&self, index: usize, total: usize, name: &str, error: &str) {
        let secs = self.elapsed_secs(index);

        // Keep the log tidy; the full message is in the summary.
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(['…']).collect()
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} {:>3}/{:<3} {:<32} {}  {}",
            red("✗"),
            index + 1,
            total,
            name,
            red(&msg),
            dim(&format!("{secs:.2}s")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, total: usize, success_count: usize) {
        self.bar.finish_and_clear();
        let failed = total.saturating_sub(success_count);
        if failed > 0 {
            eprintln!(
                "{} {}/{} files processed  ({} failed)",
                if success_count == 0 { red("✘") } else { cyan("⚠") },
                bold(&success_count.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

fn output_size(len: usize, unit: &str) -> String {
    format!("{len:>8} {unit:<5}")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert every image to PNG, written next to each other in ./out
  rockit convert --to png photo.jpg scan.tiff -o out

  # JPEG with a custom quality
  rockit --jpeg-quality 90 convert --to jpg *.png

  # Merge PDFs in the given order
  rockit merge intro.pdf body.pdf appendix.pdf -o report.pdf

  # Run the HTTP session API
  rockit serve --bind 0.0.0.0:8080

SUPPORTED OUTPUT FORMATS:
  jpg, jpeg, png, bmp, tiff, gif

ENVIRONMENT VARIABLES:
  ROCKIT_TEMP_DIR      Parent directory for session scratch space
  ROCKIT_JPEG_QUALITY  JPEG quality (1-100, default 75)
  ROCKIT_BIND          Listen address for `rockit serve`
  ROCKIT_SESSION_TTL   Idle seconds before `rockit serve` drops a session
  RUST_LOG             Overrides the log filter
"#;

/// Batch image conversion and PDF merging.
#[derive(Parser, Debug)]
#[command(
    name = "rockit",
    version,
    about = "Batch image conversion and PDF merging",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Parent directory for per-session temporary storage.
    #[arg(long, global = true, env = "ROCKIT_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// JPEG encoder quality (1–100).
    #[arg(long, global = true, env = "ROCKIT_JPEG_QUALITY", default_value_t = 75,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Print the event result as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "ROCKIT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "ROCKIT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "ROCKIT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-encode images to one target format.
    Convert {
        /// Target format: jpg, jpeg, png, bmp, tiff, gif.
        #[arg(long = "to", short = 't')]
        target: String,

        /// Input images.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output directory.
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },

    /// Concatenate PDFs, in the given order, into one document.
    Merge {
        /// Input PDFs.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Output file. `.pdf` is appended when missing.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Serve the JSON session API.
    #[cfg(feature = "server")]
    Serve {
        /// Listen address.
        #[arg(long, env = "ROCKIT_BIND", default_value = "127.0.0.1:8080")]
        bind: std::net::SocketAddr,

        /// Seconds a session may sit idle before it is dropped.
        #[arg(long, env = "ROCKIT_SESSION_TTL", default_value_t = 1800,
              value_parser = clap::value_parser!(u64).range(1..))]
        session_ttl: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar already reports per-file status, so library INFO
    // logs are hidden while it is shown.
    let is_serve = !matches!(
        cli.command,
        Command::Convert { .. } | Command::Merge { .. }
    );
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !is_serve;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
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

    match cli.command {
        Command::Convert {
            ref target,
            ref files,
            ref output,
        } => {
            // Fail fast on a bad target, before reading any input.
            target
                .parse::<TargetFormat>()
                .context("Invalid --to")?;
            let progress = show_progress.then(|| CliProgressCallback::new("Converting", "bytes"));
            let config = build_config(&cli, progress, None)?;
            let items = read_inputs(files)?;
            let spec = TransformSpec::Convert {
                target_format: target.clone(),
            };
            let out_dir = output.clone();
            let (result, written) = tokio::task::spawn_blocking(move || {
                run_batch(config, items, spec, &out_dir)
            })
            .await??;
            report(&cli, &result, &written)?;
        }
        Command::Merge {
            ref files,
            ref output,
        } => {
            let progress = show_progress.then(|| CliProgressCallback::new("Merging", "pages"));
            let config = build_config(&cli, progress, None)?;
            let items = read_inputs(files)?;
            let (dir, name) = match output {
                Some(path) => (
                    path.parent().map(Path::to_path_buf).unwrap_or_default(),
                    path.file_name()
                        .map(|n| n.to_string_lossy().into_owned()),
                ),
                None => (PathBuf::new(), None),
            };
            let spec = TransformSpec::Merge { output_name: name };
            let (result, written) = tokio::task::spawn_blocking(move || {
                run_batch(config, items, spec, &dir)
            })
            .await??;
            report(&cli, &result, &written)?;
        }
        #[cfg(feature = "server")]
        Command::Serve { bind, session_ttl } => {
            let config = build_config(&cli, None, Some(Duration::from_secs(session_ttl)))?;
            rockit::server::serve(bind, config)
                .await
                .with_context(|| format!("Server on {bind} failed"))?;
        }
    }

    Ok(())
}

/// Map global CLI flags to `RockitConfig`.
fn build_config(
    cli: &Cli,
    progress: Option<Arc<CliProgressCallback>>,
    session_ttl: Option<Duration>,
) -> Result<RockitConfig> {
    let mut builder = RockitConfig::builder().jpeg_quality(cli.jpeg_quality);
    if let Some(ttl) = session_ttl {
        builder = builder.session_ttl(ttl);
    }
    if let Some(ref dir) = cli.temp_dir {
        builder = builder.temp_root(dir);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb as ProgressCallback);
    }
    builder.build().context("Invalid configuration")
}

fn read_inputs(files: &[PathBuf]) -> Result<Vec<UploadedItem>> {
    files
        .iter()
        .map(|path| {
            let bytes =
                std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            Ok(UploadedItem::new(name, bytes))
        })
        .collect()
}

/// Upload, transform and write every artifact into `dir`. Returns the event
/// result and the paths written.
fn run_batch(
    config: RockitConfig,
    items: Vec<UploadedItem>,
    spec: TransformSpec,
    dir: &Path,
) -> Result<(EventResult, Vec<PathBuf>)> {
    let mut session = Session::new(Arc::new(config)).context("Failed to open session")?;
    session.handle(Event::Uploaded(items));
    let result = session.handle(Event::TransformRequested(spec));

    let mut written = Vec::new();
    for name in result.artifact_names() {
        let download = session
            .fetch(name)
            .with_context(|| format!("Artifact {name} vanished"))?;
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        let path = dir.join(&download.file_name);
        std::fs::write(&path, &download.bytes)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written.push(path);
    }
    Ok((result, written))
}

fn report(cli: &Cli, result: &EventResult, written: &[PathBuf]) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(result).context("Failed to serialise result")?
        );
    }
    if result.is_failure() {
        bail!("{}", result.status_message());
    }
    if !cli.quiet && !cli.json {
        for line in result.status_message().lines() {
            eprintln!("{line}");
        }
        for path in written {
            eprintln!("{}  {}", green("✔"), bold(&path.display().to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_size_is_labelled() {
        assert_eq!(output_size(2048, "bytes"), "    2048 bytes");
        assert_eq!(output_size(3, "pages"), "       3 pages");
    }

    #[cfg(feature = "server")]
    #[test]
    fn serve_reads_session_ttl() {
        let cli = Cli::try_parse_from(["rockit", "serve", "--session-ttl", "60"]).unwrap();
        match cli.command {
            Command::Serve { session_ttl, .. } => assert_eq!(session_ttl, 60),
            _ => panic!("expected serve"),
        }
        assert!(Cli::try_parse_from(["rockit", "serve", "--session-ttl", "0"]).is_err());
    }
}
