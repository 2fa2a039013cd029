//! CLI binary for edgequake-pdf2table.
//!
//! A thin shim over the library crate: `extract` runs one job locally with
//! live progress bars, `serve` starts the HTTP boundary.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf2table::pipeline::input::{expand_inputs, resolve_input};
use edgequake_pdf2table::server::{self, AppState};
use edgequake_pdf2table::{
    CredentialStore, Credentials, ExtractionConfig, ExtractionCoordinator, ExtractionJob,
    HistorySink, JobOutcome, JsonlHistory, MemoryHistory, ProgressEvent, TrustedLocalUser,
};
use futures::StreamExt;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
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

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── Terminal progress display ────────────────────────────────────────────────

/// One bar per document plus a global bar pinned at the bottom.
struct JobProgress {
    multi: MultiProgress,
    global: ProgressBar,
    documents: HashMap<String, ProgressBar>,
}

impl JobProgress {
    fn new() -> Self {
        let multi = MultiProgress::new();
        let global = multi.add(ProgressBar::new(0));
        global.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  \
                 ⏱ {elapsed_precise}  ETA {eta_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        global.set_prefix("All documents");
        global.enable_steady_tick(Duration::from_millis(80));
        Self {
            multi,
            global,
            documents: HashMap::new(),
        }
    }

    fn document_bar(&mut self, name: &str, total_pages: usize) -> &ProgressBar {
        let multi = &self.multi;
        let global = &self.global;
        self.documents.entry(name.to_string()).or_insert_with(|| {
            let bar = multi.insert_before(global, ProgressBar::new(total_pages as u64));
            bar.set_style(
                ProgressStyle::with_template("  {prefix:<32!} [{bar:30.cyan/238}] {pos:>3}/{len}")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("█▉▊▋▌▍▎▏  "),
            );
            bar.set_prefix(name.to_string());
            bar
        })
    }

    fn on_event(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::DocumentProgress {
                document_name,
                page_number,
                total_pages,
                ..
            } => {
                let bar = self.document_bar(document_name, *total_pages);
                bar.set_position(*page_number as u64);
            }
            ProgressEvent::GlobalProgress {
                pages_attempted,
                total_pages,
                ..
            } => {
                self.global.set_length(*total_pages as u64);
                self.global.set_position(*pages_attempted as u64);
            }
            ProgressEvent::DocumentCompleted(doc) => {
                if let Some(bar) = self.documents.get(&doc.document_name) {
                    bar.finish();
                }
                let skipped = if doc.skipped_pages.is_empty() {
                    String::new()
                } else {
                    red(&format!("  skipped pages {:?}", doc.skipped_pages))
                };
                self.multi
                    .println(format!(
                        "  {} {}  {}  {}{}",
                        green("✓"),
                        bold(&doc.document_name),
                        dim(&format!("{} rows", doc.row_count)),
                        dim(&format!("{:.1}s", doc.elapsed_seconds)),
                        skipped
                    ))
                    .ok();
            }
            ProgressEvent::JobFailed {
                document_name,
                error,
            } => {
                if let Some(bar) = document_name.as_ref().and_then(|n| self.documents.get(n)) {
                    bar.abandon();
                }
                self.multi
                    .println(format!(
                        "  {} {}  {}",
                        red("✗"),
                        bold(document_name.as_deref().unwrap_or("export")),
                        red(error.lines().next().unwrap_or_default())
                    ))
                    .ok();
            }
            ProgressEvent::JobCompleted(_) => {}
        }
    }

    fn finish(&self) {
        self.global.finish_and_clear();
        for bar in self.documents.values() {
            bar.finish_and_clear();
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract invoice lines from two PDFs into one CSV
  pdf2table extract a.pdf b.pdf --prompt "One row per line item: sku, description, qty, unit_price" -o items.csv

  # Prompt from a file, every PDF in a directory, CSV to stdout
  pdf2table extract ./scans --prompt @prompt.txt > rows.csv

  # Full event log and summary as JSON
  pdf2table extract report.pdf --prompt "All table rows" --json

  # Start the HTTP service
  pdf2table serve --users users.toml --port 5000 --history history.jsonl

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium (otherwise the system library is used)
  PDF2TABLE_*             Any long flag, e.g. PDF2TABLE_MAX_RETRIES=5

A .env file in the working directory is loaded on startup.
"#;

/// Extract structured rows from PDF documents using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2table",
    version,
    about = "Extract structured rows from PDF documents using Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2TABLE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "PDF2TABLE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one extraction job locally.
    Extract(ExtractArgs),
    /// Serve the HTTP API.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// PDF files, directories of PDFs, or HTTP/HTTPS URLs.
    #[arg(required = true)]
    inputs: Vec<String>,

    /// What to extract. `@path` reads the prompt from a file.
    #[arg(short, long, env = "PDF2TABLE_PROMPT")]
    prompt: String,

    /// Write the CSV here instead of stdout.
    #[arg(short, long, env = "PDF2TABLE_OUTPUT")]
    output: Option<PathBuf>,

    /// Print every event and the summary as JSON instead of CSV.
    #[arg(long, env = "PDF2TABLE_JSON")]
    json: bool,

    /// Username recorded in the history.
    #[arg(long, env = "USER", default_value = "local")]
    user: String,

    /// Append run records to this JSON-lines file.
    #[arg(long, env = "PDF2TABLE_HISTORY")]
    history: Option<PathBuf>,

    /// Disable progress bars.
    #[arg(long, env = "PDF2TABLE_NO_PROGRESS")]
    no_progress: bool,

    /// HTTP download timeout for URL inputs, in seconds.
    #[arg(long, env = "PDF2TABLE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    #[command(flatten)]
    model: ModelArgs,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to bind.
    #[arg(long, env = "PDF2TABLE_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to bind.
    #[arg(long, env = "PDF2TABLE_PORT", default_value_t = 5000)]
    port: u16,

    /// TOML users file (`[[users]]` with username, email, password_sha256, admin).
    #[arg(long, env = "PDF2TABLE_USERS")]
    users: PathBuf,

    /// Directory for exported CSV files. Default: a temporary directory.
    #[arg(long, env = "PDF2TABLE_EXPORT_DIR")]
    export_dir: Option<PathBuf>,

    /// JSON-lines history file. Default: in memory.
    #[arg(long, env = "PDF2TABLE_HISTORY")]
    history: Option<PathBuf>,

    #[command(flatten)]
    model: ModelArgs,
}

/// Model, retry and rendering knobs shared by both subcommands.
#[derive(Args, Debug)]
struct ModelArgs {
    /// LLM model ID (e.g. gpt-4.1-mini, gemini-2.0-flash, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Maximum model calls per page.
    #[arg(long, env = "PDF2TABLE_MAX_RETRIES", default_value_t = 10)]
    max_retries: u32,

    /// Wall-clock budget per page, in seconds.
    #[arg(long, env = "PDF2TABLE_MAX_WAIT", default_value_t = 30)]
    max_wait: u64,

    /// First rate-limit backoff in seconds; doubles on each further 429.
    #[arg(long, env = "PDF2TABLE_BACKOFF_BASE", default_value_t = 2)]
    backoff_base: u64,

    /// Max LLM output tokens per page.
    #[arg(long, env = "PDF2TABLE_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, env = "PDF2TABLE_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Longest rendered page edge, in pixels.
    #[arg(long, env = "PDF2TABLE_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "PDF2TABLE_PASSWORD")]
    password: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "PDF2TABLE_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Path to the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Progress bars give all the feedback that matters in `extract`; library
    // logs are limited to errors unless --verbose or RUST_LOG says otherwise.
    let show_progress = match &cli.command {
        Command::Extract(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Serve(_) => false,
    };
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
        Command::Extract(args) => run_extract(args, cli.quiet, show_progress).await,
        Command::Serve(args) => run_serve(args).await,
    }
}

async fn run_extract(args: ExtractArgs, quiet: bool, show_progress: bool) -> Result<()> {
    let prompt = read_prompt(&args.prompt).await?;
    let config = build_config(&args.model, None, args.download_timeout).await?;

    let mut documents = Vec::new();
    for input in expand_inputs(&args.inputs).context("Failed to list inputs")? {
        let doc = resolve_input(&input, config.download_timeout_secs)
            .await
            .with_context(|| format!("Failed to read '{}'", input))?;
        documents.push(doc);
    }

    let history: Arc<dyn HistorySink> = match &args.history {
        Some(path) => Arc::new(JsonlHistory::new(path)),
        None => Arc::new(MemoryHistory::new()),
    };
    let coordinator =
        ExtractionCoordinator::from_config(&config, history, Arc::new(TrustedLocalUser))
            .context("Failed to set up extraction")?;

    if !quiet {
        eprintln!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Extracting from {} documents…", documents.len()))
        );
    }

    let job = ExtractionJob::new(documents, prompt, Credentials::new(&args.user, ""));
    let mut events = coordinator.submit(job).await.context("Job rejected")?;

    let mut progress = show_progress.then(JobProgress::new);
    let mut outcome = JobOutcome::default();
    while let Some(event) = events.next().await {
        match progress.as_mut() {
            Some(p) => p.on_event(&event),
            None if !quiet && !args.json => print_event_line(&event),
            None => {}
        }
        outcome.push(event);
    }
    if let Some(p) = &progress {
        p.finish();
    }

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&outcome).context("Failed to serialise outcome")?
        );
    }

    let Some(summary) = outcome.summary.clone() else {
        anyhow::bail!("Every document failed; nothing was extracted");
    };

    if let Some(link) = &summary.download_link {
        let filename = link
            .rsplit("filename=")
            .next()
            .context("Malformed download link")?;
        let csv = coordinator
            .exporter()
            .fetch(filename)
            .await
            .context("Failed to read exported CSV")?;
        match &args.output {
            Some(path) => write_atomic(path, &csv).await?,
            None if !args.json => io::stdout()
                .lock()
                .write_all(&csv)
                .context("Failed to write to stdout")?,
            None => {}
        }
    }

    if !quiet {
        eprintln!(
            "{}  {} rows from {} documents  {}{}",
            if summary.documents_failed == 0 {
                green("✔")
            } else {
                cyan("⚠")
            },
            bold(&summary.total_rows.to_string()),
            summary.documents_completed,
            dim(&format!(
                "{:.1}s, {:.2}s/row",
                summary.total_elapsed_seconds, summary.avg_seconds_per_row
            )),
            match (&args.output, summary.download_link.is_some()) {
                (Some(path), true) => format!("  →  {}", bold(&path.display().to_string())),
                (_, false) => format!("  {}", dim("(no rows, nothing written)")),
                _ => String::new(),
            }
        );
    }

    Ok(())
}

/// Plain log line per event, used when progress bars are off.
fn print_event_line(event: &ProgressEvent) {
    match event {
        ProgressEvent::DocumentProgress {
            document_name,
            page_number,
            total_pages,
            ..
        } => eprintln!("  {} p{}/{}", document_name, page_number, total_pages),
        ProgressEvent::GlobalProgress { .. } => {}
        ProgressEvent::DocumentCompleted(doc) => eprintln!(
            "  {} {}: {} rows, skipped {:?}",
            green("✓"),
            doc.document_name,
            doc.row_count,
            doc.skipped_pages
        ),
        ProgressEvent::JobFailed {
            document_name,
            error,
        } => eprintln!(
            "  {} {}: {}",
            red("✗"),
            document_name.as_deref().unwrap_or("job"),
            error
        ),
        ProgressEvent::JobCompleted(_) => {}
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = build_config(&args.model, args.export_dir.clone(), 120).await?;

    let users = CredentialStore::load(&args.users).context("Failed to load users")?;
    let history: Arc<dyn HistorySink> = match &args.history {
        Some(path) => Arc::new(JsonlHistory::new(path)),
        None => Arc::new(MemoryHistory::new()),
    };
    let authenticator = Arc::new(users);

    let coordinator = ExtractionCoordinator::from_config(&config, history.clone(), authenticator.clone())
        .context("Failed to set up extraction")?;
    let state = AppState::new(Arc::new(coordinator), history, authenticator);

    server::serve(state, &args.host, args.port)
        .await
        .with_context(|| format!("Server on {}:{} failed", args.host, args.port))
}

/// `@path` reads the prompt from a file; anything else is the prompt.
async fn read_prompt(arg: &str) -> Result<String> {
    match arg.strip_prefix('@') {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path)),
        None => Ok(arg.to_string()),
    }
}

/// Map CLI args to `ExtractionConfig`.
async fn build_config(
    args: &ModelArgs,
    export_dir: Option<PathBuf>,
    download_timeout: u64,
) -> Result<ExtractionConfig> {
    let mut builder = ExtractionConfig::builder()
        .max_retries(args.max_retries)
        .max_wait_secs(args.max_wait)
        .backoff_base_secs(args.backoff_base)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_rendered_pixels(args.max_pixels)
        .download_timeout_secs(download_timeout);

    if let Some(ref model) = args.model {
        builder = builder.model(model);
    }
    if let Some(ref provider) = args.provider {
        builder = builder.provider_name(provider);
    }
    if let Some(ref password) = args.password {
        builder = builder.password(password);
    }
    if let Some(ref lib) = args.pdfium_lib {
        builder = builder.pdfium_library(lib);
    }
    if let Some(dir) = export_dir {
        builder = builder.export_dir(dir);
    }
    if let Some(ref path) = args.system_prompt {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read system prompt from {:?}", path))?;
        builder = builder.system_prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

/// Atomic write: temp file, then rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("csv.tmp");
    tokio::fs::write(&tmp_path, bytes)
        .await
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    tokio::fs::rename(&tmp_path, path)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}
