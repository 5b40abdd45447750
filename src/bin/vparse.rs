//! CLI binary for vision-parser.
//!
//! A thin shim over the library crate that maps CLI flags to `ParserConfig`,
//! runs the parse and prints JSON.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use vision_parser::batch::page_requests;
use vision_parser::schema;
use vision_parser::{
    page_count, parse_batch, preview, EventCallback, PageSelection, ParseEventCallback,
    ParserConfig, ParserService, SchemaRegistry, SchemaSource,
};

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Progress bar plus one log line per finished page. Pages may finish out of
/// order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<usize, Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} pages  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Parsing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, page: usize) -> f64 {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&page)
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    fn finish(&self, total: usize) {
        self.bar.finish_and_clear();
        let failed = self.errors.load(Ordering::SeqCst);
        if failed == 0 {
            eprintln!("{} {} pages parsed", green("✔"), bold(&total.to_string()));
        } else {
            eprintln!(
                "{} {}/{} pages parsed  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&(total - failed).to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

impl ParseEventCallback for CliProgressCallback {
    fn on_parser_created(&self, schema: &str) {
        self.bar
            .println(format!("{} {}", cyan("◆"), bold(&format!("Using schema '{schema}'"))));
    }

    fn on_parse_start(&self, _document: &str, page: usize, _schema: &str) {
        self.start_times
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(page, Instant::now());
        self.bar.set_message(format!("page {page}"));
    }

    fn on_parse_complete(&self, _document: &str, page: usize, _schema: &str, field_count: usize) {
        let secs = self.elapsed_secs(page);
        self.bar.println(format!(
            "  {} Page {:>3}  {:<10}  {}",
            green("✓"),
            page,
            dim(&format!("{field_count:>3} fields")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_parse_error(&self, _document: &str, page: usize, _schema: &str, error: &str) {
        let secs = self.elapsed_secs(page);
        self.errors.fetch_add(1, Ordering::SeqCst);

        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Page {:>3}  {}  {}",
            red("✗"),
            page,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Parse page 1 of a resume with the default schema
  vparse parse cv.pdf

  # Invoice schema, pages 1-3, three requests in flight
  vparse parse --schema invoice --pages 1-3 --concurrency 3 invoice.pdf

  # A photographed receipt, custom prompt, written to a file
  vparse parse --schema receipt --prompt "Only the totals" receipt.jpg -o out.json

  # A base64 image (bare or data: URI) read from a file
  vparse parse --base64 --schema id_card id.b64

  # Render page 2 to PNG without calling the model
  vparse preview --page 2 report.pdf -o page2.png

  # Schemas
  vparse schemas list
  vparse --schemas-dir ./schemas schemas validate ./schemas/*.json

ENVIRONMENT VARIABLES:
  GOOGLE_API_KEY             Credential for the hosted endpoint
  VISION_PARSER_SCHEMAS_DIR  Directory of *.json schemas (default: built-ins)
  PDFIUM_LIB_PATH            pdfium shared library, file or directory
  RUST_LOG                   Overrides --verbose / --quiet log filtering
"#;

/// Extract schema-shaped JSON from PDFs and images using Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "vparse",
    version,
    about = "Extract schema-shaped JSON from PDFs and images using Vision LLMs",
    long_about = "Render one or more pages of a PDF (or take a raster image as-is), send them to an \
OpenAI-compatible structured-output vision model together with a JSON Schema, and print the \
extracted JSON. Defaults to gemini-2.0-flash on the hosted Gemini API.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory of *.json schema files (default: the bundled schemas).
    #[arg(long, global = true, env = "VISION_PARSER_SCHEMAS_DIR")]
    schemas_dir: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "VPARSE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "VPARSE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse document pages into JSON.
    Parse(ParseArgs),
    /// Show page count and render one page, without calling the model.
    Preview(PreviewArgs),
    /// Inspect schemas.
    #[command(subcommand)]
    Schemas(SchemasCommand),
}

#[derive(Args, Debug)]
struct ParseArgs {
    /// PDF, image (.jpg .jpeg .png .gif .bmp) or, with --base64, a text file of base64.
    input: PathBuf,

    /// Schema name (default: the configured default schema).
    #[arg(short, long, env = "VPARSE_SCHEMA")]
    schema: Option<String>,

    /// Schema used when --schema is not given.
    #[arg(long, env = "VPARSE_DEFAULT_SCHEMA", default_value = vision_parser::config::DEFAULT_SCHEMA)]
    default_schema: String,

    /// Page selection: all, 5, 3-15, or 1,3,5,7.
    #[arg(long, env = "VPARSE_PAGES", default_value = "1")]
    pages: String,

    /// Instruction sent with the image (default: per-schema prompt).
    #[arg(long, env = "VPARSE_PROMPT", conflicts_with = "prompt_file")]
    prompt: Option<String>,

    /// Read the instruction from a text file.
    #[arg(long, env = "VPARSE_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Treat INPUT as base64 text (bare or data: URI) instead of a document.
    #[arg(long)]
    base64: bool,

    /// Write JSON to this file instead of stdout.
    #[arg(short, long, env = "VPARSE_OUTPUT")]
    output: Option<PathBuf>,

    /// Model ID.
    #[arg(long, env = "VPARSE_MODEL", default_value = vision_parser::config::DEFAULT_MODEL)]
    model: String,

    /// OpenAI-compatible base URL.
    #[arg(long, env = "VPARSE_BASE_URL", default_value = vision_parser::config::DEFAULT_BASE_URL)]
    base_url: String,

    /// API key (default: read from GOOGLE_API_KEY).
    #[arg(long, env = "VPARSE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Rendering DPI for PDF pages (36–400).
    #[arg(long, env = "VPARSE_DPI", default_value_t = 72,
          value_parser = clap::value_parser!(u32).range(36..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "VPARSE_PASSWORD")]
    password: Option<String>,

    /// Sampling temperature (0.0–2.0).
    #[arg(long, env = "VPARSE_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// Max output tokens per page.
    #[arg(long, env = "VPARSE_MAX_TOKENS")]
    max_tokens: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long, env = "VPARSE_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Pages parsed concurrently.
    #[arg(short, long, env = "VPARSE_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Compact JSON instead of pretty-printed.
    #[arg(long)]
    compact: bool,

    /// Disable progress bar.
    #[arg(long, env = "VPARSE_NO_PROGRESS")]
    no_progress: bool,
}

#[derive(Args, Debug)]
struct PreviewArgs {
    /// PDF or image.
    input: PathBuf,

    /// Page to render (1-indexed).
    #[arg(long, default_value_t = 1)]
    page: usize,

    /// Rendering DPI for PDF pages (36–400).
    #[arg(long, default_value_t = 72,
          value_parser = clap::value_parser!(u32).range(36..=400))]
    dpi: u32,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "VPARSE_PASSWORD")]
    password: Option<String>,

    /// Write the rendered image here; otherwise print JSON with the base64.
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum SchemasCommand {
    /// List available schemas.
    List {
        /// Print full schema documents as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Validate schema files.
    Validate {
        /// JSON files to check.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs for multi-page parses.
    let show_progress = match cli.command {
        Command::Parse(ref a) => !cli.quiet && !a.no_progress && !a.base64,
        _ => false,
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

    let source = match cli.schemas_dir {
        Some(ref dir) => SchemaSource::Directory(dir.clone()),
        None => SchemaSource::Builtin,
    };

    match cli.command {
        Command::Parse(ref args) => run_parse(args, source, show_progress, cli.quiet).await,
        Command::Preview(ref args) => run_preview(args).await,
        Command::Schemas(SchemasCommand::List { json }) => list_schemas(source, json),
        Command::Schemas(SchemasCommand::Validate { ref files }) => validate_files(files),
    }
}

// ── parse ────────────────────────────────────────────────────────────────

async fn run_parse(
    args: &ParseArgs,
    source: SchemaSource,
    show_progress: bool,
    quiet: bool,
) -> Result<()> {
    let prompt = match args.prompt_file {
        Some(ref path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read prompt from {:?}", path))?,
        ),
        None => args.prompt.clone(),
    };

    if args.base64 {
        let service = ParserService::new(build_config(args, None)?, source)
            .context("Failed to start parser service")?;
        let text = tokio::fs::read_to_string(&args.input)
            .await
            .with_context(|| format!("Failed to read base64 from {:?}", args.input))?;
        let data = service
            .parse_base64(&text, args.schema.as_deref(), prompt.as_deref())
            .await
            .context("Parse failed")?;
        return write_json(&data, args);
    }

    let selection = parse_page_selection(&args.pages)?;
    let total = page_count(&args.input, args.password.as_deref())
        .await
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let requests = page_requests(
        &args.input,
        &selection,
        total,
        args.schema.as_deref(),
        prompt.as_deref(),
    )
    .context("No pages selected")?;
    let selected = requests.len();

    let progress = show_progress.then(|| CliProgressCallback::new(selected));
    let service = ParserService::new(
        build_config(args, progress.clone().map(|p| p as EventCallback))?,
        source,
    )
    .context("Failed to start parser service")?;

    let start = Instant::now();
    let results = parse_batch(&service, requests, args.concurrency).await;
    if let Some(ref p) = progress {
        p.finish(selected);
    }

    let failed = results.iter().filter(|r| !r.is_ok()).count();
    if !quiet && !show_progress {
        eprintln!(
            "Parsed {}/{} pages in {}ms",
            selected - failed,
            selected,
            start.elapsed().as_millis()
        );
    }

    // a single page prints its JSON directly
    if let [only] = results.as_slice() {
        match (&only.data, &only.error) {
            (Some(data), _) => write_json(data, args)?,
            (None, Some(err)) => anyhow::bail!("Parse failed: {err}"),
            (None, None) => anyhow::bail!("Parse failed"),
        }
        return Ok(());
    }

    let value = serde_json::to_value(&results).context("Failed to serialise results")?;
    write_json(&value, args)?;
    if failed == selected {
        anyhow::bail!("All {selected} pages failed");
    }
    Ok(())
}

/// Map CLI args to `ParserConfig`.
fn build_config(args: &ParseArgs, events: Option<EventCallback>) -> Result<ParserConfig> {
    let mut builder = ParserConfig::builder()
        .model(&args.model)
        .base_url(&args.base_url)
        .temperature(args.temperature)
        .request_timeout_secs(args.timeout)
        .default_schema(&args.default_schema)
        .dpi(args.dpi);

    if let Some(ref key) = args.api_key {
        builder = builder.api_key(key);
    }
    if let Some(n) = args.max_tokens {
        builder = builder.max_tokens(n);
    }
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd);
    }
    if let Some(cb) = events {
        builder = builder.event_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn write_json(value: &serde_json::Value, args: &ParseArgs) -> Result<()> {
    let mut text = if args.compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
    .context("Failed to serialise JSON")?;
    text.push('\n');

    match args.output {
        Some(ref path) => std::fs::write(path, text)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => io::stdout()
            .lock()
            .write_all(text.as_bytes())
            .context("Failed to write to stdout"),
    }
}

/// Parse `--pages` string into `PageSelection`.
fn parse_page_selection(s: &str) -> Result<PageSelection> {
    let s = s.trim().to_lowercase();

    if s == "all" {
        return Ok(PageSelection::All);
    }

    // Range: "3-15"
    if let Some((start, end)) = s.split_once('-') {
        let start: usize = start.trim().parse().context("Invalid start page in range")?;
        let end: usize = end.trim().parse().context("Invalid end page in range")?;
        if start < 1 {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", start);
        }
        if start > end {
            anyhow::bail!("Invalid page range '{}-{}': start must be <= end", start, end);
        }
        return Ok(PageSelection::Range(start, end));
    }

    // Set: "1,3,5,7"
    if s.contains(',') {
        let pages: Vec<usize> = s
            .split(',')
            .map(|p| {
                p.trim()
                    .parse::<usize>()
                    .with_context(|| format!("Invalid page number: '{}'", p.trim()))
            })
            .collect::<Result<Vec<_>>>()?;
        if pages.contains(&0) {
            anyhow::bail!("Pages are 1-indexed, minimum is 1 (got 0)");
        }
        return Ok(PageSelection::Set(pages));
    }

    // Single page: "5"
    let page: usize = s.parse().context("Invalid page number")?;
    if page < 1 {
        anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {})", page);
    }
    Ok(PageSelection::Single(page))
}

// ── preview ──────────────────────────────────────────────────────────────

async fn run_preview(args: &PreviewArgs) -> Result<()> {
    let mut builder = ParserConfig::builder().dpi(args.dpi);
    if let Some(ref pwd) = args.password {
        builder = builder.password(pwd);
    }
    let options = builder.build().context("Invalid configuration")?.render;

    let p = preview(&args.input, args.page, &options)
        .await
        .with_context(|| format!("Failed to preview {}", args.input.display()))?;

    match args.output {
        Some(ref path) => {
            let bytes = STANDARD
                .decode(&p.preview)
                .context("Rendered preview is not valid base64")?;
            std::fs::write(path, bytes)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            eprintln!(
                "{} page {}/{} ({}) → {}",
                green("✔"),
                args.page,
                p.page_count,
                p.mime_type,
                bold(&path.display().to_string())
            );
        }
        None => {
            println!(
                "{}",
                serde_json::to_string_pretty(&p).context("Failed to serialise preview")?
            );
        }
    }
    Ok(())
}

// ── schemas ──────────────────────────────────────────────────────────────

fn list_schemas(source: SchemaSource, json: bool) -> Result<()> {
    let registry = SchemaRegistry::load(source).context("Failed to load schemas")?;

    if json {
        let all: serde_json::Map<String, serde_json::Value> = registry
            .names()
            .into_iter()
            .filter_map(|name| {
                let value = registry.get(&name).ok()?.as_value().clone();
                Some((name, value))
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&all).context("Failed to serialise schemas")?
        );
        return Ok(());
    }

    for name in registry.names() {
        let s = registry.get(&name)?;
        println!(
            "{:<16} {:<20} {}",
            bold(&name),
            s.title(),
            dim(&format!("{} fields", s.properties().len()))
        );
    }
    Ok(())
}

fn validate_files(files: &[PathBuf]) -> Result<()> {
    let mut invalid = 0usize;
    for path in files {
        match validate_file(path) {
            Ok(()) => println!("{} {}", green("✓"), path.display()),
            Err(e) => {
                invalid += 1;
                println!("{} {}  {}", red("✗"), path.display(), red(&format!("{e:#}")));
            }
        }
    }
    if invalid > 0 {
        anyhow::bail!("{invalid} of {} schema files are invalid", files.len());
    }
    Ok(())
}

fn validate_file(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path).context("unreadable")?;
    let value: serde_json::Value = serde_json::from_str(&text).context("not JSON")?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    schema::validate(&name, &value)?;
    Ok(())
}
