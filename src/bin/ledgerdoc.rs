//! CLI binary for ledgerdoc.
//!
//! A thin shim over the library crate that maps CLI flags to the pipeline,
//! cache and batch configuration and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use ledgerdoc::{
    BatchFile, BatchOptions, BatchProgressCallback, BatchStatus, BatchTracker, CacheConfig,
    CacheStore, CachedExtractOptions, CachedExtractor, DiskCacheStore, DocumentInput,
    ExtractionOptions, ExtractionPipeline, ExtractionResult, FileStatus, FingerprintContext,
    OcrConfig, PipelineConfig, ProgressCallback,
};
use ledgerdoc::pipeline::{PdfiumParser, VisionOcr};
use serde_json::Value;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
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

// ── Batch progress bar using indicatif ───────────────────────────────────────

/// Renders a live progress bar with one log line per finished file. Files
/// may finish out of order when `--concurrency` > 1.
struct CliProgressCallback {
    bar: ProgressBar,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} files  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            errors: AtomicUsize::new(0),
        })
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_file_start(&self, _batch_id: &str, _index: usize, _total: usize, filename: &str) {
        self.bar.set_message(filename.to_string());
    }

    fn on_file_complete(&self, _batch_id: &str, index: usize, total: usize, filename: &str) {
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}",
            green("✓"),
            index + 1,
            total,
            filename
        ));
        self.bar.inc(1);
    }

    fn on_file_error(
        &self,
        _batch_id: &str,
        index: usize,
        total: usize,
        filename: &str,
        error: &str,
    ) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            let mut s: String = error.chars().take(79).collect();
            s.push('\u{2026}');
            s
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:>3}/{:<3}  {}  {}",
            red("✗"),
            index + 1,
            total,
            filename,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _batch_id: &str, completed: usize, failed: usize) {
        self.bar.finish_and_clear();
        let total = completed + failed;
        if failed == 0 {
            eprintln!("{} {} files extracted", green("✔"), bold(&completed.to_string()));
        } else {
            eprintln!(
                "{} {}/{} files extracted  ({} failed)",
                if failed == total { red("✘") } else { cyan("⚠") },
                bold(&completed.to_string()),
                total,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one document for a tenant (cached on disk)
  ledgerdoc extract --tenant acme statement.pdf

  # Full result as JSON, bypassing the cache
  ledgerdoc extract --tenant acme --force-refresh --json statement.pdf

  # Scanned documents: prefer OCR
  ledgerdoc extract --tenant acme --use-ocr scan.pdf

  # Cache key scoped by caller context
  ledgerdoc extract --tenant acme --context source=upload --context year=2024 q1.pdf

  # Batch with 4 files in flight
  ledgerdoc batch --tenant acme --concurrency 4 inbox/*.pdf

  # Cache statistics for one tenant
  ledgerdoc stats --tenant acme

  # Drop a cached entry
  ledgerdoc invalidate --tenant acme statement.pdf

ENVIRONMENT VARIABLES:
  LEDGERDOC_CACHE_DIR     Cache directory
  LEDGERDOC_TENANT        Default tenant id
  OPENAI_API_KEY          OpenAI API key (OCR)
  ANTHROPIC_API_KEY       Anthropic API key (OCR)
  GEMINI_API_KEY          Google Gemini API key (OCR)
  EDGEQUAKE_LLM_PROVIDER  Override OCR provider
  EDGEQUAKE_MODEL         Override OCR model ID
  PDFIUM_LIB_PATH         Path to libpdfium
"#;

/// Tenant-isolated cached extraction for financial PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "ledgerdoc",
    version,
    about = "Tenant-isolated cached extraction of text, tables and entities from PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Cache directory.
    #[arg(long, global = true, env = "LEDGERDOC_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "LEDGERDOC_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "LEDGERDOC_QUIET")]
    quiet: bool,

    /// Print JSON instead of a human summary.
    #[arg(long, global = true, env = "LEDGERDOC_JSON")]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract one document.
    Extract {
        /// PDF file path.
        input: PathBuf,

        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        extraction: ExtractionArgs,

        /// Write the result JSON to this file instead of stdout.
        #[arg(short, long, env = "LEDGERDOC_OUTPUT")]
        output: Option<PathBuf>,
    },

    /// Extract many documents as one tracked job.
    Batch {
        /// PDF file paths.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        scope: ScopeArgs,

        #[command(flatten)]
        extraction: ExtractionArgs,

        /// Files processed at once.
        #[arg(short, long, env = "LEDGERDOC_CONCURRENCY", default_value_t = 1)]
        concurrency: usize,

        /// Disable the progress bar.
        #[arg(long, env = "LEDGERDOC_NO_PROGRESS")]
        no_progress: bool,
    },

    /// Show cache statistics.
    Stats {
        /// Restrict to one tenant.
        #[arg(long, env = "LEDGERDOC_TENANT")]
        tenant: Option<String>,
    },

    /// Remove a document's cached result.
    Invalidate {
        /// PDF file path.
        input: PathBuf,

        #[command(flatten)]
        scope: ScopeArgs,
    },
}

/// Which cache namespace and key a command addresses.
#[derive(Args, Debug)]
struct ScopeArgs {
    /// Tenant id.
    #[arg(long, env = "LEDGERDOC_TENANT")]
    tenant: String,

    /// Fingerprint context entry, `key=value`. Values that parse as JSON are
    /// used as JSON. Repeatable.
    #[arg(long = "context", value_name = "KEY=VALUE")]
    context: Vec<String>,
}

#[derive(Args, Debug)]
struct ExtractionArgs {
    /// Try OCR first; fall back to standard extraction.
    #[arg(long, env = "LEDGERDOC_USE_OCR")]
    use_ocr: bool,

    /// Always run OCR first, even if standard extraction would work.
    #[arg(long, env = "LEDGERDOC_FORCE_OCR")]
    force_ocr: bool,

    /// Skip table extraction.
    #[arg(long)]
    no_tables: bool,

    /// Skip entity extraction.
    #[arg(long)]
    no_entities: bool,

    /// Ignore any cached result and recompute.
    #[arg(long)]
    force_refresh: bool,

    /// Cache entry lifetime in seconds.
    #[arg(long, env = "LEDGERDOC_TTL")]
    ttl: Option<u64>,

    /// Standard text shorter than this triggers the OCR fallback.
    #[arg(long, env = "LEDGERDOC_MIN_TEXT_CHARS", default_value_t = 100)]
    min_text_chars: usize,

    /// Wall-clock OCR budget per document, in seconds.
    #[arg(long, env = "LEDGERDOC_OCR_TIMEOUT", default_value_t = 300)]
    ocr_timeout: u64,

    /// OCR model ID (e.g. gpt-4.1-nano).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// OCR provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// OCR rendering DPI (72–400).
    #[arg(long, env = "LEDGERDOC_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Concurrent OCR page calls.
    #[arg(long, env = "LEDGERDOC_OCR_CONCURRENCY", default_value_t = 10)]
    ocr_concurrency: usize,

    /// PDF user password for encrypted documents.
    #[arg(long, env = "LEDGERDOC_PASSWORD")]
    password: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || matches!(cli.command, Command::Batch { no_progress: false, .. }) {
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

    let mut cache_config = CacheConfig::default();
    if let Some(ref dir) = cli.cache_dir {
        cache_config.directory = dir.clone();
    }

    match cli.command {
        Command::Extract {
            ref input,
            ref scope,
            ref extraction,
            ref output,
        } => {
            let extractor = build_extractor(extraction, &cache_config)?;
            let options = cached_options(scope, extraction)?;
            let doc = DocumentInput::from_path(input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let result = extractor
                .extract_cached(&doc, &options)
                .await
                .context("Extraction failed")?;
            print_result(&cli, &result, output.as_ref())?;
        }

        Command::Batch {
            ref inputs,
            ref scope,
            ref extraction,
            concurrency,
            no_progress,
        } => {
            let extractor = Arc::new(build_extractor(extraction, &cache_config)?);
            let options = BatchOptions {
                extraction: cached_options(scope, extraction)?,
                concurrency: concurrency.max(1),
            };

            let mut tracker = BatchTracker::new(extractor);
            if !cli.quiet && !cli.json && !no_progress {
                let cb: ProgressCallback = CliProgressCallback::new(inputs.len());
                tracker = tracker.with_progress_callback(cb);
            }

            let files = inputs.iter().cloned().map(BatchFile::Path).collect();
            let batch_id = tracker.submit_batch(files, options);
            let status = tracker
                .wait(&batch_id)
                .await
                .context("Batch disappeared before completing")?;
            print_batch(&cli, &status)?;
        }

        Command::Stats { ref tenant } => {
            let store = DiskCacheStore::from_config(&cache_config);
            let stats = store
                .stats(tenant.as_deref())
                .await
                .context("Failed to read cache statistics")?;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&stats).context("Failed to serialise stats")?
                );
            } else {
                println!("Cache:        {}", stats.cache_directory);
                if let Some(ref t) = tenant {
                    println!("Tenant:       {}", t);
                }
                println!("Entries:      {}", stats.total_entries);
                println!("Hits:         {}", stats.cache_hits);
                println!("Misses:       {}", stats.cache_misses);
                println!("Hit rate:     {:.1}%", stats.hit_rate * 100.0);
            }
        }

        Command::Invalidate {
            ref input,
            ref scope,
        } => {
            let store = DiskCacheStore::from_config(&cache_config);
            let extractor = CachedExtractor::new(
                Arc::new(ExtractionPipeline::builder().build()),
                Arc::new(store),
            );
            let bytes = tokio::fs::read(input)
                .await
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let context = parse_context(&scope.context)?;
            let removed = extractor
                .invalidate(&bytes, context.as_ref(), &scope.tenant)
                .await
                .context("Invalidation failed")?;
            if cli.json {
                println!("{}", serde_json::json!({ "removed": removed }));
            } else if !cli.quiet {
                if removed {
                    eprintln!("{} cached entry removed", green("✔"));
                } else {
                    eprintln!("{} no cached entry", dim("·"));
                }
            }
        }
    }

    Ok(())
}

/// Wire pdfium, optional vision OCR and the disk cache together.
fn build_extractor(args: &ExtractionArgs, cache: &CacheConfig) -> Result<CachedExtractor> {
    let pipeline_config = PipelineConfig::builder()
        .min_text_chars(args.min_text_chars)
        .ocr_timeout_secs(args.ocr_timeout)
        .build()
        .context("Invalid pipeline configuration")?;

    let mut ocr_builder = OcrConfig::builder()
        .dpi(args.dpi)
        .concurrency(args.ocr_concurrency);
    if let Some(ref m) = args.model {
        ocr_builder = ocr_builder.model(m.clone());
    }
    if let Some(ref p) = args.provider {
        ocr_builder = ocr_builder.provider_name(p.clone());
    }
    if let Some(ref pwd) = args.password {
        ocr_builder = ocr_builder.password(pwd.clone());
    }
    let ocr_config = ocr_builder.build().context("Invalid OCR configuration")?;

    let parser = match args.password {
        Some(ref pwd) => PdfiumParser::with_password(pwd.clone()),
        None => PdfiumParser::new(),
    };
    let ocr = VisionOcr::new(ocr_config).with_table_config(pipeline_config.clone());

    let pipeline = ExtractionPipeline::builder()
        .parser(Arc::new(parser))
        .ocr(Arc::new(ocr))
        .config(pipeline_config)
        .build();

    Ok(
        CachedExtractor::new(Arc::new(pipeline), Arc::new(DiskCacheStore::from_config(cache)))
            .with_cache_config(cache),
    )
}

fn cached_options(scope: &ScopeArgs, args: &ExtractionArgs) -> Result<CachedExtractOptions> {
    let mut options = CachedExtractOptions::for_tenant(scope.tenant.clone())
        .force_refresh(args.force_refresh)
        .extraction(ExtractionOptions {
            use_ocr: args.use_ocr,
            force_ocr: args.force_ocr,
            extract_tables: !args.no_tables,
            extract_entities: !args.no_entities,
        });
    if let Some(ctx) = parse_context(&scope.context)? {
        options = options.context(ctx);
    }
    if let Some(ttl) = args.ttl {
        options = options.ttl_secs(ttl);
    }
    Ok(options)
}

/// Parse repeated `--context key=value` flags.
fn parse_context(pairs: &[String]) -> Result<Option<FingerprintContext>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let mut ctx = FingerprintContext::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .with_context(|| format!("Invalid context entry '{}': expected KEY=VALUE", pair))?;
        let key = key.trim();
        if key.is_empty() {
            anyhow::bail!("Invalid context entry '{}': empty key", pair);
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        ctx.insert(key.to_string(), value);
    }
    Ok(Some(ctx))
}

fn print_result(cli: &Cli, result: &ExtractionResult, output: Option<&PathBuf>) -> Result<()> {
    if let Some(path) = output {
        let json = serde_json::to_string_pretty(result).context("Failed to serialise result")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        if !cli.quiet {
            eprintln!("{}  →  {}", green("✔"), bold(&path.display().to_string()));
        }
        return Ok(());
    }

    if cli.json {
        let json = serde_json::to_string_pretty(result).context("Failed to serialise result")?;
        println!("{json}");
        return Ok(());
    }

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    handle
        .write_all(result.text.as_bytes())
        .context("Failed to write to stdout")?;
    if !result.text.ends_with('\n') {
        handle.write_all(b"\n").ok();
    }

    if !cli.quiet {
        let meta = &result.metadata;
        eprintln!(
            "{}  {} pages  {} tables  {} entities  {}",
            cyan("◆"),
            meta.page_count,
            result.tables.len(),
            result.entities.len(),
            dim(&format!("source: {:?}", meta.text_source).to_lowercase()),
        );
    }
    Ok(())
}

fn print_batch(cli: &Cli, status: &BatchStatus) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(status).context("Failed to serialise batch status")?
        );
        return Ok(());
    }
    if cli.quiet {
        return Ok(());
    }
    for file in status.files.iter().filter(|f| f.status == FileStatus::Error) {
        eprintln!(
            "  {} {}  {}",
            red("✗"),
            file.filename,
            dim(file.error.as_deref().unwrap_or(""))
        );
    }
    eprintln!(
        "Batch {}  {:?}  {}/{} processed  ({} failed)",
        dim(&status.id),
        status.status,
        status.processed_files,
        status.total_files,
        status.failed_files()
    );
    if let Some(ref e) = status.error {
        eprintln!("  {}", red(e));
    }
    Ok(())
}
