//! CLI binary for wikiscan.
//!
//! A thin shim over the library crate: maps flags to `PipelineConfig` and
//! `LabelingConfig`, wires the engines, and prints results.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use wikiscan::calibrate::probe_pages;
use wikiscan::pipeline::input::resolve_input;
use wikiscan::pipeline::llm::{resolve_provider, LlmReformatter, VisionPageNumberReader, VisionTranscriber};
use wikiscan::pipeline::ocr::TesseractOcr;
use wikiscan::pipeline::postprocess::repair_page_seams;
use wikiscan::pipeline::render::{PdfiumRenderer, SourceDocument};
use wikiscan::{
    assemble, assemble_batch, assign_labels, label_and_extract, merge_results, run_jobs, shard_jobs,
    write_output, BatchProgressCallback, CalibrationResult, Calibrator, CheckpointStore, EngineMode,
    EngineUsed, Engines, IllustrationRange, JsonCheckpointStore, LabelingConfig, PipelineConfig,
    ProgressCallback, StrategyMode,
};

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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress for one or more concurrent batch jobs sharing one bar.
struct CliProgressCallback {
    bar: ProgressBar,
    start_times: Mutex<HashMap<(String, usize), Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} pages  \
             ⏱ {elapsed_precise}  ETA {eta_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);
        bar.set_style(style);
        bar.set_prefix("Transcribing");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self, job_id: &str, page: usize) -> f64 {
        self.start_times
            .lock()
            .ok()
            .and_then(|mut m| m.remove(&(job_id.to_string(), page)))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, job_id: &str, total_pages: usize) {
        self.bar.inc_length(total_pages as u64);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("{job_id}: {total_pages} pages"))
        ));
    }

    fn on_page_resumed(&self, _job_id: &str, _page: usize) {
        self.bar.inc(1);
    }

    fn on_page_start(&self, job_id: &str, page: usize, mode: EngineMode) {
        if let Ok(mut m) = self.start_times.lock() {
            m.insert((job_id.to_string(), page), Instant::now());
        }
        self.bar.set_message(format!("page {page} ({mode})"));
    }

    fn on_page_complete(&self, job_id: &str, page: usize, engine: EngineUsed, text_len: usize) {
        let secs = self.elapsed_secs(job_id, page);
        let mark = if engine == EngineUsed::SecondaryRaw {
            yellow("~")
        } else {
            green("✓")
        };
        self.bar.println(format!(
            "  {} Page {:>4}  {:<20}  {}  {}",
            mark,
            page,
            engine.to_string(),
            dim(&format!("{text_len:>5} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, job_id: &str, page: usize, error: &str) {
        let secs = self.elapsed_secs(job_id, page);
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} Page {:>4}  {}  {}",
            red("✗"),
            page,
            red(&msg),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_mode_change(&self, job_id: &str, from: EngineMode, to: EngineMode) {
        self.bar
            .println(format!("  {} {job_id}: {from} → {to}", yellow("⚠")));
    }

    fn on_batch_complete(&self, job_id: &str, transcribed: usize, skipped: usize, cancelled: bool) {
        let status = if cancelled {
            yellow("paused")
        } else if skipped == 0 {
            green("done")
        } else {
            cyan("done")
        };
        self.bar.println(format!(
            "{} {job_id}: {transcribed} transcribed, {skipped} skipped",
            status
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Find the physical page printed "1"
  wikiscan calibrate book.pdf

  # Quick OCR-only extraction with page labels
  wikiscan extract book.pdf --cover --first-page 9 --illustrations 40-47 -o book.txt

  # Resumable adaptive transcription in 50-page shards, 2 at a time
  wikiscan batch book.pdf --job-id book --cover --first-page 9 \
      --shard-size 50 --jobs 2 -o book.txt

  # Rebuild the document from checkpoints after an interrupted run
  wikiscan assemble --job-id book_batch_1 --job-id book_batch_2 \
      --file-name book.pdf --cover --first-page 9 -o book.txt

  # Page count, probe pages and label preview (no API key needed)
  wikiscan inspect book.pdf --cover --first-page 9

STRATEGIES:
  adaptive        Vision model first; OCR + reformat on failure. Two failures
                  in a row force OCR for 5 pages, three disable the vision
                  model for the rest of the job. (default)
  primary-only    Vision model only; failed pages are left empty.
  secondary-only  OCR + reformat only.

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Path to libpdfium
  RUST_LOG                Log filter (overrides --verbose / --quiet)

Press Ctrl-C during `batch` to stop after the current page; rerun the same
command to resume.
"#;

/// Digitise scanned book PDFs into wiki-formatted text.
#[derive(Parser, Debug)]
#[command(
    name = "wikiscan",
    version,
    about = "Digitise scanned book PDFs into wiki-formatted text",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    global: GlobalArgs,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// LLM model ID.
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Transcription rendering DPI (72–600).
    #[arg(long, global = true, env = "WIKISCAN_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// Calibration probe rendering DPI.
    #[arg(long, global = true, env = "WIKISCAN_CALIBRATION_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    calibration_dpi: u32,

    /// Per-call engine timeout in seconds.
    #[arg(long, global = true, env = "WIKISCAN_ENGINE_TIMEOUT", default_value_t = 120)]
    engine_timeout: u64,

    /// Retries inside the vision engine for transport errors.
    #[arg(long, global = true, env = "WIKISCAN_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Max LLM output tokens per page.
    #[arg(long, global = true, env = "WIKISCAN_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "WIKISCAN_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Directory holding per-job checkpoint files.
    #[arg(long, global = true, env = "WIKISCAN_CHECKPOINT_DIR", default_value = ".wikiscan")]
    checkpoint_dir: PathBuf,

    /// Tesseract executable.
    #[arg(long, global = true, env = "WIKISCAN_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "WIKISCAN_PASSWORD")]
    password: Option<String>,

    /// HTTP download timeout in seconds for URL inputs.
    #[arg(long, global = true, env = "WIKISCAN_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Output JSON instead of text where supported.
    #[arg(long, global = true, env = "WIKISCAN_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "WIKISCAN_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "WIKISCAN_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "WIKISCAN_QUIET")]
    quiet: bool,
}

/// Book layout flags shared by every subcommand that labels pages.
#[derive(Args, Debug, Clone)]
struct LabelArgs {
    /// Physical page 1 is a cover: no label, no text.
    #[arg(long, env = "WIKISCAN_COVER")]
    cover: bool,

    /// Physical page printed "1". Calibrated automatically when omitted
    /// (batch only); otherwise 1.
    #[arg(long, env = "WIKISCAN_FIRST_PAGE")]
    first_page: Option<usize>,

    /// Illustration plates: 40-47,52 (physical pages).
    #[arg(long, env = "WIKISCAN_ILLUSTRATIONS", value_delimiter = ',')]
    illustrations: Vec<IllustrationRange>,

    /// OCR language code (eng, deu, fas, …).
    #[arg(long, env = "WIKISCAN_LANG", default_value = "eng")]
    lang: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Find the physical page that carries printed page "1".
    Calibrate {
        /// Local PDF file path or HTTP/HTTPS URL.
        input: String,
    },

    /// OCR every page with labels, without a language model.
    Extract {
        input: String,

        #[command(flatten)]
        labels: LabelArgs,

        /// Write text to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resumable adaptive transcription.
    Batch {
        input: String,

        /// Job id; shards are named <id>_batch_<n>.
        #[arg(long, env = "WIKISCAN_JOB_ID")]
        job_id: String,

        #[command(flatten)]
        labels: LabelArgs,

        /// Pages: all, 5, 3-15, or 1,3,5.
        #[arg(long, default_value = "all")]
        pages: String,

        /// Split the page list into shards of this many pages.
        #[arg(long)]
        shard_size: Option<usize>,

        /// Shards processed at once.
        #[arg(long, env = "WIKISCAN_JOBS", default_value_t = 1)]
        jobs: usize,

        /// Engine strategy: adaptive, primary-only, secondary-only.
        #[arg(long, env = "WIKISCAN_STRATEGY", default_value = "adaptive")]
        strategy: StrategyMode,

        /// Write the assembled document here when the run completes.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Assemble checkpointed results into a document.
    Assemble {
        /// Checkpoint job ids to merge (repeatable).
        #[arg(long = "job-id", required = true)]
        job_ids: Vec<String>,

        /// Source file name written into page tags.
        #[arg(long)]
        file_name: String,

        #[command(flatten)]
        labels: LabelArgs,

        /// Join running prose across page tags.
        #[arg(long)]
        join_seams: bool,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Page count, probe pages and label preview (no API key needed).
    Inspect {
        input: String,

        #[command(flatten)]
        labels: LabelArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // Library INFO logs are suppressed while the progress bar is active;
    // the bar carries the per-page feedback.
    let show_progress = matches!(cli.command, Command::Batch { .. }) && !g.quiet && !g.no_progress && !g.json;
    let filter = if g.verbose {
        "debug"
    } else if g.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };
    let config = build_config(g, progress)?;

    match &cli.command {
        Command::Calibrate { input } => cmd_calibrate(g, &config, input).await,
        Command::Extract { input, labels, output } => cmd_extract(g, &config, input, labels, output.as_deref()).await,
        Command::Batch {
            input,
            job_id,
            labels,
            pages,
            shard_size,
            jobs,
            strategy,
            output,
        } => {
            let opts = BatchOpts {
                job_id,
                pages,
                shard_size: *shard_size,
                jobs: *jobs,
                strategy: *strategy,
                output: output.as_deref(),
            };
            cmd_batch(g, config, input, labels, opts).await
        }
        Command::Assemble {
            job_ids,
            file_name,
            labels,
            join_seams,
            output,
        } => cmd_assemble(g, &config, job_ids, file_name, labels, *join_seams, output.as_deref()).await,
        Command::Inspect { input, labels } => cmd_inspect(g, &config, input, labels).await,
    }
}

// ── Subcommands ──────────────────────────────────────────────────────────

async fn cmd_calibrate(g: &GlobalArgs, config: &PipelineConfig, input: &str) -> Result<()> {
    let resolved = resolve_input(input, config.download_timeout_secs).await?;
    let document = open_document(g, config, resolved.path()).await?;
    let result = calibrate(config, &document).await?;

    if g.json {
        println!("{}", serde_json::to_string_pretty(&result).context("Failed to serialise result")?);
        return Ok(());
    }
    for s in result.samples() {
        println!(
            "  probe page {:>4}: printed {}",
            s.page,
            s.printed.map_or_else(|| dim("none"), |n| n.to_string())
        );
    }
    match result.first_numbered_page() {
        Some(page) => println!(
            "{} printed page 1 is physical page {}",
            green("✔"),
            bold(&page.to_string())
        ),
        None => println!(
            "{} calibration ambiguous; pass --first-page explicitly",
            yellow("⚠")
        ),
    }
    Ok(())
}

async fn cmd_extract(
    g: &GlobalArgs,
    config: &PipelineConfig,
    input: &str,
    labels: &LabelArgs,
    output: Option<&Path>,
) -> Result<()> {
    let resolved = resolve_input(input, config.download_timeout_secs).await?;
    let document = open_document(g, config, resolved.path()).await?;
    let labeling = build_labeling(labels, labels.first_page.unwrap_or(1))?;
    let ocr = TesseractOcr::new(&config.tesseract_bin, labeling.language());

    let pages = label_and_extract(&document, &ocr, &labeling, config)
        .await
        .context("Extraction failed")?;
    let text = assemble(&pages, document.file_name());
    emit(output, &text, g.quiet).await
}

struct BatchOpts<'a> {
    job_id: &'a str,
    pages: &'a str,
    shard_size: Option<usize>,
    jobs: usize,
    strategy: StrategyMode,
    output: Option<&'a Path>,
}

async fn cmd_batch(
    g: &GlobalArgs,
    mut config: PipelineConfig,
    input: &str,
    labels: &LabelArgs,
    opts: BatchOpts<'_>,
) -> Result<()> {
    config.job_concurrency = opts.jobs.max(1);
    let resolved = resolve_input(input, config.download_timeout_secs).await?;
    let document = open_document(g, &config, resolved.path()).await?;

    let first_page = match labels.first_page {
        Some(p) => p,
        None if opts.strategy == StrategyMode::SecondaryOnly => 1,
        None => calibrate(&config, &document)
            .await?
            .first_numbered_page()
            .unwrap_or_else(|| {
                tracing::warn!("Calibration ambiguous; numbering from physical page 1");
                1
            }),
    };
    let labeling = build_labeling(labels, first_page)?;
    let pages = parse_pages(opts.pages, document.page_count())?;

    let provider = resolve_provider(&config)?;
    let engines = Engines {
        renderer: renderer(g, &config),
        primary: Arc::new(VisionTranscriber::new(Arc::clone(&provider), &config)),
        ocr: Arc::new(TesseractOcr::new(&config.tesseract_bin, labeling.language())),
        reformatter: Arc::new(LlmReformatter::new(provider, &config)),
    };

    let store: Arc<dyn CheckpointStore> = Arc::new(JsonCheckpointStore::new(&config.checkpoint_dir));
    let jobs = match opts.shard_size {
        Some(size) => shard_jobs(
            opts.job_id,
            resolved.path(),
            &pages,
            size,
            opts.strategy,
            &labeling,
            Arc::clone(&store),
        ),
        None => vec![wikiscan::BatchJob {
            job_id: opts.job_id.to_string(),
            pages,
            source: resolved.path().to_path_buf(),
            strategy: opts.strategy,
            labeling: labeling.clone(),
            checkpoint: Arc::clone(&store),
        }],
    };

    // ── Cancellation ─────────────────────────────────────────────────────
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nStopping after the current page…");
            on_signal.cancel();
        }
    });

    let reports = run_jobs(jobs, &engines, &config, &cancel).await?;

    let mut outcomes = Vec::new();
    let mut failed = 0;
    for report in reports {
        match report.result {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                failed += 1;
                eprintln!("{} {}: {}", red("✘"), report.job_id, e);
            }
        }
    }
    outcomes.sort_by(|a, b| a.job_id.cmp(&b.job_id));

    if g.json {
        println!("{}", serde_json::to_string_pretty(&outcomes).context("Failed to serialise outcomes")?);
    } else if !g.quiet {
        for o in &outcomes {
            let s = &o.stats;
            eprintln!(
                "{}  {}: {} primary / {} secondary ({} raw OCR) / {} skipped / {} resumed  {}ms",
                if o.cancelled { yellow("⏸") } else { green("✔") },
                o.job_id,
                s.primary_pages,
                s.secondary_pages,
                s.degraded_pages,
                s.skipped_pages,
                s.resumed_pages,
                s.duration_ms
            );
        }
    }

    let cancelled = outcomes.iter().any(|o| o.cancelled);
    if let Some(path) = opts.output {
        if failed == 0 && !cancelled {
            let merged = merge_results(outcomes.iter().map(|o| &o.results));
            let text = assemble_batch(&merged, &labeling, document.file_name());
            write_output(path, &text).await.context("Failed to write output")?;
            if !g.quiet {
                eprintln!("   → {}", bold(&path.display().to_string()));
            }
        } else if !g.quiet {
            eprintln!("   output not written; rerun the same command to resume");
        }
    }

    if failed > 0 {
        anyhow::bail!("{failed} job(s) failed");
    }
    Ok(())
}

async fn cmd_assemble(
    g: &GlobalArgs,
    config: &PipelineConfig,
    job_ids: &[String],
    file_name: &str,
    labels: &LabelArgs,
    join_seams: bool,
    output: Option<&Path>,
) -> Result<()> {
    let store = JsonCheckpointStore::new(&config.checkpoint_dir);
    let maps = job_ids
        .iter()
        .map(|id| store.load(id).with_context(|| format!("Failed to load checkpoint '{id}'")))
        .collect::<Result<Vec<_>>>()?;
    let merged = merge_results(&maps);

    let labeling = build_labeling(labels, labels.first_page.unwrap_or(1))?;
    let mut text = assemble_batch(&merged, &labeling, file_name);
    if join_seams {
        text = repair_page_seams(&text);
    }

    let empty = merged.values().filter(|t| t.trim().is_empty()).count();
    if empty > 0 && !g.quiet {
        eprintln!("{} {} page(s) have no text", yellow("⚠"), empty);
    }
    emit(output, &text, g.quiet).await
}

async fn cmd_inspect(g: &GlobalArgs, config: &PipelineConfig, input: &str, labels: &LabelArgs) -> Result<()> {
    let resolved = resolve_input(input, config.download_timeout_secs).await?;
    let document = open_document(g, config, resolved.path()).await?;
    let labeling = build_labeling(labels, labels.first_page.unwrap_or(1))?;
    let label_map = assign_labels(document.page_count(), &labeling);

    if g.json {
        let labels: Vec<_> = label_map
            .iter()
            .map(|(page, label)| serde_json::json!({ "page": page, "label": label.to_string() }))
            .collect();
        let value = serde_json::json!({
            "file": document.file_name(),
            "pages": document.page_count(),
            "probe_pages": probe_pages(document.page_count()),
            "labels": labels,
        });
        println!("{}", serde_json::to_string_pretty(&value).context("Failed to serialise")?);
        return Ok(());
    }

    println!("File:         {}", document.file_name());
    println!("Pages:        {}", document.page_count());
    println!("Probe pages:  {:?}", probe_pages(document.page_count()));
    if labeling.has_cover_image() {
        println!("Cover:        page 1");
    }
    println!("Labels:");
    for (page, label) in &label_map {
        println!("  {:>5}  {}", page, label);
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────

/// Map global CLI args to `PipelineConfig`.
fn build_config(g: &GlobalArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .dpi(g.dpi)
        .calibration_dpi(g.calibration_dpi)
        .engine_timeout_secs(g.engine_timeout)
        .max_retries(g.max_retries)
        .max_tokens(g.max_tokens)
        .temperature(g.temperature)
        .checkpoint_dir(&g.checkpoint_dir)
        .tesseract_bin(&g.tesseract)
        .download_timeout_secs(g.download_timeout);
    if let Some(ref m) = g.model {
        builder = builder.model(m);
    }
    if let Some(ref p) = g.provider {
        builder = builder.provider_name(p);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn build_labeling(labels: &LabelArgs, first_page: usize) -> Result<LabelingConfig> {
    LabelingConfig::builder()
        .has_cover_image(labels.cover)
        .first_numbered_page_index(first_page)
        .illustration_ranges(labels.illustrations.iter().copied())
        .language(&labels.lang)
        .build()
        .context("Invalid book layout")
}

fn renderer(g: &GlobalArgs, config: &PipelineConfig) -> Arc<PdfiumRenderer> {
    let r = PdfiumRenderer::new(config.max_rendered_pixels);
    Arc::new(match g.password {
        Some(ref pw) => r.with_password(pw),
        None => r,
    })
}

async fn open_document(g: &GlobalArgs, config: &PipelineConfig, path: &Path) -> Result<SourceDocument> {
    SourceDocument::open(path, renderer(g, config))
        .await
        .with_context(|| format!("Failed to open {}", path.display()))
}

async fn calibrate(config: &PipelineConfig, document: &SourceDocument) -> Result<CalibrationResult> {
    let provider = resolve_provider(config)?;
    let calibrator = Calibrator::new(
        Arc::new(VisionPageNumberReader::new(provider)),
        config.calibration_dpi,
        config.engine_timeout(),
    );
    calibrator.calibrate(document).await.context("Calibration failed")
}

/// Write to a file, or stdout when no path is given.
async fn emit(output: Option<&Path>, text: &str, quiet: bool) -> Result<()> {
    match output {
        Some(path) => {
            write_output(path, text).await.context("Failed to write output")?;
            if !quiet {
                eprintln!("{}  → {}", green("✔"), bold(&path.display().to_string()));
            }
        }
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
        }
    }
    Ok(())
}

/// Parse `--pages` into 1-based physical indices within `total`.
fn parse_pages(s: &str, total: usize) -> Result<Vec<usize>> {
    let s = s.trim().to_lowercase();
    if s == "all" {
        return Ok((1..=total).collect());
    }

    let mut pages = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                let start: usize = start.trim().parse().context("Invalid start page in range")?;
                let end: usize = end.trim().parse().context("Invalid end page in range")?;
                if start < 1 || start > end {
                    anyhow::bail!("Invalid page range '{part}': pages are 1-based and start must be <= end");
                }
                pages.extend(start..=end);
            }
            None => {
                let page: usize = part
                    .parse()
                    .with_context(|| format!("Invalid page number: '{part}'"))?;
                if page < 1 {
                    anyhow::bail!("Pages are 1-indexed, minimum is 1 (got {page})");
                }
                pages.push(page);
            }
        }
    }
    Ok(pages)
}
