//! Batch jobs: walk a page list, pick an engine per page, checkpoint.
//!
//! A job's pages are processed strictly in order because the escalation
//! state mutates per page. Independent jobs (other books, or shards of one
//! book) run concurrently through [`run_jobs`]; they share nothing but the
//! checkpoint directory, where each owns one file.
//!
//! ## Per-page flow (adaptive)
//!
//! ```text
//!   render ─▶ mode == Normal? ──yes──▶ primary ──ok──▶ save
//!                  │                      │
//!                  no                    fail ─▶ escalate ─▶ secondary ─▶ save
//!                  ▼
//!              secondary ─▶ tick cooldown ─▶ save
//! ```
//!
//! The secondary engine is OCR followed by a reformat pass; when only the
//! reformat fails the raw OCR text is kept.
//!
//! The escalation state is checkpointed with the results, so a job resumed
//! inside a cooldown window finishes the window before the primary is tried.

use crate::config::{LabelingConfig, PipelineConfig, StrategyMode};
use crate::error::{EngineError, PageError, WikiscanError};
use crate::label::{assign_labels, format_page_block, PageTag};
use crate::orchestrator::checkpoint::{is_complete, validate_job_id, CheckpointStore};
use crate::orchestrator::state::{EngineEvent, EngineSnapshot, EngineState, ModeChange};
use crate::output::{BatchOutcome, BatchStats, EngineUsed, PageImage, PageOutcome, PageResultMap};
use crate::pipeline::llm::{PrimaryEngine, Reformatter};
use crate::pipeline::ocr::{tidy_ocr_text, OcrService};
use crate::pipeline::postprocess::is_blank_marker;
use crate::pipeline::render::{PageRenderer, SourceDocument};
use crate::pipeline::with_timeout;
use crate::progress::{BatchProgressCallback, NoopProgressCallback};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One unit of resumable work.
#[derive(Clone)]
pub struct BatchJob {
    /// Names the checkpoint; `[A-Za-z0-9._-]` only.
    pub job_id: String,
    /// Physical page indices, processed in this order.
    pub pages: Vec<usize>,
    pub source: PathBuf,
    pub strategy: StrategyMode,
    /// Used to skip the cover page.
    pub labeling: LabelingConfig,
    pub checkpoint: Arc<dyn CheckpointStore>,
}

impl std::fmt::Debug for BatchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJob")
            .field("job_id", &self.job_id)
            .field("pages", &self.pages.len())
            .field("source", &self.source)
            .field("strategy", &self.strategy)
            .finish()
    }
}

/// Everything a batch job calls out to.
#[derive(Clone)]
pub struct Engines {
    pub renderer: Arc<dyn PageRenderer>,
    pub primary: Arc<dyn PrimaryEngine>,
    pub ocr: Arc<dyn OcrService>,
    pub reformatter: Arc<dyn Reformatter>,
}

/// Text and provenance for one transcribed page.
struct PageTranscription {
    text: String,
    engine: EngineUsed,
    error: Option<PageError>,
}

impl PageTranscription {
    fn failed(error: PageError) -> Self {
        Self {
            text: String::new(),
            engine: EngineUsed::None,
            error: Some(error),
        }
    }
}

/// The sequential loop of one job. Holds the job's only mutable state.
struct JobRun<'a> {
    job: &'a BatchJob,
    engines: &'a Engines,
    config: &'a PipelineConfig,
    callback: Arc<dyn BatchProgressCallback>,
    state: EngineState,
    stats: BatchStats,
}

/// Process one batch job to completion or cancellation.
///
/// Pages already present in the job's checkpoint with non-empty text are
/// skipped without calling any engine. After every attempted page the full
/// result map and the escalation state are checkpointed before the next
/// page (or a cancellation check) begins.
///
/// # Errors
///
/// Fatal only for the job: invalid job id, unreadable source PDF, or a
/// checkpoint that cannot be read or written. Engine and render failures
/// are recorded per page and never abort the job.
pub async fn process_batch(
    job: &BatchJob,
    engines: &Engines,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<BatchOutcome, WikiscanError> {
    let start = Instant::now();
    validate_job_id(&job.job_id)?;

    let document = SourceDocument::open(&job.source, Arc::clone(&engines.renderer)).await?;
    let (mut results, saved_state) = load_checkpoint(job).await?;
    let state = match saved_state {
        Some(snapshot) => {
            debug!("Job {}: resuming in mode {}", job.job_id, snapshot.mode);
            EngineState::restore(config.escalation, snapshot)
        }
        None => EngineState::new(config.escalation),
    };

    let mut run = JobRun {
        job,
        engines,
        config,
        callback: config
            .progress_callback
            .clone()
            .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
        state,
        stats: BatchStats {
            total_pages: job.pages.len(),
            ..Default::default()
        },
    };

    info!(
        "Job {}: {} pages of '{}' ({} already checkpointed, strategy {})",
        job.job_id,
        job.pages.len(),
        document.file_name(),
        results.values().filter(|t| is_complete(t)).count(),
        job.strategy
    );
    run.callback.on_batch_start(&job.job_id, job.pages.len());

    let mut outcomes = Vec::new();
    let mut cancelled = false;

    for &page in &job.pages {
        if cancel.is_cancelled() {
            info!("Job {}: cancelled before page {}", job.job_id, page);
            cancelled = true;
            break;
        }

        if job.labeling.is_cover(page) {
            debug!("Job {}: page {} is the cover, skipped", job.job_id, page);
            run.stats.ignored_pages += 1;
            continue;
        }

        if page == 0 || page > document.page_count() {
            warn!(
                "Job {}: page {} out of range (document has {} pages), ignored",
                job.job_id,
                page,
                document.page_count()
            );
            run.stats.ignored_pages += 1;
            outcomes.push(PageOutcome {
                page,
                engine: EngineUsed::None,
                text_len: 0,
                duration_ms: 0,
                error: Some(PageError::OutOfRange {
                    page,
                    total: document.page_count(),
                }),
            });
            continue;
        }

        if results.get(&page).is_some_and(|t| is_complete(t)) {
            debug!("Job {}: page {} already checkpointed", job.job_id, page);
            run.stats.resumed_pages += 1;
            run.callback.on_page_resumed(&job.job_id, page);
            outcomes.push(PageOutcome {
                page,
                engine: EngineUsed::Checkpoint,
                text_len: results.get(&page).map_or(0, String::len),
                duration_ms: 0,
                error: None,
            });
            continue;
        }

        let page_start = Instant::now();
        run.callback.on_page_start(&job.job_id, page, run.state.mode());

        let transcription = match document.render(page, config.dpi).await {
            Ok(image) => run.transcribe(&image).await,
            Err(e) => {
                warn!("Job {}: page {} could not be rendered: {}", job.job_id, page, e);
                PageTranscription::failed(PageError::RenderFailed {
                    page,
                    detail: e.to_string(),
                })
            }
        };

        results.insert(page, transcription.text.clone());
        save_checkpoint(job, &results, run.state.snapshot()).await?;

        run.record(page, &transcription);
        outcomes.push(PageOutcome {
            page,
            engine: transcription.engine,
            text_len: transcription.text.len(),
            duration_ms: page_start.elapsed().as_millis() as u64,
            error: transcription.error,
        });
    }

    run.stats.duration_ms = start.elapsed().as_millis() as u64;
    let transcribed = run.stats.primary_pages + run.stats.secondary_pages;
    info!(
        "Job {}: {} transcribed ({} primary, {} secondary, {} raw OCR), {} skipped, {} resumed{}",
        job.job_id,
        transcribed,
        run.stats.primary_pages,
        run.stats.secondary_pages,
        run.stats.degraded_pages,
        run.stats.skipped_pages,
        run.stats.resumed_pages,
        if cancelled { ", cancelled" } else { "" }
    );
    run.callback
        .on_batch_complete(&job.job_id, transcribed, run.stats.skipped_pages, cancelled);

    Ok(BatchOutcome {
        job_id: job.job_id.clone(),
        results,
        pages: outcomes,
        stats: run.stats,
        cancelled,
    })
}

/// Read the job's results and escalation state on the blocking pool.
async fn load_checkpoint(job: &BatchJob) -> Result<(PageResultMap, Option<EngineSnapshot>), WikiscanError> {
    let store = Arc::clone(&job.checkpoint);
    let job_id = job.job_id.clone();
    tokio::task::spawn_blocking(move || -> Result<_, WikiscanError> {
        Ok((store.load(&job_id)?, store.load_state(&job_id)?))
    })
    .await
    .map_err(|e| WikiscanError::Internal(format!("Checkpoint task panicked: {}", e)))?
}

/// Write results first, then state, on the blocking pool.
async fn save_checkpoint(
    job: &BatchJob,
    results: &PageResultMap,
    state: EngineSnapshot,
) -> Result<(), WikiscanError> {
    let store = Arc::clone(&job.checkpoint);
    let job_id = job.job_id.clone();
    let results = results.clone();
    tokio::task::spawn_blocking(move || {
        store.save(&job_id, &results)?;
        store.save_state(&job_id, &state)
    })
    .await
    .map_err(|e| WikiscanError::Internal(format!("Checkpoint task panicked: {}", e)))?
}

impl JobRun<'_> {
    async fn transcribe(&mut self, image: &PageImage) -> PageTranscription {
        match self.job.strategy {
            StrategyMode::SecondaryOnly => match self.secondary(image).await {
                Ok((text, engine)) => ok(text, engine),
                Err(e) => self.dual_failure(image.index, "not attempted", e),
            },
            StrategyMode::PrimaryOnly => match self.primary(image).await {
                Ok(text) => ok(text, EngineUsed::Primary),
                Err(e) => {
                    self.stats.primary_failures += 1;
                    self.dual_failure(image.index, &e.to_string(), "not attempted")
                }
            },
            StrategyMode::Adaptive => self.adaptive(image).await,
        }
    }

    async fn adaptive(&mut self, image: &PageImage) -> PageTranscription {
        let page = image.index;

        if !self.state.uses_primary() {
            debug!("Job {}: page {} forced to secondary ({})", self.job.job_id, page, self.state.mode());
            let result = self.secondary(image).await;
            let change = self.state.apply(EngineEvent::ForcedPageDone);
            self.report(change);
            return match result {
                Ok((text, engine)) => ok(text, engine),
                Err(e) => self.dual_failure(page, "bypassed", e),
            };
        }

        let primary_err = match self.primary(image).await {
            Ok(text) => {
                self.state.apply(EngineEvent::PrimarySucceeded);
                return ok(text, EngineUsed::Primary);
            }
            Err(e) => e,
        };

        self.stats.primary_failures += 1;
        warn!(
            "Job {}: page {} primary failed ({}), retrying on secondary",
            self.job.job_id, page, primary_err
        );
        let change = self.state.apply(EngineEvent::PrimaryFailed);
        self.report(change);

        match self.secondary(image).await {
            Ok((text, engine)) => ok(text, engine),
            Err(e) => self.dual_failure(page, &primary_err.to_string(), e),
        }
    }

    async fn primary(&self, image: &PageImage) -> Result<String, EngineError> {
        with_timeout(self.config.engine_timeout(), self.engines.primary.transcribe(image)).await
    }

    /// OCR then reformat. Fails only when OCR itself fails.
    async fn secondary(&self, image: &PageImage) -> Result<(String, EngineUsed), EngineError> {
        let timeout = self.config.engine_timeout();
        let raw = with_timeout(timeout, self.engines.ocr.recognize(image)).await?;

        match with_timeout(timeout, self.engines.reformatter.reformat(&raw)).await {
            Ok(text) => Ok((text, EngineUsed::Secondary)),
            Err(e) => {
                warn!(
                    "Job {}: page {} reformat failed ({}), keeping raw OCR",
                    self.job.job_id, image.index, e
                );
                Ok((tidy_ocr_text(&raw), EngineUsed::SecondaryRaw))
            }
        }
    }

    fn dual_failure(&self, page: usize, primary: &str, secondary: impl ToString) -> PageTranscription {
        let error = PageError::AllEnginesFailed {
            page,
            primary: primary.to_string(),
            secondary: secondary.to_string(),
        };
        warn!("Job {}: {}; page recorded empty", self.job.job_id, error);
        PageTranscription::failed(error)
    }

    fn report(&self, change: Option<ModeChange>) {
        if let Some(ModeChange { from, to }) = change {
            info!("Job {}: engine mode {} → {}", self.job.job_id, from, to);
            self.callback.on_mode_change(&self.job.job_id, from, to);
        }
    }

    fn record(&mut self, page: usize, t: &PageTranscription) {
        match t.engine {
            EngineUsed::Primary => self.stats.primary_pages += 1,
            EngineUsed::Secondary => self.stats.secondary_pages += 1,
            EngineUsed::SecondaryRaw => {
                self.stats.secondary_pages += 1;
                self.stats.degraded_pages += 1;
            }
            EngineUsed::Checkpoint | EngineUsed::None => {}
        }
        match &t.error {
            Some(error) => {
                self.stats.skipped_pages += 1;
                self.callback.on_page_error(&self.job.job_id, page, &error.to_string());
            }
            None => self
                .callback
                .on_page_complete(&self.job.job_id, page, t.engine, t.text.len()),
        }
    }
}

fn ok(text: String, engine: EngineUsed) -> PageTranscription {
    PageTranscription {
        text,
        engine,
        error: None,
    }
}

// ── Multi-job execution ──────────────────────────────────────────────────

/// Split a page list into contiguous shards of at most `shard_size` pages.
pub fn shard_pages(pages: &[usize], shard_size: usize) -> Vec<Vec<usize>> {
    pages.chunks(shard_size.max(1)).map(<[usize]>::to_vec).collect()
}

/// Build one job per shard, named `<base_id>_batch_<n>` from 1.
pub fn shard_jobs(
    base_id: &str,
    source: impl Into<PathBuf>,
    pages: &[usize],
    shard_size: usize,
    strategy: StrategyMode,
    labeling: &LabelingConfig,
    checkpoint: Arc<dyn CheckpointStore>,
) -> Vec<BatchJob> {
    let source = source.into();
    shard_pages(pages, shard_size)
        .into_iter()
        .enumerate()
        .map(|(i, pages)| BatchJob {
            job_id: format!("{}_batch_{}", base_id, i + 1),
            pages,
            source: source.clone(),
            strategy,
            labeling: labeling.clone(),
            checkpoint: Arc::clone(&checkpoint),
        })
        .collect()
}

/// The result of one job run by [`run_jobs`].
#[derive(Debug)]
pub struct JobReport {
    pub job_id: String,
    pub result: Result<BatchOutcome, WikiscanError>,
}

/// Run independent jobs concurrently, at most `config.job_concurrency` at once.
///
/// Each job owns its escalation state; a fatal error in one job is reported
/// in its [`JobReport`] and does not stop the others. Reports come back in
/// completion order.
///
/// # Errors
///
/// Rejects the whole set up front when two jobs share an id, since they
/// would overwrite each other's checkpoint.
pub async fn run_jobs(
    jobs: Vec<BatchJob>,
    engines: &Engines,
    config: &PipelineConfig,
    cancel: &CancellationToken,
) -> Result<Vec<JobReport>, WikiscanError> {
    let mut seen = HashSet::new();
    for job in &jobs {
        validate_job_id(&job.job_id)?;
        if !seen.insert(job.job_id.as_str()) {
            return Err(WikiscanError::InvalidConfig(format!(
                "duplicate job id '{}'",
                job.job_id
            )));
        }
    }

    let reports: Vec<JobReport> = stream::iter(jobs)
        .map(|job| async move {
            let result = process_batch(&job, engines, config, cancel).await;
            if let Err(ref e) = result {
                warn!("Job {} failed: {}", job.job_id, e);
            }
            JobReport {
                job_id: job.job_id,
                result,
            }
        })
        .buffer_unordered(config.job_concurrency.max(1))
        .collect()
        .await;
    Ok(reports)
}

// ── Assembly ─────────────────────────────────────────────────────────────

/// Merge shard maps into one. Later maps win on overlapping pages, but a
/// non-empty text is never replaced by an empty one.
pub fn merge_results<'a>(maps: impl IntoIterator<Item = &'a PageResultMap>) -> PageResultMap {
    let mut merged = PageResultMap::new();
    for map in maps {
        for (&page, text) in map {
            let keep_existing = merged.get(&page).is_some_and(|t| is_complete(t)) && !is_complete(text);
            if !keep_existing {
                merged.insert(page, text.clone());
            }
        }
    }
    merged
}

/// Assemble checkpointed results into the output document.
///
/// Labels are folded over every physical page up to the highest one present,
/// so a shard that starts mid-book gets the same labels as a full run. Pages
/// without a label (the cover) are omitted; blank-page markers become empty
/// text. Pages recorded empty still get their tag so the gap is visible.
pub fn assemble_batch(results: &PageResultMap, labeling: &LabelingConfig, file_name: &str) -> String {
    let last = results.keys().next_back().copied().unwrap_or(0);
    let labels = assign_labels(last, labeling);

    let mut out = String::new();
    for (page, text) in results {
        let Some(label) = labels.get(page) else {
            continue;
        };
        let text = if is_blank_marker(text) { "" } else { text.trim() };
        out.push_str(&format_page_block(&PageTag::new(label, file_name, *page), text));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labeling(cover: bool, first: usize) -> LabelingConfig {
        LabelingConfig::builder()
            .has_cover_image(cover)
            .first_numbered_page_index(first)
            .build()
            .unwrap()
    }

    #[test]
    fn shards_are_contiguous() {
        let pages: Vec<usize> = (1..=7).collect();
        assert_eq!(
            shard_pages(&pages, 3),
            vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]
        );
        assert_eq!(shard_pages(&pages, 0).len(), 7);
        assert!(shard_pages(&[], 5).is_empty());
    }

    #[test]
    fn assemble_uses_whole_document_labels() {
        let mut shard = PageResultMap::new();
        shard.insert(5, "fifth".into());
        shard.insert(6, "--BLANK--".into());
        let doc = assemble_batch(&shard, &labeling(true, 3), "Book.pdf");
        assert_eq!(
            doc,
            "{{page|3|file=Book.pdf|page=5}}\nfifth\n{{page|4|file=Book.pdf|page=6}}\n\n"
        );
    }

    #[test]
    fn assemble_omits_cover() {
        let mut map = PageResultMap::new();
        map.insert(1, "cover text".into());
        map.insert(2, "preface".into());
        let doc = assemble_batch(&map, &labeling(true, 3), "B.pdf");
        assert_eq!(doc, "{{page|i|file=B.pdf|page=2}}\npreface\n");
    }

    #[test]
    fn merge_keeps_non_empty_text() {
        let mut a = PageResultMap::new();
        a.insert(1, "one".into());
        a.insert(2, String::new());
        let mut b = PageResultMap::new();
        b.insert(1, String::new());
        b.insert(2, "two".into());
        let merged = merge_results([&a, &b]);
        assert_eq!(merged[&1], "one");
        assert_eq!(merged[&2], "two");
    }
}
