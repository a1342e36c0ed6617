//! # wikiscan
//!
//! Digitise scanned book PDFs into wiki-formatted text.
//!
//! ## Why this crate?
//!
//! A scanned book is more than a stack of images to OCR. Printed pagination
//! starts somewhere inside the PDF, front matter is numbered in roman
//! numerals, plates interrupt the numbering, and words break across lines.
//! Vision models transcribe old pages well but refuse some of them and rate
//! limit the rest. This crate handles all of that and keeps every finished
//! page on disk so a run of several hundred pages can be stopped and
//! resumed at will.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Calibrate  probe 3 pages, vote on the printed-number offset
//!  ├─ 2. Label      roman / illus.N / numbered, one sequential fold
//!  ├─ 3. Transcribe per page: vision model, or OCR + reformat fallback,
//!  │                escalating on repeated failures; checkpoint after each
//!  └─ 4. Assemble   {{page|LABEL|file=…|page=N}} blocks in physical order
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use wikiscan::pipeline::llm::{resolve_provider, LlmReformatter, VisionTranscriber};
//! use wikiscan::pipeline::ocr::TesseractOcr;
//! use wikiscan::pipeline::render::PdfiumRenderer;
//! use wikiscan::{
//!     assemble_batch, process_batch, BatchJob, Engines, JsonCheckpointStore, LabelingConfig,
//!     PipelineConfig, StrategyMode,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig::default();
//!     let labeling = LabelingConfig::builder()
//!         .has_cover_image(true)
//!         .first_numbered_page_index(9)
//!         .build()?;
//!
//!     let provider = resolve_provider(&config)?;
//!     let engines = Engines {
//!         renderer: Arc::new(PdfiumRenderer::new(config.max_rendered_pixels)),
//!         primary: Arc::new(VisionTranscriber::new(provider.clone(), &config)),
//!         ocr: Arc::new(TesseractOcr::new(&config.tesseract_bin, labeling.language())),
//!         reformatter: Arc::new(LlmReformatter::new(provider, &config)),
//!     };
//!     let job = BatchJob {
//!         job_id: "book".into(),
//!         pages: (1..=40).collect(),
//!         source: "book.pdf".into(),
//!         strategy: StrategyMode::Adaptive,
//!         labeling: labeling.clone(),
//!         checkpoint: Arc::new(JsonCheckpointStore::new(&config.checkpoint_dir)),
//!     };
//!
//!     let outcome = process_batch(&job, &engines, &config, &CancellationToken::new()).await?;
//!     println!("{}", assemble_batch(&outcome.results, &labeling, "book.pdf"));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `wikiscan` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! wikiscan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod calibrate;
pub mod config;
pub mod error;
pub mod extract;
pub mod label;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use calibrate::{CalibrationResult, CalibrationSample, Calibrator};
pub use config::{
    EscalationPolicy, IllustrationRange, LabelingConfig, LabelingConfigBuilder, PipelineConfig,
    PipelineConfigBuilder, StrategyMode,
};
pub use error::{EngineError, PageError, WikiscanError};
pub use extract::{assemble, label_and_extract, write_output};
pub use label::{assign_labels, split_document, PageLabel, PageTag};
pub use orchestrator::batch::{
    assemble_batch, merge_results, process_batch, run_jobs, shard_jobs, shard_pages, BatchJob, Engines,
    JobReport,
};
pub use orchestrator::checkpoint::{CheckpointStore, JsonCheckpointStore};
pub use orchestrator::state::{EngineEvent, EngineMode, EngineSnapshot, EngineState};
pub use output::{BatchOutcome, BatchStats, EngineUsed, LabeledPage, PageImage, PageOutcome, PageResultMap};
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
