//! Data produced by the pipeline: rendered pages, labeled text, batch results.

use crate::error::PageError;
use crate::label::PageLabel;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Physical page index → transcribed text.
///
/// An empty string marks a page both engines failed on. This map is the
/// unit of checkpointing.
pub type PageResultMap = BTreeMap<usize, String>;

/// One rendered page of a source PDF.
///
/// Owned transiently by whoever requested it; never written to disk except
/// as a short-lived temp file for an OCR subprocess.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// File name of the source PDF (no directory).
    pub document: String,
    /// 1-based physical page index.
    pub index: usize,
    pub image: DynamicImage,
    pub dpi: u32,
}

/// A page of the synchronous extract path: label plus cleaned text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabeledPage {
    pub index: usize,
    pub label: PageLabel,
    pub text: String,
}

/// Which path produced a page's text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineUsed {
    /// Vision-language transcription.
    Primary,
    /// OCR followed by a successful reformat pass.
    Secondary,
    /// OCR text kept as-is because the reformat pass failed.
    SecondaryRaw,
    /// Taken from the checkpoint; no engine was called.
    Checkpoint,
    /// Nothing usable; the page was recorded empty.
    None,
}

impl fmt::Display for EngineUsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EngineUsed::Primary => "primary",
            EngineUsed::Secondary => "secondary",
            EngineUsed::SecondaryRaw => "secondary (raw OCR)",
            EngineUsed::Checkpoint => "checkpoint",
            EngineUsed::None => "none",
        };
        f.write_str(s)
    }
}

/// What happened to one page of a batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageOutcome {
    pub page: usize,
    pub engine: EngineUsed,
    pub text_len: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<PageError>,
}

/// Aggregate counters for a batch job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Pages in the job's page list.
    pub total_pages: usize,
    /// Pages found in the checkpoint at start.
    pub resumed_pages: usize,
    pub primary_pages: usize,
    pub secondary_pages: usize,
    /// Pages whose reformat failed; raw OCR kept.
    pub degraded_pages: usize,
    /// Pages recorded empty because every allowed engine failed.
    pub skipped_pages: usize,
    /// Cover and out-of-range pages that were never attempted.
    pub ignored_pages: usize,
    pub primary_failures: usize,
    pub duration_ms: u64,
}

/// Result of one batch job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub job_id: String,
    /// The full checkpointed map, including pages resumed from disk.
    pub results: PageResultMap,
    /// Pages visited in this run, in processing order. Resumed pages carry
    /// [`EngineUsed::Checkpoint`]; the cover is not listed.
    pub pages: Vec<PageOutcome>,
    pub stats: BatchStats,
    /// True when the job stopped early on a cancellation signal.
    pub cancelled: bool,
}

impl BatchOutcome {
    /// Pages whose result is empty (both engines failed).
    pub fn skipped(&self) -> Vec<usize> {
        self.results
            .iter()
            .filter(|(_, text)| text.trim().is_empty())
            .map(|(page, _)| *page)
            .collect()
    }
}
