//! Scripted engines and an in-memory renderer shared by the integration
//! tests. Nothing here touches pdfium, tesseract or the network.

#![allow(dead_code)]

use async_trait::async_trait;
use image::{DynamicImage, RgbImage};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use wikiscan::pipeline::llm::{PageNumberReader, PrimaryEngine, Reformatter};
use wikiscan::pipeline::ocr::OcrService;
use wikiscan::pipeline::render::PageRenderer;
use wikiscan::{
    BatchJob, BatchProgressCallback, EngineError, EngineMode, EngineUsed, Engines, JsonCheckpointStore, LabelingConfig,
    PageImage, PipelineConfig, StrategyMode, WikiscanError,
};

// ── Renderer ─────────────────────────────────────────────────────────────────

/// A document of `pages` tiny blank pages. Pages in `broken` fail to render.
pub struct FakeRenderer {
    pub pages: usize,
    pub broken: HashSet<usize>,
}

impl FakeRenderer {
    pub fn new(pages: usize) -> Arc<Self> {
        Arc::new(Self {
            pages,
            broken: HashSet::new(),
        })
    }
}

impl PageRenderer for FakeRenderer {
    fn page_count(&self, _pdf_path: &Path) -> Result<usize, WikiscanError> {
        Ok(self.pages)
    }

    fn render(&self, pdf_path: &Path, index: usize, dpi: u32) -> Result<PageImage, WikiscanError> {
        if self.broken.contains(&index) {
            return Err(WikiscanError::RasterisationFailed {
                page: index,
                detail: "corrupt page stream".into(),
            });
        }
        Ok(PageImage {
            document: pdf_path.display().to_string(),
            index,
            image: DynamicImage::ImageRgb8(RgbImage::new(2, 2)),
            dpi,
        })
    }
}

// ── Primary engine ───────────────────────────────────────────────────────────

type PrimaryScript = Box<dyn Fn(usize) -> Result<String, EngineError> + Send + Sync>;

/// Primary engine driven by a per-page closure. Records every page it sees.
pub struct ScriptedPrimary {
    script: PrimaryScript,
    calls: Mutex<Vec<usize>>,
    cancel_after: Option<(usize, CancellationToken)>,
    delay: Option<Duration>,
}

impl ScriptedPrimary {
    pub fn new(script: impl Fn(usize) -> Result<String, EngineError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: Mutex::new(Vec::new()),
            cancel_after: None,
            delay: None,
        })
    }

    /// Succeeds on every page with `"primary {page}"`.
    pub fn succeeding() -> Arc<Self> {
        Self::new(|page| Ok(format!("primary {page}")))
    }

    /// Fails on every page.
    pub fn failing() -> Arc<Self> {
        Self::new(|_| Err(EngineError::ContentBlocked {
            reason: "recitation".into(),
        }))
    }

    /// Succeeds, and trips `token` once page `page` has been transcribed.
    pub fn cancelling_after(page: usize, token: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(|p| Ok(format!("primary {p}"))),
            calls: Mutex::new(Vec::new()),
            cancel_after: Some((page, token)),
            delay: None,
        })
    }

    /// Never answers within `delay`; use with a paused clock.
    pub fn hanging(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(|p| Ok(format!("primary {p}"))),
            calls: Mutex::new(Vec::new()),
            cancel_after: None,
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrimaryEngine for ScriptedPrimary {
    async fn transcribe(&self, page: &PageImage) -> Result<String, EngineError> {
        self.calls.lock().unwrap().push(page.index);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let result = (self.script)(page.index);
        if let Some((after, token)) = &self.cancel_after {
            if page.index == *after {
                token.cancel();
            }
        }
        result
    }
}

// ── Secondary engine ─────────────────────────────────────────────────────────

/// OCR returning `"ocr {page}"`, failing on pages in `failing`.
#[derive(Default)]
pub struct FakeOcr {
    pub failing: HashSet<usize>,
    pub text: HashMap<usize, String>,
    calls: Mutex<Vec<usize>>,
}

impl FakeOcr {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_on(pages: impl IntoIterator<Item = usize>) -> Arc<Self> {
        Arc::new(Self {
            failing: pages.into_iter().collect(),
            ..Default::default()
        })
    }

    pub fn with_text(text: impl IntoIterator<Item = (usize, String)>) -> Arc<Self> {
        Arc::new(Self {
            text: text.into_iter().collect(),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl OcrService for FakeOcr {
    async fn recognize(&self, page: &PageImage) -> Result<String, EngineError> {
        self.calls.lock().unwrap().push(page.index);
        if self.failing.contains(&page.index) {
            return Err(EngineError::Unavailable("tesseract exited with status 1".into()));
        }
        Ok(self
            .text
            .get(&page.index)
            .cloned()
            .unwrap_or_else(|| format!("ocr {}\n", page.index)))
    }
}

/// Reformatter prefixing `"wiki: "`, or failing every call.
pub struct FakeReformatter {
    pub fail: bool,
}

impl FakeReformatter {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self { fail: false })
    }

    pub fn broken() -> Arc<Self> {
        Arc::new(Self { fail: true })
    }
}

#[async_trait]
impl Reformatter for FakeReformatter {
    async fn reformat(&self, raw_ocr: &str) -> Result<String, EngineError> {
        if self.fail {
            Err(EngineError::RateLimited("429 Too Many Requests".into()))
        } else {
            Ok(format!("wiki: {}", raw_ocr.trim()))
        }
    }
}

// ── Calibration reader ───────────────────────────────────────────────────────

/// Reads printed numbers from a fixed table; pages in `errors` fail.
#[derive(Default)]
pub struct TableReader {
    pub printed: HashMap<usize, u32>,
    pub errors: HashSet<usize>,
    calls: Mutex<Vec<usize>>,
}

impl TableReader {
    pub fn new(printed: impl IntoIterator<Item = (usize, u32)>) -> Arc<Self> {
        Arc::new(Self {
            printed: printed.into_iter().collect(),
            ..Default::default()
        })
    }

    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PageNumberReader for TableReader {
    async fn read_page_number(&self, page: &PageImage) -> Result<Option<u32>, EngineError> {
        self.calls.lock().unwrap().push(page.index);
        if self.errors.contains(&page.index) {
            return Err(EngineError::Timeout { secs: 120 });
        }
        Ok(self.printed.get(&page.index).copied())
    }
}

// ── Progress recorder ────────────────────────────────────────────────────────

/// Collects mode changes reported by a batch job.
#[derive(Default)]
pub struct ModeRecorder {
    changes: Mutex<Vec<(EngineMode, EngineMode)>>,
}

impl ModeRecorder {
    pub fn changes(&self) -> Vec<(EngineMode, EngineMode)> {
        self.changes.lock().unwrap().clone()
    }
}

impl BatchProgressCallback for ModeRecorder {
    fn on_mode_change(&self, _job_id: &str, from: EngineMode, to: EngineMode) {
        self.changes.lock().unwrap().push((from, to));
    }
}

/// Trips `token` once `page` has been transcribed, whatever the engine.
pub struct CancelAfterPage {
    pub page: usize,
    pub token: CancellationToken,
}

impl BatchProgressCallback for CancelAfterPage {
    fn on_page_complete(&self, _job_id: &str, page: usize, _engine: EngineUsed, _text_len: usize) {
        if page == self.page {
            self.token.cancel();
        }
    }
}

// ── Builders ─────────────────────────────────────────────────────────────────

pub fn engines(
    renderer: Arc<FakeRenderer>,
    primary: Arc<ScriptedPrimary>,
    ocr: Arc<FakeOcr>,
    reformatter: Arc<FakeReformatter>,
) -> Engines {
    Engines {
        renderer,
        primary,
        ocr,
        reformatter,
    }
}

pub fn labeling(cover: bool, first: usize) -> LabelingConfig {
    LabelingConfig::builder()
        .has_cover_image(cover)
        .first_numbered_page_index(first)
        .build()
        .unwrap()
}

pub fn job(
    job_id: &str,
    pages: impl IntoIterator<Item = usize>,
    strategy: StrategyMode,
    dir: &Path,
) -> BatchJob {
    BatchJob {
        job_id: job_id.to_string(),
        pages: pages.into_iter().collect(),
        source: "Old Book.pdf".into(),
        strategy,
        labeling: labeling(false, 1),
        checkpoint: Arc::new(JsonCheckpointStore::new(dir)),
    }
}

pub fn config() -> PipelineConfig {
    PipelineConfig::default()
}

pub fn config_with(recorder: Arc<ModeRecorder>) -> PipelineConfig {
    PipelineConfig::builder()
        .progress_callback(recorder)
        .build()
        .unwrap()
}
