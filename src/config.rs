//! Configuration types for calibration, labeling and transcription.
//!
//! Two structs split the knobs by who owns them:
//!
//! * [`PipelineConfig`]: *how* to run: rendering resolution, model, timeouts,
//!   strategy, checkpoint location. Usually identical across every book in a
//!   run.
//! * [`LabelingConfig`]: *what* the book looks like: cover flag, first
//!   numbered page, illustration plates, language. One per document,
//!   immutable once built.
//!
//! Both are built through builders so callers set only what they care about
//! and rely on documented defaults for the rest.

use crate::error::WikiscanError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Pipeline-wide configuration.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use wikiscan::{PipelineConfig, StrategyMode};
///
/// let config = PipelineConfig::builder()
///     .dpi(300)
///     .strategy(StrategyMode::Adaptive)
///     .engine_timeout_secs(90)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Rendering DPI for transcription. Range: 72–600. Default: 300.
    ///
    /// Old typefaces and small footnotes need OCR-grade resolution; 300 DPI
    /// is the usual scanning standard.
    pub dpi: u32,

    /// Rendering DPI for calibration probes. Default: 150.
    ///
    /// Reading a page number needs far less detail than transcription.
    pub calibration_dpi: u32,

    /// Maximum rendered image dimension in pixels. Default: 3500.
    pub max_rendered_pixels: u32,

    /// LLM model identifier. If None, uses the provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "gemini").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,

    /// Maximum tokens generated per page. Default: 8192.
    ///
    /// Dense book pages in small type routinely exceed 3 000 output tokens.
    pub max_tokens: usize,

    /// Retries inside the primary engine for transport errors. Default: 2.
    ///
    /// Content blocks are never retried; they surface immediately so the
    /// fallback state machine can react.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout for every engine call, in seconds. Default: 120.
    pub engine_timeout_secs: u64,

    /// Which engines a batch may use. Default: [`StrategyMode::Adaptive`].
    pub strategy: StrategyMode,

    /// Failure thresholds driving the adaptive state machine.
    pub escalation: EscalationPolicy,

    /// Directory holding one checkpoint file per batch job. Default: `.wikiscan`.
    pub checkpoint_dir: PathBuf,

    /// Tesseract executable. Default: `tesseract` from `PATH`.
    pub tesseract_bin: PathBuf,

    /// How many independent jobs may run at once. Default: 1.
    pub job_concurrency: usize,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-page progress events for batch jobs.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 300,
            calibration_dpi: 150,
            max_rendered_pixels: 3500,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 2,
            retry_backoff_ms: 500,
            engine_timeout_secs: 120,
            strategy: StrategyMode::default(),
            escalation: EscalationPolicy::default(),
            checkpoint_dir: PathBuf::from(".wikiscan"),
            tesseract_bin: PathBuf::from("tesseract"),
            job_concurrency: 1,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("calibration_dpi", &self.calibration_dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("engine_timeout_secs", &self.engine_timeout_secs)
            .field("strategy", &self.strategy)
            .field("escalation", &self.escalation)
            .field("checkpoint_dir", &self.checkpoint_dir)
            .field("job_concurrency", &self.job_concurrency)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// The per-call engine timeout as a `Duration`.
    pub fn engine_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.engine_timeout_secs)
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 600);
        self
    }

    pub fn calibration_dpi(mut self, dpi: u32) -> Self {
        self.config.calibration_dpi = dpi.clamp(72, 600);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn engine_timeout_secs(mut self, secs: u64) -> Self {
        self.config.engine_timeout_secs = secs;
        self
    }

    pub fn strategy(mut self, strategy: StrategyMode) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn escalation(mut self, policy: EscalationPolicy) -> Self {
        self.config.escalation = policy;
        self
    }

    pub fn checkpoint_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.checkpoint_dir = dir.into();
        self
    }

    pub fn tesseract_bin(mut self, bin: impl Into<PathBuf>) -> Self {
        self.config.tesseract_bin = bin.into();
        self
    }

    pub fn job_concurrency(mut self, n: usize) -> Self {
        self.config.job_concurrency = n.max(1);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, WikiscanError> {
        let c = &self.config;
        if c.engine_timeout_secs == 0 {
            return Err(WikiscanError::InvalidConfig(
                "engine timeout must be at least 1 second".into(),
            ));
        }
        c.escalation.validate()?;
        Ok(self.config)
    }
}

// ── Strategy ─────────────────────────────────────────────────────────────

/// Which transcription engines a batch job may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyMode {
    /// Vision-language model only; a failed page is skipped.
    PrimaryOnly,
    /// OCR + reformat only; the vision model is never called.
    SecondaryOnly,
    /// Vision model first, falling back and escalating on failures. (default)
    #[default]
    Adaptive,
}

impl StrategyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyMode::PrimaryOnly => "primary-only",
            StrategyMode::SecondaryOnly => "secondary-only",
            StrategyMode::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for StrategyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyMode {
    type Err = WikiscanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "primary-only" | "primary" => Ok(StrategyMode::PrimaryOnly),
            "secondary-only" | "secondary" => Ok(StrategyMode::SecondaryOnly),
            "adaptive" => Ok(StrategyMode::Adaptive),
            other => Err(WikiscanError::InvalidConfig(format!(
                "unknown strategy '{other}' (expected primary-only, secondary-only or adaptive)"
            ))),
        }
    }
}

/// Failure thresholds for the adaptive engine state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    /// Consecutive primary failures that open a cooldown window. Default: 2.
    pub cooldown_after: u32,
    /// Pages forced onto the secondary engine during a cooldown. Default: 5.
    pub cooldown_pages: u32,
    /// Consecutive primary failures that disable the primary for good. Default: 3.
    pub permanent_after: u32,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            cooldown_after: 2,
            cooldown_pages: 5,
            permanent_after: 3,
        }
    }
}

impl EscalationPolicy {
    fn validate(&self) -> Result<(), WikiscanError> {
        if self.cooldown_after == 0 || self.permanent_after <= self.cooldown_after {
            return Err(WikiscanError::InvalidConfig(format!(
                "escalation thresholds must satisfy 0 < cooldown_after < permanent_after (got {} / {})",
                self.cooldown_after, self.permanent_after
            )));
        }
        Ok(())
    }
}

// ── Labeling ─────────────────────────────────────────────────────────────

/// An inclusive range of physical pages holding illustration plates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IllustrationRange {
    pub start: usize,
    pub end: usize,
}

impl IllustrationRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index <= self.end
    }
}

impl FromStr for IllustrationRange {
    type Err = WikiscanError;

    /// Parse `"12"` or `"12-14"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || WikiscanError::InvalidConfig(format!("invalid illustration range '{s}'"));
        let s = s.trim();
        match s.split_once('-') {
            Some((a, b)) => {
                let start = a.trim().parse().map_err(|_| bad())?;
                let end = b.trim().parse().map_err(|_| bad())?;
                Ok(Self::new(start, end))
            }
            None => {
                let page = s.parse().map_err(|_| bad())?;
                Ok(Self::new(page, page))
            }
        }
    }
}

/// Per-document layout facts driving page labels.
///
/// Immutable once built; construct with [`LabelingConfig::builder()`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelingConfig {
    has_cover_image: bool,
    first_numbered_page_index: usize,
    illustration_ranges: Vec<IllustrationRange>,
    language: String,
}

impl LabelingConfig {
    pub fn builder() -> LabelingConfigBuilder {
        LabelingConfigBuilder {
            has_cover_image: false,
            first_numbered_page_index: 1,
            illustration_ranges: Vec::new(),
            language: "eng".to_string(),
        }
    }

    /// Whether physical page 1 is a cover that gets no label and no text.
    pub fn has_cover_image(&self) -> bool {
        self.has_cover_image
    }

    /// Physical index of the page printed as "1".
    pub fn first_numbered_page_index(&self) -> usize {
        self.first_numbered_page_index
    }

    /// Sorted, merged illustration ranges.
    pub fn illustration_ranges(&self) -> &[IllustrationRange] {
        &self.illustration_ranges
    }

    /// Tesseract language code (eng, deu, fas, …).
    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn is_cover(&self, index: usize) -> bool {
        self.has_cover_image && index == 1
    }

    pub fn is_illustration(&self, index: usize) -> bool {
        self.illustration_ranges.iter().any(|r| r.contains(index))
    }
}

/// Builder for [`LabelingConfig`].
#[derive(Debug, Clone)]
pub struct LabelingConfigBuilder {
    has_cover_image: bool,
    first_numbered_page_index: usize,
    illustration_ranges: Vec<IllustrationRange>,
    language: String,
}

impl LabelingConfigBuilder {
    pub fn has_cover_image(mut self, v: bool) -> Self {
        self.has_cover_image = v;
        self
    }

    pub fn first_numbered_page_index(mut self, index: usize) -> Self {
        self.first_numbered_page_index = index;
        self
    }

    pub fn illustration_range(mut self, start: usize, end: usize) -> Self {
        self.illustration_ranges.push(IllustrationRange::new(start, end));
        self
    }

    pub fn illustration_ranges(mut self, ranges: impl IntoIterator<Item = IllustrationRange>) -> Self {
        self.illustration_ranges.extend(ranges);
        self
    }

    pub fn language(mut self, lang: impl Into<String>) -> Self {
        self.language = lang.into();
        self
    }

    /// Validate and normalise: ranges are sorted and overlapping ranges merged.
    pub fn build(self) -> Result<LabelingConfig, WikiscanError> {
        if self.first_numbered_page_index == 0 {
            return Err(WikiscanError::InvalidConfig(
                "first numbered page index is 1-based".into(),
            ));
        }
        if self.language.trim().is_empty() {
            return Err(WikiscanError::InvalidConfig("language code is empty".into()));
        }
        for r in &self.illustration_ranges {
            if r.start == 0 || r.start > r.end {
                return Err(WikiscanError::InvalidConfig(format!(
                    "illustration range {}-{} is not a valid 1-based range",
                    r.start, r.end
                )));
            }
        }

        let mut ranges = self.illustration_ranges;
        ranges.sort_unstable();
        let mut merged: Vec<IllustrationRange> = Vec::with_capacity(ranges.len());
        for r in ranges {
            match merged.last_mut() {
                Some(last) if r.start <= last.end.saturating_add(1) => last.end = last.end.max(r.end),
                _ => merged.push(r),
            }
        }

        Ok(LabelingConfig {
            has_cover_image: self.has_cover_image,
            first_numbered_page_index: self.first_numbered_page_index,
            illustration_ranges: merged,
            language: self.language,
        })
    }
}
