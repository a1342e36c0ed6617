//! VLM interaction: the primary transcription engine, the calibration page
//! number reader and the OCR reformat pass.
//!
//! All three talk to the same [`LLMProvider`]. Prompt wording lives in
//! [`crate::prompts`]; this module owns message layout, retries and the
//! mapping of provider failures onto [`EngineError`].
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors are transient under load. Exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`) gives 500 ms → 1 s → 2 s with the
//! defaults. Content blocks are never retried: the same page will be refused
//! again, and the fallback engine is the faster way out.

use crate::config::PipelineConfig;
use crate::error::{EngineError, WikiscanError};
use crate::output::PageImage;
use crate::pipeline::encode::encode_page;
use crate::pipeline::postprocess::clean_transcription;
use crate::prompts::{reformat_request, PAGE_NUMBER_PROMPT, REFORMAT_OCR_PROMPT, TRANSCRIBE_PAGE_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Model used when a provider is named without one.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

// ── Engine seams ─────────────────────────────────────────────────────────

/// Vision-language transcription of one page image.
#[async_trait]
pub trait PrimaryEngine: Send + Sync {
    /// Return cleaned page text, or [`crate::pipeline::postprocess::BLANK_MARKER`]
    /// for a page with no text.
    async fn transcribe(&self, page: &PageImage) -> Result<String, EngineError>;
}

/// Text-only rewrite of raw OCR output into the archive's markup.
#[async_trait]
pub trait Reformatter: Send + Sync {
    async fn reformat(&self, raw_ocr: &str) -> Result<String, EngineError>;
}

/// Reads the printed page number off a page image.
#[async_trait]
pub trait PageNumberReader: Send + Sync {
    /// `Ok(None)` when the page carries no printed number.
    async fn read_page_number(&self, page: &PageImage) -> Result<Option<u32>, EngineError>;
}

// ── Primary engine ───────────────────────────────────────────────────────

/// [`PrimaryEngine`] backed by a vision-capable LLM provider.
pub struct VisionTranscriber {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    max_retries: u32,
    retry_backoff_ms: u64,
}

impl VisionTranscriber {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }
}

#[async_trait]
impl PrimaryEngine for VisionTranscriber {
    /// ## Message Layout
    ///
    /// 1. **System message**: the transcription rules
    /// 2. **User message**: the page PNG as a base64 image with empty text
    ///
    /// VLM APIs require a user turn to respond to; the image carries all the
    /// content.
    async fn transcribe(&self, page: &PageImage) -> Result<String, EngineError> {
        let image = encode_for_request(page)?;
        let messages = vec![
            ChatMessage::system(TRANSCRIBE_PAGE_PROMPT),
            ChatMessage::user_with_images("", vec![image]),
        ];

        let mut last_err = EngineError::EmptyResponse;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Page {}: retry {}/{} after {}ms",
                    page.index, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match self.provider.chat(&messages, Some(&self.options)).await {
                Ok(response) => {
                    debug!(
                        "Page {}: {} input tokens, {} output tokens",
                        page.index, response.prompt_tokens, response.completion_tokens
                    );
                    return classify_response(&response.content).map(|raw| clean_transcription(&raw));
                }
                Err(e) => {
                    let err = EngineError::classify(e.to_string());
                    warn!("Page {}: attempt {} failed: {}", page.index, attempt + 1, err);
                    if !err.is_retryable() {
                        return Err(err);
                    }
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }
}

/// Map a successful provider reply to page text or a failure.
///
/// Some providers return a refusal as ordinary content instead of an error;
/// a short reply that reads like one counts as a content block.
pub fn classify_response(content: &str) -> Result<String, EngineError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(EngineError::EmptyResponse);
    }
    if looks_like_refusal(trimmed) {
        return Err(EngineError::ContentBlocked {
            reason: trimmed.chars().take(120).collect(),
        });
    }
    Ok(content.to_string())
}

fn looks_like_refusal(text: &str) -> bool {
    const MARKERS: [&str; 7] = [
        "recitation",
        "copyrighted material",
        "i can't help",
        "i cannot help",
        "i'm unable to",
        "i am unable to",
        "cannot transcribe",
    ];
    if text.chars().count() > 400 {
        return false;
    }
    let lower = text.to_lowercase();
    MARKERS.iter().any(|m| lower.contains(m))
}

// ── Calibration reader ───────────────────────────────────────────────────

/// [`PageNumberReader`] asking a vision model for the printed number.
pub struct VisionPageNumberReader {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl VisionPageNumberReader {
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self {
            provider,
            options: CompletionOptions {
                temperature: Some(0.0),
                max_tokens: Some(16),
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl PageNumberReader for VisionPageNumberReader {
    async fn read_page_number(&self, page: &PageImage) -> Result<Option<u32>, EngineError> {
        let image = encode_for_request(page)?;
        let messages = vec![ChatMessage::user_with_images(PAGE_NUMBER_PROMPT, vec![image])];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| EngineError::classify(e.to_string()))?;
        let number = parse_page_number(&response.content);
        debug!("Page {}: probe reply {:?} → {:?}", page.index, response.content.trim(), number);
        Ok(number)
    }
}

/// First run of ASCII digits in a probe reply: `"Page 38"` → 38, `"NONE"` → None.
pub fn parse_page_number(reply: &str) -> Option<u32> {
    let start = reply.find(|c: char| c.is_ascii_digit())?;
    let digits: String = reply[start..].chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

// ── Reformat pass ────────────────────────────────────────────────────────

/// [`Reformatter`] backed by a text LLM call.
pub struct LlmReformatter {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmReformatter {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }
}

#[async_trait]
impl Reformatter for LlmReformatter {
    async fn reformat(&self, raw_ocr: &str) -> Result<String, EngineError> {
        let messages = vec![
            ChatMessage::system(REFORMAT_OCR_PROMPT),
            ChatMessage::user(reformat_request(raw_ocr)),
        ];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| EngineError::classify(e.to_string()))?;
        classify_response(&response.content).map(|text| clean_transcription(&text))
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────

fn encode_for_request(page: &PageImage) -> Result<ImageData, EngineError> {
    encode_page(&page.image)
        .map_err(|e| EngineError::Unavailable(format!("page {} could not be encoded: {}", page.index, e)))
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_vision_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, WikiscanError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        WikiscanError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`), API key read from
///    the provider's usual environment variable.
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    honoured even when several API keys are present.
/// 4. **OpenAI key** (`OPENAI_API_KEY`) with the configured or default model.
/// 5. **Full auto-detection** (`ProviderFactory::from_env`).
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, WikiscanError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_vision_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_vision_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_vision_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| WikiscanError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, GEMINI_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
