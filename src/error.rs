//! Error types for the wikiscan library.
//!
//! Three error types reflect three distinct failure scopes:
//!
//! * [`WikiscanError`]: **Fatal** for one document or job: the source PDF
//!   is missing or corrupt, the provider is not configured, the checkpoint
//!   cannot be written. Returned as `Err(WikiscanError)` from the top-level
//!   entry points.
//!
//! * [`EngineError`]: **Non-fatal**: one call to one transcription engine
//!   failed (timeout, rate limit, content filter). The orchestrator reacts by
//!   switching engines; it never aborts a batch.
//!
//! * [`PageError`]: **Non-fatal**: a single page could not be transcribed at
//!   all. Stored inside [`crate::output::PageOutcome`] so callers can audit
//!   what was skipped after the batch finishes.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the wikiscan library.
#[derive(Debug, Error)]
pub enum WikiscanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// A requested physical page does not exist.
    #[error("Page {page} is out of range (document has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: usize, detail: String },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium or place the library next to the binary."
    )]
    PdfiumBindingFailed(String),

    // ── Engine errors ─────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    // ── Checkpoint and output errors ──────────────────────────────────────
    /// The checkpoint file exists but could not be read or parsed.
    #[error("Failed to read checkpoint '{path}': {detail}")]
    CheckpointRead { path: PathBuf, detail: String },

    /// The checkpoint could not be persisted.
    #[error("Failed to write checkpoint '{path}': {source}")]
    CheckpointWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output text file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A single failed call to a transcription engine.
///
/// Every variant is recoverable from the batch's point of view: the
/// orchestrator counts it as a failure of that engine and moves on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// The call did not finish within the per-call timeout.
    #[error("call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The model refused the page (content filter, recitation, copyright).
    #[error("content blocked: {reason}")]
    ContentBlocked { reason: String },

    /// HTTP 429 or provider quota message.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Network or API error.
    #[error("transport error: {0}")]
    Transport(String),

    /// The engine answered but produced no text.
    #[error("engine returned an empty response")]
    EmptyResponse,

    /// The engine cannot run at all (binary missing, provider unset).
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// Classify a provider error message.
    ///
    /// Providers report content filters and rate limits as plain API errors,
    /// so the message text is the only signal available.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if ["content_filter", "content filter", "recitation", "copyright", "safety", "blocked"]
            .iter()
            .any(|k| lower.contains(k))
        {
            EngineError::ContentBlocked { reason: message }
        } else if lower.contains("429") || lower.contains("rate limit") || lower.contains("quota")
        {
            EngineError::RateLimited(message)
        } else {
            EngineError::Transport(message)
        }
    }

    /// Whether repeating the same call could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::Transport(_) | EngineError::RateLimited(_) | EngineError::Timeout { .. }
        )
    }
}

/// A non-fatal error for a single page.
///
/// The batch continues; the page is recorded with an empty result.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum PageError {
    /// Page rasterisation failed.
    #[error("Page {page}: rasterisation failed: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// Every engine the strategy allowed failed outright.
    #[error("Page {page}: all engines failed (primary: {primary}; secondary: {secondary})")]
    AllEnginesFailed {
        page: usize,
        primary: String,
        secondary: String,
    },

    /// The page index lies outside the document.
    #[error("Page {page}: out of range (document has {total} pages)")]
    OutOfRange { page: usize, total: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_content_filter() {
        let e = EngineError::classify("API error: finish_reason=content_filter");
        assert!(matches!(e, EngineError::ContentBlocked { .. }));
        assert!(!e.is_retryable());
    }

    #[test]
    fn classify_recitation() {
        let e = EngineError::classify("Response blocked: RECITATION");
        assert!(matches!(e, EngineError::ContentBlocked { .. }));
    }

    #[test]
    fn classify_copyright_refusal() {
        let e = EngineError::classify("Model declined: output may reproduce copyrighted material");
        assert!(matches!(e, EngineError::ContentBlocked { .. }));
    }

    #[test]
    fn classify_rate_limit() {
        let e = EngineError::classify("HTTP 429 Too Many Requests");
        assert!(matches!(e, EngineError::RateLimited(_)));
        assert!(e.is_retryable());
    }

    #[test]
    fn classify_fallback_is_transport() {
        let e = EngineError::classify("connection reset by peer");
        assert_eq!(e, EngineError::Transport("connection reset by peer".into()));
    }

    #[test]
    fn page_out_of_range_display() {
        let e = WikiscanError::PageOutOfRange { page: 12, total: 10 };
        let msg = e.to_string();
        assert!(msg.contains("12"), "got: {msg}");
        assert!(msg.contains("10 pages"), "got: {msg}");
    }

    #[test]
    fn all_engines_failed_display() {
        let e = PageError::AllEnginesFailed {
            page: 4,
            primary: "content blocked".into(),
            secondary: "timeout".into(),
        };
        let msg = e.to_string();
        assert!(msg.contains("Page 4"));
        assert!(msg.contains("timeout"));
    }
}
