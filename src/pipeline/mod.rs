//! Pipeline stages shared by calibration, extraction and batch transcription.
//!
//! Each submodule implements one step, and every external collaborator sits
//! behind a trait so tests can script it:
//!
//! ```text
//! input ──▶ render ──▶ encode ──▶ llm / ocr ──▶ postprocess
//! (URL/path)  (pdfium)  (PNG)     (engines)      (cleanup)
//! ```
//!
//! 1. [`input`]: canonicalise the user-supplied path or URL to a local file
//! 2. [`render`]: rasterise one page at a time; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 3. [`encode`]: base64 PNG for the VLM request body, PNG temp file for OCR
//! 4. [`llm`], [`ocr`]: the engines; the only stages with network or
//!    subprocess I/O
//! 5. [`postprocess`]: deterministic cleanup and hyphenation repair

pub mod encode;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod postprocess;
pub mod render;

use crate::error::EngineError;
use std::future::Future;
use std::time::Duration;

/// Run one engine call under a deadline.
///
/// An elapsed deadline becomes [`EngineError::Timeout`], which the caller
/// treats like any other engine failure.
pub async fn with_timeout<T, F>(limit: Duration, call: F) -> Result<T, EngineError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            secs: limit.as_secs(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn hung_call_times_out() {
        let res: Result<(), EngineError> = with_timeout(Duration::from_secs(120), async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(())
        })
        .await;
        assert_eq!(res, Err(EngineError::Timeout { secs: 120 }));
    }

    #[tokio::test]
    async fn fast_call_passes_through() {
        let res = with_timeout(Duration::from_secs(1), async { Ok::<_, EngineError>(7) }).await;
        assert_eq!(res, Ok(7));
    }
}
