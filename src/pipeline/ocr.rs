//! OCR backend for the secondary engine and the synchronous extract path.
//!
//! Uses the Tesseract command-line tool: widely packaged, no model
//! downloads, and it takes a language code directly. The page is written to
//! a short-lived PNG and Tesseract prints the text to stdout.

use crate::error::EngineError;
use crate::output::PageImage;
use crate::pipeline::encode::write_temp_png;
use crate::pipeline::postprocess::{normalise_apostrophes, repair_hyphenation};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Plain-text recognition of one page image.
#[async_trait]
pub trait OcrService: Send + Sync {
    async fn recognize(&self, page: &PageImage) -> Result<String, EngineError>;
}

/// [`OcrService`] running the `tesseract` binary.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    binary: PathBuf,
    language: String,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

impl Default for TesseractOcr {
    fn default() -> Self {
        Self::new("tesseract", "eng")
    }
}

#[async_trait]
impl OcrService for TesseractOcr {
    async fn recognize(&self, page: &PageImage) -> Result<String, EngineError> {
        let png = write_temp_png(page)
            .map_err(|e| EngineError::Unavailable(format!("cannot write page image: {}", e)))?;

        let output = Command::new(&self.binary)
            .arg(png.path())
            .arg("stdout")
            .args(["-l", self.language.as_str()])
            .kill_on_drop(true)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {
                let text = normalise_ocr_text(&String::from_utf8_lossy(&output.stdout));
                debug!("Page {}: tesseract produced {} chars", page.index, text.len());
                if text.trim().is_empty() {
                    Err(EngineError::EmptyResponse)
                } else {
                    Ok(text)
                }
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                Err(EngineError::Transport(format!("tesseract failed: {}", stderr.trim())))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(EngineError::Unavailable(format!(
                "{} not found (install tesseract-ocr)",
                self.binary.display()
            ))),
            Err(e) => Err(EngineError::Transport(e.to_string())),
        }
    }
}

/// Strip the form feed Tesseract appends after each page.
pub fn normalise_ocr_text(raw: &str) -> String {
    raw.replace('\u{000C}', "")
}

/// Clean OCR output that is stored without a model pass.
pub fn tidy_ocr_text(raw: &str) -> String {
    repair_hyphenation(&normalise_apostrophes(normalise_ocr_text(raw).trim()))
}
