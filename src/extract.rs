//! Synchronous label-and-extract path.
//!
//! Walks every physical page in order, labels it with the sequential fold
//! from [`crate::label`], runs plain OCR in the document's language and
//! repairs line-end hyphenation. No model is involved, so the result is
//! cheap and deterministic; the adaptive batch path is the one to use for
//! wiki-quality markup.

use crate::config::{LabelingConfig, PipelineConfig};
use crate::error::WikiscanError;
use crate::label::{format_page_block, LabelState, PageTag};
use crate::output::LabeledPage;
use crate::pipeline::ocr::{tidy_ocr_text, OcrService};
use crate::pipeline::render::SourceDocument;
use crate::pipeline::with_timeout;
use std::path::Path;
use tracing::{debug, info, warn};

/// Label every page of `document` and OCR its text.
///
/// The cover (when flagged) is skipped before rendering. A page whose OCR
/// fails keeps its label and carries an `[OCR FAILED: …]` marker instead of
/// text, so page numbering downstream is unaffected.
///
/// # Errors
///
/// A page that cannot be rendered aborts the extraction: the PDF is broken.
pub async fn label_and_extract(
    document: &SourceDocument,
    ocr: &dyn OcrService,
    labeling: &LabelingConfig,
    config: &PipelineConfig,
) -> Result<Vec<LabeledPage>, WikiscanError> {
    let mut state = LabelState::default();
    let mut pages = Vec::with_capacity(document.page_count());

    for index in 1..=document.page_count() {
        let Some(label) = state.advance(index, labeling) else {
            debug!("Page {}: cover, skipped", index);
            continue;
        };

        let image = document.render(index, config.dpi).await?;
        let text = match with_timeout(config.engine_timeout(), ocr.recognize(&image)).await {
            Ok(raw) => tidy_ocr_text(&raw),
            Err(e) => {
                warn!("Page {} ({}): OCR failed: {}", index, label, e);
                format!("[OCR FAILED: {}]", e)
            }
        };
        debug!("Page {} → {} ({} chars)", index, label, text.len());
        pages.push(LabeledPage { index, label, text });
    }

    info!("Extracted {} labeled pages from '{}'", pages.len(), document.file_name());
    Ok(pages)
}

/// Concatenate labeled pages into the output document.
pub fn assemble(pages: &[LabeledPage], file_name: &str) -> String {
    pages
        .iter()
        .map(|p| format_page_block(&PageTag::new(&p.label, file_name, p.index), &p.text))
        .collect()
}

/// Write the output document atomically (temp file + rename).
pub async fn write_output(path: impl AsRef<Path>, text: &str) -> Result<(), WikiscanError> {
    let path = path.as_ref();
    let write_err = |source: std::io::Error| WikiscanError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }

    let tmp_path = path.with_extension("txt.tmp");
    tokio::fs::write(&tmp_path, text).await.map_err(write_err)?;
    tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

    info!("Wrote {} ({} bytes)", path.display(), text.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label::PageLabel;

    #[test]
    fn assemble_emits_tag_blocks_in_order() {
        let pages = vec![
            LabeledPage {
                index: 2,
                label: PageLabel::RomanNumeral("i".into()),
                text: "Preface".into(),
            },
            LabeledPage {
                index: 3,
                label: PageLabel::Numbered(1),
                text: "Chapter one".into(),
            },
        ];
        assert_eq!(
            assemble(&pages, "B.pdf"),
            "{{page|i|file=B.pdf|page=2}}\nPreface\n{{page|1|file=B.pdf|page=3}}\nChapter one\n"
        );
    }

    #[tokio::test]
    async fn write_output_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("book.txt");
        write_output(&path, "first").await.unwrap();
        write_output(&path, "second").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second");
        assert!(!path.with_extension("txt.tmp").exists());
    }
}
