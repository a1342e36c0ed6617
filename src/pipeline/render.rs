//! PDF rasterisation: render single pages to [`PageImage`] via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! [`SourceDocument::render`] moves every render onto the blocking thread
//! pool so the Tokio workers never stall during CPU-heavy rasterisation.
//!
//! ## Why one page at a time?
//!
//! Books run to hundreds of pages; at 300 DPI a page is ~25 MB of pixels.
//! Calibration needs three pages and the batch loop needs exactly one at a
//! time, so pages are rendered on demand and dropped as soon as they are
//! transcribed.

use crate::error::WikiscanError;
use crate::output::PageImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Rasteriser for physical PDF pages.
///
/// Implementations are blocking; [`SourceDocument`] runs them on the
/// blocking pool.
pub trait PageRenderer: Send + Sync {
    /// Number of pages in the document. Fails on unreadable PDFs.
    fn page_count(&self, pdf_path: &Path) -> Result<usize, WikiscanError>;

    /// Render 1-based physical page `index` at `dpi`.
    fn render(&self, pdf_path: &Path, index: usize, dpi: u32) -> Result<PageImage, WikiscanError>;
}

/// [`PageRenderer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    max_pixels: u32,
    password: Option<String>,
}

impl PdfiumRenderer {
    pub fn new(max_pixels: u32) -> Self {
        Self {
            max_pixels,
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    fn open<'a>(&'a self, pdfium: &'a Pdfium, pdf_path: &Path) -> Result<PdfDocument<'a>, WikiscanError> {
        pdfium
            .load_pdf_from_file(pdf_path, self.password.as_deref())
            .map_err(|e| WikiscanError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: format!("{:?}", e),
            })
    }
}

/// Bind pdfium: `PDFIUM_LIB_PATH`, then the working directory, then the system.
fn bind_pdfium() -> Result<Pdfium, WikiscanError> {
    let bindings = match std::env::var("PDFIUM_LIB_PATH") {
        Ok(path) if !path.is_empty() => Pdfium::bind_to_library(&path),
        _ => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| WikiscanError::PdfiumBindingFailed(format!("{:?}", e)))?;
    Ok(Pdfium::new(bindings))
}

impl PageRenderer for PdfiumRenderer {
    fn page_count(&self, pdf_path: &Path) -> Result<usize, WikiscanError> {
        let pdfium = bind_pdfium()?;
        let document = self.open(&pdfium, pdf_path)?;
        Ok(document.pages().len() as usize)
    }

    fn render(&self, pdf_path: &Path, index: usize, dpi: u32) -> Result<PageImage, WikiscanError> {
        let pdfium = bind_pdfium()?;
        let document = self.open(&pdfium, pdf_path)?;
        let pages = document.pages();
        let total = pages.len() as usize;
        if index == 0 || index > total {
            return Err(WikiscanError::PageOutOfRange { page: index, total });
        }

        let page = pages
            .get((index - 1) as u16)
            .map_err(|e| WikiscanError::RasterisationFailed {
                page: index,
                detail: format!("{:?}", e),
            })?;

        // PDF user space is 72 units per inch.
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| WikiscanError::RasterisationFailed {
                page: index,
                detail: format!("{:?}", e),
            })?;

        let image = bitmap.as_image();
        debug!("Rendered page {} → {}x{} px", index, image.width(), image.height());

        Ok(PageImage {
            document: file_name_of(pdf_path),
            index,
            image,
            dpi,
        })
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// A source PDF with a known page count and a renderer to read it.
#[derive(Clone)]
pub struct SourceDocument {
    path: PathBuf,
    file_name: String,
    page_count: usize,
    renderer: Arc<dyn PageRenderer>,
}

impl std::fmt::Debug for SourceDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceDocument")
            .field("path", &self.path)
            .field("page_count", &self.page_count)
            .finish()
    }
}

impl SourceDocument {
    /// Open `path` and read its page count.
    ///
    /// Fails with [`WikiscanError::CorruptPdf`] when the file cannot be
    /// parsed; that error is fatal for this document only.
    pub async fn open(path: impl Into<PathBuf>, renderer: Arc<dyn PageRenderer>) -> Result<Self, WikiscanError> {
        let path = path.into();
        let probe = Arc::clone(&renderer);
        let probe_path = path.clone();
        let page_count = tokio::task::spawn_blocking(move || probe.page_count(&probe_path))
            .await
            .map_err(|e| WikiscanError::Internal(format!("Page-count task panicked: {}", e)))??;

        info!("Opened {}: {} pages", path.display(), page_count);
        Ok(Self {
            file_name: file_name_of(&path),
            path,
            page_count,
            renderer,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name used in page tags.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Render 1-based physical page `index` on the blocking pool.
    pub async fn render(&self, index: usize, dpi: u32) -> Result<PageImage, WikiscanError> {
        if index == 0 || index > self.page_count {
            return Err(WikiscanError::PageOutOfRange {
                page: index,
                total: self.page_count,
            });
        }
        let renderer = Arc::clone(&self.renderer);
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || renderer.render(&path, index, dpi))
            .await
            .map_err(|e| WikiscanError::Internal(format!("Render task panicked: {}", e)))?
    }
}
