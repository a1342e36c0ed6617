//! Image encoding for the two engine families.
//!
//! VLM APIs accept images as base64 data embedded in the JSON request body;
//! the OCR binary wants a file on disk. PNG is used for both because it is
//! lossless. JPEG artefacts around glyph edges hurt old typefaces badly.

use crate::output::PageImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tempfile::NamedTempFile;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG ready for the VLM API.
///
/// `detail: "high"` lets tiling models see footnotes and small type; the
/// single-tile overview loses them.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Write a page to a PNG temp file for an OCR subprocess.
///
/// The file is deleted when the returned handle drops.
pub fn write_temp_png(page: &PageImage) -> std::io::Result<NamedTempFile> {
    let file = tempfile::Builder::new()
        .prefix(&format!("wikiscan-p{}-", page.index))
        .suffix(".png")
        .tempfile()?;
    page.image
        .save_with_format(file.path(), image::ImageFormat::Png)
        .map_err(std::io::Error::other)?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(&decoded[1..4], b"PNG");
    }

    #[test]
    fn temp_png_is_removed_on_drop() {
        let page = PageImage {
            document: "b.pdf".into(),
            index: 7,
            image: DynamicImage::ImageRgba8(RgbaImage::new(3, 3)),
            dpi: 150,
        };
        let file = write_temp_png(&page).unwrap();
        let path = file.path().to_path_buf();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".png"));
        drop(file);
        assert!(!path.exists());
    }
}
