//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! ## Why download to a temp file?
//!
//! pdfium opens documents by path, and a batch job reopens the source for
//! every page, so the PDF must stay on disk for the whole job. Downloading
//! into a `TempDir` gives a stable path that is removed when `ResolvedInput`
//! drops. The `%PDF` magic is checked up front so a mislabelled scan fails
//! with a clear error instead of a pdfium code.

use crate::error::WikiscanError;
use futures::StreamExt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A source PDF on local disk.
pub enum ResolvedInput {
    /// The user's own file.
    Local(PathBuf),
    /// A download; the directory lives as long as this value.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve `input` to a local PDF, downloading URLs into a temp directory.
///
/// # Errors
///
/// Missing or unreadable files, failed downloads, and anything whose first
/// four bytes are not `%PDF`.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, WikiscanError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// `Err(NotAPdf)` when `head` is a full four-byte prefix other than `%PDF`.
fn check_magic(path: &Path, head: &[u8]) -> Result<(), WikiscanError> {
    match <[u8; 4]>::try_from(head.get(..4).unwrap_or_default()) {
        Ok(magic) if &magic != PDF_MAGIC => Err(WikiscanError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        }),
        _ => Ok(()),
    }
}

fn resolve_local(input: &str) -> Result<ResolvedInput, WikiscanError> {
    let path = PathBuf::from(input);
    let mut file = match std::fs::File::open(&path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(WikiscanError::PermissionDenied { path });
        }
        Err(_) => return Err(WikiscanError::FileNotFound { path }),
    };

    let mut head = Vec::with_capacity(PDF_MAGIC.len());
    // A short read leaves `head` under four bytes; pdfium reports those.
    let _ = file.by_ref().take(PDF_MAGIC.len() as u64).read_to_end(&mut head);
    check_magic(&path, &head)?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Stream a URL into a temp directory, checking the magic on the first bytes.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, WikiscanError> {
    let failed = |reason: String| WikiscanError::DownloadFailed {
        url: url.to_string(),
        reason,
    };
    let from_reqwest = |e: reqwest::Error| {
        if e.is_timeout() {
            WikiscanError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    };

    info!("Downloading PDF from: {}", url);
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;
    let response = client.get(url).send().await.map_err(from_reqwest)?;
    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let temp_dir = TempDir::new().map_err(|e| WikiscanError::Internal(e.to_string()))?;
    let path = temp_dir.path().join(filename_from_url(url));
    let write_err = |e: std::io::Error| WikiscanError::Internal(format!("Failed to write download: {e}"));
    let mut file = tokio::fs::File::create(&path).await.map_err(write_err)?;

    let mut head = Vec::with_capacity(PDF_MAGIC.len());
    let mut total = 0usize;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(from_reqwest)?;
        if head.len() < PDF_MAGIC.len() {
            let take = (PDF_MAGIC.len() - head.len()).min(chunk.len());
            head.extend_from_slice(&chunk[..take]);
            check_magic(&path, &head)?;
        }
        file.write_all(&chunk).await.map_err(write_err)?;
        total += chunk.len();
    }
    file.flush().await.map_err(write_err)?;

    info!("Downloaded {} bytes to {}", total, path.display());
    Ok(ResolvedInput::Downloaded {
        path,
        _temp_dir: temp_dir,
    })
}

/// Last path segment of the URL when it looks like a file name.
///
/// The name ends up in every page tag, so a stable name matters more than
/// an exact one.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_are_detected_by_scheme() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = resolve_local("/nonexistent/book.pdf").err().unwrap();
        assert!(matches!(err, WikiscanError::FileNotFound { .. }));
    }

    #[test]
    fn non_pdf_is_rejected_by_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.pdf");
        std::fs::write(&path, b"GIF89a").unwrap();
        let err = resolve_local(path.to_str().unwrap()).err().unwrap();
        assert!(matches!(err, WikiscanError::NotAPdf { magic, .. } if &magic == b"GIF8"));
    }

    #[test]
    fn local_pdf_resolves_to_itself() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.pdf");
        std::fs::write(&path, b"%PDF-1.7\n").unwrap();
        let resolved = resolve_local(path.to_str().unwrap()).unwrap();
        assert_eq!(resolved.path(), path.as_path());
    }

    #[test]
    fn short_files_pass_the_magic_check() {
        assert!(check_magic(Path::new("a.pdf"), b"%P").is_ok());
        assert!(check_magic(Path::new("a.pdf"), b"%PDF-1.4").is_ok());
        assert!(check_magic(Path::new("a.pdf"), b"PK\x03\x04").is_err());
    }

    #[test]
    fn filename_from_url_path() {
        assert_eq!(filename_from_url("https://archive.example/scans/Book%20One.pdf"), "Book%20One.pdf");
        assert_eq!(filename_from_url("https://archive.example/download?id=4"), "downloaded.pdf");
    }
}
