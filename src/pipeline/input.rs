//! Input resolution: normalise a user-supplied path or URL to a local file.
//!
//! ## Why download to a temp file?
//!
//! Everything downstream wants a real file: the text extractor takes a path
//! so backends can mmap or stream as they see fit, and resume fingerprinting
//! re-reads the same bytes on a later run. Downloading into a `TempDir` gives
//! us that path while guaranteeing cleanup when `ResolvedInput` is dropped,
//! even on panic. The PDF magic bytes (`%PDF`) are validated before anything
//! touches the parser so callers get a meaningful error instead of a parser
//! backtrace.

use crate::error::Pdf2SpeechError;
use futures::StreamExt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// The resolved input — either a local path or a downloaded temp file.
#[derive(Debug)]
pub enum ResolvedInput {
    /// Input was already a local file.
    Local(PathBuf),
    /// Input was a URL; PDF downloaded to a temp directory.
    /// The `TempDir` is kept alive to prevent cleanup until the job completes.
    Downloaded { path: PathBuf, _temp_dir: TempDir },
}

impl ResolvedInput {
    /// Path to the PDF file regardless of how it was resolved.
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local(p) => p,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a local PDF file path.
///
/// URLs are downloaded to a temporary directory; local paths are validated
/// for existence, readability, and PDF magic bytes.
pub async fn resolve_input(
    input: &str,
    timeout_secs: u64,
) -> Result<ResolvedInput, Pdf2SpeechError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

fn resolve_local(path_str: &str) -> Result<ResolvedInput, Pdf2SpeechError> {
    let path = PathBuf::from(path_str);
    if !path.exists() {
        return Err(Pdf2SpeechError::FileNotFound { path });
    }
    check_pdf_magic(&path)?;
    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedInput::Local(path))
}

/// Reject non-PDF files before the parser sees them.
///
/// Files shorter than four bytes report whatever bytes were present,
/// zero-padded, so the error message still shows what was found.
fn check_pdf_magic(path: &Path) -> Result<(), Pdf2SpeechError> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(Pdf2SpeechError::PermissionDenied {
                path: path.to_path_buf(),
            });
        }
        Err(_) => {
            return Err(Pdf2SpeechError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
    };

    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        match file.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => break,
        }
    }
    if &magic != b"%PDF" {
        return Err(Pdf2SpeechError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Download a URL into a fresh temp directory.
///
/// The body is streamed to disk chunk by chunk; a book-length PDF should not
/// have to fit in memory on the way through.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, Pdf2SpeechError> {
    info!("Downloading PDF from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Pdf2SpeechError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            Pdf2SpeechError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            Pdf2SpeechError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(Pdf2SpeechError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let temp_dir = TempDir::new().map_err(|e| Pdf2SpeechError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(filename_from_url(url));

    let mut file = tokio::fs::File::create(&file_path)
        .await
        .map_err(|e| Pdf2SpeechError::Internal(format!("Failed to create temp file: {}", e)))?;
    let mut body = response.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| {
            if e.is_timeout() {
                Pdf2SpeechError::DownloadTimeout {
                    url: url.to_string(),
                    secs: timeout_secs,
                }
            } else {
                Pdf2SpeechError::DownloadFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        file.write_all(&chunk)
            .await
            .map_err(|e| Pdf2SpeechError::Internal(format!("Failed to write temp file: {}", e)))?;
    }
    file.flush()
        .await
        .map_err(|e| Pdf2SpeechError::Internal(format!("Failed to write temp file: {}", e)))?;
    drop(file);

    check_pdf_magic(&file_path)?;
    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        _temp_dir: temp_dir,
    })
}

/// Derive a file name from the last URL path segment, falling back to a
/// fixed name for extension-less or empty paths.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(last) = parsed.path_segments().and_then(|mut s| s.next_back()) {
            if !last.is_empty() && last.contains('.') {
                return last.to_string();
            }
        }
    }
    "downloaded.pdf".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn magic_check_accepts_pdf_header() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ok.pdf");
        std::fs::write(&path, b"%PDF-1.7\nrest of file").unwrap();
        assert!(check_pdf_magic(&path).is_ok());
    }

    #[test]
    fn magic_check_reports_found_bytes() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("fake.pdf");
        std::fs::write(&path, b"<html><body>not a pdf</body></html>").unwrap();
        match check_pdf_magic(&path) {
            Err(Pdf2SpeechError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"<htm"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }

    #[test]
    fn magic_check_handles_tiny_files() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("tiny.pdf");
        std::fs::write(&path, b"%P").unwrap();
        match check_pdf_magic(&path) {
            Err(Pdf2SpeechError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"%P\0\0"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = resolve_local("/definitely/not/here.pdf").unwrap_err();
        assert!(matches!(err, Pdf2SpeechError::FileNotFound { .. }));
    }

    #[test]
    fn filename_from_url_uses_last_segment() {
        assert_eq!(
            filename_from_url("https://example.com/papers/attention.pdf"),
            "attention.pdf"
        );
        assert_eq!(filename_from_url("https://example.com/"), "downloaded.pdf");
        assert_eq!(
            filename_from_url("https://example.com/download"),
            "downloaded.pdf"
        );
    }
}
