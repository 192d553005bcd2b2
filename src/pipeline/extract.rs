//! Text extraction: pull page-ordered text out of the PDF.
//!
//! The parsing itself is behind the [`TextExtractor`] trait so the rest of
//! the pipeline never names a PDF library. The default implementation uses
//! the `pdf-extract` crate; tests inject canned extractors, and callers with
//! their own PDF stack can do the same.

use crate::error::Pdf2SpeechError;
use crate::pipeline::normalize;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// One page of normalised text.
///
/// Immutable once produced: downstream stages index into the text but never
/// rewrite it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 0-indexed position in the document.
    pub index: usize,
    /// Normalised text content. Empty for image-only or blank pages.
    pub text: String,
}

impl PageText {
    /// True when the page has no speakable content.
    ///
    /// Normalisation trims pages, so whitespace-only pages are already empty
    /// strings by the time a `PageText` exists.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Capability interface for text extraction.
///
/// Implementations run on a blocking worker thread and are free to do
/// synchronous I/O. Any file handle must be released before returning —
/// extraction is the only stage that reads the document, and the file may
/// live in a temp dir that is torn down right after the job.
pub trait TextExtractor: Send + Sync {
    /// Extract raw text for every page, in document order.
    ///
    /// Pages without text content must still appear as (possibly empty)
    /// entries so page indices line up with the document.
    fn extract(&self, path: &Path) -> Result<Vec<String>, Pdf2SpeechError>;
}

/// Default extractor backed by the `pdf-extract` crate.
pub struct PdfTextExtractor;

impl TextExtractor for PdfTextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<String>, Pdf2SpeechError> {
        pdf_extract::extract_text_by_pages(path)
            .map_err(|e| classify_parse_error(path, e.to_string()))
    }
}

/// Map a parser error message onto the library taxonomy.
///
/// pdf-extract reports encryption as a parse error deep inside its error
/// chain; the display text is the only stable way to recognise it.
fn classify_parse_error(path: &Path, detail: String) -> Pdf2SpeechError {
    let lower = detail.to_lowercase();
    if lower.contains("encrypt") || lower.contains("decrypt") || lower.contains("password") {
        return Pdf2SpeechError::PdfEncrypted {
            path: path.to_path_buf(),
        };
    }
    Pdf2SpeechError::ExtractionFailed {
        path: path.to_path_buf(),
        detail,
    }
}

/// Extract and normalise every page of the document.
///
/// Runs the extractor via `spawn_blocking`: PDF parsing is synchronous CPU
/// work and can take seconds on a book-length document.
///
/// # Errors
/// [`Pdf2SpeechError::NoExtractableText`] when the document has no pages or
/// every page normalises to empty (typically a scanned PDF). Individual
/// empty pages among non-empty ones are fine and flow through.
pub async fn extract_pages(
    path: &Path,
    extractor: Arc<dyn TextExtractor>,
) -> Result<Vec<PageText>, Pdf2SpeechError> {
    let owned_path = path.to_path_buf();
    let raw = tokio::task::spawn_blocking(move || extractor.extract(&owned_path))
        .await
        .map_err(|e| Pdf2SpeechError::Internal(format!("Extraction task panicked: {}", e)))??;

    let pages: Vec<PageText> = raw
        .into_iter()
        .enumerate()
        .map(|(index, text)| PageText {
            index,
            text: normalize::clean_page_text(&text),
        })
        .collect();

    // all() is true for zero pages too, so this covers the empty document
    // and the every-page-blank document in one check.
    if pages.iter().all(|p| p.is_empty()) {
        return Err(Pdf2SpeechError::NoExtractableText {
            path: path.to_path_buf(),
            pages: pages.len(),
        });
    }

    let empty = pages.iter().filter(|p| p.is_empty()).count();
    debug!("Extracted {} pages ({} empty)", pages.len(), empty);
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CannedExtractor(Vec<&'static str>);

    impl TextExtractor for CannedExtractor {
        fn extract(&self, _path: &Path) -> Result<Vec<String>, Pdf2SpeechError> {
            Ok(self.0.iter().map(|s| s.to_string()).collect())
        }
    }

    #[tokio::test]
    async fn pages_are_normalised_and_indexed() {
        let extractor = Arc::new(CannedExtractor(vec![
            "First   page\r\nwith mess.",
            "   \n\t ",
            "Third page.",
        ]));
        let pages = extract_pages(Path::new("x.pdf"), extractor).await.unwrap();

        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0].text, "First page\nwith mess.");
        assert_eq!(pages[0].index, 0);
        assert!(pages[1].is_empty());
        assert_eq!(pages[2].index, 2);
    }

    #[tokio::test]
    async fn all_blank_document_is_an_error() {
        let extractor = Arc::new(CannedExtractor(vec!["", "  \n ", ""]));
        let err = extract_pages(Path::new("scan.pdf"), extractor)
            .await
            .unwrap_err();
        match err {
            Pdf2SpeechError::NoExtractableText { pages, .. } => assert_eq!(pages, 3),
            other => panic!("expected NoExtractableText, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_page_document_is_an_error() {
        let extractor = Arc::new(CannedExtractor(vec![]));
        let err = extract_pages(Path::new("void.pdf"), extractor)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Pdf2SpeechError::NoExtractableText { pages: 0, .. }
        ));
    }

    #[test]
    fn encryption_is_recognised_from_parser_text() {
        let err = classify_parse_error(
            Path::new("locked.pdf"),
            "pdf error: Decryption error (missing password)".into(),
        );
        assert!(matches!(err, Pdf2SpeechError::PdfEncrypted { .. }));

        let err = classify_parse_error(Path::new("bad.pdf"), "invalid xref table".into());
        assert!(matches!(err, Pdf2SpeechError::ExtractionFailed { .. }));
    }

    #[test]
    fn unparseable_bytes_fail_cleanly() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("garbage.pdf");
        std::fs::write(&path, b"%PDF-1.4\nthis is not a real pdf body").unwrap();

        let result = PdfTextExtractor.extract(&path);
        assert!(result.is_err());
    }
}
