//! Error types for the pdf2speech library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Pdf2SpeechError`] — **Fatal**: the conversion cannot proceed at all
//!   (bad input file, no extractable text, speech backend missing). Returned
//!   as `Err(Pdf2SpeechError)` from the top-level `convert*` functions and
//!   retained verbatim on a failed job.
//!
//! * [`SegmentError`] — **Non-fatal**: a single segment failed synthesis
//!   (engine crash, per-attempt timeout) after its retries were exhausted.
//!   Stored inside [`crate::output::SegmentResult`] so callers can inspect
//!   partial success rather than losing the whole document to one bad
//!   sentence.
//!
//! The separation lets callers decide their own tolerance: abort on the first
//! skipped segment, fill the gap with silence and continue, or collect all
//! skips for a post-run report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2speech library.
///
/// Segment-level failures use [`SegmentError`] and are stored in
/// [`crate::output::SegmentResult`] rather than propagated here.
#[derive(Debug, Error)]
pub enum Pdf2SpeechError {
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
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The PDF parser rejected the document outright.
    #[error("Text extraction failed for '{path}': {detail}\nTry repairing with: qpdf input.pdf output.pdf")]
    ExtractionFailed { path: PathBuf, detail: String },

    /// The document is encrypted; extraction cannot read its content streams.
    #[error("PDF '{path}' is encrypted.\nDecrypt it first: qpdf --decrypt input.pdf output.pdf")]
    PdfEncrypted { path: PathBuf },

    /// Every page came back empty — typically a scanned/image-only PDF.
    #[error(
        "No extractable text in '{path}' ({pages} pages, all empty).\n\
         Scanned documents need OCR before conversion, e.g.: ocrmypdf input.pdf output.pdf"
    )]
    NoExtractableText { path: PathBuf, pages: usize },

    // ── Segmentation errors ───────────────────────────────────────────────
    /// Segmenter configuration is unusable. Raised at job start, before any
    /// I/O is attempted.
    #[error("Invalid segmentation settings: {detail}")]
    Segmentation { detail: String },

    // ── Synthesis errors ──────────────────────────────────────────────────
    /// No speech backend could be resolved (none injected, none named, none
    /// detected on PATH).
    #[error("Speech backend '{backend}' is not available.\n{hint}")]
    BackendUnavailable { backend: String, hint: String },

    /// A segment exhausted its retries under [`FailurePolicy::Abort`].
    ///
    /// [`FailurePolicy::Abort`]: crate::config::FailurePolicy::Abort
    #[error("Synthesis aborted at segment {seq} after {retries} retries: {detail}")]
    SynthesisAborted {
        seq: usize,
        retries: u32,
        detail: String,
    },

    /// Every segment failed after all retries; output would be pure silence.
    #[error("All {total} segments failed after {retries} retries each.\nFirst error: {first_error}")]
    AllSegmentsFailed {
        total: usize,
        retries: u32,
        first_error: String,
    },

    /// Some segments were synthesized but at least one was skipped.
    ///
    /// Returned by [`crate::output::ConversionOutput::into_result`] when the
    /// caller wants to treat any skip as an error.
    #[error("{skipped}/{total} segments were skipped during conversion")]
    PartialFailure {
        synthesized: usize,
        skipped: usize,
        total: usize,
    },

    // ── Assembly errors ───────────────────────────────────────────────────
    /// A segment artifact expected on disk was missing at assembly time.
    #[error("Audio for segment {seq} is missing and gap filling is disabled")]
    MissingArtifact { seq: usize },

    /// Segment clips disagree on sample rate / channels / bit depth and
    /// cannot be concatenated.
    #[error("Audio format mismatch at segment {seq}: expected {expected}, got {actual}")]
    AudioFormatMismatch {
        seq: usize,
        expected: String,
        actual: String,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output audio file.
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

    // ── Cancellation ──────────────────────────────────────────────────────
    /// The job was cancelled on request. A distinct terminal outcome, not a
    /// failure: partial artifacts stay in the checkpoint for a later resume.
    #[error("Conversion cancelled")]
    Cancelled,

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single segment.
///
/// Stored alongside [`crate::output::SegmentResult`] when a segment fails.
/// The overall conversion continues unless ALL segments fail or the failure
/// policy is `Abort`.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum SegmentError {
    /// The speech backend failed after retries.
    #[error("Segment {seq}: synthesis failed after {retries} retries: {detail}")]
    Synthesis {
        seq: usize,
        retries: u32,
        detail: String,
    },

    /// Synthesis timed out on every attempt.
    #[error("Segment {seq}: synthesis timed out after {secs}s")]
    Timeout { seq: usize, secs: u64 },

    /// The backend reported success but the artifact is empty or unreadable.
    #[error("Segment {seq}: backend produced an invalid artifact: {detail}")]
    InvalidArtifact { seq: usize, detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_display() {
        let e = Pdf2SpeechError::PartialFailure {
            synthesized: 9,
            skipped: 1,
            total: 10,
        };
        let msg = e.to_string();
        assert!(msg.contains("1/10"), "got: {msg}");
    }

    #[test]
    fn no_extractable_text_mentions_ocr() {
        let e = Pdf2SpeechError::NoExtractableText {
            path: "scan.pdf".into(),
            pages: 12,
        };
        let msg = e.to_string();
        assert!(msg.contains("12 pages"));
        assert!(msg.contains("ocrmypdf"));
    }

    #[test]
    fn synthesis_aborted_display() {
        let e = Pdf2SpeechError::SynthesisAborted {
            seq: 5,
            retries: 2,
            detail: "piper exited with status 1".into(),
        };
        assert!(e.to_string().contains("segment 5"));
        assert!(e.to_string().contains("2 retries"));
    }

    #[test]
    fn format_mismatch_display() {
        let e = Pdf2SpeechError::AudioFormatMismatch {
            seq: 3,
            expected: "22050Hz/1ch/16bit".into(),
            actual: "16000Hz/1ch/16bit".into(),
        };
        assert!(e.to_string().contains("segment 3"));
        assert!(e.to_string().contains("22050Hz"));
    }

    #[test]
    fn cancelled_is_not_worded_as_failure() {
        let msg = Pdf2SpeechError::Cancelled.to_string();
        assert!(!msg.to_lowercase().contains("fail"), "got: {msg}");
    }

    #[test]
    fn segment_timeout_display() {
        let e = SegmentError::Timeout { seq: 7, secs: 30 };
        assert!(e.to_string().contains("30s"));
        assert!(e.to_string().contains("Segment 7"));
    }

    #[test]
    fn segment_error_round_trips_through_json() {
        let e = SegmentError::Synthesis {
            seq: 1,
            retries: 2,
            detail: "boom".into(),
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: SegmentError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.to_string(), e.to_string());
    }
}
