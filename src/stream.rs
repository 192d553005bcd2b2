//! Streaming conversion API: emit segment audio as it is synthesized.
//!
//! ## Why stream?
//!
//! Book-length documents take minutes to synthesize. A stream-based API lets
//! callers start playback, upload clips, or drive a UI as soon as the first
//! segments are ready instead of waiting for the whole document.
//!
//! Unlike the eager [`crate::convert::convert`], which assembles a final
//! file, [`convert_stream`] yields one [`SegmentResult`] per segment and
//! leaves the WAV files in the output directory for the caller to manage.
//! Segments may arrive out of order (sort or buffer by `seq` if playback
//! order matters). Dropping the stream abandons synthesis; in-flight engine
//! processes are killed with their futures.

use crate::backend;
use crate::config::ConversionConfig;
use crate::error::{Pdf2SpeechError, SegmentError};
use crate::job::CancelToken;
use crate::output::SegmentResult;
use crate::pipeline::{checkpoint, extract, input, segment, synth};
use futures::stream::{self, StreamExt};
use std::io::Write;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio_stream::Stream;
use tracing::{debug, info};

/// A boxed stream of segment results.
pub type SegmentStream = Pin<Box<dyn Stream<Item = Result<SegmentResult, SegmentError>> + Send>>;

/// Convert a PDF to audio, streaming segments as they are ready.
///
/// Input resolution, extraction, and segmentation run before this function
/// returns, so fatal problems (missing file, encrypted PDF, no backend)
/// surface as an `Err` here rather than mid-stream. Afterwards each item is
/// either a synthesized segment or that segment's final error after retries;
/// one bad segment never ends the stream.
///
/// Audio files land in `config.output` (a directory; defaults to
/// `<input stem>_audio` in the working directory) named `seg_NNNNN.wav`
/// by sequence number.
///
/// # Example
/// ```rust,no_run
/// use pdf2speech::{convert_stream, ConversionConfig};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ConversionConfig::default();
/// let mut stream = convert_stream("document.pdf", &config).await?;
/// while let Some(item) = stream.next().await {
///     match item {
///         Ok(seg) => println!("segment {} ready: {:?}", seg.seq, seg.artifact),
///         Err(e) => eprintln!("segment failed: {e}"),
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn convert_stream(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<SegmentStream, Pdf2SpeechError> {
    config.validate()?;
    let input_str = input_str.as_ref();
    info!("Starting streaming conversion: {input_str}");

    // ── Resolve everything fatal up front ────────────────────────────────
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let speech = backend::resolve_backend(config)?;
    let extractor = config
        .extractor
        .clone()
        .unwrap_or_else(|| Arc::new(extract::PdfTextExtractor) as Arc<dyn extract::TextExtractor>);
    let pages = extract::extract_pages(resolved.path(), extractor).await?;
    let segments =
        segment::segment_pages(&pages, config.max_segment_chars, config.min_segment_chars);
    let total = segments.len();
    debug!("Streaming {total} segment(s)");

    let out_dir = stream_output_dir(config, resolved.path());
    std::fs::create_dir_all(&out_dir).map_err(|e| Pdf2SpeechError::OutputWriteFailed {
        path: out_dir.clone(),
        source: e,
    })?;

    if let Some(ref cb) = config.progress_callback {
        cb.on_synthesis_start(total);
    }

    // ── Build the stream ─────────────────────────────────────────────────
    let concurrency = config.concurrency;
    let config_clone = config.clone();
    // Streams are cancelled by dropping them, so this token never fires.
    let cancel = CancelToken::new();
    let halt = Arc::new(AtomicBool::new(false));

    let s = stream::iter(segments.into_iter().map(move |seg| {
        let backend = Arc::clone(&speech);
        let cfg = config_clone.clone();
        let cancel = cancel.clone();
        let halt = Arc::clone(&halt);
        let out_path = checkpoint::segment_path(&out_dir, seg.seq);
        async move {
            let seq = seg.seq;
            if let Some(ref cb) = cfg.progress_callback {
                cb.on_segment_start(seq, total);
            }
            let settled =
                synth::synthesize_one(&backend, &seg, &cfg, &out_path, &cancel, &halt).await;
            let mut result = match settled {
                Some(result) => result,
                // Unreachable without a cancel signal; surface it as an
                // ordinary segment error rather than ending the stream.
                None => {
                    return Err(SegmentError::Synthesis {
                        seq,
                        retries: 0,
                        detail: "synthesis abandoned".to_string(),
                    })
                }
            };
            if let Some(ref cb) = cfg.progress_callback {
                match &result.error {
                    None => cb.on_segment_complete(seq, total, result.audio_ms()),
                    Some(e) => cb.on_segment_skipped(seq, total, &e.to_string()),
                }
            }
            match result.error.take() {
                None => Ok(result),
                Some(err) => Err(err),
            }
        }
    }))
    .buffer_unordered(concurrency);

    Ok(Box::pin(s))
}

/// Convert PDF bytes in memory to audio, streaming segments as they complete.
///
/// The streaming equivalent of [`crate::convert::convert_from_bytes`]. The
/// bytes are written to a temporary file that is deleted before the stream
/// is returned — extraction has already happened by then, so the stream
/// never touches the PDF again.
pub async fn convert_stream_from_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<SegmentStream, Pdf2SpeechError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| Pdf2SpeechError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| Pdf2SpeechError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    let stream = convert_stream(&path, config).await?;
    drop(tmp);
    Ok(stream)
}

/// Output directory for streamed segments: explicit config, or a directory
/// named after the input.
fn stream_output_dir(config: &ConversionConfig, pdf_path: &std::path::Path) -> PathBuf {
    if let Some(ref out) = config.output {
        return out.clone();
    }
    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());
    PathBuf::from(format!("{stem}_audio"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_output_dir_prefers_config() {
        let config = ConversionConfig::builder()
            .output("/tmp/clips")
            .build()
            .unwrap();
        let dir = stream_output_dir(&config, std::path::Path::new("/x/report.pdf"));
        assert_eq!(dir, PathBuf::from("/tmp/clips"));
    }

    #[test]
    fn test_stream_output_dir_derives_from_input() {
        let config = ConversionConfig::default();
        let dir = stream_output_dir(&config, std::path::Path::new("/x/report.pdf"));
        assert_eq!(dir, PathBuf::from("report_audio"));
    }
}
