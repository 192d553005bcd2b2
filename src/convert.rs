//! Eager (whole-document) conversion entry points.
//!
//! ## Eager vs. job-based vs. streaming
//!
//! This module provides the simplest API: run the full pipeline, wait, and
//! return a [`ConversionOutput`]. Use [`crate::job::Converter`] when you need
//! a handle you can poll, cancel, or wait on from elsewhere, and
//! [`crate::stream::convert_stream`] when you want per-segment results as
//! they are synthesized instead of a final assembled file.
//!
//! All three fronts share [`run_pipeline`], so stage ordering, retry
//! behaviour, checkpointing, and error classification are identical no
//! matter how a conversion was started.

use crate::backend::{self, VoiceInfo};
use crate::config::{ConversionConfig, OutputMode};
use crate::error::Pdf2SpeechError;
use crate::job::{CancelToken, JobState};
use crate::output::{ConversionOutput, ConversionStats, DocumentInfo};
use crate::pipeline::checkpoint::{self, Checkpoint};
use crate::pipeline::extract::{PdfTextExtractor, TextExtractor};
use crate::pipeline::{assemble, extract, input, segment, synth};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Convert a PDF file or URL to spoken audio.
///
/// This is the primary entry point for the library. Output goes to
/// `config.output` (or a `.wav` named after the input, in the current
/// directory) and the returned [`ConversionOutput`] lists every written file.
///
/// # Errors
/// Returns `Err(Pdf2SpeechError)` only for fatal problems: unreadable or
/// non-PDF input, no speech backend, no extractable text, or every segment
/// failing. Individual segment failures are not fatal under the default
/// [`FailurePolicy::Skip`](crate::config::FailurePolicy) — check
/// `output.skipped_indices()` afterwards, or tighten the contract with
/// [`ConversionOutput::into_result`].
pub async fn convert(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2SpeechError> {
    config.validate()?;
    run_pipeline(input_str.as_ref(), config, &CancelToken::new()).await
}

/// Convert PDF bytes in memory to spoken audio.
///
/// Avoids the need for the caller to create a file: `bytes` are written to a
/// managed [`tempfile`] that is cleaned up on return or panic. Recommended
/// when the PDF comes from a database, network stream, or in-memory buffer.
pub async fn convert_from_bytes(
    bytes: &[u8],
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2SpeechError> {
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| Pdf2SpeechError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| Pdf2SpeechError::Internal(format!("tempfile write: {e}")))?;
    let path = tmp.path().to_string_lossy().to_string();
    // `tmp` is dropped (and the file deleted) when `convert` returns
    convert(&path, config).await
}

/// Synchronous wrapper around [`convert`].
///
/// Creates a temporary tokio runtime internally. Do not call from within an
/// async context.
pub fn convert_sync(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<ConversionOutput, Pdf2SpeechError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| Pdf2SpeechError::Internal(format!("Failed to create tokio runtime: {e}")))?
        .block_on(convert(input_str, config))
}

/// Report a document's shape without synthesizing anything.
///
/// Runs extraction and segmentation only, so no speech backend needs to be
/// installed. Useful for "how long would this take to listen to?" checks
/// before committing to a conversion.
pub async fn inspect(
    input_str: impl AsRef<str>,
    config: &ConversionConfig,
) -> Result<DocumentInfo, Pdf2SpeechError> {
    config.validate()?;
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let pages = extract::extract_pages(resolved.path(), extractor_from(config)).await?;
    let segments =
        segment::segment_pages(&pages, config.max_segment_chars, config.min_segment_chars);

    let estimated_secs: f64 = segments
        .iter()
        .map(|s| s.estimated_duration(config.voice.rate).as_secs_f64())
        .sum();
    Ok(DocumentInfo {
        page_count: pages.len(),
        empty_pages: pages.iter().filter(|p| p.is_empty()).count(),
        total_chars: pages.iter().map(|p| p.text.chars().count()).sum(),
        segment_count: segments.len(),
        estimated_audio_secs: estimated_secs.round() as u64,
    })
}

/// List the voices the configured speech backend can enumerate.
///
/// Resolves the backend exactly as [`convert`] would (explicit backend, then
/// `backend_name`, then the `PDF2SPEECH_BACKEND` env var, then PATH
/// auto-detection) and asks it for its voice inventory. An empty list does
/// not mean the engine cannot speak; see
/// [`SpeechBackend::voices`](crate::backend::SpeechBackend::voices).
pub async fn list_voices(config: &ConversionConfig) -> Result<Vec<VoiceInfo>, Pdf2SpeechError> {
    let backend = backend::resolve_backend(config)?;
    backend
        .voices()
        .await
        .map_err(|e| Pdf2SpeechError::BackendUnavailable {
            backend: backend.name().to_string(),
            hint: e.to_string(),
        })
}

/// The conversion pipeline shared by every entry point.
///
/// `cancel` is checked between stages and inside the synthesis driver;
/// a cancelled run returns [`Pdf2SpeechError::Cancelled`] after draining
/// whatever was in flight. Per-segment audio and the resume checkpoint
/// survive in the work directory on any non-success exit.
pub(crate) async fn run_pipeline(
    input_str: &str,
    config: &ConversionConfig,
    cancel: &CancelToken,
) -> Result<ConversionOutput, Pdf2SpeechError> {
    let total_start = Instant::now();
    info!("Starting conversion: {input_str}");
    let stage = |state: JobState| {
        if let Some(ref cb) = config.progress_callback {
            cb.on_stage_change(state);
        }
    };

    // ── Step 1: Resolve input ────────────────────────────────────────────
    cancel.check()?;
    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let pdf_path = resolved.path().to_path_buf();

    // ── Step 2: Resolve speech backend ───────────────────────────────────
    // Before extraction on purpose: a missing engine should fail in
    // milliseconds, not after a minute of parsing a 400-page PDF.
    let speech = backend::resolve_backend(config)?;
    debug!("Using speech backend: {}", speech.name());

    // ── Step 3: Extract text ─────────────────────────────────────────────
    cancel.check()?;
    stage(JobState::Extracting);
    let extract_start = Instant::now();
    let pages = extract::extract_pages(&pdf_path, extractor_from(config)).await?;
    let extract_duration_ms = extract_start.elapsed().as_millis() as u64;
    let total_pages = pages.len();
    let empty_pages = pages.iter().filter(|p| p.is_empty()).count();
    info!("Extracted {total_pages} page(s) in {extract_duration_ms}ms");

    // ── Step 4: Segment ──────────────────────────────────────────────────
    cancel.check()?;
    stage(JobState::Segmenting);
    let segments =
        segment::segment_pages(&pages, config.max_segment_chars, config.min_segment_chars);
    let total_segments = segments.len();
    debug!("Segmented into {total_segments} chunk(s)");
    if let Some(ref cb) = config.progress_callback {
        cb.on_synthesis_start(total_segments);
    }

    // ── Step 5: Output layout and checkpoint ─────────────────────────────
    let layout = resolve_layout(config, &pdf_path)?;
    let fingerprint = checkpoint::fingerprint(&segments, &config.voice);
    let mut progress = if config.resume {
        Checkpoint::load(&layout.work_dir, fingerprint)
    } else {
        Checkpoint::new(fingerprint)
    };

    // ── Step 6: Synthesize ───────────────────────────────────────────────
    cancel.check()?;
    stage(JobState::Synthesizing);
    let synth_start = Instant::now();
    let results = match synth::synthesize_all(
        &speech,
        &segments,
        config,
        &layout.work_dir,
        &mut progress,
        true,
        cancel,
    )
    .await
    {
        Ok(results) => results,
        Err(e) => {
            if !progress.completed.is_empty() {
                info!(
                    "Partial audio kept in {}; rerun with resume enabled to continue",
                    layout.work_dir.display()
                );
            }
            return Err(e);
        }
    };
    let synth_duration_ms = synth_start.elapsed().as_millis() as u64;

    // ── Step 7: All-failed check ─────────────────────────────────────────
    let synthesized = results.iter().filter(|r| r.is_synthesized()).count();
    let skipped = total_segments - synthesized;
    let reused = results.iter().filter(|r| r.reused).count();
    if synthesized == 0 {
        let first_error = results
            .iter()
            .find_map(|r| r.error.as_ref())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "Unknown error".to_string());
        return Err(Pdf2SpeechError::AllSegmentsFailed {
            total: total_segments,
            retries: config.max_retries,
            first_error,
        });
    }

    // ── Step 8: Assemble output ──────────────────────────────────────────
    cancel.check()?;
    stage(JobState::Assembling);
    let assemble_start = Instant::now();
    let (results, outputs, audio_duration_ms) = match config.output_mode {
        OutputMode::SingleFile => {
            let output_path = layout.output.clone();
            let gap = config.gap_policy;
            let rate = config.voice.rate;
            let (results, assembled) = tokio::task::spawn_blocking(move || {
                let assembled =
                    assemble::assemble_single(&segments, &results, &output_path, gap, rate);
                (results, assembled)
            })
            .await
            .map_err(|e| Pdf2SpeechError::Internal(format!("Assembly task panicked: {e}")))?;
            let audio_ms = assembled?;

            // The parts directory is scratch space once the assembled file
            // exists. Removal failure is not worth failing the conversion.
            if layout.remove_parts_on_success {
                if let Err(e) = tokio::fs::remove_dir_all(&layout.work_dir).await {
                    warn!(
                        "Could not remove work directory {}: {e}",
                        layout.work_dir.display()
                    );
                }
            }
            (results, vec![layout.output.clone()], audio_ms)
        }
        OutputMode::PerSegment => {
            let dir = layout.work_dir.clone();
            let (results, manifest) = tokio::task::spawn_blocking(move || {
                let manifest = assemble::write_manifest(&dir, &results);
                (results, manifest)
            })
            .await
            .map_err(|e| Pdf2SpeechError::Internal(format!("Manifest task panicked: {e}")))?;
            let manifest_path = manifest?;
            debug!("Wrote playback manifest {}", manifest_path.display());

            let outputs: Vec<PathBuf> = results
                .iter()
                .filter_map(|r| r.artifact.as_ref().map(|a| a.path.clone()))
                .collect();
            let audio_ms = results.iter().map(|r| r.audio_ms()).sum();
            (results, outputs, audio_ms)
        }
    };
    let assemble_duration_ms = assemble_start.elapsed().as_millis() as u64;

    // ── Step 9: Stats ────────────────────────────────────────────────────
    let stats = ConversionStats {
        total_pages,
        empty_pages,
        total_segments,
        synthesized_segments: synthesized,
        skipped_segments: skipped,
        reused_segments: reused,
        audio_duration_ms,
        extract_duration_ms,
        synth_duration_ms,
        assemble_duration_ms,
        total_duration_ms: total_start.elapsed().as_millis() as u64,
    };

    info!(
        "Conversion complete: {synthesized}/{total_segments} segment(s), {}s of audio, {}ms total",
        audio_duration_ms / 1000,
        stats.total_duration_ms
    );
    if let Some(ref cb) = config.progress_callback {
        cb.on_conversion_complete(total_segments, synthesized);
    }

    Ok(ConversionOutput {
        outputs,
        segments: results,
        stats,
    })
}

// ── Internal helpers ─────────────────────────────────────────────────────

fn extractor_from(config: &ConversionConfig) -> Arc<dyn TextExtractor> {
    config
        .extractor
        .clone()
        .unwrap_or_else(|| Arc::new(PdfTextExtractor) as Arc<dyn TextExtractor>)
}

/// Where output and intermediate audio go for one run.
struct WorkLayout {
    /// Final artifact: the single WAV, or the per-segment directory.
    output: PathBuf,
    /// Directory the synthesis driver writes `seg_NNNNN.wav` files into.
    work_dir: PathBuf,
    /// Single-file mode deletes its parts directory once assembly succeeds.
    remove_parts_on_success: bool,
}

/// Derive paths from the config, falling back to names based on the input
/// file, and create the directories so later stages can write freely.
///
/// Single-file mode keeps segment parts in a sibling `<output>.parts/`
/// directory rather than a temp dir: that is what makes an interrupted run
/// resumable.
fn resolve_layout(
    config: &ConversionConfig,
    pdf_path: &Path,
) -> Result<WorkLayout, Pdf2SpeechError> {
    let stem = pdf_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "audio".to_string());

    let layout = match config.output_mode {
        OutputMode::SingleFile => {
            let output = config
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("{stem}.wav")));
            let work_dir = output.with_extension("wav.parts");
            WorkLayout {
                output,
                work_dir,
                remove_parts_on_success: true,
            }
        }
        OutputMode::PerSegment => {
            let dir = config
                .output
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("{stem}_audio")));
            WorkLayout {
                output: dir.clone(),
                work_dir: dir,
                remove_parts_on_success: false,
            }
        }
    };

    if let Some(parent) = layout.output.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| Pdf2SpeechError::OutputWriteFailed {
                path: layout.output.clone(),
                source: e,
            })?;
        }
    }
    std::fs::create_dir_all(&layout.work_dir).map_err(|e| Pdf2SpeechError::OutputWriteFailed {
        path: layout.work_dir.clone(),
        source: e,
    })?;
    Ok(layout)
}
