//! Concurrent synthesis: drive the speech backend over all pending segments.
//!
//! Segments are dispatched as a `buffer_unordered` stream so at most
//! `config.concurrency` backend calls run at once. Completion order is
//! arbitrary; every result lands in a slot indexed by its sequence number, so
//! the output is in reading order no matter how the work interleaved. Each
//! slot is written exactly once — a duplicate settle is logged and dropped.
//!
//! ## Retry strategy
//!
//! Engine crashes and timeouts are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`): with the 500 ms default and 2
//! retries the wait sequence is 500 ms → 1 s, bounding back-off below 2 s per
//! segment. Every attempt gets its own `synthesis_timeout_secs` window, and a
//! failed attempt deletes whatever partial file it left behind before the
//! next one starts.
//!
//! ## Atomicity
//!
//! Audio is synthesized to `seg_NNNNN.wav.part` and renamed to its final name
//! only after the WAV header checks out. The resume checkpoint records a
//! segment only after the rename, so a file named `seg_NNNNN.wav` in a work
//! directory is always complete.
//!
//! ## Cancellation
//!
//! Cancellation stops new dispatches immediately: every queued future checks
//! the token before touching the backend. In soft mode, in-flight segments
//! finish and are checkpointed; in hard mode each backend call races the
//! cancel signal and the engine process is killed on drop.

use crate::backend::SpeechBackend;
use crate::config::{CancelMode, ConversionConfig, FailurePolicy};
use crate::error::{Pdf2SpeechError, SegmentError};
use crate::job::CancelToken;
use crate::output::{AudioArtifact, SegmentResult};
use crate::pipeline::checkpoint::{self, Checkpoint};
use crate::pipeline::segment::Segment;
use futures::stream::{self, StreamExt};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Synthesize every segment into `work_dir`, reusing checkpointed audio.
///
/// Returns one [`SegmentResult`] per segment, ordered by sequence number.
/// Under [`FailurePolicy::Skip`] a failed segment is returned with its error
/// attached rather than failing the call; [`FailurePolicy::Abort`] stops
/// dispatching at the first failure, drains what is already in flight, and
/// returns [`Pdf2SpeechError::SynthesisAborted`]. Cancellation likewise
/// drains and returns [`Pdf2SpeechError::Cancelled`].
#[allow(clippy::too_many_arguments)]
pub async fn synthesize_all(
    backend: &Arc<dyn SpeechBackend>,
    segments: &[Segment],
    config: &ConversionConfig,
    work_dir: &Path,
    checkpoint: &mut Checkpoint,
    persist_checkpoint: bool,
    cancel: &CancelToken,
) -> Result<Vec<SegmentResult>, Pdf2SpeechError> {
    let total = segments.len();
    let mut slots: Vec<Option<SegmentResult>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);

    // ── Reuse pass ───────────────────────────────────────────────────────
    // Checkpoint entries are only trusted after the file on disk proves
    // readable; anything else is quietly re-synthesized.
    let mut pending: Vec<&Segment> = Vec::with_capacity(total);
    for segment in segments {
        if checkpoint.is_completed(segment.seq) {
            if let Some(result) = try_reuse(segment, work_dir, config, total) {
                slots[segment.seq] = Some(result);
                continue;
            }
            checkpoint.completed.remove(&segment.seq);
        }
        pending.push(segment);
    }
    let reused = total - pending.len();
    if reused > 0 {
        info!("Reusing {reused} of {total} segment(s) from a previous run");
    }

    // ── Concurrent synthesis ─────────────────────────────────────────────
    // `halt` trips on the first failure under the abort policy; unlike the
    // cancel token it never touches the job's state.
    let halt = Arc::new(AtomicBool::new(false));
    // The closure must take `Segment` by value: a `&Segment` parameter makes
    // the returned async block higher-ranked over its lifetime, which the
    // auto-trait checker rejects when the future crosses `tokio::spawn`
    // (rustc's "implementation of `FnOnce` is not general enough").
    let mut settled = stream::iter(pending.into_iter().cloned().map(|segment| {
        let backend = Arc::clone(backend);
        let config = config.clone();
        let cancel = cancel.clone();
        let halt = Arc::clone(&halt);
        let out_path = checkpoint::segment_path(work_dir, segment.seq);
        async move {
            if cancel.is_cancelled() || halt.load(Ordering::Relaxed) {
                return None;
            }
            if let Some(ref cb) = config.progress_callback {
                cb.on_segment_start(segment.seq, total);
            }
            let result = synthesize_one(&backend, &segment, &config, &out_path, &cancel, &halt).await;
            if let Some(ref result) = result {
                if let Some(ref cb) = config.progress_callback {
                    match &result.error {
                        None => cb.on_segment_complete(result.seq, total, result.audio_ms()),
                        Some(e) => cb.on_segment_skipped(result.seq, total, &e.to_string()),
                    }
                }
            }
            result
        }
    }))
    .buffer_unordered(config.concurrency);

    let mut abort_error: Option<Pdf2SpeechError> = None;
    while let Some(outcome) = settled.next().await {
        let Some(result) = outcome else { continue };
        let seq = result.seq;
        if result.is_synthesized() {
            checkpoint.mark_completed(seq);
            if persist_checkpoint {
                if let Err(e) = checkpoint.save(work_dir) {
                    warn!("Could not save progress checkpoint: {e}");
                }
            }
        } else if config.failure_policy == FailurePolicy::Abort && abort_error.is_none() {
            halt.store(true, Ordering::Relaxed);
            abort_error = Some(abort_failure(&result, config.max_retries));
        }
        match &mut slots[seq] {
            slot @ None => *slot = Some(result),
            Some(_) => debug!("Segment {seq}: duplicate result ignored"),
        }
    }
    drop(settled);

    if cancel.is_cancelled() {
        return Err(Pdf2SpeechError::Cancelled);
    }
    if let Some(err) = abort_error {
        return Err(err);
    }

    let mut results = Vec::with_capacity(total);
    for (seq, slot) in slots.into_iter().enumerate() {
        match slot {
            Some(result) => results.push(result),
            None => {
                return Err(Pdf2SpeechError::Internal(format!(
                    "segment {seq} never produced a result"
                )))
            }
        }
    }
    Ok(results)
}

/// Synthesize one segment with retries. `None` means the segment was never
/// finished because of cancellation or an abort elsewhere.
pub(crate) async fn synthesize_one(
    backend: &Arc<dyn SpeechBackend>,
    segment: &Segment,
    config: &ConversionConfig,
    out_path: &Path,
    cancel: &CancelToken,
    halt: &AtomicBool,
) -> Option<SegmentResult> {
    let start = Instant::now();
    let tmp = out_path.with_extension("wav.part");
    let mut last_err: Option<SegmentError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            let backoff = config.retry_backoff_ms * 2u64.pow(attempt - 1);
            warn!(
                "Segment {}: retry {}/{} after {}ms",
                segment.seq, attempt, config.max_retries, backoff
            );
            sleep(Duration::from_millis(backoff)).await;
        }
        if cancel.is_cancelled() || halt.load(Ordering::Relaxed) {
            return None;
        }

        let attempt_outcome = match config.cancel_mode {
            CancelMode::Hard => {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = tokio::fs::remove_file(&tmp).await;
                        return None;
                    }
                    outcome = attempt_synthesis(backend, segment, config, &tmp, attempt) => outcome,
                }
            }
            CancelMode::Soft => attempt_synthesis(backend, segment, config, &tmp, attempt).await,
        };

        match attempt_outcome {
            Ok(probe) => {
                if let Err(e) = tokio::fs::rename(&tmp, out_path).await {
                    warn!(
                        "Segment {}: could not move audio into place: {e}",
                        segment.seq
                    );
                    last_err = Some(SegmentError::InvalidArtifact {
                        seq: segment.seq,
                        detail: e.to_string(),
                    });
                    continue;
                }
                debug!(
                    "Segment {}: {} ms of audio after {} attempt(s)",
                    segment.seq,
                    probe.duration_ms,
                    attempt + 1
                );
                return Some(SegmentResult {
                    seq: segment.seq,
                    page: segment.page,
                    chars: segment.text.chars().count(),
                    artifact: Some(AudioArtifact {
                        path: out_path.to_path_buf(),
                        duration_ms: probe.duration_ms,
                        sample_rate: probe.sample_rate,
                    }),
                    retries: attempt,
                    reused: false,
                    synth_ms: start.elapsed().as_millis() as u64,
                    error: None,
                });
            }
            Err(e) => {
                warn!("Segment {}: attempt {} failed — {e}", segment.seq, attempt + 1);
                let _ = tokio::fs::remove_file(&tmp).await;
                last_err = Some(e);
            }
        }
    }

    // All retries exhausted
    Some(SegmentResult {
        seq: segment.seq,
        page: segment.page,
        chars: segment.text.chars().count(),
        artifact: None,
        retries: config.max_retries,
        reused: false,
        synth_ms: start.elapsed().as_millis() as u64,
        error: Some(last_err.unwrap_or_else(|| SegmentError::Synthesis {
            seq: segment.seq,
            retries: config.max_retries,
            detail: "unknown error".to_string(),
        })),
    })
}

/// One timed backend call plus artifact validation.
async fn attempt_synthesis(
    backend: &Arc<dyn SpeechBackend>,
    segment: &Segment,
    config: &ConversionConfig,
    tmp: &Path,
    attempt: u32,
) -> Result<WavProbe, SegmentError> {
    let window = Duration::from_secs(config.synthesis_timeout_secs);
    match timeout(window, backend.synthesize(&segment.text, &config.voice, tmp)).await {
        Err(_) => Err(SegmentError::Timeout {
            seq: segment.seq,
            secs: config.synthesis_timeout_secs,
        }),
        Ok(Err(e)) => Err(SegmentError::Synthesis {
            seq: segment.seq,
            retries: attempt,
            detail: e.to_string(),
        }),
        Ok(Ok(())) => probe_wav(tmp).map_err(|detail| SegmentError::InvalidArtifact {
            seq: segment.seq,
            detail,
        }),
    }
}

fn try_reuse(
    segment: &Segment,
    work_dir: &Path,
    config: &ConversionConfig,
    total: usize,
) -> Option<SegmentResult> {
    let path = checkpoint::segment_path(work_dir, segment.seq);
    match probe_wav(&path) {
        Ok(probe) => {
            debug!("Segment {}: reusing {}", segment.seq, path.display());
            if let Some(ref cb) = config.progress_callback {
                cb.on_segment_complete(segment.seq, total, probe.duration_ms);
            }
            Some(SegmentResult {
                seq: segment.seq,
                page: segment.page,
                chars: segment.text.chars().count(),
                artifact: Some(AudioArtifact {
                    path,
                    duration_ms: probe.duration_ms,
                    sample_rate: probe.sample_rate,
                }),
                retries: 0,
                reused: true,
                synth_ms: 0,
                error: None,
            })
        }
        Err(detail) => {
            warn!(
                "Segment {}: cached audio unusable ({detail}); synthesizing again",
                segment.seq
            );
            None
        }
    }
}

fn abort_failure(result: &SegmentResult, max_retries: u32) -> Pdf2SpeechError {
    let detail = result
        .error
        .as_ref()
        .map(|e| e.to_string())
        .unwrap_or_else(|| "unknown error".to_string());
    Pdf2SpeechError::SynthesisAborted {
        seq: result.seq,
        retries: max_retries,
        detail,
    }
}

#[derive(Debug)]
struct WavProbe {
    duration_ms: u64,
    sample_rate: u32,
}

/// Header-only sanity check of a synthesized WAV. Does not read sample data.
fn probe_wav(path: &Path) -> Result<WavProbe, String> {
    let reader = hound::WavReader::open(path).map_err(|e| e.to_string())?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Err("invalid sample rate 0".to_string());
    }
    let frames = reader.duration();
    if frames == 0 {
        return Err("empty audio (zero frames)".to_string());
    }
    Ok(WavProbe {
        duration_ms: frames as u64 * 1000 / spec.sample_rate as u64,
        sample_rate: spec.sample_rate,
    })
}
