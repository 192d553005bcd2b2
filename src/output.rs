//! Output types returned by the conversion entry points.

use crate::error::{Pdf2SpeechError, SegmentError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// One synthesized audio clip on disk.
///
/// Artifacts are created atomically (written to a temp name, then renamed),
/// so an `AudioArtifact` always points at a complete, parseable WAV file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioArtifact {
    /// Location of the WAV file.
    pub path: PathBuf,
    /// Clip length in milliseconds, measured from the WAV header.
    pub duration_ms: u64,
    /// Sample rate reported by the WAV header.
    pub sample_rate: u32,
}

/// The settled outcome for a single segment.
///
/// Exactly one of `artifact` / `error` is set: a segment either produced a
/// clip or was skipped after exhausting its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentResult {
    /// Global 0-indexed sequence number (reading order).
    pub seq: usize,
    /// 0-indexed page the segment came from.
    pub page: usize,
    /// Character count of the segment text.
    pub chars: usize,
    /// The produced clip, if synthesis succeeded.
    pub artifact: Option<AudioArtifact>,
    /// Retries consumed (0 means first attempt succeeded).
    pub retries: u32,
    /// True when the clip was recovered from a previous run's checkpoint
    /// instead of being synthesized again.
    pub reused: bool,
    /// Wall-clock synthesis time in milliseconds (0 for reused clips).
    pub synth_ms: u64,
    /// Why the segment was skipped, if it was.
    pub error: Option<SegmentError>,
}

impl SegmentResult {
    /// True when this segment produced audio.
    pub fn is_synthesized(&self) -> bool {
        self.artifact.is_some()
    }

    /// Clip duration in milliseconds, 0 for skipped segments.
    pub fn audio_ms(&self) -> u64 {
        self.artifact.as_ref().map_or(0, |a| a.duration_ms)
    }
}

/// Aggregate statistics for a conversion run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversionStats {
    /// Pages in the source document.
    pub total_pages: usize,
    /// Pages with no extractable text (skipped before segmentation).
    pub empty_pages: usize,
    /// Segments produced by the segmenter.
    pub total_segments: usize,
    /// Segments that produced audio (reused clips included).
    pub synthesized_segments: usize,
    /// Segments skipped after exhausting retries.
    pub skipped_segments: usize,
    /// Segments recovered from a checkpoint without re-synthesis.
    pub reused_segments: usize,
    /// Total listening time of the produced audio, in milliseconds.
    pub audio_duration_ms: u64,
    /// Wall-clock time spent extracting text.
    pub extract_duration_ms: u64,
    /// Wall-clock time spent in the synthesis stage.
    pub synth_duration_ms: u64,
    /// Wall-clock time spent assembling output files.
    pub assemble_duration_ms: u64,
    /// End-to-end wall-clock time.
    pub total_duration_ms: u64,
}

/// Result of a completed conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionOutput {
    /// Output files in reading order: one path in single-file mode, one per
    /// synthesized segment otherwise.
    pub outputs: Vec<PathBuf>,
    /// Per-segment outcomes, sorted by sequence number.
    pub segments: Vec<SegmentResult>,
    /// Aggregate statistics.
    pub stats: ConversionStats,
}

impl ConversionOutput {
    /// Sequence numbers of skipped segments, in reading order.
    pub fn skipped_indices(&self) -> Vec<usize> {
        self.segments
            .iter()
            .filter(|s| s.error.is_some())
            .map(|s| s.seq)
            .collect()
    }

    /// Total listening time of the produced audio.
    pub fn audio_duration(&self) -> Duration {
        Duration::from_millis(self.stats.audio_duration_ms)
    }

    /// Treat any skipped segment as a failure.
    ///
    /// The default contract is lenient: a run with skips still returns `Ok`
    /// so the caller can salvage partial audio. Call this to opt into strict
    /// behaviour instead.
    pub fn into_result(self) -> Result<Self, Pdf2SpeechError> {
        if self.stats.skipped_segments > 0 {
            return Err(Pdf2SpeechError::PartialFailure {
                synthesized: self.stats.synthesized_segments,
                skipped: self.stats.skipped_segments,
                total: self.stats.total_segments,
            });
        }
        Ok(self)
    }
}

/// Document shape report produced by [`crate::inspect`].
///
/// Everything here comes from extraction and segmentation only; no speech
/// backend is needed to produce it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentInfo {
    /// Pages in the document.
    pub page_count: usize,
    /// Pages with no extractable text.
    pub empty_pages: usize,
    /// Characters of normalized text across all pages.
    pub total_chars: usize,
    /// Segments the current config would synthesize.
    pub segment_count: usize,
    /// Rough listening time at the configured rate, in seconds.
    pub estimated_audio_secs: u64,
}
