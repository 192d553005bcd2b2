//! Resume checkpoints: which segments already have audio on disk.
//!
//! A work directory holds one `progress.json` next to the per-segment WAV
//! files. The checkpoint records a fingerprint of the segmented text plus the
//! voice settings, and the set of segment indices whose audio was fully
//! written. On resume, a matching fingerprint lets the driver reuse those
//! files instead of synthesizing again; any mismatch (different PDF, changed
//! voice or rate) silently starts over rather than splicing stale audio.
//!
//! Loading is deliberately tolerant — a missing or corrupt file degrades to
//! "nothing done yet", never to an error.

use crate::config::VoiceConfig;
use crate::error::Pdf2SpeechError;
use crate::pipeline::segment::Segment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the checkpoint file inside a work directory.
pub const PROGRESS_FILE: &str = "progress.json";

/// File name for one segment's audio, zero-padded so lexicographic order is
/// playback order.
pub fn segment_filename(seq: usize) -> String {
    format!("seg_{seq:05}.wav")
}

/// Path to one segment's audio inside a work directory.
pub fn segment_path(dir: &Path, seq: usize) -> PathBuf {
    dir.join(segment_filename(seq))
}

/// Persistent record of completed synthesis work.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Hash of the segment texts and voice settings this progress belongs to.
    pub fingerprint: u64,
    /// Segment indices whose audio files were completely written.
    pub completed: BTreeSet<usize>,
}

impl Checkpoint {
    pub fn new(fingerprint: u64) -> Self {
        Self {
            fingerprint,
            completed: BTreeSet::new(),
        }
    }

    /// Load the checkpoint from `dir`, degrading to an empty one whenever the
    /// file is missing, unreadable, or belongs to a different input.
    pub fn load(dir: &Path, fingerprint: u64) -> Self {
        let path = dir.join(PROGRESS_FILE);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Self::new(fingerprint);
            }
            Err(e) => {
                warn!("Could not read {}: {e}; starting fresh", path.display());
                return Self::new(fingerprint);
            }
        };
        let loaded: Checkpoint = match serde_json::from_slice(&data) {
            Ok(cp) => cp,
            Err(e) => {
                warn!(
                    "Ignoring corrupt checkpoint {}: {e}; starting fresh",
                    path.display()
                );
                return Self::new(fingerprint);
            }
        };
        if loaded.fingerprint != fingerprint {
            warn!(
                "Checkpoint in {} was made with different input or voice settings; starting fresh",
                dir.display()
            );
            return Self::new(fingerprint);
        }
        debug!(
            "Resuming: {} segment(s) already synthesized",
            loaded.completed.len()
        );
        loaded
    }

    /// Write the checkpoint atomically (temp file + rename) so a crash while
    /// saving never leaves a half-written `progress.json` behind.
    pub fn save(&self, dir: &Path) -> Result<(), Pdf2SpeechError> {
        let path = dir.join(PROGRESS_FILE);
        let tmp = dir.join(format!("{PROGRESS_FILE}.tmp"));
        let write = || -> std::io::Result<()> {
            let data = serde_json::to_vec_pretty(self)?;
            std::fs::write(&tmp, data)?;
            std::fs::rename(&tmp, &path)?;
            Ok(())
        };
        write().map_err(|source| Pdf2SpeechError::OutputWriteFailed {
            path: path.clone(),
            source,
        })
    }

    pub fn mark_completed(&mut self, seq: usize) {
        self.completed.insert(seq);
    }

    pub fn is_completed(&self, seq: usize) -> bool {
        self.completed.contains(&seq)
    }
}

/// Fingerprint the work a checkpoint belongs to: every segment text plus the
/// voice parameters that shape the audio. Segment texts already encode the
/// segmentation settings, so those need no separate hashing.
pub fn fingerprint(segments: &[Segment], voice: &VoiceConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    segments.len().hash(&mut hasher);
    for segment in segments {
        segment.text.hash(&mut hasher);
    }
    voice.voice.hash(&mut hasher);
    voice.rate.to_bits().hash(&mut hasher);
    voice.volume.to_bits().hash(&mut hasher);
    hasher.finish()
}
