//! Progress-callback trait for job and segment events.
//!
//! Inject an [`Arc<dyn ConversionProgressCallback>`] via
//! [`crate::config::ConversionConfigBuilder::progress_callback`] to receive
//! real-time events as the pipeline moves through its stages and synthesizes
//! each segment.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a Tokio broadcast channel, a WebSocket, a database record,
//! or a terminal progress bar — without the library knowing anything about how
//! the host application communicates. The trait is `Send + Sync` so it works
//! correctly when segments are synthesized concurrently.
//!
//! # Example
//!
//! ```rust
//! use pdf2speech::{ConversionProgressCallback, ConversionConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     completed: Arc<AtomicUsize>,
//! }
//!
//! impl ConversionProgressCallback for CountingCallback {
//!     fn on_segment_complete(&self, seq: usize, total: usize, audio_ms: u64) {
//!         self.completed.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("Segment {}/{} done ({} ms of audio)", seq + 1, total, audio_ms);
//!     }
//! }
//!
//! let counter = Arc::new(CountingCallback {
//!     completed: Arc::new(AtomicUsize::new(0)),
//! });
//!
//! let config = ConversionConfig::builder()
//!     .progress_callback(counter as Arc<dyn ConversionProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::job::JobState;
use std::sync::Arc;

/// Called by the conversion pipeline as a job progresses.
///
/// Implementations must be `Send + Sync` (segments are synthesized
/// concurrently). All methods have default no-op implementations so callers
/// only override what they care about.
///
/// # Thread safety
///
/// `on_segment_start`, `on_segment_complete`, and `on_segment_skipped` may be
/// called from different tasks. Implementations must protect shared mutable
/// state with appropriate synchronisation primitives (e.g. `Mutex`,
/// `AtomicUsize`).
pub trait ConversionProgressCallback: Send + Sync {
    /// Called on every state-machine transition, terminal states included.
    fn on_stage_change(&self, stage: JobState) {
        let _ = stage;
    }

    /// Called once segmentation has finished and the segment total is known,
    /// before any synthesis begins.
    ///
    /// # Arguments
    /// * `total_segments` — number of segments that will be synthesized
    fn on_synthesis_start(&self, total_segments: usize) {
        let _ = total_segments;
    }

    /// Called just before a segment is handed to the speech backend.
    ///
    /// # Arguments
    /// * `seq`   — 0-indexed segment sequence number
    /// * `total` — total segments in the document
    fn on_segment_start(&self, seq: usize, total: usize) {
        let _ = (seq, total);
    }

    /// Called when a segment is successfully synthesized (or reused from a
    /// previous run's checkpoint).
    ///
    /// # Arguments
    /// * `seq`      — 0-indexed segment sequence number
    /// * `total`    — total segments
    /// * `audio_ms` — duration of the produced clip in milliseconds
    ///   (useful for progress bars that track listening time)
    fn on_segment_complete(&self, seq: usize, total: usize, audio_ms: u64) {
        let _ = (seq, total, audio_ms);
    }

    /// Called when a segment fails after all retries are exhausted and the
    /// failure policy is skip.
    ///
    /// # Arguments
    /// * `seq`   — 0-indexed segment sequence number
    /// * `total` — total segments
    /// * `error` — human-readable error description
    fn on_segment_skipped(&self, seq: usize, total: usize, error: &str) {
        let _ = (seq, total, error);
    }

    /// Called once after every segment has settled, before assembly.
    ///
    /// # Arguments
    /// * `total_segments` — total segments in the document
    /// * `success_count`  — segments that synthesized without error
    fn on_conversion_complete(&self, total_segments: usize, success_count: usize) {
        let _ = (total_segments, success_count);
    }
}

/// A no-op implementation for callers that don't need progress events.
///
/// This is the default when no callback is configured.
pub struct NoopProgressCallback;

impl ConversionProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ConversionConfig`].
pub type ProgressCallback = Arc<dyn ConversionProgressCallback>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TrackingCallback {
        stages: Arc<AtomicUsize>,
        starts: Arc<AtomicUsize>,
        completes: Arc<AtomicUsize>,
        skips: Arc<AtomicUsize>,
        announced_total: Arc<AtomicUsize>,
        final_success: Arc<AtomicUsize>,
    }

    impl ConversionProgressCallback for TrackingCallback {
        fn on_stage_change(&self, _stage: JobState) {
            self.stages.fetch_add(1, Ordering::SeqCst);
        }

        fn on_synthesis_start(&self, total_segments: usize) {
            self.announced_total.store(total_segments, Ordering::SeqCst);
        }

        fn on_segment_start(&self, _seq: usize, _total: usize) {
            self.starts.fetch_add(1, Ordering::SeqCst);
        }

        fn on_segment_complete(&self, _seq: usize, _total: usize, _audio_ms: u64) {
            self.completes.fetch_add(1, Ordering::SeqCst);
        }

        fn on_segment_skipped(&self, _seq: usize, _total: usize, _error: &str) {
            self.skips.fetch_add(1, Ordering::SeqCst);
        }

        fn on_conversion_complete(&self, _total_segments: usize, success_count: usize) {
            self.final_success.store(success_count, Ordering::SeqCst);
        }
    }

    #[test]
    fn noop_callback_does_not_panic() {
        let cb = NoopProgressCallback;
        cb.on_stage_change(JobState::Extracting);
        cb.on_synthesis_start(5);
        cb.on_segment_start(0, 5);
        cb.on_segment_complete(0, 5, 1200);
        cb.on_segment_skipped(1, 5, "some error");
        cb.on_conversion_complete(5, 4);
    }

    #[test]
    fn tracking_callback_receives_events() {
        let tracker = TrackingCallback {
            stages: Arc::new(AtomicUsize::new(0)),
            starts: Arc::new(AtomicUsize::new(0)),
            completes: Arc::new(AtomicUsize::new(0)),
            skips: Arc::new(AtomicUsize::new(0)),
            announced_total: Arc::new(AtomicUsize::new(0)),
            final_success: Arc::new(AtomicUsize::new(0)),
        };

        tracker.on_stage_change(JobState::Synthesizing);
        tracker.on_synthesis_start(3);
        assert_eq!(tracker.announced_total.load(Ordering::SeqCst), 3);

        tracker.on_segment_start(0, 3);
        tracker.on_segment_complete(0, 3, 900);
        tracker.on_segment_start(1, 3);
        tracker.on_segment_complete(1, 3, 1100);
        tracker.on_segment_start(2, 3);
        tracker.on_segment_skipped(2, 3, "engine timeout");

        assert_eq!(tracker.stages.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.starts.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.completes.load(Ordering::SeqCst), 2);
        assert_eq!(tracker.skips.load(Ordering::SeqCst), 1);

        tracker.on_conversion_complete(3, 2);
        assert_eq!(tracker.final_success.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn arc_dyn_callback_works() {
        let cb: Arc<dyn ConversionProgressCallback> = Arc::new(NoopProgressCallback);
        cb.on_synthesis_start(10);
        cb.on_segment_start(0, 10);
        cb.on_segment_complete(0, 10, 512);
    }
}
