//! Job management: run conversions in the background and poll them.
//!
//! [`Converter`] owns a set of jobs. Each [`Converter::start`] spawns the
//! pipeline onto the tokio runtime and returns a [`JobId`] immediately; the
//! caller then observes the job through [`Converter::progress`], waits for it
//! with [`Converter::wait`], and collects the terminal [`JobResult`]. A
//! finished job stays queryable until [`Converter::acknowledge`] removes it,
//! so results are never lost to a race between completion and polling.
//!
//! ## State machine
//!
//! ```text
//! Pending ─▶ Extracting ─▶ Segmenting ─▶ Synthesizing ─▶ Assembling ─▶ Completed
//!     │            │            │              │               │
//!     └────────────┴────────────┴──────┬───────┴───────────────┘
//!                                      ▼
//!                             Cancelled / Failed
//! ```
//!
//! States only move forward. The current state lives in a `tokio::sync::watch`
//! channel, which doubles as the wake-up mechanism for [`Converter::wait`].
//!
//! ## Cancellation
//!
//! [`Converter::cancel`] flips a [`CancelToken`] shared with the running
//! pipeline. The pipeline checks it between stages and before dispatching
//! each segment; a cancelled job settles as [`JobState::Cancelled`] within
//! one synthesis timeout at worst (immediately in hard mode). Cancelling an
//! already-finished or unknown job is a harmless no-op.

use crate::config::ConversionConfig;
use crate::error::Pdf2SpeechError;
use crate::output::ConversionOutput;
use crate::progress::{ConversionProgressCallback, ProgressCallback};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{watch, Notify};
use tracing::{debug, error, info};

// ── Identifiers and states ───────────────────────────────────────────────────

/// Opaque handle to a running or finished conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle stage of a conversion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Extracting,
    Segmenting,
    Synthesizing,
    Assembling,
    Completed,
    Cancelled,
    Failed,
}

impl JobState {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Cancelled | JobState::Failed
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::Pending => "pending",
            JobState::Extracting => "extracting",
            JobState::Segmenting => "segmenting",
            JobState::Synthesizing => "synthesizing",
            JobState::Assembling => "assembling",
            JobState::Completed => "completed",
            JobState::Cancelled => "cancelled",
            JobState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time snapshot of a job's progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub state: JobState,
    /// Segments settled so far (synthesized, reused, or skipped).
    pub completed_segments: usize,
    /// Total segment count; `None` until segmentation has run.
    pub total_segments: Option<usize>,
}

/// Terminal outcome of a job.
#[derive(Debug, Clone)]
pub enum JobResult {
    Completed(ConversionOutput),
    Cancelled,
    Failed(Arc<Pdf2SpeechError>),
}

impl JobResult {
    fn state(&self) -> JobState {
        match self {
            JobResult::Completed(_) => JobState::Completed,
            JobResult::Cancelled => JobState::Cancelled,
            JobResult::Failed(_) => JobState::Failed,
        }
    }
}

// ── Cancellation ─────────────────────────────────────────────────────────────

/// Cooperative cancellation flag shared between a job and its pipeline.
///
/// Cheap to clone; all clones observe the same signal. Once cancelled it
/// stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once cancellation is signalled. Safe to call after the fact.
    pub async fn cancelled(&self) {
        loop {
            // Create the future before checking the flag so a cancel between
            // the check and the await still wakes us.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// Bail out of the pipeline when cancellation was requested.
    pub(crate) fn check(&self) -> Result<(), Pdf2SpeechError> {
        if self.is_cancelled() {
            Err(Pdf2SpeechError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ── Job bookkeeping ──────────────────────────────────────────────────────────

/// Sentinel in `Job::total` while the segment count is unknown.
const TOTAL_UNKNOWN: usize = usize::MAX;

struct Job {
    id: JobId,
    state: watch::Sender<JobState>,
    completed: AtomicUsize,
    total: AtomicUsize,
    result: Mutex<Option<JobResult>>,
    cancel: CancelToken,
}

impl Job {
    fn new(id: JobId) -> Self {
        let (state, _) = watch::channel(JobState::Pending);
        Self {
            id,
            state,
            completed: AtomicUsize::new(0),
            total: AtomicUsize::new(TOTAL_UNKNOWN),
            result: Mutex::new(None),
            cancel: CancelToken::new(),
        }
    }

    /// Advance the visible state. Ignored once terminal, so a late stage
    /// notification can never resurrect a finished job.
    fn set_state(&self, next: JobState) {
        self.state.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    /// Record the terminal outcome exactly once.
    fn finish(&self, result: JobResult) {
        let mut slot = lock_ignore_poison(&self.result);
        if slot.is_some() {
            return;
        }
        let state = result.state();
        *slot = Some(result);
        drop(slot);
        self.state.send_replace(state);
        debug!("Job {} finished as {state}", self.id);
    }

    fn result_snapshot(&self) -> Option<JobResult> {
        lock_ignore_poison(&self.result).clone()
    }

    fn total_segments(&self) -> Option<usize> {
        match self.total.load(Ordering::Relaxed) {
            TOTAL_UNKNOWN => None,
            n => Some(n),
        }
    }

    fn progress(&self) -> JobProgress {
        JobProgress {
            state: *self.state.borrow(),
            completed_segments: self.completed.load(Ordering::Relaxed),
            total_segments: self.total_segments(),
        }
    }
}

/// A poisoned job mutex only means some thread panicked mid-update; the
/// data itself is a plain `Option`, always safe to read.
fn lock_ignore_poison<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Progress callback installed around the caller's own: keeps the job's
/// counters and state current, then forwards every event.
struct JobProgressHook {
    job: Arc<Job>,
    inner: Option<ProgressCallback>,
}

impl ConversionProgressCallback for JobProgressHook {
    fn on_stage_change(&self, state: JobState) {
        self.job.set_state(state);
        if let Some(ref cb) = self.inner {
            cb.on_stage_change(state);
        }
    }

    fn on_synthesis_start(&self, total_segments: usize) {
        self.job.total.store(total_segments, Ordering::Relaxed);
        if let Some(ref cb) = self.inner {
            cb.on_synthesis_start(total_segments);
        }
    }

    fn on_segment_start(&self, seq: usize, total: usize) {
        if let Some(ref cb) = self.inner {
            cb.on_segment_start(seq, total);
        }
    }

    fn on_segment_complete(&self, seq: usize, total: usize, audio_ms: u64) {
        self.job.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(ref cb) = self.inner {
            cb.on_segment_complete(seq, total, audio_ms);
        }
    }

    fn on_segment_skipped(&self, seq: usize, total: usize, error: &str) {
        self.job.completed.fetch_add(1, Ordering::Relaxed);
        if let Some(ref cb) = self.inner {
            cb.on_segment_skipped(seq, total, error);
        }
    }

    fn on_conversion_complete(&self, total_segments: usize, success_count: usize) {
        if let Some(ref cb) = self.inner {
            cb.on_conversion_complete(total_segments, success_count);
        }
    }
}

// ── Converter ────────────────────────────────────────────────────────────────

/// Handle-based conversion API: start jobs, watch them, collect results.
///
/// ```rust,no_run
/// use pdf2speech::{ConversionConfig, Converter, JobResult};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let converter = Converter::new();
/// let config = ConversionConfig::default();
/// let id = converter.start("document.pdf", &config).await?;
///
/// match converter.wait(id).await {
///     Some(JobResult::Completed(output)) => {
///         println!("wrote {:?}", output.outputs);
///     }
///     Some(JobResult::Cancelled) => println!("cancelled"),
///     Some(JobResult::Failed(e)) => eprintln!("failed: {e}"),
///     None => unreachable!("job vanished before acknowledge"),
/// }
/// converter.acknowledge(id);
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct Converter {
    jobs: Mutex<HashMap<JobId, Arc<Job>>>,
    next_id: AtomicU64,
}

impl Converter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and spawn a conversion in the background.
    ///
    /// Configuration problems surface here, before any I/O happens; every
    /// later failure is reported through the job itself.
    pub async fn start(
        &self,
        input: impl Into<String>,
        config: &ConversionConfig,
    ) -> Result<JobId, Pdf2SpeechError> {
        config.validate()?;
        let input = input.into();
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);

        let job = Arc::new(Job::new(id));
        lock_ignore_poison(&self.jobs).insert(id, Arc::clone(&job));

        let hook: ProgressCallback = Arc::new(JobProgressHook {
            job: Arc::clone(&job),
            inner: config.progress_callback.clone(),
        });
        let mut job_config = config.clone();
        job_config.progress_callback = Some(hook);

        info!("Job {id}: starting conversion of {input}");
        let cancel = job.cancel.clone();
        tokio::spawn(async move {
            match crate::convert::run_pipeline(&input, &job_config, &cancel).await {
                Ok(output) => job.finish(JobResult::Completed(output)),
                Err(Pdf2SpeechError::Cancelled) => job.finish(JobResult::Cancelled),
                Err(e) => {
                    error!("Job {}: {e}", job.id);
                    job.finish(JobResult::Failed(Arc::new(e)));
                }
            }
        });
        Ok(id)
    }

    /// Request cancellation. Returns `false` only for unknown ids; cancelling
    /// a finished job changes nothing.
    pub fn cancel(&self, id: JobId) -> bool {
        let Some(job) = self.get(id) else {
            return false;
        };
        if job.state.borrow().is_terminal() {
            debug!("Job {id}: cancel after completion ignored");
        } else {
            info!("Job {id}: cancellation requested");
        }
        job.cancel.cancel();
        true
    }

    /// Snapshot of a job's stage and segment counters.
    pub fn progress(&self, id: JobId) -> Option<JobProgress> {
        self.get(id).map(|job| job.progress())
    }

    /// The terminal outcome, or `None` while the job is still running (or
    /// for unknown ids). Repeated calls return the same result until
    /// [`Converter::acknowledge`].
    pub fn result(&self, id: JobId) -> Option<JobResult> {
        self.get(id).and_then(|job| job.result_snapshot())
    }

    /// Wait until the job reaches a terminal state and return its result.
    /// `None` for unknown ids.
    pub async fn wait(&self, id: JobId) -> Option<JobResult> {
        let job = self.get(id)?;
        let mut rx = job.state.subscribe();
        // The sender lives inside `job`, which we hold, so this only errors
        // if something went badly wrong; fall through to the snapshot either
        // way.
        let _ = rx.wait_for(|state| state.is_terminal()).await;
        job.result_snapshot()
    }

    /// Drop a finished job from the store. Returns `false` when the job is
    /// unknown or still running — running jobs must be cancelled and waited
    /// out first.
    pub fn acknowledge(&self, id: JobId) -> bool {
        let mut jobs = lock_ignore_poison(&self.jobs);
        let Some(job) = jobs.get(&id) else {
            return false;
        };
        if !job.state.borrow().is_terminal() {
            return false;
        }
        jobs.remove(&id);
        debug!("Job {id}: acknowledged and removed");
        true
    }

    fn get(&self, id: JobId) -> Option<Arc<Job>> {
        lock_ignore_poison(&self.jobs).get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(!JobState::Pending.is_terminal());
        assert!(!JobState::Synthesizing.is_terminal());
    }

    #[test]
    fn test_state_display_is_lowercase() {
        assert_eq!(JobState::Synthesizing.to_string(), "synthesizing");
        assert_eq!(JobState::Cancelled.to_string(), "cancelled");
    }

    #[test]
    fn test_job_state_never_leaves_terminal() {
        let job = Job::new(JobId(1));
        job.set_state(JobState::Extracting);
        job.set_state(JobState::Synthesizing);
        assert_eq!(*job.state.borrow(), JobState::Synthesizing);

        job.finish(JobResult::Cancelled);
        assert_eq!(*job.state.borrow(), JobState::Cancelled);

        // Late notifications from a draining pipeline change nothing.
        job.set_state(JobState::Assembling);
        assert_eq!(*job.state.borrow(), JobState::Cancelled);
    }

    #[test]
    fn test_finish_is_write_once() {
        let job = Job::new(JobId(1));
        job.finish(JobResult::Cancelled);
        job.finish(JobResult::Failed(Arc::new(Pdf2SpeechError::Internal(
            "late".to_string(),
        ))));
        assert!(matches!(job.result_snapshot(), Some(JobResult::Cancelled)));
        assert_eq!(*job.state.borrow(), JobState::Cancelled);
    }

    #[test]
    fn test_progress_total_is_unknown_until_set() {
        let job = Job::new(JobId(1));
        assert_eq!(job.progress().total_segments, None);
        job.total.store(12, Ordering::Relaxed);
        job.completed.fetch_add(1, Ordering::Relaxed);
        let progress = job.progress();
        assert_eq!(progress.total_segments, Some(12));
        assert_eq!(progress.completed_segments, 1);
    }

    #[tokio::test]
    async fn test_cancel_token_wakes_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());

        let waiter = {
            let token = token.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                true
            })
        };
        token.cancel();
        token.cancel(); // idempotent
        assert!(token.is_cancelled());
        assert!(waiter.await.unwrap());

        // Awaiting after the fact resolves immediately.
        token.cancelled().await;
        assert!(token.check().is_err());
    }

    #[test]
    fn test_acknowledge_only_removes_terminal_jobs() {
        let converter = Converter::new();
        let id = JobId(7);
        let job = Arc::new(Job::new(id));
        lock_ignore_poison(&converter.jobs).insert(id, Arc::clone(&job));

        assert!(!converter.acknowledge(id), "running job must stay");
        job.finish(JobResult::Cancelled);
        assert!(converter.acknowledge(id));
        assert!(converter.result(id).is_none());
        assert!(!converter.acknowledge(id), "second acknowledge is a no-op");
    }

    #[test]
    fn test_cancel_unknown_job_is_false() {
        let converter = Converter::new();
        assert!(!converter.cancel(JobId(99)));
    }
}
