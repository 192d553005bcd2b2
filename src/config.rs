//! Configuration types for PDF-to-speech conversion.
//!
//! All conversion behaviour is controlled through [`ConversionConfig`], built
//! via its [`ConversionConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share configs across tasks, serialise the scalar parts for
//! logging, and diff two runs to understand why their outputs differ.
//!
//! # Design choice: builder over constructor
//! A twenty-field constructor is unreadable and breaks on every new field.
//! The builder pattern lets callers set only what they care about and rely on
//! well-documented defaults for the rest.

use crate::backend::SpeechBackend;
use crate::error::Pdf2SpeechError;
use crate::pipeline::extract::TextExtractor;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Voice parameters applied to every segment of a job.
///
/// Immutable for the lifetime of a job: changing the voice mid-document would
/// produce an audibly inconsistent artifact, so a new job is the only way to
/// change these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Backend-defined voice identifier (for piper: a model name or a path to
    /// an `.onnx` voice model). `None` uses the backend's default voice.
    pub voice: Option<String>,

    /// Speaking-rate multiplier relative to the voice's natural pace.
    /// Range: 0.5–2.0. Default: 1.0.
    pub rate: f32,

    /// Output gain. Range: 0.0–1.0. Default: 1.0 (no attenuation).
    pub volume: f32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: None,
            rate: 1.0,
            volume: 1.0,
        }
    }
}

/// Configuration for a PDF-to-speech conversion.
///
/// Built via [`ConversionConfig::builder()`] or using
/// [`ConversionConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf2speech::ConversionConfig;
///
/// let config = ConversionConfig::builder()
///     .rate(1.25)
///     .concurrency(4)
///     .max_segment_chars(300)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ConversionConfig {
    /// Voice parameters (voice id, rate, volume). Default: natural pace, full
    /// volume, backend default voice.
    pub voice: VoiceConfig,

    /// Upper bound on segment length in characters. Default: 400.
    ///
    /// TTS engines degrade on very long inputs: latency grows, prosody
    /// flattens, and a single engine crash throws away more finished audio.
    /// 400 characters is roughly two spoken sentences — long enough for
    /// natural intonation, short enough that a retry is cheap.
    pub max_segment_chars: usize,

    /// Lower bound on segment length in characters. Default: 10.
    ///
    /// Near-empty fragments ("3.", a stray bullet) cost a full engine
    /// round-trip for a few milliseconds of audio. Runs shorter than this are
    /// merged forward instead of flushed; only the final fragment of a page
    /// may come in under the bound.
    pub min_segment_chars: usize,

    /// Number of segments synthesized in parallel. Default: 2.
    ///
    /// Local TTS engines are CPU-bound, so the useful ceiling is the core
    /// count, not the dozens that a network API would sustain. 2 keeps a
    /// typical laptop responsive while roughly halving wall-clock time;
    /// raise it on build servers with cores to spare.
    pub concurrency: usize,

    /// Maximum retry attempts for one segment after its first failed
    /// synthesis. Default: 2.
    ///
    /// Engine crashes and timeouts are usually transient. Two retries catch
    /// the vast majority; a segment that still fails is skipped or aborts the
    /// job depending on [`failure_policy`](Self::failure_policy).
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    ///
    /// Doubles after each attempt: 500 ms → 1 s → 2 s. A crashed engine that
    /// is being restarted by the OS needs a moment before the next attempt
    /// has any chance of succeeding.
    pub retry_backoff_ms: u64,

    /// Per-attempt synthesis timeout in seconds. Default: 30.
    ///
    /// A hung engine process would otherwise stall its worker forever. 30 s
    /// is generous for a 400-character segment on slow hardware; the attempt
    /// is abandoned and retried once the deadline passes.
    pub synthesis_timeout_secs: u64,

    /// What to do when a segment exhausts its retries. Default: skip.
    pub failure_policy: FailurePolicy,

    /// Single assembled file or one file per segment. Default: single.
    pub output_mode: OutputMode,

    /// How skipped segments appear in single-file output. Default: silence.
    pub gap_policy: GapPolicy,

    /// How cancellation treats in-flight synthesis calls. Default: soft.
    pub cancel_mode: CancelMode,

    /// Reuse artifacts recorded in a previous run's checkpoint. Default: false.
    ///
    /// Requires a stable parts directory, so single-file output keeps its
    /// scratch space next to the output file instead of in a temp dir when
    /// this is set.
    pub resume: bool,

    /// Output destination: a `.wav` path in single-file mode, a directory in
    /// per-segment mode. `None` derives it from the input file name.
    pub output: Option<PathBuf>,

    /// Pre-constructed speech backend. Takes precedence over `backend_name`.
    pub backend: Option<Arc<dyn SpeechBackend>>,

    /// Speech backend name (currently "piper"). If None along with `backend`,
    /// resolution falls back to the `PDF2SPEECH_BACKEND` env var and then to
    /// auto-detection on PATH.
    pub backend_name: Option<String>,

    /// Pre-constructed text extractor. `None` uses the built-in PDF extractor.
    /// Useful in tests and for callers with their own PDF stack.
    pub extractor: Option<Arc<dyn TextExtractor>>,

    /// Progress callback invoked on stage changes and segment completion.
    pub progress_callback: Option<ProgressCallback>,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,
}

impl Default for ConversionConfig {
    fn default() -> Self {
        Self {
            voice: VoiceConfig::default(),
            max_segment_chars: 400,
            min_segment_chars: 10,
            concurrency: 2,
            max_retries: 2,
            retry_backoff_ms: 500,
            synthesis_timeout_secs: 30,
            failure_policy: FailurePolicy::default(),
            output_mode: OutputMode::default(),
            gap_policy: GapPolicy::default(),
            cancel_mode: CancelMode::default(),
            resume: false,
            output: None,
            backend: None,
            backend_name: None,
            extractor: None,
            progress_callback: None,
            download_timeout_secs: 120,
        }
    }
}

impl fmt::Debug for ConversionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionConfig")
            .field("voice", &self.voice)
            .field("max_segment_chars", &self.max_segment_chars)
            .field("min_segment_chars", &self.min_segment_chars)
            .field("concurrency", &self.concurrency)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("synthesis_timeout_secs", &self.synthesis_timeout_secs)
            .field("failure_policy", &self.failure_policy)
            .field("output_mode", &self.output_mode)
            .field("gap_policy", &self.gap_policy)
            .field("cancel_mode", &self.cancel_mode)
            .field("resume", &self.resume)
            .field("output", &self.output)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn SpeechBackend>"))
            .field("backend_name", &self.backend_name)
            .field(
                "extractor",
                &self.extractor.as_ref().map(|_| "<dyn TextExtractor>"),
            )
            .finish()
    }
}

impl ConversionConfig {
    /// Create a new builder for `ConversionConfig`.
    pub fn builder() -> ConversionConfigBuilder {
        ConversionConfigBuilder {
            config: Self::default(),
        }
    }

    /// Validate field constraints.
    ///
    /// Called by [`ConversionConfigBuilder::build`] and again at job start,
    /// since the fields are public and a hand-assembled config bypasses the
    /// builder. Segmentation bounds report as
    /// [`Pdf2SpeechError::Segmentation`]; everything else as
    /// [`Pdf2SpeechError::InvalidConfig`].
    pub(crate) fn validate(&self) -> Result<(), Pdf2SpeechError> {
        if self.max_segment_chars == 0 {
            return Err(Pdf2SpeechError::Segmentation {
                detail: "max_segment_chars must be ≥ 1".into(),
            });
        }
        if self.min_segment_chars > self.max_segment_chars {
            return Err(Pdf2SpeechError::Segmentation {
                detail: format!(
                    "min_segment_chars ({}) exceeds max_segment_chars ({})",
                    self.min_segment_chars, self.max_segment_chars
                ),
            });
        }
        if self.concurrency == 0 {
            return Err(Pdf2SpeechError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if self.synthesis_timeout_secs == 0 {
            return Err(Pdf2SpeechError::InvalidConfig(
                "Synthesis timeout must be ≥ 1s".into(),
            ));
        }
        if !(0.5..=2.0).contains(&self.voice.rate) {
            return Err(Pdf2SpeechError::InvalidConfig(format!(
                "Voice rate must be 0.5–2.0, got {}",
                self.voice.rate
            )));
        }
        if !(0.0..=1.0).contains(&self.voice.volume) {
            return Err(Pdf2SpeechError::InvalidConfig(format!(
                "Voice volume must be 0.0–1.0, got {}",
                self.voice.volume
            )));
        }
        Ok(())
    }
}

/// Builder for [`ConversionConfig`].
#[derive(Debug)]
pub struct ConversionConfigBuilder {
    config: ConversionConfig,
}

impl ConversionConfigBuilder {
    pub fn voice(mut self, voice: VoiceConfig) -> Self {
        self.config.voice = voice;
        self
    }

    pub fn voice_name(mut self, name: impl Into<String>) -> Self {
        self.config.voice.voice = Some(name.into());
        self
    }

    pub fn rate(mut self, rate: f32) -> Self {
        self.config.voice.rate = rate.clamp(0.5, 2.0);
        self
    }

    pub fn volume(mut self, volume: f32) -> Self {
        self.config.voice.volume = volume.clamp(0.0, 1.0);
        self
    }

    pub fn max_segment_chars(mut self, n: usize) -> Self {
        self.config.max_segment_chars = n.max(1);
        self
    }

    pub fn min_segment_chars(mut self, n: usize) -> Self {
        self.config.min_segment_chars = n;
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn synthesis_timeout_secs(mut self, secs: u64) -> Self {
        self.config.synthesis_timeout_secs = secs.max(1);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn output_mode(mut self, mode: OutputMode) -> Self {
        self.config.output_mode = mode;
        self
    }

    pub fn gap_policy(mut self, policy: GapPolicy) -> Self {
        self.config.gap_policy = policy;
        self
    }

    pub fn cancel_mode(mut self, mode: CancelMode) -> Self {
        self.config.cancel_mode = mode;
        self
    }

    pub fn resume(mut self, v: bool) -> Self {
        self.config.resume = v;
        self
    }

    pub fn output(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.output = Some(path.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn SpeechBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn backend_name(mut self, name: impl Into<String>) -> Self {
        self.config.backend_name = Some(name.into());
        self
    }

    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.config.extractor = Some(extractor);
        self
    }

    pub fn progress_callback(mut self, callback: ProgressCallback) -> Self {
        self.config.progress_callback = Some(callback);
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ConversionConfig, Pdf2SpeechError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// What the driver does with a segment that exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Record the segment as skipped and keep going. (default)
    ///
    /// One garbled formula or emoji run should not cost a 300-page audiobook.
    #[default]
    Skip,
    /// Fail the whole job on the first exhausted segment.
    Abort,
}

/// Shape of the final output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OutputMode {
    /// One WAV file, segments concatenated in reading order. (default)
    #[default]
    SingleFile,
    /// One WAV per segment, named by sequence index, plus a manifest.
    PerSegment,
}

/// How single-file assembly represents a skipped segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GapPolicy {
    /// Insert silence sized by the segment's estimated duration. (default)
    ///
    /// Keeps the remaining audio roughly aligned with the text timeline, and
    /// an attentive listener hears that something is missing.
    #[default]
    Silence,
    /// Fail assembly if any segment is missing.
    Strict,
}

/// How cancellation treats synthesis calls that are already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CancelMode {
    /// Let in-flight attempts finish (their artifacts land in the checkpoint
    /// for a later resume); start nothing new. (default)
    #[default]
    Soft,
    /// Abandon in-flight attempts immediately.
    Hard,
}
