//! # pdf2speech
//!
//! Convert PDF documents to spoken audio with pluggable text-to-speech
//! backends.
//!
//! ## Why this crate?
//!
//! Listening is often the only practical way through a long document — on a
//! commute, with tired eyes, or as an accessibility requirement. This crate
//! turns a text-based PDF into a WAV audiobook: it extracts per-page text,
//! cleans up the artifacts PDF extraction leaves behind (broken hyphenation,
//! stray control characters), splits the result into speech-sized segments,
//! synthesizes them concurrently through a local TTS engine, and stitches
//! the clips into one file. Failed segments are retried, skipped segments
//! become silence instead of silently shifting the narration, and an
//! interrupted run can resume from its checkpoint.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Extract    per-page text via pdf-extract (CPU-bound, spawn_blocking)
//!  ├─ 3. Normalize  de-hyphenate, strip control chars, collapse whitespace
//!  ├─ 4. Segment    sentence-aware chunks with global sequence numbers
//!  ├─ 5. Synthesize concurrent engine calls with retry + timeout
//!  └─ 6. Assemble   one WAV (or per-segment files + manifest) + stats
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2speech::{convert, ConversionConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Speech engine auto-detected from PATH (piper) or PDF2SPEECH_BACKEND
//!     let config = ConversionConfig::default();
//!     let output = convert("document.pdf", &config).await?;
//!     println!("wrote {:?}", output.outputs);
//!     eprintln!(
//!         "{} of {} segments synthesized, {:?} of audio",
//!         output.stats.synthesized_segments,
//!         output.stats.total_segments,
//!         output.audio_duration(),
//!     );
//!     Ok(())
//! }
//! ```
//!
//! For background jobs with progress polling and cancellation, see
//! [`Converter`]; for per-segment results as they are synthesized, see
//! [`convert_stream`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2speech` binary (clap + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdf2speech = { version = "0.3", default-features = false }
//! ```
//!
//! ## Speech Backends
//!
//! The default backend drives a [piper](https://github.com/rhasspy/piper)
//! subprocess; any engine can be plugged in by implementing
//! [`SpeechBackend`]. Voice models are resolved from `--voice`/`PDF2SPEECH_VOICE`
//! (a model id or a path to an `.onnx` file) and `PDF2SPEECH_VOICES_DIR`.

// ── Modules ──────────────────────────────────────────────────────────────

pub mod backend;
pub mod config;
pub mod convert;
pub mod error;
pub mod job;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use backend::{BackendFailure, SpeechBackend, VoiceInfo};
pub use config::{
    CancelMode, ConversionConfig, ConversionConfigBuilder, FailurePolicy, GapPolicy, OutputMode,
    VoiceConfig,
};
pub use convert::{convert, convert_from_bytes, convert_sync, inspect, list_voices};
pub use error::{Pdf2SpeechError, SegmentError};
pub use job::{Converter, JobId, JobProgress, JobResult, JobState};
pub use output::{
    AudioArtifact, ConversionOutput, ConversionStats, DocumentInfo, SegmentResult,
};
pub use pipeline::extract::TextExtractor;
pub use progress::{ConversionProgressCallback, NoopProgressCallback, ProgressCallback};
pub use stream::{convert_stream, convert_stream_from_bytes, SegmentStream};
