//! Pipeline stages for PDF-to-speech conversion.
//!
//! Each submodule implements exactly one transformation step.
//! Keeping stages separate makes each independently testable and lets us
//! swap implementations (e.g. a different extraction library) without
//! touching other stages.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ normalize ──▶ segment ──▶ synth ──▶ assemble
//! (URL/path) (pdf text)  (cleanup)    (chunks)    (WAVs)    (output)
//! ```
//!
//! 1. [`input`]     — canonicalise the user-supplied path or URL to a local
//!    file and verify it is a PDF
//! 2. [`extract`]   — pull per-page text; runs in `spawn_blocking` because
//!    PDF parsing is CPU-bound
//! 3. [`normalize`] — deterministic cleanup of extraction artifacts (broken
//!    hyphenation, stray control characters, whitespace noise)
//! 4. [`segment`]   — split pages into speech-sized chunks with global
//!    sequence numbers
//! 5. [`synth`]     — drive the speech backend concurrently with
//!    retry/backoff; the only stage that talks to an engine process
//! 6. [`assemble`]  — stitch segment audio into the final WAV (or publish
//!    per-segment files with a manifest)
//!
//! [`checkpoint`] is not a stage of its own: it persists synthesis progress
//! inside the work directory so an interrupted run can resume.

pub mod assemble;
pub mod checkpoint;
pub mod extract;
pub mod input;
pub mod normalize;
pub mod segment;
pub mod synth;
