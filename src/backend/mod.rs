//! Speech-backend abstraction.
//!
//! A [`SpeechBackend`] turns one segment of text into a WAV file. The
//! orchestrator never knows which engine is behind the trait: engines are
//! selected by configuration and handed around as `Arc<dyn SpeechBackend>`,
//! so adding an engine means adding a module here, not touching the pipeline.
//!
//! The shipped implementation is [`piper::PiperBackend`], which drives a
//! local [piper](https://github.com/rhasspy/piper) process.

pub mod piper;

use crate::config::{ConversionConfig, VoiceConfig};
use crate::error::Pdf2SpeechError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// A single failed synthesis attempt, as reported by a backend.
///
/// These are attempt-level failures: the driver retries them and only
/// promotes the last one into a [`crate::error::SegmentError`] once retries
/// are exhausted.
#[derive(Debug, Error)]
pub enum BackendFailure {
    /// The engine executable could not be found.
    #[error("engine executable not found: '{0}'")]
    EngineNotFound(String),

    /// No voice model could be resolved for the requested voice.
    #[error("voice not found: {0}")]
    VoiceNotFound(String),

    /// The engine process could not be spawned.
    #[error("failed to spawn engine: {0}")]
    Spawn(#[source] std::io::Error),

    /// The engine ran but exited unsuccessfully.
    #[error("engine exited with {status}: {stderr}")]
    Engine { status: String, stderr: String },

    /// The engine reported success but wrote no usable output file.
    #[error("engine produced no output file")]
    NoOutput,

    /// I/O error talking to the engine or its output file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A voice a backend knows how to speak with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceInfo {
    /// Identifier accepted by [`VoiceConfig::voice`].
    pub id: String,
    /// Human-readable detail (model path, language), when known.
    pub description: Option<String>,
}

/// A text-to-speech engine.
///
/// Implementations must be `Send + Sync`: the synthesis driver invokes
/// `synthesize` from several tasks at once, one segment per call.
///
/// # Contract
///
/// * On `Ok(())` a complete, non-empty WAV file exists at `out_wav` with the
///   requested voice parameters applied.
/// * On `Err` nothing usable is left at `out_wav` (partial files are the
///   backend's to clean up).
/// * Calls must be independent; the driver may retry a failed segment with
///   the same arguments.
#[async_trait]
pub trait SpeechBackend: Send + Sync {
    /// Synthesize `text` into a WAV file at `out_wav`.
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
        out_wav: &Path,
    ) -> Result<(), BackendFailure>;

    /// Voices this backend can enumerate.
    ///
    /// Engines whose voices are loose model files may only see what their
    /// configured voices directory contains; an empty list does not mean the
    /// engine cannot speak.
    async fn voices(&self) -> Result<Vec<VoiceInfo>, BackendFailure> {
        Ok(Vec::new())
    }

    /// Short identifier, e.g. `"piper"`.
    fn name(&self) -> &str;

    /// Cheap availability probe. No synthesis is performed.
    fn is_available(&self) -> bool {
        true
    }
}

/// Backends identify themselves by [`SpeechBackend::name`]; engine internals
/// are not part of the `Debug` output.
impl std::fmt::Debug for dyn SpeechBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SpeechBackend({})", self.name())
    }
}

/// Instantiate a named backend.
fn create_backend(name: &str) -> Result<Arc<dyn SpeechBackend>, Pdf2SpeechError> {
    match name {
        "piper" => Ok(Arc::new(piper::PiperBackend::from_env())),
        other => Err(Pdf2SpeechError::BackendUnavailable {
            backend: other.to_string(),
            hint: "Known backends: piper".to_string(),
        }),
    }
}

/// Resolve the speech backend, from most-specific to least-specific.
///
/// The four-level fallback chain lets library users and CLI users each set
/// exactly as much or as little as they need:
///
/// 1. **Pre-built backend** (`config.backend`) — the caller constructed and
///    configured the engine entirely; we use it as-is. Useful in tests or
///    when the caller needs custom behaviour (caching, remote engines).
///
/// 2. **Named backend** (`config.backend_name`) — the caller named an engine
///    (e.g. `"piper"`); engine-specific settings still come from that
///    engine's own environment variables.
///
/// 3. **Environment** (`PDF2SPEECH_BACKEND`) — the engine was chosen at the
///    execution environment level (Makefile, shell script, CI).
///
/// 4. **Auto-detection** — probe known engines on PATH and pick the first
///    available one. Convenient for `pdf2speech document.pdf` with no other
///    configuration.
pub(crate) fn resolve_backend(
    config: &ConversionConfig,
) -> Result<Arc<dyn SpeechBackend>, Pdf2SpeechError> {
    // 1) User-provided backend takes priority
    if let Some(ref backend) = config.backend {
        return Ok(Arc::clone(backend));
    }

    // 2) Named backend
    if let Some(ref name) = config.backend_name {
        return create_backend(name);
    }

    // 3) Environment choice
    if let Ok(name) = std::env::var("PDF2SPEECH_BACKEND") {
        if !name.is_empty() {
            return create_backend(&name);
        }
    }

    // 4) Auto-detection
    let piper = piper::PiperBackend::from_env();
    if piper.is_available() {
        return Ok(Arc::new(piper));
    }

    Err(Pdf2SpeechError::BackendUnavailable {
        backend: "auto".to_string(),
        hint: "No speech engine could be auto-detected.\n\
               Install piper (https://github.com/rhasspy/piper) and put it on PATH,\n\
               or set PDF2SPEECH_PIPER_CMD to the full command to run.\n\
               A voice model is also required: pass --voice /path/to/voice.onnx\n\
               or set PDF2SPEECH_VOICE."
            .to_string(),
    })
}
