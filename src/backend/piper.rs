//! Piper speech backend.
//!
//! Drives a local [piper](https://github.com/rhasspy/piper) process per
//! segment: text goes in on stdin, a WAV file comes out at the path we name.
//! Piper loads its voice model on every invocation, which costs a few hundred
//! milliseconds but buys total isolation — a crash while speaking one segment
//! cannot poison the next attempt.
//!
//! # Environment
//!
//! | Variable                | Meaning                                          |
//! |-------------------------|--------------------------------------------------|
//! | `PDF2SPEECH_PIPER_CMD`  | Full command to run instead of `piper` (shell-split) |
//! | `PDF2SPEECH_VOICE`      | Default voice model when none is configured      |
//! | `PDF2SPEECH_VOICES_DIR` | Directory searched for `<voice>.onnx` models     |

use super::{BackendFailure, SpeechBackend, VoiceInfo};
use crate::config::VoiceConfig;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Cap on stderr carried into error messages. Piper repeats its phoneme
/// warnings per line of input; the tail is where the real error lives.
const STDERR_TAIL: usize = 400;

/// Speech backend that shells out to a local piper executable.
pub struct PiperBackend {
    /// Program plus leading arguments. First element is the executable.
    command: Vec<String>,
    /// Model used when [`VoiceConfig::voice`] is unset.
    default_model: Option<PathBuf>,
    /// Directory searched for `<voice>.onnx` when the voice id is not a path.
    voices_dir: Option<PathBuf>,
}

impl PiperBackend {
    /// Backend invoking plain `piper` from PATH, with no default voice.
    pub fn new() -> Self {
        Self {
            command: vec!["piper".to_string()],
            default_model: None,
            voices_dir: None,
        }
    }

    /// Backend configured from the `PDF2SPEECH_*` environment variables.
    pub fn from_env() -> Self {
        let mut backend = Self::new();
        if let Ok(cmd) = std::env::var("PDF2SPEECH_PIPER_CMD") {
            // shlex so users can write PDF2SPEECH_PIPER_CMD='wine piper.exe'
            // or a command with quoted paths.
            match shlex::split(&cmd) {
                Some(parts) if !parts.is_empty() => backend.command = parts,
                _ => warn!("PDF2SPEECH_PIPER_CMD is not a valid command: {:?}", cmd),
            }
        }
        if let Ok(model) = std::env::var("PDF2SPEECH_VOICE") {
            if !model.is_empty() {
                backend.default_model = Some(PathBuf::from(model));
            }
        }
        if let Ok(dir) = std::env::var("PDF2SPEECH_VOICES_DIR") {
            if !dir.is_empty() {
                backend.voices_dir = Some(PathBuf::from(dir));
            }
        }
        backend
    }

    /// Replace the command (program + leading arguments).
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        if !command.is_empty() {
            self.command = command;
        }
        self
    }

    /// Set the model used when no voice id is given.
    pub fn with_default_model(mut self, model: impl Into<PathBuf>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    /// Set the directory searched for `<voice>.onnx` models.
    pub fn with_voices_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.voices_dir = Some(dir.into());
        self
    }

    /// Resolve the voice id to a model path.
    ///
    /// A voice id that is an existing file wins; otherwise the voices
    /// directory is searched for `<id>.onnx`; otherwise the default model is
    /// used as-is (piper itself reports a bad path).
    fn resolve_model(&self, voice: &VoiceConfig) -> Result<PathBuf, BackendFailure> {
        if let Some(ref id) = voice.voice {
            let as_path = PathBuf::from(id);
            if as_path.is_file() {
                return Ok(as_path);
            }
            if let Some(ref dir) = self.voices_dir {
                let candidate = dir.join(format!("{id}.onnx"));
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
            return Err(BackendFailure::VoiceNotFound(format!(
                "'{id}' is neither a model file nor a voice in {}",
                self.voices_dir
                    .as_deref()
                    .map(|d| d.display().to_string())
                    .unwrap_or_else(|| "<no voices dir configured>".to_string())
            )));
        }
        self.default_model.clone().ok_or_else(|| {
            BackendFailure::VoiceNotFound(
                "no voice model configured; pass --voice or set PDF2SPEECH_VOICE".to_string(),
            )
        })
    }
}

impl Default for PiperBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechBackend for PiperBackend {
    async fn synthesize(
        &self,
        text: &str,
        voice: &VoiceConfig,
        out_wav: &Path,
    ) -> Result<(), BackendFailure> {
        let model = self.resolve_model(voice)?;

        let mut cmd = Command::new(&self.command[0]);
        cmd.args(&self.command[1..])
            .arg("--model")
            .arg(&model)
            .arg("--output_file")
            .arg(out_wav);
        // Piper's length_scale stretches phoneme durations: 2.0 is half
        // speed. Our rate is the inverse (2.0 is double speed).
        cmd.arg("--length_scale")
            .arg(format!("{:.3}", 1.0 / voice.rate));
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            "piper: {} chars -> {} (model {})",
            text.chars().count(),
            out_wav.display(),
            model.display()
        );

        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                BackendFailure::EngineNotFound(self.command[0].clone())
            } else {
                BackendFailure::Spawn(e)
            }
        })?;

        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| BackendFailure::Io(std::io::Error::other("stdin not captured")))?;
            stdin.write_all(text.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            // dropping stdin closes the pipe; piper exits after the last line
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let _ = tokio::fs::remove_file(out_wav).await;
            return Err(BackendFailure::Engine {
                status: output.status.to_string(),
                stderr: stderr_tail(&output.stderr),
            });
        }

        // Piper can exit 0 without writing anything (e.g. input was pure
        // whitespace after its own filtering). Treat that as a failure so the
        // retry/skip machinery sees it.
        match tokio::fs::metadata(out_wav).await {
            Ok(meta) if meta.len() > 0 => {}
            _ => {
                let _ = tokio::fs::remove_file(out_wav).await;
                return Err(BackendFailure::NoOutput);
            }
        }

        if voice.volume < 1.0 {
            let path = out_wav.to_path_buf();
            let gain = voice.volume;
            tokio::task::spawn_blocking(move || apply_gain(&path, gain))
                .await
                .map_err(|e| {
                    BackendFailure::Io(std::io::Error::other(format!("gain task panicked: {e}")))
                })??;
        }

        Ok(())
    }

    async fn voices(&self) -> Result<Vec<VoiceInfo>, BackendFailure> {
        let Some(ref dir) = self.voices_dir else {
            return Ok(Vec::new());
        };
        let mut voices = Vec::new();
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(_) => return Ok(Vec::new()),
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "onnx") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    voices.push(VoiceInfo {
                        id: stem.to_string(),
                        description: Some(path.display().to_string()),
                    });
                }
            }
        }
        voices.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(voices)
    }

    fn name(&self) -> &str {
        "piper"
    }

    fn is_available(&self) -> bool {
        let program = &self.command[0];
        if program.contains(std::path::MAIN_SEPARATOR) {
            return Path::new(program).is_file();
        }
        which::which(program).is_ok()
    }
}

/// Keep the last [`STDERR_TAIL`] characters of engine stderr.
fn stderr_tail(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let text = text.trim();
    let count = text.chars().count();
    if count <= STDERR_TAIL {
        return text.to_string();
    }
    let skip = count - STDERR_TAIL;
    format!("…{}", text.chars().skip(skip).collect::<String>())
}

/// Scale every sample in a WAV file by `gain`, preserving the format.
///
/// Piper has no volume control of its own, so attenuation happens here as a
/// post-pass. Rewrites through a sibling temp file and renames over the
/// original so a crash mid-pass leaves the unscaled clip intact.
pub(crate) fn apply_gain(path: &Path, gain: f32) -> Result<(), BackendFailure> {
    let reader = hound::WavReader::open(path)
        .map_err(|e| BackendFailure::Io(std::io::Error::other(e.to_string())))?;
    let spec = reader.spec();
    let tmp = path.with_extension("gain.tmp");

    let write = || -> Result<(), hound::Error> {
        let mut reader = hound::WavReader::open(path)?;
        let mut writer = hound::WavWriter::create(&tmp, spec)?;
        match spec.sample_format {
            hound::SampleFormat::Int => {
                for sample in reader.samples::<i32>() {
                    let scaled = (sample? as f64 * gain as f64).round() as i32;
                    writer.write_sample(scaled)?;
                }
            }
            hound::SampleFormat::Float => {
                for sample in reader.samples::<f32>() {
                    writer.write_sample(sample? * gain)?;
                }
            }
        }
        writer.finalize()
    };
    drop(reader);

    write().map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        BackendFailure::Io(std::io::Error::other(e.to_string()))
    })?;
    std::fs::rename(&tmp, path).map_err(BackendFailure::Io)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn voice(id: Option<&str>) -> VoiceConfig {
        VoiceConfig {
            voice: id.map(String::from),
            rate: 1.0,
            volume: 1.0,
        }
    }

    #[test]
    fn resolve_model_prefers_existing_path() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("en_US-amy-medium.onnx");
        std::fs::write(&model, b"fake model").unwrap();

        let backend = PiperBackend::new();
        let resolved = backend
            .resolve_model(&voice(Some(model.to_str().unwrap())))
            .unwrap();
        assert_eq!(resolved, model);
    }

    #[test]
    fn resolve_model_searches_voices_dir() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("amy.onnx"), b"fake model").unwrap();

        let backend = PiperBackend::new().with_voices_dir(dir.path());
        let resolved = backend.resolve_model(&voice(Some("amy"))).unwrap();
        assert_eq!(resolved, dir.path().join("amy.onnx"));
    }

    #[test]
    fn resolve_model_falls_back_to_default() {
        let backend = PiperBackend::new().with_default_model("/models/default.onnx");
        let resolved = backend.resolve_model(&voice(None)).unwrap();
        assert_eq!(resolved, PathBuf::from("/models/default.onnx"));
    }

    #[test]
    fn resolve_model_without_any_voice_fails() {
        let backend = PiperBackend::new();
        let err = backend.resolve_model(&voice(None)).unwrap_err();
        assert!(matches!(err, BackendFailure::VoiceNotFound(_)));
    }

    #[test]
    fn unknown_voice_id_names_the_problem() {
        let dir = TempDir::new().unwrap();
        let backend = PiperBackend::new().with_voices_dir(dir.path());
        let err = backend.resolve_model(&voice(Some("ghost"))).unwrap_err();
        assert!(err.to_string().contains("ghost"), "got: {err}");
    }

    #[test]
    fn stderr_tail_keeps_the_end() {
        let long: String = "x".repeat(500) + " the actual error";
        let tail = stderr_tail(long.as_bytes());
        assert!(tail.starts_with('…'));
        assert!(tail.ends_with("the actual error"));
        assert!(tail.chars().count() <= STDERR_TAIL + 1);
    }

    #[test]
    fn apply_gain_halves_samples() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("clip.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for s in [1000i16, -2000, 30000] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        apply_gain(&path, 0.5).unwrap();

        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i32> = reader.samples::<i32>().map(|s| s.unwrap()).collect();
        assert_eq!(samples, vec![500, -1000, 15000]);
        assert_eq!(reader.spec(), spec);
    }

    // Mock-engine tests: a shell script stands in for piper, so these only
    // run where /bin/sh exists.
    #[cfg(unix)]
    mod mock_engine {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        fn write_script(dir: &TempDir, body: &str) -> String {
            let path = dir.path().join("mock-piper.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path.to_str().unwrap().to_string()
        }

        // Finds the --output_file argument and writes a marker there.
        const WRITE_OUTPUT: &str = r#"
cat > /dev/null
out=""
prev=""
for a in "$@"; do
  if [ "$prev" = "--output_file" ]; then out="$a"; fi
  prev="$a"
done
printf 'RIFFfake-wav-bytes' > "$out"
"#;

        #[tokio::test]
        async fn synthesize_writes_the_named_file() {
            let dir = TempDir::new().unwrap();
            let script = write_script(&dir, WRITE_OUTPUT);
            let backend = PiperBackend::new()
                .with_command(vec![script])
                .with_default_model("/models/fake.onnx");

            let out = dir.path().join("seg_00000.wav");
            backend
                .synthesize("Hello world.", &voice(None), &out)
                .await
                .unwrap();
            assert!(out.is_file());
            assert!(std::fs::metadata(&out).unwrap().len() > 0);
        }

        #[tokio::test]
        async fn engine_failure_carries_stderr() {
            let dir = TempDir::new().unwrap();
            let script = write_script(&dir, "cat > /dev/null\necho 'model load failed' >&2\nexit 3");
            let backend = PiperBackend::new()
                .with_command(vec![script])
                .with_default_model("/models/fake.onnx");

            let out = dir.path().join("seg_00000.wav");
            let err = backend
                .synthesize("Hello.", &voice(None), &out)
                .await
                .unwrap_err();
            match err {
                BackendFailure::Engine { stderr, .. } => {
                    assert!(stderr.contains("model load failed"))
                }
                other => panic!("expected Engine failure, got {other}"),
            }
            assert!(!out.exists());
        }

        #[tokio::test]
        async fn silent_success_without_output_is_no_output() {
            let dir = TempDir::new().unwrap();
            let script = write_script(&dir, "cat > /dev/null\nexit 0");
            let backend = PiperBackend::new()
                .with_command(vec![script])
                .with_default_model("/models/fake.onnx");

            let out = dir.path().join("seg_00000.wav");
            let err = backend
                .synthesize("Hello.", &voice(None), &out)
                .await
                .unwrap_err();
            assert!(matches!(err, BackendFailure::NoOutput));
        }

        #[tokio::test]
        async fn missing_engine_is_engine_not_found() {
            let backend = PiperBackend::new()
                .with_command(vec!["definitely-not-a-real-engine-2194".to_string()])
                .with_default_model("/models/fake.onnx");

            let dir = TempDir::new().unwrap();
            let err = backend
                .synthesize("Hello.", &voice(None), &dir.path().join("x.wav"))
                .await
                .unwrap_err();
            assert!(matches!(err, BackendFailure::EngineNotFound(_)));
        }
    }
}
