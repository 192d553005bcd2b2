//! Assembly: stitch per-segment WAV files into deliverable output.
//!
//! Single-file mode concatenates every segment's samples in sequence order
//! into one WAV, refusing to mix formats — every artifact must carry the
//! exact spec (rate, channels, bit depth, sample format) of the first one.
//! Skipped segments either become silence sized by the segment's estimated
//! speaking time ([`GapPolicy::Silence`]) or fail the run
//! ([`GapPolicy::Strict`]).
//!
//! Per-segment mode leaves the audio files where synthesis put them and adds
//! a `manifest.json` describing playback order and any gaps.
//!
//! Both writers go through a temp file and a final rename, so an interrupted
//! run never leaves a truncated output at the destination path.

use crate::config::GapPolicy;
use crate::error::Pdf2SpeechError;
use crate::output::SegmentResult;
use crate::pipeline::segment::Segment;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Concatenate synthesized segments into a single WAV at `output`.
///
/// `results` must be seq-ordered and parallel to `segments`. Returns the
/// duration of the written audio in milliseconds.
pub fn assemble_single(
    segments: &[Segment],
    results: &[SegmentResult],
    output: &Path,
    gap_policy: GapPolicy,
    rate: f32,
) -> Result<u64, Pdf2SpeechError> {
    let spec = match first_spec(results)? {
        Some(spec) => spec,
        None => {
            return Err(Pdf2SpeechError::Internal(
                "no synthesized segments to assemble".to_string(),
            ))
        }
    };

    let tmp = output.with_extension("wav.tmp");
    let mut writer = hound::WavWriter::create(&tmp, spec)
        .map_err(|e| write_failed(output, hound_to_io(e)))?;
    let mut frames_written: u64 = 0;

    for result in results {
        match &result.artifact {
            Some(artifact) => {
                frames_written += append_wav(&mut writer, &artifact.path, result.seq, spec)
                    .map_err(|e| e.into_error(output))?;
            }
            None => match gap_policy {
                GapPolicy::Strict => {
                    return Err(Pdf2SpeechError::MissingArtifact { seq: result.seq });
                }
                GapPolicy::Silence => {
                    let segment = segments.get(result.seq).ok_or_else(|| {
                        Pdf2SpeechError::Internal(format!(
                            "no segment text for result {}",
                            result.seq
                        ))
                    })?;
                    frames_written +=
                        append_silence(&mut writer, segment, rate, spec).map_err(|e| {
                            write_failed(output, hound_to_io(e))
                        })?;
                }
            },
        }
    }

    writer
        .finalize()
        .map_err(|e| write_failed(output, hound_to_io(e)))?;
    std::fs::rename(&tmp, output).map_err(|e| write_failed(output, e))?;

    let duration_ms = frames_written * 1000 / spec.sample_rate as u64;
    debug!(
        "Assembled {} segment(s) into {} ({duration_ms} ms)",
        results.len(),
        output.display()
    );
    Ok(duration_ms)
}

/// Playback manifest written next to per-segment output files.
#[derive(Debug, Serialize)]
struct Manifest {
    sample_rate: Option<u32>,
    total_duration_ms: u64,
    files: Vec<ManifestFile>,
    skipped: Vec<ManifestSkip>,
}

#[derive(Debug, Serialize)]
struct ManifestFile {
    seq: usize,
    page: usize,
    file: String,
    duration_ms: u64,
    chars: usize,
    reused: bool,
}

#[derive(Debug, Serialize)]
struct ManifestSkip {
    seq: usize,
    page: usize,
    error: String,
}

/// Write `manifest.json` into `dir` for per-segment output.
///
/// Playback order is the `files` array order; `skipped` names the sequence
/// numbers with no audio so players can decide how to handle the gap.
pub fn write_manifest(dir: &Path, results: &[SegmentResult]) -> Result<PathBuf, Pdf2SpeechError> {
    let mut manifest = Manifest {
        sample_rate: None,
        total_duration_ms: 0,
        files: Vec::new(),
        skipped: Vec::new(),
    };

    for result in results {
        match &result.artifact {
            Some(artifact) => {
                let file = artifact
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| artifact.path.display().to_string());
                manifest.sample_rate.get_or_insert(artifact.sample_rate);
                manifest.total_duration_ms += artifact.duration_ms;
                manifest.files.push(ManifestFile {
                    seq: result.seq,
                    page: result.page,
                    file,
                    duration_ms: artifact.duration_ms,
                    chars: result.chars,
                    reused: result.reused,
                });
            }
            None => {
                let error = result
                    .error
                    .as_ref()
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "not synthesized".to_string());
                manifest.skipped.push(ManifestSkip {
                    seq: result.seq,
                    page: result.page,
                    error,
                });
            }
        }
    }

    let path = dir.join("manifest.json");
    let tmp = dir.join("manifest.json.tmp");
    let write = || -> std::io::Result<()> {
        let data = serde_json::to_vec_pretty(&manifest)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    };
    write().map_err(|e| write_failed(&path, e))?;
    Ok(path)
}

// ── Sample plumbing ──────────────────────────────────────────────────────────

/// Spec of the first synthesized artifact, i.e. the target format.
fn first_spec(results: &[SegmentResult]) -> Result<Option<hound::WavSpec>, Pdf2SpeechError> {
    for result in results {
        if let Some(artifact) = &result.artifact {
            let reader = hound::WavReader::open(&artifact.path)
                .map_err(|e| read_failed(result.seq, &e))?;
            return Ok(Some(reader.spec()));
        }
    }
    Ok(None)
}

enum AppendError {
    Mismatch {
        seq: usize,
        expected: String,
        actual: String,
    },
    Read {
        seq: usize,
        detail: String,
    },
    Write(std::io::Error),
}

impl AppendError {
    fn into_error(self, output: &Path) -> Pdf2SpeechError {
        match self {
            AppendError::Mismatch {
                seq,
                expected,
                actual,
            } => Pdf2SpeechError::AudioFormatMismatch {
                seq,
                expected,
                actual,
            },
            AppendError::Read { seq, detail } => Pdf2SpeechError::Internal(format!(
                "segment {seq} audio became unreadable during assembly: {detail}"
            )),
            AppendError::Write(e) => write_failed(output, e),
        }
    }
}

/// Copy all samples of one artifact into the writer. Returns frames copied.
fn append_wav<W: std::io::Write + std::io::Seek>(
    writer: &mut hound::WavWriter<W>,
    path: &Path,
    seq: usize,
    expected: hound::WavSpec,
) -> Result<u64, AppendError> {
    let mut reader = hound::WavReader::open(path).map_err(|e| AppendError::Read {
        seq,
        detail: e.to_string(),
    })?;
    let spec = reader.spec();
    if spec != expected {
        return Err(AppendError::Mismatch {
            seq,
            expected: describe_spec(expected),
            actual: describe_spec(spec),
        });
    }

    let frames = reader.duration() as u64;
    match spec.sample_format {
        hound::SampleFormat::Int => {
            for sample in reader.samples::<i32>() {
                let sample = sample.map_err(|e| AppendError::Read {
                    seq,
                    detail: e.to_string(),
                })?;
                writer
                    .write_sample(sample)
                    .map_err(|e| AppendError::Write(hound_to_io(e)))?;
            }
        }
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                let sample = sample.map_err(|e| AppendError::Read {
                    seq,
                    detail: e.to_string(),
                })?;
                writer
                    .write_sample(sample)
                    .map_err(|e| AppendError::Write(hound_to_io(e)))?;
            }
        }
    }
    Ok(frames)
}

/// Write silence sized by the segment's estimated speaking time. Returns
/// frames written.
fn append_silence<W: std::io::Write + std::io::Seek>(
    writer: &mut hound::WavWriter<W>,
    segment: &Segment,
    rate: f32,
    spec: hound::WavSpec,
) -> Result<u64, hound::Error> {
    let secs = segment.estimated_duration(rate).as_secs_f64();
    let frames = (secs * spec.sample_rate as f64).round() as u64;
    let samples = frames * spec.channels as u64;
    match spec.sample_format {
        hound::SampleFormat::Int => {
            for _ in 0..samples {
                writer.write_sample(0i32)?;
            }
        }
        hound::SampleFormat::Float => {
            for _ in 0..samples {
                writer.write_sample(0f32)?;
            }
        }
    }
    Ok(frames)
}

fn describe_spec(spec: hound::WavSpec) -> String {
    let format = match spec.sample_format {
        hound::SampleFormat::Int => "int",
        hound::SampleFormat::Float => "float",
    };
    format!(
        "{} Hz, {} channel(s), {}-bit {format}",
        spec.sample_rate, spec.channels, spec.bits_per_sample
    )
}

fn hound_to_io(err: hound::Error) -> std::io::Error {
    match err {
        hound::Error::IoError(e) => e,
        other => std::io::Error::other(other.to_string()),
    }
}

fn write_failed(path: &Path, source: std::io::Error) -> Pdf2SpeechError {
    Pdf2SpeechError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    }
}

fn read_failed(seq: usize, err: &hound::Error) -> Pdf2SpeechError {
    Pdf2SpeechError::Internal(format!(
        "segment {seq} audio became unreadable during assembly: {err}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::AudioArtifact;

    const RATE: u32 = 22_050;

    fn write_wav(path: &Path, frames: u32, sample_rate: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..frames {
            writer.write_sample(1_000i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    fn segment(seq: usize, chars: usize) -> Segment {
        Segment {
            seq,
            page: 0,
            text: "x".repeat(chars),
        }
    }

    fn ok_result(seq: usize, path: PathBuf, frames: u32, sample_rate: u32) -> SegmentResult {
        SegmentResult {
            seq,
            page: 0,
            chars: 10,
            artifact: Some(AudioArtifact {
                path,
                duration_ms: frames as u64 * 1000 / sample_rate as u64,
                sample_rate,
            }),
            retries: 0,
            reused: false,
            synth_ms: 5,
            error: None,
        }
    }

    fn skipped_result(seq: usize) -> SegmentResult {
        SegmentResult {
            seq,
            page: 0,
            chars: 10,
            artifact: None,
            retries: 2,
            reused: false,
            synth_ms: 5,
            error: Some(crate::error::SegmentError::Synthesis {
                seq,
                retries: 2,
                detail: "engine crashed".to_string(),
            }),
        }
    }

    #[test]
    fn test_concatenates_in_sequence_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut results = Vec::new();
        let mut segments = Vec::new();
        for (seq, frames) in [(0usize, 2_205u32), (1, 4_410), (2, 2_205)] {
            let path = dir.path().join(format!("seg_{seq:05}.wav"));
            write_wav(&path, frames, RATE);
            results.push(ok_result(seq, path, frames, RATE));
            segments.push(segment(seq, 10));
        }

        let output = dir.path().join("book.wav");
        let ms = assemble_single(&segments, &results, &output, GapPolicy::Silence, 1.0).unwrap();
        assert_eq!(ms, 400); // 100 + 200 + 100

        let reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.duration(), 2_205 + 4_410 + 2_205);
        assert!(!dir.path().join("book.wav.tmp").exists());
    }

    #[test]
    fn test_silence_fills_skipped_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path0 = dir.path().join("seg_00000.wav");
        write_wav(&path0, 2_205, RATE);

        // 30 chars at 15 chars/s is 2 s of estimated speech.
        let segments = vec![segment(0, 10), segment(1, 30)];
        let results = vec![ok_result(0, path0, 2_205, RATE), skipped_result(1)];

        let output = dir.path().join("book.wav");
        assemble_single(&segments, &results, &output, GapPolicy::Silence, 1.0).unwrap();

        let mut reader = hound::WavReader::open(&output).unwrap();
        assert_eq!(reader.duration(), 2_205 + 2 * RATE);
        // The tail really is silence.
        let samples: Vec<i32> = reader.samples::<i32>().map(|s| s.unwrap()).collect();
        assert!(samples[2_205..].iter().all(|&s| s == 0));
        assert!(samples[..2_205].iter().all(|&s| s == 1_000));
    }

    #[test]
    fn test_strict_gap_policy_rejects_skips() {
        let dir = tempfile::tempdir().unwrap();
        let path0 = dir.path().join("seg_00000.wav");
        write_wav(&path0, 2_205, RATE);

        let segments = vec![segment(0, 10), segment(1, 30)];
        let results = vec![ok_result(0, path0, 2_205, RATE), skipped_result(1)];

        let output = dir.path().join("book.wav");
        let err =
            assemble_single(&segments, &results, &output, GapPolicy::Strict, 1.0).unwrap_err();
        assert!(matches!(err, Pdf2SpeechError::MissingArtifact { seq: 1 }));
        assert!(!output.exists());
    }

    #[test]
    fn test_format_mismatch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path0 = dir.path().join("seg_00000.wav");
        let path1 = dir.path().join("seg_00001.wav");
        write_wav(&path0, 2_205, RATE);
        write_wav(&path1, 2_205, 44_100);

        let segments = vec![segment(0, 10), segment(1, 10)];
        let results = vec![
            ok_result(0, path0, 2_205, RATE),
            ok_result(1, path1, 2_205, 44_100),
        ];

        let output = dir.path().join("book.wav");
        let err =
            assemble_single(&segments, &results, &output, GapPolicy::Silence, 1.0).unwrap_err();
        match err {
            Pdf2SpeechError::AudioFormatMismatch { seq, expected, actual } => {
                assert_eq!(seq, 1);
                assert!(expected.contains("22050"));
                assert!(actual.contains("44100"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_manifest_lists_files_and_skips() {
        let dir = tempfile::tempdir().unwrap();
        let path0 = dir.path().join("seg_00000.wav");
        write_wav(&path0, 2_205, RATE);

        let results = vec![ok_result(0, path0, 2_205, RATE), skipped_result(1)];
        let manifest_path = write_manifest(dir.path(), &results).unwrap();

        let data = std::fs::read(&manifest_path).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(json["sample_rate"], 22_050);
        assert_eq!(json["files"].as_array().unwrap().len(), 1);
        assert_eq!(json["files"][0]["file"], "seg_00000.wav");
        assert_eq!(json["skipped"][0]["seq"], 1);
        assert!(json["skipped"][0]["error"]
            .as_str()
            .unwrap()
            .contains("engine crashed"));
    }
}
