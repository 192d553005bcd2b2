//! CLI binary for pdf2speech.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `ConversionConfig` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use pdf2speech::{
    inspect, list_voices, CancelMode, ConversionConfig, ConversionProgressCallback, Converter,
    FailurePolicy, GapPolicy, JobResult, JobState, OutputMode, ProgressCallback,
};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

/// Render whole seconds as `1h 02m 03s` / `4m 05s` / `6s`.
fn format_duration(total_secs: u64) -> String {
    let h = total_secs / 3600;
    let m = (total_secs % 3600) / 60;
    let s = total_secs % 60;
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: renders a live progress bar and per-segment
/// log lines using [indicatif]. Designed to work correctly when segments
/// complete out-of-order (concurrent synthesis).
struct CliProgressCallback {
    /// The single progress bar anchored at the bottom of the terminal.
    bar: ProgressBar,
    /// Per-segment wall-clock start times for elapsed reporting.
    start_times: Mutex<HashMap<usize, Instant>>,
    /// Count of segments that were skipped after exhausting retries.
    errors: AtomicUsize,
}

impl CliProgressCallback {
    /// Create a callback whose progress-bar length is set dynamically
    /// by `on_synthesis_start` (called before any segments are synthesized).
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_synthesis_start

        // Initial style: spinner only (no counter until we know the total).
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Opening PDF…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            start_times: Mutex::new(HashMap::new()),
            errors: AtomicUsize::new(0),
        })
    }

    /// Switch to the full progress-bar style once we know `total`.
    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>4}/{len} segments  \
             ⏱ {elapsed_precise}  ETA {eta_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Synthesizing");
        self.bar.reset_eta();
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_stage_change(&self, stage: JobState) {
        match stage {
            JobState::Extracting => self.bar.set_message("extracting text…"),
            JobState::Segmenting => self.bar.set_message("segmenting…"),
            JobState::Assembling => {
                self.bar.set_prefix("Assembling");
                self.bar.set_message("writing output…");
            }
            _ => {}
        }
    }

    fn on_synthesis_start(&self, total_segments: usize) {
        // Switch from spinner-only style to full progress bar now that we
        // know the actual segment count.
        self.activate_bar(total_segments);
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Synthesizing {total_segments} segments…"))
        ));
    }

    fn on_segment_start(&self, seq: usize, _total: usize) {
        self.start_times
            .lock()
            .unwrap()
            .insert(seq, Instant::now());
        self.bar.set_message(format!("segment {seq}"));
    }

    fn on_segment_complete(&self, seq: usize, total: usize, audio_ms: u64) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&seq)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.bar.println(format!(
            "  {} Segment {:>4}/{:<4}  {:<12}  {}",
            green("✓"),
            seq + 1,
            total,
            dim(&format!("{:>5.1}s audio", audio_ms as f64 / 1000.0)),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_segment_skipped(&self, seq: usize, total: usize, error: &str) {
        let elapsed_ms = self
            .start_times
            .lock()
            .unwrap()
            .remove(&seq)
            .map(|t| t.elapsed().as_millis())
            .unwrap_or(0);

        self.errors.fetch_add(1, Ordering::SeqCst);

        // Truncate very long error messages to keep output tidy.
        let msg = if error.len() > 80 {
            let cut = error
                .char_indices()
                .take_while(|(i, _)| *i < 79)
                .last()
                .map(|(i, c)| i + c.len_utf8())
                .unwrap_or(0);
            format!("{}\u{2026}", &error[..cut])
        } else {
            error.to_string()
        };

        self.bar.println(format!(
            "  {} Segment {:>4}/{:<4}  {}  {}",
            red("✗"),
            seq + 1,
            total,
            red(&msg),
            dim(&format!("{:.1}s", elapsed_ms as f64 / 1000.0)),
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, total_segments: usize, success_count: usize) {
        let skipped = total_segments.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if skipped == 0 {
            eprintln!(
                "{} {} segments synthesized successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} segments synthesized  ({} skipped)",
                if success_count == 0 {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_segments,
                red(&skipped.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Basic conversion (writes document.wav next to your shell)
  pdf2speech document.pdf

  # Choose the output path
  pdf2speech document.pdf -o audiobook.wav

  # Faster speech, four engine processes in parallel
  pdf2speech --rate 1.5 --concurrency 4 thesis.pdf

  # One clip per segment plus a manifest.json (for streaming players)
  pdf2speech --mode segments paper.pdf -o paper_audio

  # Pick up where an interrupted run left off
  pdf2speech --resume document.pdf -o audiobook.wav

  # Convert from URL
  pdf2speech https://arxiv.org/pdf/1706.03762 -o attention.wav

  # Inspect document shape, no speech engine needed
  pdf2speech --inspect-only document.pdf

  # Which voices are installed?
  pdf2speech --list-voices

  # Structured JSON report instead of the text summary
  pdf2speech --json document.pdf > report.json

  # Strict mode: any failed segment fails the run
  pdf2speech --on-failure abort book.pdf

SPEECH ENGINE SETUP:
  pdf2speech drives a local piper process (https://github.com/rhasspy/piper).

  1. Install piper:   pipx install piper-tts      (or a release binary on PATH)
  2. Fetch a voice:   download an .onnx model + its .json config, e.g.
                      en_US-amy-medium from the piper voices repository
  3. Convert:         pdf2speech --voice /path/to/en_US-amy-medium.onnx book.pdf

  Instead of passing --voice every time, set PDF2SPEECH_VOICE, or drop your
  models into a directory and point PDF2SPEECH_VOICES_DIR at it.

ENVIRONMENT VARIABLES:
  PDF2SPEECH_BACKEND      Speech backend to use (currently: piper)
  PDF2SPEECH_PIPER_CMD    Full command used to invoke piper, e.g.
                          "python3 -m piper" or "/opt/piper/piper"
  PDF2SPEECH_VOICE        Default voice (model name or path to an .onnx file)
  PDF2SPEECH_VOICES_DIR   Directory scanned for voice models

CANCELLATION & RESUME:
  Ctrl-C requests cancellation: in-flight segments finish (soft mode, the
  default) or are killed (--cancel-mode hard), and everything synthesized so
  far is checkpointed next to the output. Rerun with --resume to continue
  without re-synthesizing finished segments. A second Ctrl-C exits at once.
"#;

/// Convert PDF files and URLs to spoken audio using a local TTS engine.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2speech",
    version,
    about = "Convert PDF files and URLs to spoken audio (WAV)",
    long_about = "Convert PDF documents (local files or URLs) to spoken audio using a local \
text-to-speech engine. Text is extracted page by page, split into sentence-aligned segments, \
synthesized concurrently, and assembled into a single WAV file or one clip per segment.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local PDF file path or HTTP/HTTPS URL.
    #[arg(required_unless_present = "list_voices")]
    input: Option<String>,

    /// Output path: a .wav file (single mode) or a directory (segments mode).
    #[arg(short, long, env = "PDF2SPEECH_OUTPUT")]
    output: Option<PathBuf>,

    /// Voice to speak with (model name or path to an .onnx file).
    #[arg(
        long,
        env = "PDF2SPEECH_VOICE",
        long_help = "Voice to speak with. For piper this is a voice model: either a bare name\n\
          resolved against PDF2SPEECH_VOICES_DIR (e.g. en_US-amy-medium) or a full path to\n\
          an .onnx file. Defaults to the engine's own voice resolution."
    )]
    voice: Option<String>,

    /// Speaking-rate multiplier; values outside 0.5–2.0 are clamped.
    #[arg(long, env = "PDF2SPEECH_RATE", default_value_t = 1.0)]
    rate: f32,

    /// Output gain; values outside 0.0–1.0 are clamped.
    #[arg(long, env = "PDF2SPEECH_VOLUME", default_value_t = 1.0)]
    volume: f32,

    /// Output shape: one assembled WAV, or one clip per segment.
    #[arg(long, env = "PDF2SPEECH_MODE", value_enum, default_value = "single")]
    mode: ModeArg,

    /// Number of segments synthesized in parallel.
    #[arg(short, long, env = "PDF2SPEECH_CONCURRENCY", default_value_t = 2)]
    concurrency: usize,

    /// Upper bound on segment length in characters.
    #[arg(long, env = "PDF2SPEECH_MAX_CHARS", default_value_t = 400)]
    max_chars: usize,

    /// Lower bound on segment length in characters.
    #[arg(long, env = "PDF2SPEECH_MIN_CHARS", default_value_t = 10)]
    min_chars: usize,

    /// Retries per segment after a failed synthesis attempt.
    #[arg(long, env = "PDF2SPEECH_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    /// Per-attempt synthesis timeout in seconds.
    #[arg(long, env = "PDF2SPEECH_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// What to do when a segment exhausts its retries.
    #[arg(
        long = "on-failure",
        env = "PDF2SPEECH_ON_FAILURE",
        value_enum,
        default_value = "skip"
    )]
    on_failure: FailureArg,

    /// How skipped segments appear in single-file output.
    #[arg(long, env = "PDF2SPEECH_GAP", value_enum, default_value = "silence")]
    gap: GapArg,

    /// Ctrl-C behaviour: soft lets in-flight segments finish, hard kills them.
    #[arg(
        long,
        env = "PDF2SPEECH_CANCEL_MODE",
        value_enum,
        default_value = "soft"
    )]
    cancel_mode: CancelArg,

    /// Reuse segments checkpointed by an interrupted run.
    #[arg(long, env = "PDF2SPEECH_RESUME")]
    resume: bool,

    /// Speech backend (currently: piper). Auto-detected from PATH if unset.
    #[arg(long, env = "PDF2SPEECH_BACKEND")]
    backend: Option<String>,

    /// Output a structured JSON report instead of the text summary.
    #[arg(long, env = "PDF2SPEECH_JSON")]
    json: bool,

    /// Disable the progress bar.
    #[arg(long, env = "PDF2SPEECH_NO_PROGRESS")]
    no_progress: bool,

    /// Print document shape (pages, segments, listening time), no synthesis.
    #[arg(long)]
    inspect_only: bool,

    /// List the voices the backend can find, then exit.
    #[arg(long)]
    list_voices: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDF2SPEECH_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "PDF2SPEECH_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "PDF2SPEECH_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum ModeArg {
    Single,
    Segments,
}

impl From<ModeArg> for OutputMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Single => OutputMode::SingleFile,
            ModeArg::Segments => OutputMode::PerSegment,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum FailureArg {
    Skip,
    Abort,
}

impl From<FailureArg> for FailurePolicy {
    fn from(v: FailureArg) -> Self {
        match v {
            FailureArg::Skip => FailurePolicy::Skip,
            FailureArg::Abort => FailurePolicy::Abort,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum GapArg {
    Silence,
    Strict,
}

impl From<GapArg> for GapPolicy {
    fn from(v: GapArg) -> Self {
        match v {
            GapArg::Silence => GapPolicy::Silence,
            GapArg::Strict => GapPolicy::Strict,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Debug)]
enum CancelArg {
    Soft,
    Hard,
}

impl From<CancelArg> for CancelMode {
    fn from(v: CancelArg) -> Self {
        match v {
            CancelArg::Soft => CancelMode::Soft,
            CancelArg::Hard => CancelMode::Hard,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.quiet || show_progress {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    // In verbose mode we always want all logs regardless of progress.
    let filter = if cli.verbose { "debug" } else { filter };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── List-voices mode ─────────────────────────────────────────────────
    if cli.list_voices {
        let config = build_config(&cli, None)?;
        let voices = list_voices(&config)
            .await
            .context("Failed to query the speech backend for voices")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&voices).context("Failed to serialise voice list")?
            );
        } else if voices.is_empty() {
            eprintln!(
                "No voices found. Point PDF2SPEECH_VOICES_DIR at a directory of .onnx \
                 models, or pass --voice with a full model path."
            );
        } else {
            for v in &voices {
                match v.description {
                    Some(ref d) => println!("{}  {}", bold(&v.id), dim(d)),
                    None => println!("{}", bold(&v.id)),
                }
            }
        }
        return Ok(());
    }

    // Guaranteed by required_unless_present on the input arg.
    let input = cli
        .input
        .clone()
        .context("an input PDF path or URL is required")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let config = build_config(&cli, None)?;
        let info = inspect(&input, &config)
            .await
            .context("Failed to inspect PDF")?;

        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).context("Failed to serialise document info")?
            );
        } else {
            println!("File:            {}", input);
            println!("Pages:           {}", info.page_count);
            if info.empty_pages > 0 {
                println!("Empty pages:     {}", info.empty_pages);
            }
            println!("Characters:      {}", info.total_chars);
            println!("Segments:        {}", info.segment_count);
            println!(
                "Est. listening:  {}  (at rate {})",
                format_duration(info.estimated_audio_secs),
                cli.rate
            );
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    // The progress bar starts as a spinner (no segment count yet);
    // `on_synthesis_start` resizes it to the correct total once the document
    // has been segmented. `show_progress` was already computed above.

    let progress_cb: Option<ProgressCallback> = if show_progress {
        let cb = CliProgressCallback::new_dynamic();
        Some(cb as Arc<dyn ConversionProgressCallback>)
    } else {
        None
    };

    let config = build_config(&cli, progress_cb)?;

    // ── Run conversion ───────────────────────────────────────────────────
    // The conversion runs as a job so Ctrl-C can cancel it cleanly: the
    // first Ctrl-C requests cancellation (soft mode drains in-flight
    // segments into the checkpoint), a second one exits immediately.
    let converter = Arc::new(Converter::new());
    let job = converter
        .start(&input, &config)
        .await
        .context("Invalid configuration")?;

    let signal_converter = Arc::clone(&converter);
    let cancel_quiet = cli.quiet;
    tokio::spawn(async move {
        let mut first = true;
        loop {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            if first {
                first = false;
                if !cancel_quiet {
                    eprintln!(
                        "\n{} Cancelling… (press Ctrl-C again to exit immediately)",
                        cyan("⚠")
                    );
                }
                signal_converter.cancel(job);
            } else {
                std::process::exit(130);
            }
        }
    });

    let result = converter.wait(job).await;

    match result {
        Some(JobResult::Completed(output)) => {
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&output).context("Failed to serialise output")?
                );
            } else if !cli.quiet {
                let stats = &output.stats;
                let dest = match output.outputs.as_slice() {
                    [single] => single.display().to_string(),
                    files => format!(
                        "{} files in {}",
                        files.len(),
                        files
                            .first()
                            .and_then(|f| f.parent())
                            .unwrap_or(Path::new("."))
                            .display()
                    ),
                };

                // Summary lines (the callback already printed the per-segment
                // log and final tick).
                eprintln!(
                    "{}  {}/{} segments  {} of audio  →  {}",
                    if stats.skipped_segments == 0 {
                        green("✔")
                    } else {
                        cyan("⚠")
                    },
                    stats.synthesized_segments,
                    stats.total_segments,
                    bold(&format_duration(stats.audio_duration_ms / 1000)),
                    bold(&dest),
                );
                if stats.reused_segments > 0 {
                    eprintln!(
                        "   {} reused from a previous run's checkpoint",
                        dim(&stats.reused_segments.to_string())
                    );
                }
                if stats.skipped_segments > 0 {
                    eprintln!(
                        "   skipped segments: {}",
                        red(&format!("{:?}", output.skipped_indices()))
                    );
                }
                eprintln!(
                    "   {}  synthesis {}ms  /  assembly {}ms  —  {}ms total",
                    dim(&format!("extract {}ms", stats.extract_duration_ms)),
                    stats.synth_duration_ms,
                    stats.assemble_duration_ms,
                    stats.total_duration_ms,
                );
            }
            Ok(())
        }
        Some(JobResult::Cancelled) => {
            if !cli.quiet {
                eprintln!(
                    "{} Conversion cancelled — finished segments were checkpointed; \
                     rerun with --resume to continue",
                    cyan("⚠")
                );
            }
            std::process::exit(130);
        }
        Some(JobResult::Failed(err)) => Err(anyhow::anyhow!("{err}").context("Conversion failed")),
        // The job was created by this process, so it cannot be unknown.
        None => Err(anyhow::anyhow!("job disappeared before completion")),
    }
}

/// Map CLI args to `ConversionConfig`.
fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<ConversionConfig> {
    let mut builder = ConversionConfig::builder()
        .rate(cli.rate)
        .volume(cli.volume)
        .max_segment_chars(cli.max_chars)
        .min_segment_chars(cli.min_chars)
        .concurrency(cli.concurrency)
        .max_retries(cli.max_retries)
        .synthesis_timeout_secs(cli.timeout)
        .failure_policy(cli.on_failure.clone().into())
        .output_mode(cli.mode.clone().into())
        .gap_policy(cli.gap.clone().into())
        .cancel_mode(cli.cancel_mode.clone().into())
        .resume(cli.resume)
        .download_timeout_secs(cli.download_timeout);

    if let Some(ref voice) = cli.voice {
        builder = builder.voice_name(voice);
    }
    if let Some(ref output) = cli.output {
        builder = builder.output(output);
    }
    if let Some(ref backend) = cli.backend {
        builder = builder.backend_name(backend);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}
