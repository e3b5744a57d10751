use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use heyvox::assistant::{Assistant, CycleOutcome};
use heyvox::audio::capture::{CpalSourceOpener, list_devices};
use heyvox::audio::playback::CpalSink;
use heyvox::audio::wav::{WavSourceOpener, write_wav};
use heyvox::capture::CaptureSession;
use heyvox::classify::{FrameClassifier, build_vad};
use heyvox::cli::{Cli, Commands, ConfigAction};
use heyvox::collab::KeywordAgent;
use heyvox::config::{Config, resolve_profile};
use heyvox::record::Recording;
use heyvox::services::{HttpSynthesizer, HttpTranscriber, HttpWakeWordScorer};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    heyvox::telemetry::init(cli.verbose);

    match cli.command {
        Commands::Devices => list_audio_devices(),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "heyvox", &mut std::io::stdout());
            Ok(())
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref(), cli.profile.as_deref())
        }
        Commands::Listen { once } => {
            let config = load_config(cli.config.as_deref(), cli.profile.as_deref(), cli.device)?;
            let input = cli.input;
            run_until_interrupted(move |stop| run_listen(config, input, once, &stop)).await
        }
        Commands::Record {
            output,
            max_duration,
            silence,
        } => {
            let config = load_config(cli.config.as_deref(), cli.profile.as_deref(), cli.device)?;
            let input = cli.input;
            run_until_interrupted(move |stop| {
                run_record(config, input, &output, max_duration, silence, &stop)
            })
            .await
        }
    }
}

/// Load configuration: explicit path, else the default path, else profile
/// defaults. Env overrides and `--device` apply last.
fn load_config(
    path: Option<&Path>,
    profile: Option<&str>,
    device: Option<String>,
) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path, profile)?,
        None => match Config::default_path() {
            Some(default_path) => Config::load_or_default(&default_path, profile)?,
            None => Config::for_profile(resolve_profile(profile, None)?),
        },
    };

    let mut config = config.with_env_overrides()?;
    if let Some(device) = device {
        config.audio.input_device = Some(device);
    }
    Ok(config)
}

/// Run `work` on a plain thread while this task waits for Ctrl+C.
///
/// The speech service clients block, so nothing that owns one is created or
/// dropped on the async runtime. Ctrl+C only raises `stop`.
async fn run_until_interrupted<F>(work: F) -> Result<()>
where
    F: FnOnce(Arc<AtomicBool>) -> Result<()> + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let worker_stop = Arc::clone(&stop);
    let (tx, mut rx) = tokio::sync::oneshot::channel();

    std::thread::Builder::new()
        .name("heyvox-main".to_string())
        .spawn(move || {
            tx.send(work(worker_stop)).ok();
        })
        .context("Failed to spawn worker thread")?;

    tokio::select! {
        result = &mut rx => return result.context("worker thread exited without a result")?,
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            eprintln!("\n{}", "Stopping...".yellow());
            stop.store(true, Ordering::Release);
        }
    }

    rx.await.context("worker thread exited without a result")?
}

/// Forward `stop` to the controller until `done` is set.
///
/// Keeps stopping while the flag is up, so a cycle that starts after the
/// first stop is torn down as well.
fn spawn_stop_watcher(
    session: Arc<CaptureSession>,
    stop: Arc<AtomicBool>,
    done: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    let interval = session.config().poll_interval.max(Duration::from_millis(10));
    std::thread::Builder::new()
        .name("heyvox-stop".to_string())
        .spawn(move || {
            while !done.load(Ordering::Acquire) {
                if stop.load(Ordering::Acquire) {
                    session.stop_listening();
                }
                std::thread::sleep(interval);
            }
        })
        .context("Failed to spawn stop watcher")
}

fn build_session(config: &Config, input: Option<PathBuf>) -> Result<Arc<CaptureSession>> {
    let capture = config.capture_config()?;
    let vad = build_vad(config.audio.vad_backend, &capture)?;
    let scorer = HttpWakeWordScorer::from_config(&config.services, capture.sample_rate)?;
    let classifier = FrameClassifier::new(vad, Box::new(scorer));
    let sink = CpalSink::new(config.audio.output_device.as_deref());

    let session = match input {
        Some(path) => {
            tracing::info!(path = %path.display(), "replaying WAV input");
            CaptureSession::new(capture, WavSourceOpener::new(path), classifier, sink)?
        }
        None => {
            heyvox::audio::capture::suppress_audio_warnings();
            CaptureSession::new(capture, CpalSourceOpener::new(), classifier, sink)?
        }
    };
    Ok(Arc::new(session.with_beep(config.wake.beep)))
}

fn run_listen(config: Config, input: Option<PathBuf>, once: bool, stop: &Arc<AtomicBool>) -> Result<()> {
    // A WAV file ends; replaying it forever is never useful.
    let once = once || input.is_some();
    let session = build_session(&config, input)?;

    let assistant = Assistant::new(
        Arc::clone(&session),
        HttpTranscriber::from_config(&config.services)?,
        KeywordAgent::new(),
        HttpSynthesizer::from_config(&config.services)?,
        CpalSink::new(config.audio.output_device.as_deref()),
    )
    .with_wake_timeout(config.wake_timeout()?)
    .with_keep_wav_dir(config.recording.keep_wav_dir.clone());

    let done = Arc::new(AtomicBool::new(false));
    let watcher = spawn_stop_watcher(session, Arc::clone(stop), Arc::clone(&done))?;

    eprintln!(
        "{} ({} profile, Ctrl+C to stop)",
        "Listening for the wake word".green(),
        config.profile
    );

    let failure = if once {
        let outcome = assistant.run_once();
        report(&outcome);
        match outcome {
            CycleOutcome::Failed(e) => Some(e),
            _ => None,
        }
    } else {
        let summary = assistant.run_continuous_with(stop, report);
        eprintln!(
            "{} interactions, {} answered, {} failed",
            summary.cycles, summary.responded, summary.failed
        );
        None
    };

    done.store(true, Ordering::Release);
    if watcher.join().is_err() {
        tracing::error!("stop watcher panicked");
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn report(outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::NoWakeWord => eprintln!("{}", "No wake word detected.".dimmed()),
        CycleOutcome::EmptyUtterance => eprintln!("{}", "No speech after the wake word.".dimmed()),
        CycleOutcome::Responded {
            transcript,
            response,
        } => {
            println!("{} {}", "You said:".dimmed(), transcript.text);
            println!("{} {}", "Assistant:".green(), response);
        }
        CycleOutcome::Failed(e) => eprintln!("{} {}", "Error:".red(), e),
    }
}

fn run_record(
    config: Config,
    input: Option<PathBuf>,
    output: &Path,
    max_duration: Option<Duration>,
    silence: Option<Duration>,
    stop: &Arc<AtomicBool>,
) -> Result<()> {
    let session = build_session(&config, input)?;
    let max_duration = max_duration.unwrap_or(session.config().max_duration);
    let silence = silence.unwrap_or(session.config().silence_timeout);

    let done = Arc::new(AtomicBool::new(false));
    let watcher = spawn_stop_watcher(Arc::clone(&session), Arc::clone(stop), Arc::clone(&done))?;

    eprintln!("{}", "Recording... speak now".green());
    let recording = session.record_utterance(max_duration, silence);

    done.store(true, Ordering::Release);
    if watcher.join().is_err() {
        tracing::error!("stop watcher panicked");
    }

    match recording? {
        Recording::Complete(buffer) => {
            write_wav(output, &buffer.samples(), buffer.sample_rate())?;
            eprintln!(
                "Recorded {:.1}s ({:?}) to {}",
                buffer.duration().as_secs_f32(),
                buffer.reason(),
                output.display()
            );
            Ok(())
        }
        Recording::Empty { reason } => {
            anyhow::bail!("No speech detected ({:?}); nothing written", reason)
        }
    }
}

/// List available audio input devices.
fn list_audio_devices() -> Result<()> {
    let devices = list_devices()?;

    if devices.is_empty() {
        eprintln!("No audio input devices found");
        std::process::exit(1);
    }

    println!("Available audio input devices:");
    for (idx, device) in devices.iter().enumerate() {
        println!("  [{}] {}", idx, device);
    }

    Ok(())
}

/// Handle configuration commands.
fn handle_config_command(
    action: ConfigAction,
    custom_path: Option<&Path>,
    profile: Option<&str>,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(custom_path, profile, None)?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .or_else(Config::default_path)
                .context("Could not determine config directory")?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
