//! Wake → record → transcribe → respond → speak.
//!
//! One `run_once` is one interaction. Errors abort the interaction, never the
//! controller: the session is always back in `Idle` when a cycle returns.

use crate::audio::playback::AudioSink;
use crate::audio::wav::write_wav;
use crate::capture::session::CaptureSession;
use crate::collab::{ResponseAgent, Synthesizer, Transcriber, Transcript};
use crate::defaults;
use crate::error::{HeyvoxError, Result};
use crate::record::Recording;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// How one cycle ended.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The wake timeout elapsed, or listening was stopped before a trigger.
    NoWakeWord,
    /// Recording finished without any detected voice.
    EmptyUtterance,
    Responded {
        transcript: Transcript,
        response: String,
    },
    Failed(HeyvoxError),
}

/// Totals from `run_continuous`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub cycles: usize,
    pub responded: usize,
    pub failed: usize,
}

pub struct Assistant {
    session: Arc<CaptureSession>,
    transcriber: Box<dyn Transcriber>,
    agent: Box<dyn ResponseAgent>,
    synthesizer: Box<dyn Synthesizer>,
    speaker: Box<dyn AudioSink>,
    wake_timeout: Duration,
    max_duration: Duration,
    silence_timeout: Duration,
    keep_wav_dir: Option<PathBuf>,
}

impl Assistant {
    /// Recording limits start from the session's capture config.
    pub fn new(
        session: Arc<CaptureSession>,
        transcriber: impl Transcriber + 'static,
        agent: impl ResponseAgent + 'static,
        synthesizer: impl Synthesizer + 'static,
        speaker: impl AudioSink + 'static,
    ) -> Self {
        let max_duration = session.config().max_duration;
        let silence_timeout = session.config().silence_timeout;
        Self {
            session,
            transcriber: Box::new(transcriber),
            agent: Box::new(agent),
            synthesizer: Box::new(synthesizer),
            speaker: Box::new(speaker),
            wake_timeout: Duration::from_secs_f32(defaults::WAKE_TIMEOUT_SECS),
            max_duration,
            silence_timeout,
            keep_wav_dir: None,
        }
    }

    pub fn with_wake_timeout(mut self, timeout: Duration) -> Self {
        self.wake_timeout = timeout;
        self
    }

    pub fn with_limits(mut self, max_duration: Duration, silence_timeout: Duration) -> Self {
        self.max_duration = max_duration;
        self.silence_timeout = silence_timeout;
        self
    }

    /// Keep every utterance as a WAV file in `dir`.
    pub fn with_keep_wav_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.keep_wav_dir = dir;
        self
    }

    /// The controller, for stopping a cycle from another thread.
    pub fn session(&self) -> &Arc<CaptureSession> {
        &self.session
    }

    pub fn run_once(&self) -> CycleOutcome {
        match self.cycle() {
            Ok(outcome) => outcome,
            Err(e) => {
                self.session.stop_listening();
                tracing::warn!(error = %e, "assistant cycle failed");
                CycleOutcome::Failed(e)
            }
        }
    }

    /// Run cycles until `stop` is set.
    ///
    /// Ends early when a failure cannot clear up on retry (missing or busy
    /// device, bad configuration).
    pub fn run_continuous(&self, stop: &AtomicBool) -> LoopSummary {
        self.run_continuous_with(stop, |_| {})
    }

    /// `run_continuous`, handing every outcome to `observe` first.
    pub fn run_continuous_with(
        &self,
        stop: &AtomicBool,
        mut observe: impl FnMut(&CycleOutcome),
    ) -> LoopSummary {
        let mut summary = LoopSummary::default();
        while !stop.load(Ordering::Acquire) {
            summary.cycles += 1;
            let outcome = self.run_once();
            observe(&outcome);
            match outcome {
                CycleOutcome::Responded { .. } => summary.responded += 1,
                CycleOutcome::Failed(e) => {
                    summary.failed += 1;
                    if matches!(
                        e,
                        HeyvoxError::DeviceNotFound { .. }
                            | HeyvoxError::DeviceBusy { .. }
                            | HeyvoxError::InvalidConfig { .. }
                    ) {
                        tracing::error!(error = %e, "stopping assistant loop");
                        break;
                    }
                }
                CycleOutcome::NoWakeWord | CycleOutcome::EmptyUtterance => {}
            }
        }
        tracing::info!(
            cycles = summary.cycles,
            responded = summary.responded,
            failed = summary.failed,
            "assistant loop finished"
        );
        summary
    }

    fn cycle(&self) -> Result<CycleOutcome> {
        self.session.start_listening()?;
        tracing::info!("waiting for wake word");
        if !self.session.wait_for_wake_word(self.wake_timeout)? {
            self.session.stop_listening();
            tracing::info!("no wake word detected");
            return Ok(CycleOutcome::NoWakeWord);
        }

        let recording = self
            .session
            .record_utterance(self.max_duration, self.silence_timeout);
        self.session.stop_listening();

        let buffer = match recording? {
            Recording::Complete(buffer) => buffer,
            Recording::Empty { reason } => {
                tracing::info!(?reason, "no speech after wake word");
                return Ok(CycleOutcome::EmptyUtterance);
            }
        };

        let samples = buffer.samples();
        if let Some(dir) = &self.keep_wav_dir {
            match keep_utterance(dir, &samples, buffer.sample_rate()) {
                Ok(path) => tracing::info!(path = %path.display(), "utterance saved"),
                Err(e) => tracing::warn!(error = %e, "could not save utterance"),
            }
        }

        let transcript = self.transcriber.transcribe(&samples, buffer.sample_rate())?;
        tracing::info!(text = %transcript.text, transcriber = self.transcriber.name(), "transcribed");
        if transcript.is_blank() {
            tracing::warn!("transcriber returned no text");
        }

        let response = self.agent.respond(&transcript.text)?;
        tracing::info!(%response, "agent responded");

        let speech = self.synthesizer.synthesize(&response)?;
        tracing::debug!(duration_ms = speech.duration_ms(), "playing response");
        self.speaker.play(&speech.samples, speech.sample_rate)?;

        Ok(CycleOutcome::Responded {
            transcript,
            response,
        })
    }
}

fn keep_utterance(dir: &Path, samples: &[i16], sample_rate: u32) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S_%3f");
    let path = dir.join(format!("utterance_{stamp}.wav"));
    write_wav(&path, samples, sample_rate)?;
    Ok(path)
}
