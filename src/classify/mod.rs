//! Frame Classifier Adapter.
//!
//! Presents frames to the voice-activity detector and the wake-word scorer in
//! the format each one expects, and checks that frames arrive in strict
//! sequence order. The detector and scorer themselves are capability traits;
//! any model backend can sit behind them.

pub mod energy;
#[cfg(feature = "vad-earshot")]
pub mod earshot_vad;
pub mod mock;

use crate::audio::frame::AudioFrame;
use crate::capture::config::CaptureConfig;
use crate::error::{HeyvoxError, Result};
use serde::{Deserialize, Serialize};

pub use energy::EnergyVad;

/// Voice-activity detector over one fixed-size frame.
pub trait VoiceActivityDetector: Send {
    /// Classify a little-endian PCM16 block of exactly one frame.
    fn is_speech(&mut self, pcm: &[u8], sample_rate: u32) -> Result<bool>;

    /// Clear any internal state. Called at the start of each session.
    fn reset(&mut self) {}

    fn name(&self) -> &'static str {
        "unknown_vad"
    }
}

/// Wake-word scorer.
///
/// Stateful across a session: the model keeps a rolling context, so it must
/// see voiced frames in arrival order with no gaps.
pub trait WakeWordScorer: Send {
    /// Confidence in `[0, 1]` that the wake phrase has just been spoken.
    fn score(&mut self, samples: &[i16]) -> Result<f32>;

    /// Extend the rolling context with a voiced frame that is not scored.
    fn observe(&mut self, _samples: &[i16]) -> Result<()> {
        Ok(())
    }

    /// Drop the rolling context.
    fn reset(&mut self) {}

    fn name(&self) -> &str {
        "unknown_scorer"
    }
}

/// Which VAD backend to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VadBackend {
    /// RMS threshold scaled by aggressiveness.
    Energy,
    /// WebRTC VAD port. Requires the `vad-earshot` feature and 16kHz audio.
    #[default]
    Earshot,
}

impl VadBackend {
    pub fn label(self) -> &'static str {
        match self {
            VadBackend::Energy => "energy",
            VadBackend::Earshot => "earshot",
        }
    }
}

/// Build the configured VAD backend.
///
/// Falls back to the energy detector when earshot is requested but not compiled in.
pub fn build_vad(
    backend: VadBackend,
    config: &CaptureConfig,
) -> Result<Box<dyn VoiceActivityDetector>> {
    match backend {
        VadBackend::Energy => Ok(Box::new(EnergyVad::new(config.vad_aggressiveness))),
        #[cfg(feature = "vad-earshot")]
        VadBackend::Earshot => Ok(Box::new(earshot_vad::EarshotVad::new(
            config.vad_aggressiveness,
            config.sample_rate,
            config.frame_len(),
        )?)),
        #[cfg(not(feature = "vad-earshot"))]
        VadBackend::Earshot => {
            tracing::warn!("earshot VAD not compiled in, using energy VAD");
            Ok(Box::new(EnergyVad::new(config.vad_aggressiveness)))
        }
    }
}

/// Adapter between the frame queue and the two classifiers.
pub struct FrameClassifier {
    vad: Box<dyn VoiceActivityDetector>,
    scorer: Box<dyn WakeWordScorer>,
    sample_rate: u32,
    frame_len: usize,
    expected_sequence: Option<u64>,
    scratch: Vec<u8>,
    padded: Vec<i16>,
}

impl FrameClassifier {
    pub fn new(vad: Box<dyn VoiceActivityDetector>, scorer: Box<dyn WakeWordScorer>) -> Self {
        let config = CaptureConfig::default();
        Self {
            vad,
            scorer,
            sample_rate: config.sample_rate,
            frame_len: config.frame_len(),
            expected_sequence: None,
            scratch: Vec::with_capacity(config.frame_len() * 2),
            padded: Vec::with_capacity(config.frame_len()),
        }
    }

    /// Prepare for a new session: adopt its frame format and clear all history.
    pub fn begin_session(&mut self, config: &CaptureConfig) {
        self.sample_rate = config.sample_rate;
        self.frame_len = config.frame_len();
        self.expected_sequence = None;
        self.scratch = Vec::with_capacity(self.frame_len * 2);
        self.padded = Vec::with_capacity(self.frame_len);
        self.vad.reset();
        self.scorer.reset();
        tracing::debug!(
            vad = self.vad.name(),
            scorer = self.scorer.name(),
            frame_len = self.frame_len,
            "classifier armed"
        );
    }

    /// Classify one frame as voice or not.
    ///
    /// Every frame of a session must pass through here in sequence order;
    /// a gap or reordering fails with `FrameOutOfOrder`.
    pub fn classify_voice(&mut self, frame: &AudioFrame) -> Result<bool> {
        self.check_order(frame)?;

        let samples = self.normalized(frame);
        self.scratch.clear();
        for sample in samples {
            self.scratch.extend_from_slice(&sample.to_le_bytes());
        }
        self.scratch.resize(self.frame_len * 2, 0);
        self.vad.is_speech(&self.scratch, self.sample_rate)
    }

    /// Score one voiced frame for the wake phrase, clamped to `[0, 1]`.
    pub fn score_wake_word(&mut self, frame: &AudioFrame) -> Result<f32> {
        let samples = fit_frame(frame, self.frame_len, &mut self.padded);
        let score = self.scorer.score(samples)?;
        if score.is_nan() {
            return Err(HeyvoxError::WakeWordScorer {
                message: format!("{} returned NaN", self.scorer.name()),
            });
        }
        Ok(score.clamp(0.0, 1.0))
    }

    /// Hand a voiced frame to the scorer's context without scoring it.
    pub fn observe_wake_word(&mut self, frame: &AudioFrame) -> Result<()> {
        let samples = fit_frame(frame, self.frame_len, &mut self.padded);
        self.scorer.observe(samples)
    }

    /// Sequence number of the next frame this adapter will accept.
    pub fn expected_sequence(&self) -> Option<u64> {
        self.expected_sequence
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    fn check_order(&mut self, frame: &AudioFrame) -> Result<()> {
        if let Some(expected) = self.expected_sequence
            && frame.sequence() != expected
        {
            return Err(HeyvoxError::FrameOutOfOrder {
                expected,
                actual: frame.sequence(),
            });
        }
        self.expected_sequence = Some(frame.sequence() + 1);
        Ok(())
    }

    /// The frame truncated to the configured length. Callers zero-pad short frames.
    fn normalized<'a>(&self, frame: &'a AudioFrame) -> &'a [i16] {
        let samples = frame.samples();
        &samples[..samples.len().min(self.frame_len)]
    }
}

/// `frame` cut or zero-padded to exactly `frame_len` samples.
fn fit_frame<'a>(frame: &'a AudioFrame, frame_len: usize, padded: &'a mut Vec<i16>) -> &'a [i16] {
    if frame.len() == frame_len {
        return frame.samples();
    }
    let samples = frame.samples();
    padded.clear();
    padded.extend_from_slice(&samples[..samples.len().min(frame_len)]);
    padded.resize(frame_len, 0);
    padded
}
