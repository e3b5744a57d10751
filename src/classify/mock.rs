//! Classifier doubles for tests.
//!
//! Clones share their recorded state, so a test can keep one handle and move
//! the other into a `FrameClassifier`.

use super::{VoiceActivityDetector, WakeWordScorer};
use crate::error::{HeyvoxError, Result};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Default)]
struct VadLog {
    first_samples: Vec<i16>,
    block_lens: Vec<usize>,
}

/// VAD that treats a frame as speech when its first sample's magnitude reaches
/// `min_amplitude`, and records every block it sees.
#[derive(Debug, Clone)]
pub struct RecordingVad {
    min_amplitude: i16,
    log: Arc<Mutex<VadLog>>,
}

impl RecordingVad {
    pub fn new(min_amplitude: i16) -> Self {
        Self {
            min_amplitude,
            log: Arc::new(Mutex::new(VadLog::default())),
        }
    }

    /// First sample of every block classified so far, in call order.
    pub fn seen(&self) -> Vec<i16> {
        lock(&self.log).first_samples.clone()
    }

    /// Byte length of every block classified so far.
    pub fn block_lens(&self) -> Vec<usize> {
        lock(&self.log).block_lens.clone()
    }

    pub fn calls(&self) -> usize {
        lock(&self.log).block_lens.len()
    }
}

impl VoiceActivityDetector for RecordingVad {
    fn is_speech(&mut self, pcm: &[u8], _sample_rate: u32) -> Result<bool> {
        let first = match pcm {
            [lo, hi, ..] => i16::from_le_bytes([*lo, *hi]),
            _ => 0,
        };
        let mut log = lock(&self.log);
        log.first_samples.push(first);
        log.block_lens.push(pcm.len());
        Ok(first.unsigned_abs() >= self.min_amplitude.unsigned_abs())
    }

    fn name(&self) -> &'static str {
        "recording_vad"
    }
}

#[derive(Debug, Default)]
struct ScorerState {
    scores: VecDeque<f32>,
    calls: usize,
    observed: usize,
    resets: usize,
    last_len: Option<usize>,
}

/// Scorer that returns scripted scores in call order, then a default.
#[derive(Debug, Clone)]
pub struct ScriptedScorer {
    default: f32,
    fail: bool,
    delay: Duration,
    state: Arc<Mutex<ScorerState>>,
}

impl ScriptedScorer {
    pub fn new(scores: Vec<f32>) -> Self {
        Self {
            default: 0.0,
            fail: false,
            delay: Duration::ZERO,
            state: Arc::new(Mutex::new(ScorerState {
                scores: scores.into(),
                ..Default::default()
            })),
        }
    }

    /// Score returned once the script is exhausted.
    pub fn with_default(mut self, default: f32) -> Self {
        self.default = default;
        self
    }

    /// Configure the scorer to fail on every call.
    pub fn with_failure(mut self) -> Self {
        self.fail = true;
        self
    }

    /// Sleep this long in every `score` call, like a slow remote model.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of `score` calls so far.
    pub fn calls(&self) -> usize {
        lock(&self.state).calls
    }

    /// Number of `observe` calls so far.
    pub fn observed(&self) -> usize {
        lock(&self.state).observed
    }

    /// Number of `reset` calls so far.
    pub fn resets(&self) -> usize {
        lock(&self.state).resets
    }

    /// Sample count of the most recent frame scored or observed.
    pub fn last_len(&self) -> Option<usize> {
        lock(&self.state).last_len
    }
}

impl WakeWordScorer for ScriptedScorer {
    fn score(&mut self, samples: &[i16]) -> Result<f32> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let mut state = lock(&self.state);
        state.calls += 1;
        state.last_len = Some(samples.len());
        if self.fail {
            return Err(HeyvoxError::WakeWordScorer {
                message: "mock scorer failure".to_string(),
            });
        }
        Ok(state.scores.pop_front().unwrap_or(self.default))
    }

    fn observe(&mut self, samples: &[i16]) -> Result<()> {
        let mut state = lock(&self.state);
        state.observed += 1;
        state.last_len = Some(samples.len());
        Ok(())
    }

    fn reset(&mut self) {
        lock(&self.state).resets += 1;
    }

    fn name(&self) -> &str {
        "scripted_scorer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::pcm16_le_bytes;

    #[test]
    fn test_recording_vad_uses_first_sample() {
        let mut vad = RecordingVad::new(1000);
        assert!(vad.is_speech(&pcm16_le_bytes(&[-1500, 0]), 16000).unwrap());
        assert!(!vad.is_speech(&pcm16_le_bytes(&[999, 5000]), 16000).unwrap());
        assert_eq!(vad.seen(), vec![-1500, 999]);
        assert_eq!(vad.calls(), 2);
    }

    #[test]
    fn test_scripted_scorer_follows_script_then_default() {
        let mut scorer = ScriptedScorer::new(vec![0.1, 0.9]).with_default(0.2);
        let handle = scorer.clone();
        assert_eq!(scorer.score(&[0; 4]).unwrap(), 0.1);
        assert_eq!(scorer.score(&[0; 4]).unwrap(), 0.9);
        assert_eq!(scorer.score(&[0; 4]).unwrap(), 0.2);
        assert_eq!(handle.calls(), 3);
        assert_eq!(handle.last_len(), Some(4));
    }

    #[test]
    fn test_scripted_scorer_failure() {
        let mut scorer = ScriptedScorer::new(vec![]).with_failure();
        match scorer.score(&[0; 4]) {
            Err(HeyvoxError::WakeWordScorer { message }) => {
                assert_eq!(message, "mock scorer failure")
            }
            other => panic!("Expected WakeWordScorer error, got {:?}", other),
        }
    }
}
