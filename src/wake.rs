//! Wake-Word Detection Loop.
//!
//! State machine `Idle -> Armed -> Triggered`. While armed, every frame is
//! classified for voice; only voiced frames are scored, and with a hop of N
//! only every Nth voiced frame (the rest go to the scorer as context). The
//! first score strictly above the threshold triggers, and nothing is scored
//! after that until the loop is re-armed by a new session.

use crate::audio::frame::AudioFrame;
use crate::classify::FrameClassifier;
use crate::error::Result;

/// Current state of the wake-word loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeState {
    /// No session is listening.
    Idle,
    /// Frames are being classified and scored.
    Armed,
    /// The wake phrase was detected. Terminal until re-armed.
    Triggered,
}

/// Emitted once, on the frame that triggered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub sequence: u64,
    pub score: f32,
    /// Frames examined in this session, including the triggering one.
    pub frames_seen: u64,
}

#[derive(Debug)]
pub struct WakeWordLoop {
    state: WakeState,
    threshold: f32,
    hop: u64,
    frames_seen: u64,
    voiced_frames: u64,
    best_score: f32,
}

impl WakeWordLoop {
    pub fn new(threshold: f32) -> Self {
        Self {
            state: WakeState::Idle,
            threshold,
            hop: 1,
            frames_seen: 0,
            voiced_frames: 0,
            best_score: 0.0,
        }
    }

    /// Score every `hop`-th voiced frame only. Zero is treated as 1.
    pub fn with_hop(mut self, hop: usize) -> Self {
        self.hop = (hop as u64).max(1);
        self
    }

    pub fn state(&self) -> WakeState {
        self.state
    }

    /// Start a new detection pass. Counters restart from zero.
    pub fn arm(&mut self) {
        self.state = WakeState::Armed;
        self.frames_seen = 0;
        self.voiced_frames = 0;
        self.best_score = 0.0;
    }

    /// Force the loop back to idle (cancellation or manual activation).
    pub fn disarm(&mut self) {
        self.state = WakeState::Idle;
    }

    /// Process one frame. Returns the detection on the triggering frame.
    ///
    /// Frames offered while not armed are ignored and never reach the scorer.
    pub fn on_frame(
        &mut self,
        frame: &AudioFrame,
        classifier: &mut FrameClassifier,
    ) -> Result<Option<Detection>> {
        if self.state != WakeState::Armed {
            return Ok(None);
        }
        self.frames_seen += 1;

        if !classifier.classify_voice(frame)? {
            return Ok(None);
        }
        self.voiced_frames += 1;
        if self.voiced_frames % self.hop != 0 {
            classifier.observe_wake_word(frame)?;
            return Ok(None);
        }

        let score = classifier.score_wake_word(frame)?;
        self.best_score = self.best_score.max(score);
        tracing::trace!(sequence = frame.sequence(), score, "wake-word score");

        if score > self.threshold {
            self.state = WakeState::Triggered;
            tracing::info!(
                sequence = frame.sequence(),
                score,
                threshold = self.threshold,
                frames = self.frames_seen,
                "wake word detected"
            );
            return Ok(Some(Detection {
                sequence: frame.sequence(),
                score,
                frames_seen: self.frames_seen,
            }));
        }
        Ok(None)
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn voiced_frames(&self) -> u64 {
        self.voiced_frames
    }

    /// Highest score seen since the loop was armed.
    pub fn best_score(&self) -> f32 {
        self.best_score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::config::CaptureConfig;
    use crate::classify::mock::{RecordingVad, ScriptedScorer};
    use std::time::Instant;

    fn frame(sequence: u64, value: i16) -> AudioFrame {
        AudioFrame::new(sequence, Instant::now(), vec![value; 480])
    }

    fn setup(scores: Vec<f32>) -> (FrameClassifier, ScriptedScorer) {
        let scorer = ScriptedScorer::new(scores);
        let mut classifier = FrameClassifier::new(
            Box::new(RecordingVad::new(1000)),
            Box::new(scorer.clone()),
        );
        classifier.begin_session(&CaptureConfig::default());
        (classifier, scorer)
    }

    #[test]
    fn test_new_loop_is_idle_and_ignores_frames() {
        let (mut classifier, scorer) = setup(vec![1.0]);
        let mut wake = WakeWordLoop::new(0.5);
        assert_eq!(wake.state(), WakeState::Idle);
        assert_eq!(wake.on_frame(&frame(0, 5000), &mut classifier).unwrap(), None);
        assert_eq!(scorer.calls(), 0);
    }

    #[test]
    fn test_triggers_on_sixth_frame() {
        let (mut classifier, scorer) = setup(vec![0.1, 0.2, 0.3, 0.4, 0.45, 0.9, 0.9, 0.9]);
        let mut wake = WakeWordLoop::new(0.5);
        wake.arm();

        let mut detection = None;
        for seq in 0..8 {
            if let Some(d) = wake.on_frame(&frame(seq, 5000), &mut classifier).unwrap() {
                assert!(detection.is_none(), "must trigger only once");
                detection = Some(d);
            }
        }

        let detection = detection.unwrap();
        assert_eq!(detection.frames_seen, 6);
        assert_eq!(detection.sequence, 5);
        assert_eq!(detection.score, 0.9);
        assert_eq!(wake.state(), WakeState::Triggered);
        // No scoring after the trigger
        assert_eq!(scorer.calls(), 6);
    }

    #[test]
    fn test_score_equal_to_threshold_does_not_trigger() {
        let (mut classifier, _) = setup(vec![0.5]);
        let mut wake = WakeWordLoop::new(0.5);
        wake.arm();
        assert_eq!(wake.on_frame(&frame(0, 5000), &mut classifier).unwrap(), None);
        assert_eq!(wake.state(), WakeState::Armed);
    }

    #[test]
    fn test_silent_frames_are_not_scored() {
        let (mut classifier, scorer) = setup(vec![0.9]);
        let mut wake = WakeWordLoop::new(0.5);
        wake.arm();

        for seq in 0..4 {
            assert_eq!(wake.on_frame(&frame(seq, 0), &mut classifier).unwrap(), None);
        }
        assert_eq!(scorer.calls(), 0);
        assert_eq!(wake.frames_seen(), 4);
        assert_eq!(wake.voiced_frames(), 0);

        let detection = wake.on_frame(&frame(4, 5000), &mut classifier).unwrap();
        assert_eq!(detection.map(|d| d.sequence), Some(4));
    }

    #[test]
    fn test_hop_scores_every_nth_voiced_frame() {
        let (mut classifier, scorer) = setup(vec![0.1, 0.9]);
        let mut wake = WakeWordLoop::new(0.5).with_hop(3);
        wake.arm();

        let mut detection = None;
        for seq in 0..10 {
            // One silent frame in the middle does not count toward the hop
            let value = if seq == 2 { 0 } else { 5000 };
            if let Some(d) = wake.on_frame(&frame(seq, value), &mut classifier).unwrap() {
                detection = Some(d);
                break;
            }
        }

        // Voiced frames 3 and 6 are scored: sequences 3 and 6
        assert_eq!(detection.map(|d| d.sequence), Some(6));
        assert_eq!(scorer.calls(), 2);
        assert_eq!(scorer.observed(), 4);
    }

    #[test]
    fn test_zero_hop_scores_every_voiced_frame() {
        let (mut classifier, scorer) = setup(vec![0.9]);
        let mut wake = WakeWordLoop::new(0.5).with_hop(0);
        wake.arm();
        let detection = wake.on_frame(&frame(0, 5000), &mut classifier).unwrap();
        assert_eq!(detection.map(|d| d.sequence), Some(0));
        assert_eq!(scorer.observed(), 0);
        assert_eq!(scorer.calls(), 1);
    }

    #[test]
    fn test_disarm_returns_to_idle() {
        let (mut classifier, scorer) = setup(vec![]);
        let mut wake = WakeWordLoop::new(0.5);
        wake.arm();
        wake.on_frame(&frame(0, 5000), &mut classifier).unwrap();
        wake.disarm();
        assert_eq!(wake.state(), WakeState::Idle);
        wake.on_frame(&frame(1, 5000), &mut classifier).unwrap();
        assert_eq!(scorer.calls(), 1);
    }

    #[test]
    fn test_rearm_resets_counters() {
        let (mut classifier, _) = setup(vec![0.3, 0.9]);
        let mut wake = WakeWordLoop::new(0.5);
        wake.arm();
        wake.on_frame(&frame(0, 5000), &mut classifier).unwrap();
        wake.on_frame(&frame(1, 5000), &mut classifier).unwrap();
        assert_eq!(wake.best_score(), 0.9);

        wake.arm();
        assert_eq!(wake.state(), WakeState::Armed);
        assert_eq!(wake.frames_seen(), 0);
        assert_eq!(wake.best_score(), 0.0);
    }

    #[test]
    fn test_scorer_error_propagates() {
        let scorer = ScriptedScorer::new(vec![]).with_failure();
        let mut classifier =
            FrameClassifier::new(Box::new(RecordingVad::new(1)), Box::new(scorer));
        classifier.begin_session(&CaptureConfig::default());
        let mut wake = WakeWordLoop::new(0.5);
        wake.arm();
        assert!(wake.on_frame(&frame(0, 5000), &mut classifier).is_err());
    }
}
