//! RMS-threshold voice activity detector.

use super::VoiceActivityDetector;
use crate::error::Result;

/// RMS thresholds for aggressiveness 0 through 3.
///
/// Higher aggressiveness needs a louder frame before it counts as speech.
const THRESHOLDS: [f32; 4] = [0.005, 0.01, 0.02, 0.03];

/// Energy-based VAD: a frame is speech when its normalized RMS reaches the threshold.
#[derive(Debug, Clone, Copy)]
pub struct EnergyVad {
    threshold: f32,
}

impl EnergyVad {
    /// Create a detector for aggressiveness 0-3. Larger values clamp to 3.
    pub fn new(aggressiveness: u8) -> Self {
        let index = usize::from(aggressiveness.min(3));
        Self {
            threshold: THRESHOLDS[index],
        }
    }

    /// Use an explicit RMS threshold (0.0 to 1.0).
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

/// RMS of a little-endian PCM16 block, normalized to 0.0..=1.0.
pub fn block_rms(pcm: &[u8]) -> f32 {
    let count = pcm.len() / 2;
    if count == 0 {
        return 0.0;
    }
    let sum_squares: f64 = pcm
        .chunks_exact(2)
        .map(|pair| {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();
    (sum_squares / count as f64).sqrt() as f32
}

impl VoiceActivityDetector for EnergyVad {
    fn is_speech(&mut self, pcm: &[u8], _sample_rate: u32) -> Result<bool> {
        Ok(block_rms(pcm) >= self.threshold)
    }

    fn name(&self) -> &'static str {
        "energy_vad"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::{calculate_rms, pcm16_le_bytes};

    #[test]
    fn test_silence_is_not_speech() {
        let mut vad = EnergyVad::new(3);
        let block = pcm16_le_bytes(&[0; 480]);
        assert!(!vad.is_speech(&block, 16000).unwrap());
    }

    #[test]
    fn test_loud_frame_is_speech() {
        let mut vad = EnergyVad::new(3);
        let block = pcm16_le_bytes(&[3000; 480]);
        assert!(vad.is_speech(&block, 16000).unwrap());
    }

    #[test]
    fn test_aggressiveness_raises_threshold() {
        // RMS ~0.0153: speech at aggressiveness 1, not at 3
        let block = pcm16_le_bytes(&[500; 480]);
        assert!(EnergyVad::new(1).is_speech(&block, 16000).unwrap());
        assert!(!EnergyVad::new(3).is_speech(&block, 16000).unwrap());
    }

    #[test]
    fn test_aggressiveness_clamps() {
        assert_eq!(EnergyVad::new(9).threshold(), EnergyVad::new(3).threshold());
    }

    #[test]
    fn test_explicit_threshold() {
        let vad = EnergyVad::new(0).with_threshold(0.5);
        assert_eq!(vad.threshold(), 0.5);
    }

    #[test]
    fn test_block_rms_matches_sample_rms() {
        let samples: Vec<i16> = (0..480).map(|i| ((i % 50) * 100 - 2500) as i16).collect();
        let from_bytes = block_rms(&pcm16_le_bytes(&samples));
        let from_samples = calculate_rms(&samples);
        assert!((from_bytes - from_samples).abs() < 1e-6);
    }

    #[test]
    fn test_block_rms_empty() {
        assert_eq!(block_rms(&[]), 0.0);
    }
}
