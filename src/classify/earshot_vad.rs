//! Earshot-powered voice activity detector.

use super::VoiceActivityDetector;
use crate::error::{HeyvoxError, Result};
use earshot::{VoiceActivityDetector as Earshot, VoiceActivityProfile};

/// Frame sizes the WebRTC VAD accepts at 16kHz (10, 20 and 30 ms).
const SUPPORTED_FRAME_LENS: [usize; 3] = [160, 320, 480];

/// Thin wrapper that adapts `earshot` to the crate's detector trait.
pub struct EarshotVad {
    detector: Earshot,
    scratch: Vec<i16>,
}

impl EarshotVad {
    /// Build a detector. Only 16kHz audio in 10, 20 or 30 ms frames is supported.
    pub fn new(aggressiveness: u8, sample_rate: u32, frame_len: usize) -> Result<Self> {
        if sample_rate != 16000 {
            return Err(HeyvoxError::InvalidConfig {
                key: "sample_rate".to_string(),
                message: format!("earshot VAD needs 16000 Hz, got {}", sample_rate),
            });
        }
        if !SUPPORTED_FRAME_LENS.contains(&frame_len) {
            return Err(HeyvoxError::InvalidConfig {
                key: "frame_ms".to_string(),
                message: format!("earshot VAD needs 10, 20 or 30 ms frames, got {} samples", frame_len),
            });
        }
        let profile = match aggressiveness {
            0 => VoiceActivityProfile::QUALITY,
            1 => VoiceActivityProfile::LBR,
            2 => VoiceActivityProfile::AGGRESSIVE,
            _ => VoiceActivityProfile::VERY_AGGRESSIVE,
        };
        Ok(Self {
            detector: Earshot::new(profile),
            scratch: Vec::with_capacity(frame_len),
        })
    }
}

impl VoiceActivityDetector for EarshotVad {
    fn is_speech(&mut self, pcm: &[u8], _sample_rate: u32) -> Result<bool> {
        self.scratch.clear();
        self.scratch.extend(
            pcm.chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]])),
        );
        self.detector
            .predict_16khz(&self.scratch)
            .map_err(|_| HeyvoxError::VoiceActivity {
                message: format!("earshot rejected a {}-sample frame", self.scratch.len()),
            })
    }

    fn reset(&mut self) {
        self.detector.reset();
    }

    fn name(&self) -> &'static str {
        "earshot_vad"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::pcm16_le_bytes;

    #[test]
    fn test_rejects_unsupported_rate() {
        assert!(EarshotVad::new(3, 44100, 480).is_err());
    }

    #[test]
    fn test_rejects_unsupported_frame() {
        assert!(EarshotVad::new(3, 16000, 1024).is_err());
    }

    #[test]
    fn test_silence_is_not_speech() {
        let mut vad = EarshotVad::new(3, 16000, 480).unwrap();
        let block = pcm16_le_bytes(&[0; 480]);
        assert!(!vad.is_speech(&block, 16000).unwrap());
    }
}
