//! Resolved, validated capture parameters.
//!
//! A `CaptureConfig` is built once (usually by `Config::capture_config`) and
//! is immutable for the lifetime of a capture session.

use crate::defaults;
use crate::error::{HeyvoxError, Result};
use std::time::Duration;

/// Capture parameters shared by the Frame Source, the wake-word loop and the
/// utterance recorder.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    /// Input device name, matched exactly. `None` selects the default device.
    pub device: Option<String>,
    pub sample_rate: u32,
    /// Always 1; anything else is rejected by `validate`.
    pub channels: u16,
    pub frame_ms: u32,
    /// 0 (least) to 3 (most aggressive).
    pub vad_aggressiveness: u8,
    /// A frame triggers when its wake-word score is strictly greater than this.
    pub wake_threshold: f32,
    /// Score every `wake_hop`-th voiced frame; the others only extend the
    /// scorer's context. 1 scores every voiced frame.
    pub wake_hop: usize,
    pub max_duration: Duration,
    pub silence_timeout: Duration,
    /// Trailing silence kept after the last voiced frame.
    pub linger: Duration,
    pub queue_depth: usize,
    pub poll_interval: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: defaults::SAMPLE_RATE,
            channels: defaults::CHANNELS,
            frame_ms: defaults::FRAME_MS,
            vad_aggressiveness: defaults::VAD_AGGRESSIVENESS,
            wake_threshold: defaults::WAKE_THRESHOLD,
            wake_hop: 1,
            max_duration: Duration::from_secs_f32(defaults::MAX_UTTERANCE_SECS),
            silence_timeout: Duration::from_secs_f32(defaults::SILENCE_TIMEOUT_SECS),
            linger: Duration::from_millis(u64::from(defaults::LINGER_MS)),
            queue_depth: defaults::QUEUE_DEPTH,
            poll_interval: Duration::from_millis(defaults::POLL_INTERVAL_MS),
        }
    }
}

/// Frame-count limits the recorder applies to one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpointing {
    /// Consecutive non-voice frames that end the utterance.
    pub silence_frames: usize,
    /// Total frames observed before the recording is cut off.
    pub max_frames: usize,
    /// Trailing silent frames retained at the end of the buffer.
    pub linger_frames: usize,
}

fn invalid(key: &str, message: impl Into<String>) -> HeyvoxError {
    HeyvoxError::InvalidConfig {
        key: key.to_string(),
        message: message.into(),
    }
}

impl CaptureConfig {
    /// Check every field. Called by the session controller before it opens a device.
    pub fn validate(&self) -> Result<()> {
        if self.channels != 1 {
            return Err(invalid(
                "channels",
                format!("capture is mono only, got {}", self.channels),
            ));
        }
        if self.sample_rate == 0 {
            return Err(invalid("sample_rate", "must be positive"));
        }
        if self.frame_ms == 0 {
            return Err(invalid("frame_ms", "must be positive"));
        }
        if (u64::from(self.sample_rate) * u64::from(self.frame_ms)) % 1000 != 0 {
            return Err(invalid(
                "frame_ms",
                format!(
                    "{} Hz x {} ms does not yield an integral frame length",
                    self.sample_rate, self.frame_ms
                ),
            ));
        }
        if self.vad_aggressiveness > 3 {
            return Err(invalid(
                "vad_aggressiveness",
                format!("must be 0-3, got {}", self.vad_aggressiveness),
            ));
        }
        if !(0.0..=1.0).contains(&self.wake_threshold) {
            return Err(invalid(
                "wake_threshold",
                format!("must lie in [0, 1], got {}", self.wake_threshold),
            ));
        }
        if self.wake_hop == 0 {
            return Err(invalid("wake_hop", "must be at least 1"));
        }
        check_duration("max_duration", self.max_duration)?;
        check_duration("silence_timeout", self.silence_timeout)?;
        if self.queue_depth == 0 {
            return Err(invalid("queue_depth", "must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be positive"));
        }
        Ok(())
    }

    /// Samples per frame: `sample_rate * frame_ms / 1000`.
    pub fn frame_len(&self) -> usize {
        (u64::from(self.sample_rate) * u64::from(self.frame_ms) / 1000) as usize
    }

    pub fn frame_duration(&self) -> Duration {
        Duration::from_millis(u64::from(self.frame_ms))
    }

    /// Endpointing limits for the configured durations.
    pub fn endpointing(&self) -> Endpointing {
        self.endpointing_for(self.max_duration, self.silence_timeout)
    }

    /// Endpointing limits for explicit per-call durations.
    ///
    /// Silence rounds up so the trailing gap is never shorter than the timeout.
    /// Max duration rounds down so the recording never exceeds its bound.
    pub fn endpointing_for(&self, max_duration: Duration, silence_timeout: Duration) -> Endpointing {
        let frame_ms = u128::from(self.frame_ms.max(1));
        let silence_frames = saturating_frames(silence_timeout.as_millis().div_ceil(frame_ms));
        let max_frames = saturating_frames(max_duration.as_millis() / frame_ms);
        let linger_frames = ((self.linger.as_millis() / frame_ms) as usize).min(silence_frames);
        Endpointing {
            silence_frames,
            max_frames,
            linger_frames,
        }
    }
}

fn saturating_frames(frames: u128) -> usize {
    usize::try_from(frames).unwrap_or(usize::MAX).max(1)
}

fn check_duration(key: &str, value: Duration) -> Result<()> {
    if value.is_zero() {
        return Err(invalid(key, "must be positive"));
    }
    if value > Duration::from_secs(defaults::MAX_CONFIGURED_DURATION_SECS) {
        return Err(invalid(
            key,
            format!(
                "must be at most {}s, got {:.1}s",
                defaults::MAX_CONFIGURED_DURATION_SECS,
                value.as_secs_f64()
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_len(), 480);
        assert_eq!(config.frame_duration(), Duration::from_millis(30));
    }

    #[test]
    fn test_rejects_stereo() {
        let config = CaptureConfig {
            channels: 2,
            ..Default::default()
        };
        match config.validate() {
            Err(HeyvoxError::InvalidConfig { key, .. }) => assert_eq!(key, "channels"),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_non_integral_frame_length() {
        // 44100 * 25 / 1000 = 1102.5
        let config = CaptureConfig {
            sample_rate: 44100,
            frame_ms: 25,
            ..Default::default()
        };
        match config.validate() {
            Err(HeyvoxError::InvalidConfig { key, .. }) => assert_eq!(key, "frame_ms"),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
    }

    #[test]
    fn test_accepts_integral_frame_length_at_other_rates() {
        let config = CaptureConfig {
            sample_rate: 48000,
            frame_ms: 20,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_len(), 960);
    }

    #[test]
    fn test_rejects_threshold_outside_unit_interval() {
        for threshold in [-0.1, 1.5, f32::NAN] {
            let config = CaptureConfig {
                wake_threshold: threshold,
                ..Default::default()
            };
            assert!(
                config.validate().is_err(),
                "threshold {} should be rejected",
                threshold
            );
        }
    }

    #[test]
    fn test_accepts_threshold_bounds() {
        for threshold in [0.0, 1.0] {
            let config = CaptureConfig {
                wake_threshold: threshold,
                ..Default::default()
            };
            assert!(config.validate().is_ok());
        }
    }

    #[test]
    fn test_rejects_aggressiveness_above_three() {
        let config = CaptureConfig {
            vad_aggressiveness: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_durations_and_depth() {
        let zero_max = CaptureConfig {
            max_duration: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_max.validate().is_err());

        let zero_silence = CaptureConfig {
            silence_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(zero_silence.validate().is_err());

        let zero_depth = CaptureConfig {
            queue_depth: 0,
            ..Default::default()
        };
        assert!(zero_depth.validate().is_err());

        let zero_hop = CaptureConfig {
            wake_hop: 0,
            ..Default::default()
        };
        assert!(zero_hop.validate().is_err());
    }

    #[test]
    fn test_rejects_durations_above_ceiling() {
        let huge_max = CaptureConfig {
            max_duration: Duration::from_secs(1_000_000_000),
            ..Default::default()
        };
        match huge_max.validate() {
            Err(HeyvoxError::InvalidConfig { key, .. }) => assert_eq!(key, "max_duration"),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }

        let huge_silence = CaptureConfig {
            silence_timeout: Duration::from_secs(defaults::MAX_CONFIGURED_DURATION_SECS + 1),
            ..Default::default()
        };
        assert!(huge_silence.validate().is_err());

        let at_ceiling = CaptureConfig {
            max_duration: Duration::from_secs(defaults::MAX_CONFIGURED_DURATION_SECS),
            ..Default::default()
        };
        assert!(at_ceiling.validate().is_ok());
    }

    #[test]
    fn test_endpointing_saturates_for_unbounded_durations() {
        let limits =
            CaptureConfig::default().endpointing_for(Duration::MAX, Duration::MAX);
        assert_eq!(limits.max_frames, usize::MAX);
        assert_eq!(limits.silence_frames, usize::MAX);
        assert_eq!(limits.linger_frames, 10);
    }

    #[test]
    fn test_endpointing_defaults() {
        // 800ms / 30ms = 26.67 -> 27 frames; 10s / 30ms = 333.3 -> 333 frames
        let limits = CaptureConfig::default().endpointing();
        assert_eq!(limits.silence_frames, 27);
        assert_eq!(limits.max_frames, 333);
        assert_eq!(limits.linger_frames, 10);
    }

    #[test]
    fn test_endpointing_exact_multiples() {
        let config = CaptureConfig::default();
        let limits = config.endpointing_for(Duration::from_millis(900), Duration::from_millis(600));
        assert_eq!(limits.silence_frames, 20);
        assert_eq!(limits.max_frames, 30);
    }

    #[test]
    fn test_linger_never_exceeds_silence_window() {
        let config = CaptureConfig {
            linger: Duration::from_secs(5),
            ..Default::default()
        };
        let limits = config.endpointing_for(Duration::from_secs(10), Duration::from_millis(300));
        assert_eq!(limits.silence_frames, 10);
        assert_eq!(limits.linger_frames, 10);
    }

    #[test]
    fn test_tiny_durations_round_to_one_frame() {
        let limits = CaptureConfig::default()
            .endpointing_for(Duration::from_millis(1), Duration::from_millis(1));
        assert_eq!(limits.silence_frames, 1);
        assert_eq!(limits.max_frames, 1);
    }
}
