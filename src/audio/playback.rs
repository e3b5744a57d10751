//! Audio output: the wake acknowledgment beep and synthesized speech.

use crate::defaults;
use crate::error::Result;
use std::sync::{Arc, Mutex};

/// Blocking PCM16 mono output.
pub trait AudioSink: Send + Sync {
    /// Play `samples` and return once playback has finished.
    fn play(&self, samples: &[i16], sample_rate: u32) -> Result<()>;
}

impl<T: AudioSink> AudioSink for Arc<T> {
    fn play(&self, samples: &[i16], sample_rate: u32) -> Result<()> {
        (**self).play(samples, sample_rate)
    }
}

/// Sine tone at `frequency` Hz.
pub fn tone(frequency: f32, duration_ms: u32, amplitude: f32, sample_rate: u32) -> Vec<i16> {
    let count = (u64::from(sample_rate) * u64::from(duration_ms) / 1000) as usize;
    let amplitude = amplitude.clamp(0.0, 1.0) * f32::from(i16::MAX);
    (0..count)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()) as i16
        })
        .collect()
}

/// The wake acknowledgment: 800 Hz for 100 ms at 0.3 amplitude.
pub fn beep(sample_rate: u32) -> Vec<i16> {
    tone(
        defaults::BEEP_FREQUENCY_HZ,
        defaults::BEEP_DURATION_MS,
        defaults::BEEP_AMPLITUDE,
        sample_rate,
    )
}

/// Discards audio.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&self, _samples: &[i16], _sample_rate: u32) -> Result<()> {
        Ok(())
    }
}

/// Sink that records what it was asked to play, for testing.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    plays: Arc<Mutex<Vec<(usize, u32)>>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(sample_count, sample_rate)` for every call, in order.
    pub fn plays(&self) -> Vec<(usize, u32)> {
        self.plays
            .lock()
            .map(|p| p.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn count(&self) -> usize {
        self.plays().len()
    }
}

impl AudioSink for RecordingSink {
    fn play(&self, samples: &[i16], sample_rate: u32) -> Result<()> {
        let mut plays = self
            .plays
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        plays.push((samples.len(), sample_rate));
        Ok(())
    }
}

#[cfg(feature = "cpal-audio")]
pub use cpal_sink::CpalSink;

#[cfg(feature = "cpal-audio")]
mod cpal_sink {
    use super::AudioSink;
    use crate::audio::wav::resample;
    use crate::error::{HeyvoxError, Result};
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn playback_error(message: impl Into<String>) -> HeyvoxError {
        HeyvoxError::Playback {
            message: message.into(),
        }
    }

    /// Plays through an output device, the default one unless named.
    #[derive(Debug, Clone, Default)]
    pub struct CpalSink {
        device_name: Option<String>,
    }

    impl CpalSink {
        pub fn new(device_name: Option<&str>) -> Self {
            Self {
                device_name: device_name.map(str::to_string),
            }
        }

        fn device(&self) -> Result<cpal::Device> {
            let host = cpal::default_host();
            match self.device_name.as_deref() {
                Some(name) => host
                    .output_devices()
                    .map_err(|e| playback_error(format!("Failed to enumerate output devices: {}", e)))?
                    .find(|dev| dev.name().map(|n| n == name).unwrap_or(false))
                    .ok_or_else(|| HeyvoxError::DeviceNotFound {
                        device: name.to_string(),
                    }),
                None => host
                    .default_output_device()
                    .ok_or_else(|| playback_error("no output device available")),
            }
        }
    }

    impl AudioSink for CpalSink {
        fn play(&self, samples: &[i16], sample_rate: u32) -> Result<()> {
            if samples.is_empty() {
                return Ok(());
            }

            let device = self.device()?;
            let supported = device
                .default_output_config()
                .map_err(|e| playback_error(format!("Failed to query output config: {}", e)))?;
            let device_rate = supported.sample_rate().0;
            let channels = usize::from(supported.channels());
            let sample_format = supported.sample_format();
            let config: cpal::StreamConfig = supported.into();

            let mono: Arc<[f32]> = resample(samples, sample_rate, device_rate)
                .iter()
                .map(|&s| f32::from(s) / f32::from(i16::MAX))
                .collect();
            let total = mono.len();
            let position = Arc::new(AtomicUsize::new(0));
            let finished = Arc::new(AtomicBool::new(false));

            let err_callback = |err| {
                tracing::error!(error = %err, "audio playback error");
            };

            let stream = match sample_format {
                cpal::SampleFormat::F32 => {
                    let (mono, position, finished) =
                        (Arc::clone(&mono), Arc::clone(&position), Arc::clone(&finished));
                    device.build_output_stream(
                        &config,
                        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                            for frame in data.chunks_mut(channels) {
                                let pos = position.fetch_add(1, Ordering::Relaxed);
                                let value = mono.get(pos).copied().unwrap_or_else(|| {
                                    finished.store(true, Ordering::Release);
                                    0.0
                                });
                                frame.fill(value);
                            }
                        },
                        err_callback,
                        None,
                    )
                }
                cpal::SampleFormat::I16 => {
                    let (mono, position, finished) =
                        (Arc::clone(&mono), Arc::clone(&position), Arc::clone(&finished));
                    device.build_output_stream(
                        &config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            for frame in data.chunks_mut(channels) {
                                let pos = position.fetch_add(1, Ordering::Relaxed);
                                let value = mono.get(pos).copied().unwrap_or_else(|| {
                                    finished.store(true, Ordering::Release);
                                    0.0
                                });
                                frame.fill((value * f32::from(i16::MAX)) as i16);
                            }
                        },
                        err_callback,
                        None,
                    )
                }
                fmt => {
                    return Err(playback_error(format!(
                        "Unsupported output sample format: {:?}",
                        fmt
                    )));
                }
            }
            .map_err(|e| playback_error(format!("Failed to build output stream: {}", e)))?;

            stream
                .play()
                .map_err(|e| playback_error(format!("Failed to start playback: {}", e)))?;

            // Poll for completion with a deadline past the expected length
            let expected = Duration::from_millis(total as u64 * 1000 / u64::from(device_rate.max(1)));
            let deadline = Instant::now() + expected + Duration::from_millis(500);
            while !finished.load(Ordering::Acquire) && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(20));
            }
            // Let the device flush its last buffer
            std::thread::sleep(Duration::from_millis(50));
            drop(stream);

            tracing::debug!(samples = total, rate = device_rate, "playback complete");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beep_length_and_peak() {
        let samples = beep(16000);
        assert_eq!(samples.len(), 1600);
        let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
        let expected = (0.3 * f32::from(i16::MAX)) as u16;
        assert!(peak <= expected && peak > expected - 200, "peak {}", peak);
    }

    #[test]
    fn test_tone_starts_at_zero_crossing() {
        let samples = tone(440.0, 10, 1.0, 8000);
        assert_eq!(samples.len(), 80);
        assert_eq!(samples[0], 0);
    }

    #[test]
    fn test_tone_frequency_zero_crossings() {
        // 800 Hz over 100 ms is 80 cycles -> about 160 sign changes
        let samples = beep(16000);
        let crossings = samples
            .windows(2)
            .filter(|w| (w[0] < 0) != (w[1] < 0))
            .count();
        assert!((155..=165).contains(&crossings), "crossings {}", crossings);
    }

    #[test]
    fn test_recording_sink_counts_plays() {
        let sink = RecordingSink::new();
        let handle = sink.clone();
        sink.play(&[0; 10], 16000).unwrap();
        sink.play(&[0; 20], 22050).unwrap();
        assert_eq!(handle.count(), 2);
        assert_eq!(handle.plays(), vec![(10, 16000), (20, 22050)]);
    }

    #[test]
    fn test_null_sink_accepts_anything() {
        assert!(NullSink.play(&[1, 2, 3], 16000).is_ok());
    }

    #[cfg(feature = "cpal-audio")]
    #[test]
    #[ignore] // Requires audio hardware
    fn test_cpal_sink_plays_beep() {
        let sink = CpalSink::new(None);
        assert!(sink.play(&beep(16000), 16000).is_ok());
    }
}
