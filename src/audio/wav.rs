//! WAV boundary: decode files into mono PCM16, encode utterances back out,
//! and replay a file as a Frame Source.

use crate::audio::device::DeviceClaim;
use crate::audio::source::{
    Feed, FrameCallback, FrameSource, SourceOpener, Tail, join_feeder, spawn_feeder,
};
use crate::capture::config::CaptureConfig;
use crate::error::{HeyvoxError, Result};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

fn wav_error(context: &str, e: impl std::fmt::Display) -> HeyvoxError {
    HeyvoxError::Wav {
        message: format!("{}: {}", context, e),
    }
}

/// Decode WAV data into mono PCM16 at `target_rate`.
///
/// Accepts 8/16/24/32-bit integer and 32-bit float input with any channel
/// count; channels are averaged and the result is resampled.
pub fn read_wav<R: Read>(reader: R, target_rate: u32) -> Result<Vec<i16>> {
    let mut wav_reader =
        hound::WavReader::new(reader).map_err(|e| wav_error("Failed to parse WAV file", e))?;

    let spec = wav_reader.spec();
    if spec.channels == 0 {
        return Err(HeyvoxError::Wav {
            message: "WAV file declares zero channels".to_string(),
        });
    }

    let raw_samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int if spec.bits_per_sample <= 16 => wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| wav_error("Failed to read WAV samples", e))?,
        hound::SampleFormat::Int => {
            let shift = u32::from(spec.bits_per_sample).saturating_sub(16);
            wav_reader
                .samples::<i32>()
                .map(|s| s.map(|v| (v >> shift) as i16))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| wav_error("Failed to read WAV samples", e))?
        }
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| wav_error("Failed to read WAV samples", e))?,
    };

    let mono_samples = downmix(raw_samples, spec.channels);
    Ok(resample(&mono_samples, spec.sample_rate, target_rate))
}

/// Decode a WAV file from disk.
pub fn read_wav_file(path: &Path, target_rate: u32) -> Result<Vec<i16>> {
    let file = std::fs::File::open(path).map_err(|e| HeyvoxError::Wav {
        message: format!("Failed to open {}: {}", path.display(), e),
    })?;
    read_wav(std::io::BufReader::new(file), target_rate)
}

/// Decode WAV data piped on stdin.
pub fn read_wav_stdin(target_rate: u32) -> Result<Vec<i16>> {
    // StdinLock is not Send; buffer the whole stream first
    let mut buffer = Vec::new();
    std::io::stdin()
        .lock()
        .read_to_end(&mut buffer)
        .map_err(|e| wav_error("Failed to read from stdin", e))?;
    read_wav(Cursor::new(buffer), target_rate)
}

fn wav_spec(sample_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

/// Encode mono PCM16 as an in-memory 16-bit WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, wav_spec(sample_rate))
            .map_err(|e| wav_error("Failed to create WAV writer", e))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| wav_error("Failed to write WAV sample", e))?;
        }
        writer
            .finalize()
            .map_err(|e| wav_error("Failed to finalize WAV", e))?;
    }
    Ok(cursor.into_inner())
}

/// Write mono PCM16 to `path` as a 16-bit WAV file.
pub fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<()> {
    let mut writer = hound::WavWriter::create(path, wav_spec(sample_rate)).map_err(|e| {
        HeyvoxError::Wav {
            message: format!("Failed to create {}: {}", path.display(), e),
        }
    })?;
    for &sample in samples {
        writer
            .write_sample(sample)
            .map_err(|e| wav_error("Failed to write WAV sample", e))?;
    }
    writer
        .finalize()
        .map_err(|e| wav_error("Failed to finalize WAV", e))?;
    tracing::debug!(path = %path.display(), samples = samples.len(), "wrote WAV");
    Ok(())
}

fn downmix(samples: Vec<i16>, channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples;
    }
    let channels = usize::from(channels);
    samples
        .chunks_exact(channels)
        .map(|chunk| {
            let sum: i32 = chunk.iter().map(|&s| i32::from(s)).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub(crate) fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    let mut out = Vec::new();
    resample_into(samples, from_rate, to_rate, &mut out);
    out
}

/// Resample into `out`, replacing its contents. Reuses its capacity.
pub(crate) fn resample_into(samples: &[i16], from_rate: u32, to_rate: u32, out: &mut Vec<i16>) {
    out.clear();
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        out.extend_from_slice(samples);
        return;
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    out.extend((0..output_len).map(|i| {
        let source_pos = i as f64 * ratio;
        let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
        let fraction = source_pos - source_idx as f64;

        if source_idx + 1 >= samples.len() {
            samples[source_idx]
        } else {
            let left = samples[source_idx] as f64;
            let right = samples[source_idx + 1] as f64;
            (left + (right - left) * fraction) as i16
        }
    }));
}

/// Opens a WAV file as a finite Frame Source.
///
/// The "device" is the file itself: its path is claimed for the session, so
/// two sessions cannot replay the same file at once.
#[derive(Debug, Clone)]
pub struct WavSourceOpener {
    path: PathBuf,
    realtime: bool,
}

impl WavSourceOpener {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            realtime: true,
        }
    }

    /// Deliver frames as fast as the consumer takes them instead of one per frame period.
    ///
    /// Long files can then outrun the queue and overflow it.
    pub fn unpaced(mut self) -> Self {
        self.realtime = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SourceOpener for WavSourceOpener {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
        if !self.path.exists() {
            return Err(HeyvoxError::DeviceNotFound {
                device: self.path.display().to_string(),
            });
        }
        if let Some(device) = &config.device {
            tracing::debug!(device = %device, "input device ignored for WAV replay");
        }
        let claim = DeviceClaim::acquire(&self.path.display().to_string())?;
        let samples = read_wav_file(&self.path, config.sample_rate)?;
        tracing::info!(
            path = %self.path.display(),
            samples = samples.len(),
            sample_rate = config.sample_rate,
            "opened WAV input"
        );
        let interval = if self.realtime {
            config.frame_duration()
        } else {
            Duration::ZERO
        };
        Ok(Box::new(WavFrameSource {
            claim,
            samples: Some(samples),
            frame_len: config.frame_len(),
            interval,
            running: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicU64::new(0)),
            handle: None,
        }))
    }
}

/// Replays decoded WAV samples as frames on a feeder thread.
pub struct WavFrameSource {
    claim: DeviceClaim,
    samples: Option<Vec<i16>>,
    frame_len: usize,
    interval: Duration,
    running: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl WavFrameSource {
    /// Frames handed to the callback so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl FrameSource for WavFrameSource {
    fn device_name(&self) -> &str {
        self.claim.name()
    }

    fn start(&mut self, on_frame: FrameCallback) -> Result<()> {
        let Some(samples) = self.samples.take() else {
            return Ok(());
        };
        self.running.store(true, Ordering::Release);
        let feed = Feed {
            samples,
            frame_len: self.frame_len,
            interval: self.interval,
            tail: Tail::End,
        };
        self.handle = Some(spawn_feeder(
            "heyvox-wav-capture",
            feed,
            Arc::clone(&self.running),
            Arc::clone(&self.delivered),
            on_frame,
        )?);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            join_feeder(handle);
        }
        Ok(())
    }

    fn is_finite(&self) -> bool {
        true
    }
}

impl Drop for WavFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop WAV source");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn make_wav_data(sample_rate: u32, channels: u16, samples: &[i16]) -> Vec<u8> {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
        cursor.into_inner()
    }

    #[test]
    fn read_16khz_mono_matches_exactly() {
        let input_samples = vec![100i16, 200, 300, 400, 500];
        let wav_data = make_wav_data(16000, 1, &input_samples);

        let samples = read_wav(Cursor::new(wav_data), 16000).unwrap();

        assert_eq!(samples, input_samples);
    }

    #[test]
    fn read_16khz_stereo_downmixes_to_mono() {
        // Stereo pairs: (100, 200), (300, 400), (500, 600)
        let stereo_samples = vec![100i16, 200, 300, 400, 500, 600];
        let wav_data = make_wav_data(16000, 2, &stereo_samples);

        let samples = read_wav(Cursor::new(wav_data), 16000).unwrap();

        assert_eq!(samples, vec![150i16, 350, 550]);
    }

    #[test]
    fn stereo_downmix_handles_negative_values() {
        let stereo_samples = vec![-100i16, 100, 300, -300];
        let wav_data = make_wav_data(16000, 2, &stereo_samples);

        let samples = read_wav(Cursor::new(wav_data), 16000).unwrap();

        assert_eq!(samples, vec![0i16, 0]);
    }

    #[test]
    fn read_44100hz_mono_resamples_to_target() {
        let input_samples = vec![1000i16; 44100]; // 1 second at 44.1kHz
        let wav_data = make_wav_data(44100, 1, &input_samples);

        let samples = read_wav(Cursor::new(wav_data), 16000).unwrap();

        assert!(samples.len() >= 15900 && samples.len() <= 16100);
        assert!(samples.iter().all(|&s| (900..=1100).contains(&s)));
    }

    #[test]
    fn read_float_wav_scales_to_pcm16() {
        let mut cursor = Cursor::new(Vec::new());
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16000,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for s in [0.0f32, 0.5, -1.0, 2.0] {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();

        let samples = read_wav(Cursor::new(cursor.into_inner()), 16000).unwrap();

        assert_eq!(samples, vec![0, 16383, -32767, 32767]);
    }

    #[test]
    fn encode_then_read_preserves_samples() {
        let input = vec![0i16, -1, 1, i16::MIN, i16::MAX];
        let bytes = encode_wav(&input, 16000).unwrap();
        assert_eq!(&bytes[0..4], b"RIFF");
        assert_eq!(read_wav(Cursor::new(bytes), 16000).unwrap(), input);
    }

    #[test]
    fn write_wav_creates_16bit_mono_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("utterance.wav");
        write_wav(&path, &[1, 2, 3], 16000).unwrap();

        let reader = hound::WavReader::open(&path).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), 3);
    }

    #[test]
    fn write_wav_to_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("out.wav");
        assert!(matches!(
            write_wav(&path, &[0], 16000),
            Err(HeyvoxError::Wav { .. })
        ));
    }

    #[test]
    fn invalid_wav_data_returns_error() {
        let invalid_data = vec![0u8, 1, 2, 3, 4, 5];

        match read_wav(Cursor::new(invalid_data), 16000) {
            Err(HeyvoxError::Wav { message }) => {
                assert!(message.contains("Failed to parse WAV file"));
            }
            other => panic!("Expected Wav error, got {:?}", other),
        }
    }

    #[test]
    fn empty_wav_data_returns_error() {
        assert!(read_wav(Cursor::new(Vec::new()), 16000).is_err());
    }

    #[test]
    fn resample_identity_same_rate() {
        let samples = vec![100i16, 200, 300, 400, 500];
        assert_eq!(resample(&samples, 16000, 16000), samples);
    }

    #[test]
    fn resample_upsample_interpolates() {
        let samples = vec![0i16, 1000, 2000];
        let resampled = resample(&samples, 8000, 16000);

        assert_eq!(resampled.len(), 6);
        assert_eq!(resampled[0], 0);
        assert!(resampled[1] > 0 && resampled[1] < 1000);
        assert_eq!(resampled[2], 1000);
    }

    #[test]
    fn resample_downsample_halves_length() {
        let samples = vec![0i16; 3200];
        assert_eq!(resample(&samples, 16000, 8000).len(), 1600);
    }

    #[test]
    fn resample_handles_edge_cases() {
        assert!(resample(&[], 16000, 8000).is_empty());

        let single = resample(&[100i16], 16000, 8000);
        assert_eq!(single, vec![100]);
    }

    #[test]
    fn resample_into_replaces_contents_in_place() {
        let mut out = Vec::with_capacity(64);
        let before = out.as_ptr();
        resample_into(&[0i16; 96], 48000, 16000, &mut out);
        assert_eq!(out.len(), 32);
        resample_into(&[5i16; 48], 48000, 16000, &mut out);
        assert_eq!(out, vec![5; 16]);
        assert_eq!(out.as_ptr(), before);
    }

    #[test]
    fn test_malformed_wav_missing_riff_header() {
        let bad_data = b"XXXX\x00\x00\x00\x00WAVEfmt ";
        match read_wav(Cursor::new(bad_data.to_vec()), 16000) {
            Err(HeyvoxError::Wav { message }) => {
                assert!(
                    message.contains("Failed to parse WAV"),
                    "Error should mention WAV parsing: {}",
                    message
                );
            }
            other => panic!("Expected Wav error, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_wav_truncated_header() {
        let truncated = b"RIFF\x00\x00";
        assert!(read_wav(Cursor::new(truncated.to_vec()), 16000).is_err());
    }

    #[test]
    fn test_malformed_wav_wrong_format() {
        let wrong_format = b"RIFF\x24\x00\x00\x00XXXX\x00\x00\x00\x00";
        assert!(read_wav(Cursor::new(wrong_format.to_vec()), 16000).is_err());
    }

    #[test]
    fn test_malformed_wav_missing_fmt_chunk() {
        let no_fmt = b"RIFF\x24\x00\x00\x00WAVEdata\x10\x00\x00\x00\x00\x00\x00\x00";
        assert!(read_wav(Cursor::new(no_fmt.to_vec()), 16000).is_err());
    }

    #[test]
    fn test_malformed_wav_all_zeros() {
        assert!(read_wav(Cursor::new(vec![0u8; 1000]), 16000).is_err());
    }

    #[test]
    fn test_malformed_wav_random_garbage() {
        let garbage: Vec<u8> = (0..500).map(|i| ((i * 17 + 42) % 256) as u8).collect();
        assert!(read_wav(Cursor::new(garbage), 16000).is_err());
    }

    #[test]
    fn test_malformed_wav_partial_samples() {
        let mut wav_data = make_wav_data(16000, 1, &[100i16; 10]);
        wav_data.truncate(wav_data.len() - 1);
        // Either rejected or read short; must not panic
        let _ = read_wav(Cursor::new(wav_data), 16000);
    }

    #[test]
    fn test_wav_source_missing_file_is_device_not_found() {
        let opener = WavSourceOpener::new("/nonexistent/heyvox-input.wav");
        match opener.open(&CaptureConfig::default()) {
            Err(HeyvoxError::DeviceNotFound { device }) => {
                assert!(device.contains("heyvox-input.wav"))
            }
            Err(other) => panic!("Expected DeviceNotFound, got {:?}", other),
            Ok(_) => panic!("Expected DeviceNotFound"),
        }
    }

    #[test]
    fn test_wav_source_replays_file_as_frames() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.wav");
        // 2.5 frames: the partial tail is held back by the assembler
        write_wav(&path, &vec![7i16; 1200], 16000).unwrap();

        let opener = WavSourceOpener::new(&path).unpaced();
        let mut source = opener.open(&CaptureConfig::default()).unwrap();
        assert!(source.is_finite());
        assert_eq!(source.device_name(), path.display().to_string());

        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&frames);
        source
            .start(Box::new(move |frame| sink.lock().unwrap().push(frame)))
            .unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while frames.lock().unwrap().len() < 2 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(1));
        }
        source.stop().unwrap();
        source.stop().unwrap();

        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].sequence(), 0);
        assert_eq!(frames[1].sequence(), 1);
        assert!(frames.iter().all(|f| f.samples().iter().all(|&s| s == 7)));
    }

    #[test]
    fn test_wav_source_claims_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("claimed.wav");
        write_wav(&path, &[0i16; 480], 16000).unwrap();

        let opener = WavSourceOpener::new(&path);
        let first = opener.open(&CaptureConfig::default()).unwrap();
        assert!(matches!(
            opener.open(&CaptureConfig::default()),
            Err(HeyvoxError::DeviceBusy { .. })
        ));
        drop(first);
        assert!(opener.open(&CaptureConfig::default()).is_ok());
    }
}
