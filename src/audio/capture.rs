//! Microphone capture using CPAL (Cross-Platform Audio Library).

use crate::audio::device::DeviceClaim;
use crate::audio::frame::{FrameAssembler, FramePool};
use crate::audio::source::{FrameCallback, FrameSource, SourceOpener};
use crate::audio::wav::resample_into;
use crate::capture::config::CaptureConfig;
use crate::defaults;
use crate::error::{HeyvoxError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// This suppresses noisy ALSA/JACK/PipeWire messages that CPAL triggers
/// when querying audio backends.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2 (stderr).
/// Safe as long as no other thread is concurrently manipulating fd 2.
fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Quiet JACK/ALSA/PipeWire backend discovery.
///
/// # Safety
/// Modifies environment variables; call at startup before any threads are spawned.
pub fn suppress_audio_warnings() {
    // SAFETY: Called at startup before any threads are spawned
    unsafe {
        std::env::set_var("JACK_NO_START_SERVER", "1");
        std::env::set_var("JACK_NO_AUDIO_RESERVATION", "1");
        std::env::set_var("PIPEWIRE_DEBUG", "0");
        std::env::set_var("ALSA_DEBUG", "0");
        std::env::set_var("PW_LOG", "0");
    }
}

/// Preferred device names for PipeWire/PulseAudio environments.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for voice input.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "HDMI",
    "S/PDIF",
];

const RECOMMENDED_SUFFIX: &str = " [recommended]";

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// List input devices usable for voice, marking preferred ones with "\[recommended\]".
///
/// # Errors
/// Returns `HeyvoxError::AudioCapture` if device enumeration fails.
pub fn list_devices() -> Result<Vec<String>> {
    let (host, devices) = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host.input_devices();
        (host, devices)
    });
    let _ = host; // keep host alive while iterating devices
    let devices = devices.map_err(|e| HeyvoxError::AudioCapture {
        message: format!("Failed to enumerate input devices: {}", e),
    })?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                device_names.push(format!("{}{}", name, RECOMMENDED_SUFFIX));
            } else {
                device_names.push(name);
            }
        }
    }

    Ok(device_names)
}

/// Best default input device, preferring PipeWire, then PulseAudio, then the system default.
fn get_best_default_device() -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();

        if let Ok(devices) = host.input_devices() {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        host.default_input_device()
            .ok_or_else(|| HeyvoxError::DeviceNotFound {
                device: "default".to_string(),
            })
    })
}

/// Find an input device by exact name.
///
/// A trailing " \[recommended\]" marker copied from `list_devices` is ignored.
fn find_device(name: &str) -> Result<cpal::Device> {
    let wanted = name.strip_suffix(RECOMMENDED_SUFFIX).unwrap_or(name);
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| HeyvoxError::AudioCapture {
                message: format!("Failed to enumerate devices: {}", e),
            })?;

        for dev in devices {
            if let Ok(dev_name) = dev.name()
                && dev_name == wanted
            {
                return Ok(dev);
            }
        }

        Err(HeyvoxError::DeviceNotFound {
            device: wanted.to_string(),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched by the `CpalFrameSource` that owns it,
/// which hands it across threads only as a whole.
struct SendableStream(cpal::Stream);

unsafe impl Send for SendableStream {}

/// Initial capacity of each conversion scratch buffer, in samples.
const SCRATCH_SAMPLES: usize = 8192;

/// State shared between a running stream callback and its source.
///
/// `on_frame` is taken on stop; the callback holds the lock while delivering,
/// so once `stop` returns nothing more reaches the session. Format conversion
/// writes into scratch buffers owned here, which only grow when a driver
/// hands over a larger buffer than any before.
struct Delivery {
    assembler: FrameAssembler,
    on_frame: Option<FrameCallback>,
    converted: Vec<i16>,
    mono: Vec<i16>,
    resampled: Vec<i16>,
}

/// Native stream layout converted in software.
#[derive(Debug, Clone, Copy)]
struct NativeFormat {
    channels: usize,
    source_rate: u32,
    target_rate: u32,
}

impl Delivery {
    fn new(assembler: FrameAssembler, on_frame: FrameCallback) -> Self {
        Self {
            assembler,
            on_frame: Some(on_frame),
            converted: Vec::with_capacity(SCRATCH_SAMPLES),
            mono: Vec::with_capacity(SCRATCH_SAMPLES),
            resampled: Vec::with_capacity(SCRATCH_SAMPLES),
        }
    }

    fn push(&mut self, samples: &[i16]) {
        let Some(on_frame) = self.on_frame.as_mut() else {
            return;
        };
        self.assembler.push(samples, |frame| on_frame(frame));
    }

    fn push_f32(&mut self, data: &[f32]) {
        let mut converted = std::mem::take(&mut self.converted);
        f32_into_i16(data, &mut converted);
        self.push(&converted);
        self.converted = converted;
    }

    fn push_native(&mut self, data: &[i16], format: NativeFormat) {
        let mut mono = std::mem::take(&mut self.mono);
        downmix_into(data, format.channels, &mut mono);
        if format.source_rate == format.target_rate {
            self.push(&mono);
        } else {
            let mut resampled = std::mem::take(&mut self.resampled);
            resample_into(&mono, format.source_rate, format.target_rate, &mut resampled);
            self.push(&resampled);
            self.resampled = resampled;
        }
        self.mono = mono;
    }

    fn push_native_f32(&mut self, data: &[f32], format: NativeFormat) {
        let mut converted = std::mem::take(&mut self.converted);
        f32_into_i16(data, &mut converted);
        self.push_native(&converted, format);
        self.converted = converted;
    }
}

/// Opens CPAL input devices.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpalSourceOpener;

impl CpalSourceOpener {
    pub fn new() -> Self {
        Self
    }
}

impl SourceOpener for CpalSourceOpener {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
        let device = match config.device.as_deref() {
            Some(name) => find_device(name)?,
            None => get_best_default_device()?,
        };
        let name = device.name().map_err(|e| HeyvoxError::AudioCapture {
            message: format!("Failed to read device name: {}", e),
        })?;
        let claim = DeviceClaim::acquire(&name)?;
        tracing::info!(device = %name, "opened input device");

        Ok(Box::new(CpalFrameSource {
            device,
            claim,
            sample_rate: config.sample_rate,
            frame_len: config.frame_len(),
            pool: FramePool::new(
                config.frame_len(),
                config.queue_depth.saturating_add(defaults::FRAME_POOL_SLACK),
            ),
            stream: None,
            delivery: None,
            callback_count: Arc::new(AtomicU64::new(0)),
        }))
    }
}

/// Live microphone stream delivering fixed-length frames.
///
/// Tries the preferred format first (i16 mono at the session rate), then
/// f32, then the device's native config with software conversion.
pub struct CpalFrameSource {
    device: cpal::Device,
    claim: DeviceClaim,
    sample_rate: u32,
    frame_len: usize,
    pool: FramePool,
    stream: Option<SendableStream>,
    delivery: Option<Arc<Mutex<Delivery>>>,
    callback_count: Arc<AtomicU64>,
}

fn f32_into_i16(data: &[f32], out: &mut Vec<i16>) {
    out.clear();
    out.extend(
        data.iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16),
    );
}

/// Average interleaved channels into `out`, replacing its contents.
fn downmix_into(samples: &[i16], channels: usize, out: &mut Vec<i16>) {
    out.clear();
    if channels <= 1 {
        out.extend_from_slice(samples);
        return;
    }
    out.extend(samples.chunks_exact(channels).map(|frame| {
        let sum: i32 = frame.iter().map(|&s| s as i32).sum();
        (sum / channels as i32) as i16
    }));
}

fn deliver(delivery: &Mutex<Delivery>, push: impl FnOnce(&mut Delivery)) {
    if let Ok(mut delivery) = delivery.lock() {
        push(&mut delivery);
    }
}

impl CpalFrameSource {
    fn stream_error(err: cpal::StreamError) {
        tracing::error!(error = %err, "audio stream error");
    }

    /// Build the stream with the preferred formats, falling back to native.
    fn build_stream(&self, delivery: &Arc<Mutex<Delivery>>) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let sink = Arc::clone(delivery);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                deliver(&sink, |d| d.push(data));
            },
            Self::stream_error,
            None,
        ) {
            return Ok(stream);
        }

        let sink = Arc::clone(delivery);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                deliver(&sink, |d| d.push_f32(data));
            },
            Self::stream_error,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native(delivery)
    }

    /// Build a stream using the device's native config, with software
    /// channel mixing and resampling to the session rate.
    fn build_stream_native(&self, delivery: &Arc<Mutex<Delivery>>) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| HeyvoxError::AudioCapture {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let format = NativeFormat {
            channels: default_config.channels() as usize,
            source_rate: default_config.sample_rate().0,
            target_rate: self.sample_rate,
        };
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels = format.channels,
            sample_rate = format.source_rate,
            format = ?default_config.sample_format(),
            "using native audio format, converting in software"
        );

        let sink = Arc::clone(delivery);
        let counter = Arc::clone(&self.callback_count);

        match default_config.sample_format() {
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        deliver(&sink, |d| d.push_native(data, format));
                    },
                    Self::stream_error,
                    None,
                )
                .map_err(|e| HeyvoxError::AudioCapture {
                    message: format!("Failed to build native i16 stream: {}", e),
                }),
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        deliver(&sink, |d| d.push_native_f32(data, format));
                    },
                    Self::stream_error,
                    None,
                )
                .map_err(|e| HeyvoxError::AudioCapture {
                    message: format!("Failed to build native f32 stream: {}", e),
                }),
            fmt => Err(HeyvoxError::AudioCapture {
                message: format!(
                    "Unsupported native sample format: {:?}. \
                     Try specifying a device with --device.",
                    fmt
                ),
            }),
        }
    }
}

impl FrameSource for CpalFrameSource {
    fn device_name(&self) -> &str {
        self.claim.name()
    }

    fn start(&mut self, on_frame: FrameCallback) -> Result<()> {
        if self.stream.is_some() {
            return Ok(()); // Already started
        }

        let delivery = Arc::new(Mutex::new(Delivery::new(
            FrameAssembler::with_pool(self.frame_len, self.pool.clone()),
            on_frame,
        )));

        let stream = self.build_stream(&delivery)?;
        stream.play().map_err(|e| HeyvoxError::AudioCapture {
            message: format!("Failed to start audio stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept non-native configs but never deliver data.
        std::thread::sleep(Duration::from_millis(200));

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            tracing::warn!(device = %self.claim.name(), "no audio delivered, retrying with native format");
            let native_stream = self.build_stream_native(&delivery)?;
            native_stream
                .play()
                .map_err(|e| HeyvoxError::AudioCapture {
                    message: format!("Failed to start native audio stream: {}", e),
                })?;
            native_stream
        } else {
            stream
        };

        self.stream = Some(SendableStream(final_stream));
        self.delivery = Some(delivery);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let paused = match self.stream.take() {
            Some(sendable_stream) => sendable_stream.0.pause().map_err(|e| {
                HeyvoxError::AudioCapture {
                    message: format!("Failed to stop audio stream: {}", e),
                }
            }),
            None => Ok(()),
        };
        // The stream is dropped above; detach the callback even if pause failed.
        if let Some(delivery) = self.delivery.take() {
            let mut delivery = delivery
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            delivery.on_frame = None;
            tracing::debug!(
                pool_misses = self.pool.misses(),
                "capture stopped"
            );
        }
        paused
    }
}

impl Drop for CpalFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop audio stream");
        }
    }
}
