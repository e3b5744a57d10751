//! Frame Source abstraction.
//!
//! A `SourceOpener` opens a device and returns a `FrameSource`; the source
//! delivers fixed-length frames to a callback on its own capture thread.
//! The trait allows swapping implementations (real device, WAV file, scripted mock).

use crate::audio::device::DeviceClaim;
use crate::audio::frame::{AudioFrame, FrameAssembler};
use crate::capture::config::CaptureConfig;
use crate::error::{HeyvoxError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Per-frame callback run on the capture thread.
///
/// Must not block: the session's callback only moves the frame into the
/// bounded queue.
pub type FrameCallback = Box<dyn FnMut(AudioFrame) + Send + 'static>;

/// An open input device.
pub trait FrameSource: Send {
    /// Name of the claimed device.
    fn device_name(&self) -> &str;

    /// Begin streaming frames to `on_frame`.
    fn start(&mut self, on_frame: FrameCallback) -> Result<()>;

    /// Halt streaming and release the device.
    ///
    /// Idempotent. Once this returns, `on_frame` is never invoked again.
    fn stop(&mut self) -> Result<()>;

    /// True if the source runs out on its own (files, scripts).
    fn is_finite(&self) -> bool {
        false
    }
}

/// Opens Frame Sources for the session controller.
pub trait SourceOpener: Send + Sync {
    /// Open the device named by `config.device`, or the default device.
    ///
    /// Fails with `DeviceNotFound` if nothing matches and `DeviceBusy` if the
    /// device is held by another session.
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn FrameSource>>;
}

impl<T: SourceOpener> SourceOpener for Arc<T> {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
        (**self).open(config)
    }
}

/// What a feeder thread does once its samples are used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    /// Stop delivering; the callback is dropped, closing the queue.
    End,
    /// Keep delivering silent frames until stopped, like an idle microphone.
    Silence,
}

/// Samples a feeder thread plays back as frames.
pub(crate) struct Feed {
    pub samples: Vec<i16>,
    pub frame_len: usize,
    /// Sleep after each frame.
    pub interval: Duration,
    pub tail: Tail,
}

/// Deliver a feed as frames on a new thread while `running` is set.
pub(crate) fn spawn_feeder(
    name: &str,
    feed: Feed,
    running: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    mut on_frame: FrameCallback,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let Feed {
                samples,
                frame_len,
                interval,
                tail,
            } = feed;
            let mut assembler = FrameAssembler::new(frame_len);
            for chunk in samples.chunks(frame_len.max(1)) {
                if !running.load(Ordering::Acquire) {
                    return;
                }
                assembler.push(chunk, |frame| {
                    delivered.fetch_add(1, Ordering::Relaxed);
                    on_frame(frame);
                });
                if !interval.is_zero() {
                    thread::sleep(interval);
                }
            }
            if tail == Tail::Silence {
                let silence = vec![0i16; frame_len.max(1)];
                while running.load(Ordering::Acquire) {
                    assembler.push(&silence, |frame| {
                        delivered.fetch_add(1, Ordering::Relaxed);
                        on_frame(frame);
                    });
                    thread::sleep(interval.max(Duration::from_millis(1)));
                }
            }
        })
        .map_err(|e| HeyvoxError::AudioCapture {
            message: format!("Failed to spawn capture thread: {}", e),
        })
}

/// Join a feeder thread, logging a panic instead of propagating it.
pub(crate) fn join_feeder(handle: JoinHandle<()>) {
    if let Err(panic_info) = handle.join() {
        let msg = panic_info
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
            .unwrap_or("unknown panic");
        tracing::error!(panic = msg, "capture thread panicked");
    }
}

#[derive(Debug, Clone)]
enum ScriptItem {
    Frames { count: usize, amplitude: i16 },
    Samples(Vec<i16>),
}

#[derive(Debug, Default)]
struct MockCounters {
    opened: AtomicUsize,
    started: AtomicUsize,
    stopped: AtomicUsize,
    delivered: Arc<AtomicU64>,
}

/// Scripted source opener for testing.
///
/// Each opened source plays the same script: constant-amplitude frames or
/// raw samples, optionally followed by endless silence.
#[derive(Debug, Clone)]
pub struct MockSourceOpener {
    devices: Vec<String>,
    script: Vec<ScriptItem>,
    tail: Tail,
    interval: Duration,
    fail_start: bool,
    counters: Arc<MockCounters>,
}

impl MockSourceOpener {
    /// Create an opener with a single device named "mock" and an empty script.
    pub fn new() -> Self {
        Self {
            devices: vec!["mock".to_string()],
            script: Vec::new(),
            tail: Tail::End,
            interval: Duration::ZERO,
            fail_start: false,
            counters: Arc::new(MockCounters::default()),
        }
    }

    /// Replace the device list. The first entry is the default device.
    pub fn with_devices(mut self, devices: &[&str]) -> Self {
        self.devices = devices.iter().map(|d| d.to_string()).collect();
        self
    }

    /// Append `count` frames whose samples all equal `amplitude`.
    pub fn with_frames(mut self, count: usize, amplitude: i16) -> Self {
        self.script.push(ScriptItem::Frames { count, amplitude });
        self
    }

    /// Append raw samples; they are sliced into frames on delivery.
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.script.push(ScriptItem::Samples(samples));
        self
    }

    /// Keep delivering silent frames after the script, until stopped.
    pub fn then_silence(mut self) -> Self {
        self.tail = Tail::Silence;
        self
    }

    /// Sleep this long after each scripted frame.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Configure opened sources to fail on start.
    pub fn with_start_failure(mut self) -> Self {
        self.fail_start = true;
        self
    }

    /// Number of sources successfully opened.
    pub fn opened(&self) -> usize {
        self.counters.opened.load(Ordering::SeqCst)
    }

    /// Number of `start` calls that began streaming.
    pub fn started(&self) -> usize {
        self.counters.started.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls that actually stopped a running stream.
    pub fn stopped(&self) -> usize {
        self.counters.stopped.load(Ordering::SeqCst)
    }

    /// Total frames delivered across all sources.
    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::SeqCst)
    }

    fn render(&self, frame_len: usize) -> Vec<i16> {
        let mut samples = Vec::new();
        for item in &self.script {
            match item {
                ScriptItem::Frames { count, amplitude } => {
                    samples.extend(std::iter::repeat_n(*amplitude, count * frame_len));
                }
                ScriptItem::Samples(raw) => samples.extend_from_slice(raw),
            }
        }
        samples
    }
}

impl Default for MockSourceOpener {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceOpener for MockSourceOpener {
    fn open(&self, config: &CaptureConfig) -> Result<Box<dyn FrameSource>> {
        let name = match config.device.as_deref() {
            Some(wanted) => self
                .devices
                .iter()
                .find(|d| d.as_str() == wanted)
                .ok_or_else(|| HeyvoxError::DeviceNotFound {
                    device: wanted.to_string(),
                })?,
            None => self
                .devices
                .first()
                .ok_or_else(|| HeyvoxError::DeviceNotFound {
                    device: "default".to_string(),
                })?,
        };
        let claim = DeviceClaim::acquire(name)?;
        self.counters.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(ScriptedFrameSource {
            claim,
            samples: Some(self.render(config.frame_len())),
            frame_len: config.frame_len(),
            interval: self.interval,
            tail: self.tail,
            fail_start: self.fail_start,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
            counters: Arc::clone(&self.counters),
        }))
    }
}

/// Source produced by `MockSourceOpener`.
pub struct ScriptedFrameSource {
    claim: DeviceClaim,
    samples: Option<Vec<i16>>,
    frame_len: usize,
    interval: Duration,
    tail: Tail,
    fail_start: bool,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    counters: Arc<MockCounters>,
}

impl FrameSource for ScriptedFrameSource {
    fn device_name(&self) -> &str {
        self.claim.name()
    }

    fn start(&mut self, on_frame: FrameCallback) -> Result<()> {
        if self.fail_start {
            return Err(HeyvoxError::AudioCapture {
                message: "mock audio error".to_string(),
            });
        }
        if self.handle.is_some() {
            return Ok(()); // Already started
        }
        let samples = self.samples.take().unwrap_or_default();
        self.running.store(true, Ordering::Release);
        let feed = Feed {
            samples,
            frame_len: self.frame_len,
            interval: self.interval,
            tail: self.tail,
        };
        self.handle = Some(spawn_feeder(
            "heyvox-mock-capture",
            feed,
            Arc::clone(&self.running),
            Arc::clone(&self.counters.delivered),
            on_frame,
        )?);
        self.counters.started.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            join_feeder(handle);
            self.counters.stopped.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_finite(&self) -> bool {
        self.tail == Tail::End
    }
}

impl Drop for ScriptedFrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "failed to stop scripted source");
        }
    }
}
