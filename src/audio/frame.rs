//! Audio frames and frame assembly.
//!
//! The capture driver hands over buffers of whatever size it likes; the
//! `FrameAssembler` slices them into fixed-length, sequenced `AudioFrame`s.
//! With a `FramePool` the sample buffers circulate between the capture
//! callback and the consumers instead of being allocated per frame.

use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// A fixed-length block of 16-bit mono PCM, tagged with its position in the
/// capture stream.
///
/// Frames are immutable once produced and are moved, never cloned, from the
/// capture thread to whichever consumer dequeues them. A pooled frame hands
/// its buffer back to the pool when dropped.
#[derive(Debug)]
pub struct AudioFrame {
    sequence: u64,
    captured_at: Instant,
    samples: Vec<i16>,
    recycle: Option<Sender<Vec<i16>>>,
}

impl AudioFrame {
    /// Creates a new audio frame.
    pub fn new(sequence: u64, captured_at: Instant, samples: Vec<i16>) -> Self {
        Self {
            sequence,
            captured_at,
            samples,
            recycle: None,
        }
    }

    fn pooled(
        sequence: u64,
        captured_at: Instant,
        samples: Vec<i16>,
        recycle: Sender<Vec<i16>>,
    ) -> Self {
        Self {
            sequence,
            captured_at,
            samples,
            recycle: Some(recycle),
        }
    }

    /// Monotonic sequence number, starting at 0 for each capture session.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// When the frame was assembled on the capture thread.
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the duration of this frame in milliseconds.
    pub fn duration_ms(&self, sample_rate: u32) -> u32 {
        (self.samples.len() as u64 * 1000 / u64::from(sample_rate.max(1))) as u32
    }

    /// The frame as a little-endian PCM16 byte block.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        pcm16_le_bytes(&self.samples)
    }

    /// Root-mean-square level normalized to 0.0..=1.0.
    pub fn rms(&self) -> f32 {
        calculate_rms(&self.samples)
    }

    pub fn into_samples(mut self) -> Vec<i16> {
        self.recycle = None;
        std::mem::take(&mut self.samples)
    }
}

impl PartialEq for AudioFrame {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
            && self.captured_at == other.captured_at
            && self.samples == other.samples
    }
}

impl Drop for AudioFrame {
    fn drop(&mut self) {
        if let Some(recycle) = self.recycle.take()
            && self.samples.capacity() > 0
        {
            // A full pool simply lets the buffer go.
            recycle.try_send(std::mem::take(&mut self.samples)).ok();
        }
    }
}

/// Spare frame buffers shared by a capture callback and its consumers.
///
/// Taking never blocks. An empty pool falls back to a fresh allocation and
/// counts a miss, so the steady state of a session allocates nothing while
/// its frames keep returning.
#[derive(Debug, Clone)]
pub struct FramePool {
    spare: Receiver<Vec<i16>>,
    recycle: Sender<Vec<i16>>,
    frame_len: usize,
    misses: Arc<AtomicU64>,
}

impl FramePool {
    /// Preallocate `buffers` buffers of `frame_len` samples.
    pub fn new(frame_len: usize, buffers: usize) -> Self {
        let buffers = buffers.max(1);
        let (recycle, spare) = crossbeam_channel::bounded(buffers);
        for _ in 0..buffers {
            if recycle.try_send(Vec::with_capacity(frame_len)).is_err() {
                break;
            }
        }
        Self {
            spare,
            recycle,
            frame_len,
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Buffers ready to be filled.
    pub fn available(&self) -> usize {
        self.spare.len()
    }

    /// Buffers that had to be allocated because the pool was empty.
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    fn take(&self) -> Vec<i16> {
        match self.spare.try_recv() {
            Ok(mut buffer) => {
                buffer.clear();
                buffer
            }
            Err(_) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.frame_len)
            }
        }
    }
}

/// Encode samples as a contiguous little-endian PCM16 byte buffer.
pub fn pcm16_le_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Calculate the RMS (Root Mean Square) of audio samples.
///
/// Returns a value between 0.0 and 1.0 representing the audio level.
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    let mean_square = sum_squares / samples.len() as f64;
    mean_square.sqrt() as f32
}

/// Slices arbitrary driver buffers into fixed-length frames.
///
/// Runs on the capture thread. The pending buffer always has a full frame's
/// capacity, so filling it never reallocates. Without a pool every emitted
/// frame allocates its replacement; with one, the replacement is a recycled
/// buffer whenever the consumers have returned enough of them.
#[derive(Debug)]
pub struct FrameAssembler {
    frame_len: usize,
    pending: Vec<i16>,
    next_sequence: u64,
    pool: Option<FramePool>,
}

impl FrameAssembler {
    pub fn new(frame_len: usize) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            pending: Vec::with_capacity(frame_len),
            next_sequence: 0,
            pool: None,
        }
    }

    /// Assemble into buffers drawn from `pool`.
    pub fn with_pool(frame_len: usize, pool: FramePool) -> Self {
        let frame_len = frame_len.max(1);
        Self {
            frame_len,
            pending: pool.take(),
            next_sequence: 0,
            pool: Some(pool),
        }
    }

    /// Append driver samples, emitting one frame per `frame_len` samples.
    ///
    /// Leftover samples stay pending until the next call.
    pub fn push(&mut self, mut samples: &[i16], mut emit: impl FnMut(AudioFrame)) {
        while !samples.is_empty() {
            let room = self.frame_len - self.pending.len();
            let take = room.min(samples.len());
            self.pending.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.pending.len() == self.frame_len {
                let frame = match &self.pool {
                    Some(pool) => {
                        let full = std::mem::replace(&mut self.pending, pool.take());
                        AudioFrame::pooled(
                            self.next_sequence,
                            Instant::now(),
                            full,
                            pool.recycle.clone(),
                        )
                    }
                    None => {
                        let full =
                            std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_len));
                        AudioFrame::new(self.next_sequence, Instant::now(), full)
                    }
                };
                self.next_sequence += 1;
                emit(frame);
            }
        }
    }

    /// Sequence number the next emitted frame will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }
}
