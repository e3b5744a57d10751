//! Utterance Recorder.
//!
//! Turns the classified frames that follow a trigger into exactly one
//! finalized utterance. Endpointing works in whole frames:
//!
//! - silence before the first voiced frame is counted but not kept;
//! - once speech starts, every frame is appended;
//! - `silence_frames` consecutive non-voice frames end the utterance;
//! - `max_frames` observed frames end it regardless of the VAD;
//! - the trailing silent run is trimmed to `linger_frames` on finalization.

use crate::audio::frame::{AudioFrame, pcm16_le_bytes};
use crate::capture::config::Endpointing;
use crate::classify::FrameClassifier;
use crate::error::Result;
use std::time::Duration;

/// Why a recording stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    /// The silence timeout elapsed after speech.
    Silence,
    /// The maximum duration was reached.
    MaxDuration,
    /// `stop_listening` interrupted the recording.
    Cancelled,
    /// The Frame Source ran out of audio.
    SourceEnded,
}

/// A finalized, non-empty utterance.
#[derive(Debug)]
pub struct UtteranceBuffer {
    frames: Vec<AudioFrame>,
    sample_rate: u32,
    voiced_frames: usize,
    reason: FinishReason,
}

impl UtteranceBuffer {
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Number of frames in the buffer.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Always false for a buffer returned by the recorder.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn voiced_frames(&self) -> usize {
        self.voiced_frames
    }

    pub fn reason(&self) -> FinishReason {
        self.reason
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn sample_count(&self) -> usize {
        self.frames.iter().map(AudioFrame::len).sum()
    }

    pub fn duration(&self) -> Duration {
        let nanos = self.sample_count() as u64 * 1_000_000_000 / u64::from(self.sample_rate.max(1));
        Duration::from_nanos(nanos)
    }

    /// Sequence numbers of the first and last frame.
    pub fn sequence_range(&self) -> Option<(u64, u64)> {
        Some((
            self.frames.first()?.sequence(),
            self.frames.last()?.sequence(),
        ))
    }

    /// All samples as one contiguous buffer.
    pub fn samples(&self) -> Vec<i16> {
        let mut samples = Vec::with_capacity(self.sample_count());
        for frame in &self.frames {
            samples.extend_from_slice(frame.samples());
        }
        samples
    }

    /// All samples as a contiguous little-endian PCM16 byte buffer.
    pub fn to_pcm16_bytes(&self) -> Vec<u8> {
        pcm16_le_bytes(&self.samples())
    }

    pub fn into_frames(self) -> Vec<AudioFrame> {
        self.frames
    }
}

/// Outcome of one recording.
///
/// `Empty` is a completed capture with no detected voice; it must not be
/// sent for transcription.
#[derive(Debug)]
pub enum Recording {
    Complete(UtteranceBuffer),
    Empty { reason: FinishReason },
}

impl Recording {
    pub fn is_empty(&self) -> bool {
        matches!(self, Recording::Empty { .. })
    }

    pub fn reason(&self) -> FinishReason {
        match self {
            Recording::Complete(buffer) => buffer.reason(),
            Recording::Empty { reason } => *reason,
        }
    }

    pub fn into_buffer(self) -> Option<UtteranceBuffer> {
        match self {
            Recording::Complete(buffer) => Some(buffer),
            Recording::Empty { .. } => None,
        }
    }
}

/// Frames reserved up front; longer utterances grow the buffer as they go.
const INITIAL_CAPACITY: usize = 128;

#[derive(Debug)]
pub struct UtteranceRecorder {
    limits: Endpointing,
    sample_rate: u32,
    frames: Vec<AudioFrame>,
    observed: usize,
    voiced: usize,
    silent_run: usize,
    finished: Option<FinishReason>,
}

impl UtteranceRecorder {
    pub fn new(limits: Endpointing, sample_rate: u32) -> Self {
        Self {
            limits,
            sample_rate,
            frames: Vec::with_capacity(limits.max_frames.min(INITIAL_CAPACITY)),
            observed: 0,
            voiced: 0,
            silent_run: 0,
            finished: None,
        }
    }

    /// Classify `frame` and record it.
    pub fn feed(
        &mut self,
        frame: AudioFrame,
        classifier: &mut FrameClassifier,
    ) -> Result<Option<FinishReason>> {
        if self.finished.is_some() {
            return Ok(self.finished);
        }
        let is_voice = classifier.classify_voice(&frame)?;
        Ok(self.on_frame(frame, is_voice))
    }

    /// Record an already classified frame. Returns the finish reason once finished.
    ///
    /// Frames offered after finishing are discarded.
    pub fn on_frame(&mut self, frame: AudioFrame, is_voice: bool) -> Option<FinishReason> {
        if self.finished.is_some() {
            return self.finished;
        }
        self.observed += 1;

        if is_voice {
            if self.voiced == 0 {
                tracing::debug!(sequence = frame.sequence(), "speech started");
            }
            self.voiced += 1;
            self.silent_run = 0;
            self.frames.push(frame);
        } else if self.voiced > 0 {
            self.silent_run += 1;
            self.frames.push(frame);
        }

        if self.observed >= self.limits.max_frames {
            self.finish(FinishReason::MaxDuration);
        } else if self.voiced > 0 && self.silent_run >= self.limits.silence_frames {
            self.finish(FinishReason::Silence);
        }
        self.finished
    }

    /// Stop recording. The first reason given sticks.
    pub fn finish(&mut self, reason: FinishReason) {
        if self.finished.is_none() {
            tracing::debug!(
                ?reason,
                observed = self.observed,
                voiced = self.voiced,
                "recording finished"
            );
            self.finished = Some(reason);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Frames observed so far, kept or not.
    pub fn observed(&self) -> usize {
        self.observed
    }

    pub fn voiced(&self) -> usize {
        self.voiced
    }

    /// Close the buffer. A recording without voice is `Empty`.
    pub fn finalize(mut self) -> Recording {
        let reason = self.finished.unwrap_or(FinishReason::Cancelled);
        if self.voiced == 0 {
            return Recording::Empty { reason };
        }

        let excess = self.silent_run.saturating_sub(self.limits.linger_frames);
        let keep = self.frames.len() - excess;
        self.frames.truncate(keep);

        Recording::Complete(UtteranceBuffer {
            frames: self.frames,
            sample_rate: self.sample_rate,
            voiced_frames: self.voiced,
            reason,
        })
    }
}
