//! External collaborators of the capture core.
//!
//! The finalized utterance goes to a `Transcriber`, the recognized text to a
//! `ResponseAgent`, and the reply text to a `Synthesizer`. Each is a trait so
//! local models, HTTP services and test doubles can be swapped freely.

pub mod agent;
pub mod mock;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use agent::KeywordAgent;
pub use mock::{MockSynthesizer, MockTranscriber};

/// Timed piece of a transcript, in seconds from the start of the utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f32,
    pub end: f32,
    pub text: String,
}

/// Recognized text for one utterance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    /// Detected or configured language, when the backend reports one.
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub segments: Vec<Segment>,
}

impl Transcript {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// True when nothing but whitespace was recognized.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Synthesized reply audio.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedSpeech {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl SynthesizedSpeech {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / u64::from(self.sample_rate)
    }
}

/// Speech-to-text.
///
/// Never called with an empty recording; the caller checks for
/// `Recording::Empty` first.
pub trait Transcriber: Send + Sync {
    /// Transcribe mono PCM16 at `sample_rate`.
    fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<Transcript>;

    fn name(&self) -> &str;
}

impl<T: Transcriber> Transcriber for Arc<T> {
    fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<Transcript> {
        (**self).transcribe(samples, sample_rate)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Text-to-speech.
pub trait Synthesizer: Send + Sync {
    fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech>;

    fn name(&self) -> &str;
}

impl<T: Synthesizer> Synthesizer for Arc<T> {
    fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech> {
        (**self).synthesize(text)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Produces the reply to a recognized command.
pub trait ResponseAgent: Send + Sync {
    fn respond(&self, text: &str) -> Result<String>;
}

impl<T: ResponseAgent> ResponseAgent for Arc<T> {
    fn respond(&self, text: &str) -> Result<String> {
        (**self).respond(text)
    }
}
