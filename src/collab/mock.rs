//! Collaborator doubles for tests.

use super::{Segment, SynthesizedSpeech, Synthesizer, Transcriber, Transcript};
use crate::error::{HeyvoxError, Result};
use std::sync::{Arc, Mutex};

/// Transcriber returning a fixed response.
///
/// Clones share the call log.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    response: String,
    language: Option<String>,
    should_fail: bool,
    calls: Arc<Mutex<Vec<(usize, u32)>>>,
}

impl MockTranscriber {
    pub fn new() -> Self {
        Self {
            response: "mock transcription".to_string(),
            language: None,
            should_fail: false,
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Configure the mock to return a specific response.
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    /// Configure the mock to fail on transcribe.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// `(sample_count, sample_rate)` of every call.
    pub fn calls(&self) -> Vec<(usize, u32)> {
        self.calls
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Default for MockTranscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcriber for MockTranscriber {
    fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<Transcript> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((samples.len(), sample_rate));
        if self.should_fail {
            return Err(HeyvoxError::Transcription {
                message: "mock transcription failure".to_string(),
            });
        }
        let end = if sample_rate == 0 {
            0.0
        } else {
            samples.len() as f32 / sample_rate as f32
        };
        Ok(Transcript {
            text: self.response.clone(),
            language: self.language.clone(),
            segments: vec![Segment {
                start: 0.0,
                end,
                text: self.response.clone(),
            }],
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Synthesizer producing silence proportional to the text length.
#[derive(Debug, Clone)]
pub struct MockSynthesizer {
    sample_rate: u32,
    samples_per_char: usize,
    should_fail: bool,
    texts: Arc<Mutex<Vec<String>>>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            sample_rate: 22050,
            samples_per_char: 10,
            should_fail: false,
            texts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Configure the mock to fail on synthesize.
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Every text synthesized so far.
    pub fn texts(&self) -> Vec<String> {
        self.texts
            .lock()
            .map(|t| t.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

impl Default for MockSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesizer for MockSynthesizer {
    fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech> {
        self.texts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(text.to_string());
        if self.should_fail {
            return Err(HeyvoxError::Synthesis {
                message: "mock synthesis failure".to_string(),
            });
        }
        Ok(SynthesizedSpeech {
            samples: vec![0; text.chars().count() * self.samples_per_char],
            sample_rate: self.sample_rate,
        })
    }

    fn name(&self) -> &str {
        "mock"
    }
}
