//! Remote wake-word scoring.

use super::{AudioRequest, build_client, endpoint, post_json, wake_error};
use crate::classify::WakeWordScorer;
use crate::config::ServicesConfig;
use crate::error::Result;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::collections::VecDeque;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DetectResponse {
    confidence: f32,
}

/// Scores a rolling window of recent voiced audio with
/// `POST {wake_url}/detect_wake_word`.
///
/// Every voiced frame appends to the window. Only scored frames send it, so
/// the service always sees the phrase in context while the wake loop's hop
/// decides how often a request goes out. `reset` empties the window.
pub struct HttpWakeWordScorer {
    client: Client,
    url: String,
    sample_rate: u32,
    window: VecDeque<i16>,
    capacity: usize,
}

impl HttpWakeWordScorer {
    pub fn new(base_url: &str, timeout: Duration, sample_rate: u32) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout, wake_error)?,
            url: endpoint(base_url, "detect_wake_word"),
            sample_rate,
            window: VecDeque::new(),
            capacity: sample_rate as usize * 2,
        })
    }

    pub fn from_config(services: &ServicesConfig, sample_rate: u32) -> Result<Self> {
        Self::new(
            &services.wake_url,
            Duration::from_secs(services.request_timeout_secs),
            sample_rate,
        )
    }

    /// Keep at most `window` of audio for each request.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.capacity = ((u128::from(self.sample_rate) * window.as_millis()) / 1000) as usize;
        self
    }

    fn push(&mut self, samples: &[i16]) {
        self.window.extend(samples.iter().copied());
        let excess = self.window.len().saturating_sub(self.capacity);
        self.window.drain(..excess);
    }
}

impl WakeWordScorer for HttpWakeWordScorer {
    fn score(&mut self, samples: &[i16]) -> Result<f32> {
        self.push(samples);
        let audio: Vec<i16> = self.window.iter().copied().collect();
        let response: DetectResponse = post_json(
            &self.client,
            &self.url,
            &AudioRequest {
                audio_data: &audio,
                sample_rate: self.sample_rate,
            },
            wake_error,
        )?;
        let confidence = if response.confidence.is_nan() {
            0.0
        } else {
            response.confidence.clamp(0.0, 1.0)
        };
        tracing::trace!(confidence, window = audio.len(), "remote wake-word score");
        Ok(confidence)
    }

    fn observe(&mut self, samples: &[i16]) -> Result<()> {
        self.push(samples);
        Ok(())
    }

    fn reset(&mut self) {
        self.window.clear();
    }

    fn name(&self) -> &str {
        "http_wake_word"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeyvoxError;

    fn scorer() -> HttpWakeWordScorer {
        HttpWakeWordScorer::new("http://127.0.0.1:9", Duration::from_millis(200), 16000)
            .unwrap()
            .with_window(Duration::from_millis(1))
    }

    #[test]
    fn test_window_keeps_latest_samples() {
        let mut scorer = scorer();
        scorer.push(&(0..10).collect::<Vec<i16>>());
        scorer.push(&[10, 11, 12, 13, 14, 15, 16, 17, 18, 19]);
        // 1 ms at 16 kHz
        assert_eq!(scorer.window.len(), 16);
        assert_eq!(scorer.window.front(), Some(&4));
        assert_eq!(scorer.window.back(), Some(&19));
    }

    #[test]
    fn test_observe_fills_window_without_a_request() {
        // The address is unreachable, so any request would fail.
        let mut scorer = scorer();
        scorer.observe(&[1, 2, 3]).unwrap();
        scorer.observe(&[4, 5]).unwrap();
        assert_eq!(scorer.window.iter().copied().collect::<Vec<_>>(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_reset_clears_window() {
        let mut scorer = scorer();
        scorer.push(&[1, 2, 3]);
        scorer.reset();
        assert!(scorer.window.is_empty());
    }

    #[test]
    fn test_parses_detection_response() {
        let response: DetectResponse =
            serde_json::from_str(r#"{"success": true, "detected": true, "confidence": 0.93}"#)
                .unwrap();
        assert!((response.confidence - 0.93).abs() < f32::EPSILON);
    }

    #[test]
    fn test_unreachable_service_is_scorer_error() {
        let mut scorer = scorer();
        match scorer.score(&[0; 480]) {
            Err(error @ HeyvoxError::WakeWordScorer { .. }) => assert!(error.is_session_fatal()),
            other => panic!("Expected WakeWordScorer error, got {:?}", other),
        }
    }
}
