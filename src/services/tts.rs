//! Speech synthesis over HTTP.

use super::{build_client, endpoint, post_json, synthesis_error};
use crate::collab::{SynthesizedSpeech, Synthesizer};
use crate::config::ServicesConfig;
use crate::error::{HeyvoxError, Result};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SynthesizeRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct SynthesizeResponse {
    audio_data: Vec<i16>,
    sample_rate: u32,
}

/// Client for `POST {tts_url}/synthesize`.
pub struct HttpSynthesizer {
    client: Client,
    url: String,
    name: String,
}

impl HttpSynthesizer {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout, synthesis_error)?,
            url: endpoint(base_url, "synthesize"),
            name: "http".to_string(),
        })
    }

    pub fn from_config(services: &ServicesConfig) -> Result<Self> {
        let mut synthesizer = Self::new(
            &services.tts_url,
            Duration::from_secs(services.request_timeout_secs),
        )?;
        synthesizer.name = format!("http:{}/{}", services.tts_model, services.tts_speaker);
        Ok(synthesizer)
    }
}

impl Synthesizer for HttpSynthesizer {
    fn synthesize(&self, text: &str) -> Result<SynthesizedSpeech> {
        tracing::debug!(url = %self.url, chars = text.len(), "synthesizing");
        let response: SynthesizeResponse = post_json(
            &self.client,
            &self.url,
            &SynthesizeRequest { text },
            synthesis_error,
        )?;
        if response.sample_rate == 0 {
            return Err(HeyvoxError::Synthesis {
                message: "service returned a zero sample rate".to_string(),
            });
        }
        Ok(SynthesizedSpeech {
            samples: response.audio_data,
            sample_rate: response.sample_rate,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_shape() {
        let json = serde_json::to_string(&SynthesizeRequest { text: "hi" }).unwrap();
        assert_eq!(json, r#"{"text":"hi"}"#);
    }

    #[test]
    fn test_parses_response() {
        let response: SynthesizeResponse = serde_json::from_str(
            r#"{"success": true, "audio_data": [0, 120, -120], "sample_rate": 22050}"#,
        )
        .unwrap();
        assert_eq!(response.audio_data, vec![0, 120, -120]);
        assert_eq!(response.sample_rate, 22050);
    }

    #[test]
    fn test_rejects_out_of_range_samples() {
        let result: std::result::Result<SynthesizeResponse, _> =
            serde_json::from_str(r#"{"audio_data": [40000], "sample_rate": 22050}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_name_carries_model_and_speaker() {
        let synthesizer = HttpSynthesizer::from_config(&ServicesConfig::default()).unwrap();
        assert_eq!(synthesizer.name(), "http:tts_models/en/vctk/vits/p335");
    }
}
