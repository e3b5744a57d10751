//! Transcription over HTTP.

use super::{AudioRequest, build_client, endpoint, post_json, transcription_error};
use crate::collab::{Segment, Transcriber, Transcript};
use crate::config::ServicesConfig;
use crate::error::Result;
use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TranscribeResponse {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    segments: Vec<Segment>,
}

impl From<TranscribeResponse> for Transcript {
    fn from(response: TranscribeResponse) -> Self {
        Transcript {
            text: response.text.trim().to_string(),
            language: response.language,
            segments: response.segments,
        }
    }
}

/// Client for `POST {stt_url}/transcribe`.
pub struct HttpTranscriber {
    client: Client,
    url: String,
    name: String,
}

impl HttpTranscriber {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: build_client(timeout, transcription_error)?,
            url: endpoint(base_url, "transcribe"),
            name: "http".to_string(),
        })
    }

    /// Build from the `[services]` config section.
    ///
    /// The model is chosen server-side; it only labels this client.
    pub fn from_config(services: &ServicesConfig) -> Result<Self> {
        let mut transcriber = Self::new(
            &services.stt_url,
            Duration::from_secs(services.request_timeout_secs),
        )?;
        transcriber.name = format!("http:{}", services.stt_model);
        Ok(transcriber)
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transcriber for HttpTranscriber {
    fn transcribe(&self, samples: &[i16], sample_rate: u32) -> Result<Transcript> {
        tracing::debug!(url = %self.url, samples = samples.len(), "transcribing");
        let response: TranscribeResponse = post_json(
            &self.client,
            &self.url,
            &AudioRequest {
                audio_data: samples,
                sample_rate,
            },
            transcription_error,
        )?;
        Ok(response.into())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HeyvoxError;

    #[test]
    fn test_parses_minimal_response() {
        let response: TranscribeResponse =
            serde_json::from_str(r#"{"success": true, "text": " what time is it "}"#).unwrap();
        let transcript: Transcript = response.into();
        assert_eq!(transcript.text, "what time is it");
        assert!(transcript.language.is_none());
        assert!(transcript.segments.is_empty());
    }

    #[test]
    fn test_parses_segments() {
        let body = r#"{
            "text": "hello there",
            "language": "en",
            "segments": [{"start": 0.0, "end": 0.8, "text": "hello there"}]
        }"#;
        let transcript: Transcript = serde_json::from_str::<TranscribeResponse>(body)
            .unwrap()
            .into();
        assert_eq!(transcript.language.as_deref(), Some("en"));
        assert_eq!(transcript.segments.len(), 1);
        assert_eq!(transcript.segments[0].end, 0.8);
    }

    #[test]
    fn test_name_reflects_model() {
        let services = ServicesConfig::default();
        let transcriber = HttpTranscriber::from_config(&services).unwrap();
        assert_eq!(transcriber.name(), format!("http:{}", services.stt_model));
        assert!(transcriber.url().ends_with("/transcribe"));
    }

    #[test]
    fn test_unreachable_service_is_transcription_error() {
        let transcriber =
            HttpTranscriber::new("http://127.0.0.1:9", Duration::from_millis(200)).unwrap();
        assert!(matches!(
            transcriber.transcribe(&[0; 160], 16000),
            Err(HeyvoxError::Transcription { .. })
        ));
    }
}
