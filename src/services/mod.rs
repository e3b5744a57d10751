//! HTTP clients for the speech services.
//!
//! The transcription service also hosts wake-word detection; synthesis runs
//! separately. All calls are blocking and bounded by the request timeout.

mod stt;
mod tts;
mod wake;

pub use stt::HttpTranscriber;
pub use tts::HttpSynthesizer;
pub use wake::HttpWakeWordScorer;

use crate::error::{HeyvoxError, Result};
use reqwest::blocking::{Client, Response};
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Audio payload shared by `/transcribe` and `/detect_wake_word`.
#[derive(Debug, Serialize)]
struct AudioRequest<'a> {
    audio_data: &'a [i16],
    sample_rate: u32,
}

fn build_client(timeout: Duration, fail: fn(String) -> HeyvoxError) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| fail(format!("failed to create HTTP client: {e}")))
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

/// POST `body` as JSON and decode the JSON reply.
///
/// Transport errors, non-2xx statuses and undecodable bodies all map
/// through `fail`; a non-2xx error carries the response body.
fn post_json<B, T>(client: &Client, url: &str, body: &B, fail: fn(String) -> HeyvoxError) -> Result<T>
where
    B: Serialize + ?Sized,
    T: DeserializeOwned,
{
    let response = client
        .post(url)
        .json(body)
        .send()
        .map_err(|e| fail(format!("request to {url} failed: {e}")))?;
    decode(url, response, fail)
}

fn decode<T: DeserializeOwned>(
    url: &str,
    response: Response,
    fail: fn(String) -> HeyvoxError,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .map_err(|e| fail(format!("failed to read response from {url}: {e}")))?;

    if !status.is_success() {
        return Err(fail(format!("{url} returned {status}: {body}")));
    }

    parse_body(&body).map_err(|e| fail(format!("invalid response from {url}: {e}")))
}

fn parse_body<T: DeserializeOwned>(body: &str) -> std::result::Result<T, serde_json::Error> {
    serde_json::from_str(body)
}

fn transcription_error(message: String) -> HeyvoxError {
    HeyvoxError::Transcription { message }
}

fn synthesis_error(message: String) -> HeyvoxError {
    HeyvoxError::Synthesis { message }
}

fn wake_error(message: String) -> HeyvoxError {
    HeyvoxError::WakeWordScorer { message }
}
