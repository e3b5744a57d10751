//! Default configuration constants for heyvox.
//!
//! Shared by the file-level `Config` profiles and `CaptureConfig::default()`
//! so both agree on the same numbers.

/// Default audio sample rate in Hz.
///
/// 16kHz is what the VAD, the wake-word model and the transcription
/// service all expect.
pub const SAMPLE_RATE: u32 = 16000;

/// Capture is always mono.
pub const CHANNELS: u16 = 1;

/// Default frame duration in milliseconds.
///
/// 30ms is the largest frame the WebRTC-style VAD accepts (480 samples at 16kHz).
pub const FRAME_MS: u32 = 30;

/// Default VAD aggressiveness (0 = least, 3 = most aggressive at rejecting non-speech).
pub const VAD_AGGRESSIVENESS: u8 = 3;

/// Default wake-word confidence threshold.
///
/// A frame triggers when its score is strictly greater than this value.
pub const WAKE_THRESHOLD: f32 = 0.5;

/// Default wait for the wake word before a cycle gives up, in seconds.
pub const WAKE_TIMEOUT_SECS: f32 = 30.0;

/// Default upper bound on a recorded utterance, in seconds.
pub const MAX_UTTERANCE_SECS: f32 = 10.0;

/// Longest configurable utterance or silence timeout, in seconds.
pub const MAX_CONFIGURED_DURATION_SECS: u64 = 3600;

/// Default silence that ends an utterance, in seconds.
pub const SILENCE_TIMEOUT_SECS: f32 = 0.8;

/// Default trailing silence kept after the last voiced frame, in milliseconds.
///
/// Keeps word endings that the VAD already scores as silence.
pub const LINGER_MS: u32 = 300;

/// Default frame queue depth between the capture and processing threads.
///
/// 256 frames at 30ms is roughly 7.7 seconds of audio.
pub const QUEUE_DEPTH: usize = 256;

/// Frame buffers the capture callback can reuse before it has to allocate.
///
/// Added on top of the queue depth to cover frames held by the processing thread.
pub const FRAME_POOL_SLACK: usize = 8;

/// Default wake-word scoring hop for remote scorers, in voiced frames.
///
/// Voiced frames between hops only extend the scorer's context. At 30ms
/// frames a hop of 8 leaves each request about 240ms before the queue grows.
pub const WAKE_SCORE_HOP: usize = 8;

/// Default bounded wait of the processing thread on an empty queue, in milliseconds.
pub const POLL_INTERVAL_MS: u64 = 20;

/// Acknowledgment beep frequency in Hz.
pub const BEEP_FREQUENCY_HZ: f32 = 800.0;

/// Acknowledgment beep duration in milliseconds.
pub const BEEP_DURATION_MS: u32 = 100;

/// Acknowledgment beep amplitude (0.0 to 1.0 of full scale).
pub const BEEP_AMPLITUDE: f32 = 0.3;

/// Default speech-to-text service address.
pub const STT_URL: &str = "http://localhost:8001";

/// Default text-to-speech service address.
pub const TTS_URL: &str = "http://localhost:8000";

/// Default HTTP request timeout for collaborator calls, in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default transcription language.
pub const LANGUAGE: &str = "en";

/// Default transcription task ("transcribe" or "translate").
pub const STT_TASK: &str = "transcribe";

/// Default speech synthesis model.
pub const TTS_MODEL: &str = "tts_models/en/vctk/vits";

/// Default speech synthesis speaker.
pub const TTS_SPEAKER: &str = "p335";

/// Input device used by the development profile.
pub const DEVELOPMENT_INPUT_DEVICE: &str = "MacBook Pro Microphone";

/// STT model used by the development profile (fast).
pub const DEVELOPMENT_STT_MODEL: &str = "base";

/// STT model used by the production profile (accurate).
pub const PRODUCTION_STT_MODEL: &str = "large";
