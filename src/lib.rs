//! heyvox - wake-word voice assistant front end
//!
//! Captures microphone audio in fixed frames, listens for a wake word,
//! records one utterance with VAD endpointing, and hands it to speech
//! services.

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod assistant;
pub mod audio;
pub mod capture;
pub mod classify;
#[cfg(feature = "cli")]
pub mod cli;
pub mod collab;
pub mod config;
pub mod defaults;
pub mod error;
pub mod record;
#[cfg(feature = "http-services")]
pub mod services;
#[cfg(feature = "cli")]
pub mod telemetry;
pub mod wake;

// Capture core (source → classify → wake → record)
pub use audio::{AudioFrame, AudioSink, FrameSource, SourceOpener};
pub use capture::{CaptureConfig, CaptureSession, SessionState};
pub use classify::{FrameClassifier, VoiceActivityDetector, WakeWordScorer};
pub use record::{FinishReason, Recording, UtteranceBuffer};
pub use wake::Detection;

// Collaborators
pub use assistant::{Assistant, CycleOutcome};
pub use collab::{ResponseAgent, Synthesizer, Transcriber, Transcript};

// Error handling
pub use error::{HeyvoxError, Result};

// Config
pub use config::{Config, Profile};

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}
