//! Error types for heyvox.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HeyvoxError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Device errors (raised when a session opens its Frame Source)
    #[error("Audio device not found: {device}")]
    DeviceNotFound { device: String },

    #[error("Audio device busy: {device} is already claimed by another session")]
    DeviceBusy { device: String },

    #[error("Audio capture failed: {message}")]
    AudioCapture { message: String },

    #[error("Audio playback failed: {message}")]
    Playback { message: String },

    #[error("WAV error: {message}")]
    Wav { message: String },

    // Session errors
    #[error("A capture session is already listening")]
    AlreadyListening,

    #[error("Frame queue overflow: processing fell more than {depth} frames behind capture")]
    QueueOverflow { depth: usize },

    #[error("Frame delivered out of order: expected sequence {expected}, got {actual}")]
    FrameOutOfOrder { expected: u64, actual: u64 },

    // Classifier errors
    #[error("Voice activity detection failed: {message}")]
    VoiceActivity { message: String },

    #[error("Wake-word scoring failed: {message}")]
    WakeWordScorer { message: String },

    // Collaborator errors
    #[error("Transcription error: {message}")]
    Transcription { message: String },

    #[error("Speech synthesis error: {message}")]
    Synthesis { message: String },

    #[error("Response agent error: {message}")]
    Agent { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

impl HeyvoxError {
    /// True for errors that end the current capture session.
    ///
    /// The controller tears the session down and returns to idle when it
    /// observes one of these from its processing thread.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            HeyvoxError::QueueOverflow { .. }
                | HeyvoxError::FrameOutOfOrder { .. }
                | HeyvoxError::AudioCapture { .. }
                | HeyvoxError::VoiceActivity { .. }
                | HeyvoxError::WakeWordScorer { .. }
        )
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, HeyvoxError>;
