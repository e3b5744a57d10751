use crate::capture::config::CaptureConfig;
use crate::classify::VadBackend;
use crate::defaults;
use crate::error::{HeyvoxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Environment variable selecting the profile when no flag is given.
pub const PROFILE_ENV: &str = "HEYVOX_ENV";

/// Named set of defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Laptop microphone and the fast STT model.
    #[default]
    Development,
    /// System default device and the accurate STT model.
    Production,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Development => "development",
            Profile::Production => "production",
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Profile {
    type Err = HeyvoxError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Profile::Development),
            "production" | "prod" => Ok(Profile::Production),
            other => Err(HeyvoxError::InvalidConfig {
                key: "profile".to_string(),
                message: format!("unknown profile '{other}' (expected development or production)"),
            }),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub profile: Profile,
    pub audio: AudioConfig,
    pub wake: WakeConfig,
    pub recording: RecordingConfig,
    pub services: ServicesConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Exact input device name. Unset or empty selects the system default.
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub sample_rate: u32,
    pub frame_ms: u32,
    pub vad_aggressiveness: u8,
    pub vad_backend: VadBackend,
    pub queue_depth: usize,
    pub poll_interval_ms: u64,
}

/// Wake-word configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WakeConfig {
    pub threshold: f32,
    pub timeout_secs: f32,
    /// Play the acknowledgment beep on trigger.
    pub beep: bool,
    /// Score every Nth voiced frame. Remote scorers need room per request.
    pub score_hop: usize,
}

/// Utterance recording configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecordingConfig {
    pub max_duration_secs: f32,
    pub silence_timeout_secs: f32,
    pub linger_ms: u32,
    /// Write every recorded utterance as a WAV file here.
    pub keep_wav_dir: Option<PathBuf>,
}

/// Speech service endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServicesConfig {
    pub stt_url: String,
    pub tts_url: String,
    pub wake_url: String,
    pub stt_model: String,
    pub language: String,
    pub task: String,
    pub tts_model: String,
    pub tts_speaker: String,
    pub request_timeout_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: Some(defaults::DEVELOPMENT_INPUT_DEVICE.to_string()),
            output_device: None,
            sample_rate: defaults::SAMPLE_RATE,
            frame_ms: defaults::FRAME_MS,
            vad_aggressiveness: defaults::VAD_AGGRESSIVENESS,
            vad_backend: VadBackend::default(),
            queue_depth: defaults::QUEUE_DEPTH,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

impl Default for WakeConfig {
    fn default() -> Self {
        Self {
            threshold: defaults::WAKE_THRESHOLD,
            timeout_secs: defaults::WAKE_TIMEOUT_SECS,
            beep: true,
            score_hop: defaults::WAKE_SCORE_HOP,
        }
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            max_duration_secs: defaults::MAX_UTTERANCE_SECS,
            silence_timeout_secs: defaults::SILENCE_TIMEOUT_SECS,
            linger_ms: defaults::LINGER_MS,
            keep_wav_dir: None,
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            stt_url: defaults::STT_URL.to_string(),
            tts_url: defaults::TTS_URL.to_string(),
            wake_url: defaults::STT_URL.to_string(),
            stt_model: defaults::DEVELOPMENT_STT_MODEL.to_string(),
            language: defaults::LANGUAGE.to_string(),
            task: defaults::STT_TASK.to_string(),
            tts_model: defaults::TTS_MODEL.to_string(),
            tts_speaker: defaults::TTS_SPEAKER.to_string(),
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Profile precedence: explicit flag, then `HEYVOX_ENV`, then the file's
/// `profile` key, then development.
pub fn resolve_profile(flag: Option<&str>, file: Option<&str>) -> Result<Profile> {
    if let Some(name) = flag {
        return name.parse();
    }
    if let Ok(name) = std::env::var(PROFILE_ENV)
        && !name.is_empty()
    {
        return name.parse();
    }
    match file {
        Some(name) => name.parse(),
        None => Ok(Profile::default()),
    }
}

/// Overlay `overlay` onto `base`, descending into tables.
fn merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge(existing, incoming)
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

/// Seconds to a whole-millisecond duration.
fn secs(key: &str, value: f32) -> Result<Duration> {
    let millis = f64::from(value) * 1000.0;
    if !millis.is_finite() || millis < 0.0 || millis > u64::MAX as f64 {
        return Err(HeyvoxError::InvalidConfig {
            key: key.to_string(),
            message: format!("{value} is not a valid duration in seconds"),
        });
    }
    Ok(Duration::from_millis(millis.round() as u64))
}

impl Config {
    /// Defaults for a profile.
    pub fn for_profile(profile: Profile) -> Self {
        let mut config = Self {
            profile,
            ..Self::default()
        };
        if profile == Profile::Production {
            config.audio.input_device = None;
            config.services.stt_model = defaults::PRODUCTION_STT_MODEL.to_string();
        }
        config
    }

    /// Parse TOML text over the resolved profile's defaults.
    ///
    /// Keys present in the text win; everything else comes from the profile.
    pub fn from_toml_str(contents: &str, profile_flag: Option<&str>) -> Result<Self> {
        let overlay: toml::Table = toml::from_str(contents)?;
        let file_profile = match overlay.get("profile") {
            Some(toml::Value::String(name)) => Some(name.as_str()),
            Some(other) => {
                return Err(HeyvoxError::InvalidConfig {
                    key: "profile".to_string(),
                    message: format!("expected a string, got {}", other.type_str()),
                });
            }
            None => None,
        };
        let profile = resolve_profile(profile_flag, file_profile)?;

        let mut base = toml::Table::try_from(Self::for_profile(profile)).map_err(|e| {
            HeyvoxError::ConfigParse {
                message: e.to_string(),
            }
        })?;
        merge(&mut base, overlay);

        let mut config: Config = base.try_into()?;
        config.profile = profile;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file is missing or contains invalid TOML.
    pub fn load(path: &Path, profile_flag: Option<&str>) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml_str(&contents, profile_flag)
            .map_err(|e| anyhow::anyhow!("Failed to load config from {}: {}", path.display(), e))?;
        Ok(config)
    }

    /// Load configuration from a file or fall back to the profile defaults
    ///
    /// Only a missing file falls back. Invalid TOML is still an error.
    pub fn load_or_default(path: &Path, profile_flag: Option<&str>) -> anyhow::Result<Self> {
        match Self::load(path, profile_flag) {
            Ok(config) => Ok(config),
            Err(e)
                if e.downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound) =>
            {
                tracing::debug!(path = %path.display(), "no config file, using profile defaults");
                Ok(Self::for_profile(resolve_profile(profile_flag, None)?))
            }
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables (empty values are ignored):
    /// - HEYVOX_AUDIO_DEVICE → audio.input_device
    /// - HEYVOX_WAKE_THRESHOLD → wake.threshold
    /// - HEYVOX_STT_URL → services.stt_url
    /// - HEYVOX_TTS_URL → services.tts_url
    /// - HEYVOX_WAKE_URL → services.wake_url
    /// - HEYVOX_STT_MODEL → services.stt_model
    pub fn with_env_overrides(mut self) -> Result<Self> {
        fn var(key: &str) -> Option<String> {
            std::env::var(key).ok().filter(|v| !v.is_empty())
        }

        if let Some(device) = var("HEYVOX_AUDIO_DEVICE") {
            self.audio.input_device = Some(device);
        }
        if let Some(threshold) = var("HEYVOX_WAKE_THRESHOLD") {
            self.wake.threshold =
                threshold
                    .trim()
                    .parse()
                    .map_err(|e| HeyvoxError::InvalidConfig {
                        key: "HEYVOX_WAKE_THRESHOLD".to_string(),
                        message: format!("'{threshold}': {e}"),
                    })?;
        }
        if let Some(url) = var("HEYVOX_STT_URL") {
            self.services.stt_url = url;
        }
        if let Some(url) = var("HEYVOX_TTS_URL") {
            self.services.tts_url = url;
        }
        if let Some(url) = var("HEYVOX_WAKE_URL") {
            self.services.wake_url = url;
        }
        if let Some(model) = var("HEYVOX_STT_MODEL") {
            self.services.stt_model = model;
        }

        Ok(self)
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/heyvox/config.toml on Linux, or `None` when the
    /// platform has no config directory.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("heyvox").join("config.toml"))
    }

    /// Resolve into validated capture parameters.
    pub fn capture_config(&self) -> Result<CaptureConfig> {
        let config = CaptureConfig {
            device: self
                .audio
                .input_device
                .clone()
                .filter(|name| !name.trim().is_empty()),
            sample_rate: self.audio.sample_rate,
            channels: defaults::CHANNELS,
            frame_ms: self.audio.frame_ms,
            vad_aggressiveness: self.audio.vad_aggressiveness,
            wake_threshold: self.wake.threshold,
            wake_hop: self.wake.score_hop,
            max_duration: secs("recording.max_duration_secs", self.recording.max_duration_secs)?,
            silence_timeout: secs(
                "recording.silence_timeout_secs",
                self.recording.silence_timeout_secs,
            )?,
            linger: Duration::from_millis(u64::from(self.recording.linger_ms)),
            queue_depth: self.audio.queue_depth,
            poll_interval: Duration::from_millis(self.audio.poll_interval_ms),
        };
        config.validate()?;
        Ok(config)
    }

    /// How long one assistant cycle waits for the wake word.
    pub fn wake_timeout(&self) -> Result<Duration> {
        secs("wake.timeout_secs", self.wake.timeout_secs)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| HeyvoxError::ConfigParse {
            message: e.to_string(),
        })
    }
}
