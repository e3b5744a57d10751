//! Command-line interface for heyvox
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::time::Duration;

/// Wake-word voice assistant
#[derive(Parser, Debug)]
#[command(name = "heyvox", version, about = "Wake-word voice assistant")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Configuration profile (development, production). Overrides HEYVOX_ENV
    #[arg(long, global = true, value_name = "NAME")]
    pub profile: Option<String>,

    /// Verbose output (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Audio input device, matched by exact name
    #[arg(long, global = true, value_name = "DEVICE")]
    pub device: Option<String>,

    /// Replay a WAV file instead of capturing from a device
    #[arg(long, global = true, value_name = "FILE")]
    pub input: Option<PathBuf>,
}

/// Parse a duration: bare numbers are seconds (fractions allowed), anything
/// else goes through `humantime` (`800ms`, `10s`, `1m30s`).
fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).map_err(|e| e.to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the assistant: wait for the wake word, listen, answer
    Listen {
        /// Exit after one interaction
        #[arg(long)]
        once: bool,
    },

    /// Record one utterance right away and write it as WAV
    Record {
        /// Output WAV file
        #[arg(long, short = 'o', value_name = "FILE")]
        output: PathBuf,

        /// Upper bound on the recording (e.g. 10, 10s, 2500ms)
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        max_duration: Option<Duration>,

        /// Trailing silence that ends the recording (e.g. 0.8, 800ms)
        #[arg(long, value_name = "DURATION", value_parser = parse_duration)]
        silence: Option<Duration>,
    },

    /// List available audio input devices
    Devices,

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the resolved configuration as TOML
    Show,
    /// Print the default configuration file path
    Path,
}
