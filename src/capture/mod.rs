//! Capture session: validated parameters, the bounded frame queue and the
//! controller that sequences wake-word detection and recording.

pub mod config;
pub mod queue;
pub mod session;

pub use config::{CaptureConfig, Endpointing};
pub use queue::{FrameConsumer, FrameProducer};
pub use session::{CaptureSession, SessionState};
