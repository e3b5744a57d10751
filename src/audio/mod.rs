//! Audio input and output.
//!
//! Frames, the Frame Source abstraction and its implementations (cpal
//! microphone, WAV replay, scripted mock), device claims, playback and the
//! WAV container boundary.

#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod device;
pub mod frame;
pub mod playback;
pub mod source;
pub mod wav;

pub use device::DeviceClaim;
pub use frame::{AudioFrame, FrameAssembler};
pub use playback::{AudioSink, NullSink, RecordingSink};
pub use source::{FrameCallback, FrameSource, MockSourceOpener, SourceOpener};
pub use wav::WavSourceOpener;
