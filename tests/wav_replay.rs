//! Replaying WAV files through the controller.

use heyvox::audio::playback::RecordingSink;
use heyvox::audio::wav::{WavSourceOpener, write_wav};
use heyvox::capture::{CaptureConfig, CaptureSession, SessionState};
use heyvox::classify::FrameClassifier;
use heyvox::classify::mock::{RecordingVad, ScriptedScorer};
use heyvox::record::FinishReason;
use std::path::Path;
use std::time::Duration;

const RATE: u32 = 16000;
const FRAME_LEN: usize = 480;

fn write_fixture(path: &Path, layout: &[(usize, i16)]) {
    let samples: Vec<i16> = layout
        .iter()
        .flat_map(|&(frames, amplitude)| std::iter::repeat_n(amplitude, frames * FRAME_LEN))
        .collect();
    write_wav(path, &samples, RATE).unwrap();
}

fn session_for(path: &Path, scorer: &ScriptedScorer) -> CaptureSession {
    let config = CaptureConfig {
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    };
    let classifier = FrameClassifier::new(
        Box::new(RecordingVad::new(100)),
        Box::new(scorer.clone()),
    );
    CaptureSession::new(
        config,
        WavSourceOpener::new(path).unpaced(),
        classifier,
        RecordingSink::new(),
    )
    .unwrap()
}

#[test]
fn test_record_utterance_from_wav_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("command.wav");
    write_fixture(&path, &[(3, 0), (6, 2000), (20, 0)]);

    let session = session_for(&path, &ScriptedScorer::new(vec![]));
    let buffer = session
        .record_utterance(Duration::from_secs(5), Duration::from_millis(300))
        .unwrap()
        .into_buffer()
        .expect("speech in fixture");

    assert_eq!(buffer.voiced_frames(), 6);
    assert_eq!(buffer.reason(), FinishReason::Silence);
    assert_eq!(buffer.sequence_range().map(|(first, _)| first), Some(3));
    assert!(buffer.samples()[..FRAME_LEN].iter().all(|&s| s == 2000));
    assert_eq!(session.state(), SessionState::Idle);
}

#[test]
fn test_wake_then_record_from_wav_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("hey.wav");
    // "wake word", a pause, then the command and trailing quiet
    write_fixture(&path, &[(4, 1800), (5, 0), (8, 1500), (15, 0)]);

    let scorer = ScriptedScorer::new(vec![0.2, 0.3, 0.8]);
    let session = session_for(&path, &scorer);
    session.start_listening().unwrap();
    assert!(session.wait_for_wake_word(Duration::from_secs(2)).unwrap());
    assert_eq!(session.detection().map(|d| d.sequence), Some(2));

    // The fourth wake-word frame is still voiced and opens the utterance.
    let buffer = session
        .record_utterance(Duration::from_secs(5), Duration::from_millis(300))
        .unwrap()
        .into_buffer()
        .expect("command recorded");
    assert_eq!(buffer.sequence_range().map(|(first, _)| first), Some(3));
    assert_eq!(buffer.voiced_frames(), 9);
    assert_eq!(buffer.reason(), FinishReason::Silence);

    session.stop_listening();
}

#[test]
fn test_wav_without_wake_word_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chatter.wav");
    write_fixture(&path, &[(10, 1200), (5, 0)]);

    let scorer = ScriptedScorer::new(vec![]).with_default(0.1);
    let session = session_for(&path, &scorer);
    session.start_listening().unwrap();
    assert!(!session.wait_for_wake_word(Duration::from_secs(2)).unwrap());
    assert_eq!(session.state(), SessionState::Finished);
    assert_eq!(scorer.calls(), 10);
    session.stop_listening();
}

#[test]
fn test_missing_wav_file_is_device_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let session = session_for(&dir.path().join("absent.wav"), &ScriptedScorer::new(vec![]));
    assert!(matches!(
        session.start_listening(),
        Err(heyvox::HeyvoxError::DeviceNotFound { .. })
    ));
}
