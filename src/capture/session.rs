//! Capture Session Controller.
//!
//! Sequences the Frame Source, the wake-word loop and the utterance recorder
//! into "listen for the wake word, then record a command".
//!
//! Per active session there are exactly two threads of interest: the source's
//! capture thread, which only pushes frames into the bounded queue, and one
//! processing thread, the queue's only reader. The processing thread runs the
//! wake-word loop, parks after the trigger without reading frames, and runs
//! the recorder when `record_utterance` hands it a request. Control calls come
//! from caller threads and never hold a lock the other two depend on while
//! they wait.

use crate::audio::playback::{AudioSink, beep};
use crate::audio::source::{FrameCallback, FrameSource, SourceOpener};
use crate::capture::config::{CaptureConfig, Endpointing};
use crate::capture::queue::{self, FrameConsumer, Poll, QueueGate};
use crate::classify::FrameClassifier;
use crate::error::{HeyvoxError, Result};
use crate::record::{FinishReason, Recording, UtteranceRecorder};
use crate::wake::{Detection, WakeWordLoop};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session, or the last one failed or was stopped.
    Idle,
    /// Listening for the wake word.
    Armed,
    /// The wake word was detected; waiting for `record_utterance`.
    Triggered,
    Recording,
    /// The recording was delivered (or the source ran out). The device is
    /// still held until `stop_listening`.
    Finished,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug)]
struct Status {
    state: SessionState,
    detection: Option<Detection>,
    cancelled: bool,
    failed: bool,
    /// A record request was accepted and has not been answered yet.
    recording: bool,
    /// Failure not yet reported to a caller.
    failure: Option<HeyvoxError>,
}

/// State the processing thread publishes to waiting callers.
#[derive(Debug)]
struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
}

impl Shared {
    fn new(state: SessionState) -> Self {
        Self {
            status: Mutex::new(Status {
                state,
                detection: None,
                cancelled: false,
                failed: false,
                recording: false,
                failure: None,
            }),
            changed: Condvar::new(),
        }
    }

    fn status(&self) -> MutexGuard<'_, Status> {
        lock(&self.status)
    }

    /// Move to `state` unless the session was already stopped or failed.
    fn publish(&self, state: SessionState) {
        let mut status = self.status();
        if status.cancelled || status.failed {
            return;
        }
        status.state = state;
        drop(status);
        self.changed.notify_all();
    }

    fn trigger(&self, detection: Detection) {
        let mut status = self.status();
        if status.cancelled || status.failed {
            return;
        }
        status.detection = Some(detection);
        status.state = SessionState::Triggered;
        drop(status);
        self.changed.notify_all();
    }

    fn fail(&self, failure: Option<HeyvoxError>) {
        let mut status = self.status();
        status.failed = true;
        status.state = SessionState::Idle;
        if failure.is_some() {
            status.failure = failure;
        }
        drop(status);
        self.changed.notify_all();
    }

    fn cancel(&self) {
        let mut status = self.status();
        status.cancelled = true;
        status.state = SessionState::Idle;
        drop(status);
        self.changed.notify_all();
    }

    /// Claim the session for one recording. False if one is already pending.
    fn begin_recording(&self) -> bool {
        let mut status = self.status();
        if status.recording {
            return false;
        }
        status.recording = true;
        true
    }

    fn end_recording(&self) {
        self.status().recording = false;
    }

    fn take_failure(&self) -> HeyvoxError {
        self.status()
            .failure
            .take()
            .unwrap_or_else(|| HeyvoxError::Other("capture session failed".to_string()))
    }
}

/// Request handed to the processing thread.
enum Command {
    Record {
        limits: Endpointing,
        /// `None` when the maximum duration is too large to be a deadline.
        deadline: Option<Instant>,
        reply: Sender<Result<Recording>>,
    },
}

/// What the processing thread does first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Start {
    /// Run the wake-word loop.
    Wake,
    /// Wait for a record request (transient sessions).
    Parked,
}

/// One open device with its queue and processing thread.
struct ActiveSession {
    id: u64,
    source: Box<dyn FrameSource>,
    gate: Arc<QueueGate>,
    running: Arc<AtomicBool>,
    commands: Sender<Command>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<FrameConsumer>>,
}

impl ActiveSession {
    fn is_failed(&self) -> bool {
        self.shared.status().failed
    }

    /// Tear down in reverse order of construction: stop the source, join the
    /// processing thread, drain the queue, release the device.
    fn shutdown(mut self) {
        let device = self.source.device_name().to_string();
        self.gate.close();
        self.running.store(false, Ordering::SeqCst);
        self.shared.cancel();

        if let Err(e) = self.source.stop() {
            tracing::warn!(device = %device, error = %e, "failed to stop frame source");
        }
        if let Some(handle) = self.worker.take()
            && let Some(consumer) = join_worker(handle)
        {
            let dropped = consumer.drain();
            if dropped > 0 {
                tracing::debug!(dropped, "drained frame queue");
            }
        }
        tracing::info!(device = %device, "capture session stopped");
    }
}

fn join_worker(handle: JoinHandle<FrameConsumer>) -> Option<FrameConsumer> {
    match handle.join() {
        Ok(consumer) => Some(consumer),
        Err(panic_info) => {
            let msg = panic_info
                .downcast_ref::<&str>()
                .copied()
                .or_else(|| panic_info.downcast_ref::<String>().map(|s| s.as_str()))
                .unwrap_or("unknown panic");
            tracing::error!(panic = msg, "processing thread panicked");
            None
        }
    }
}

/// The processing thread.
struct Worker {
    consumer: FrameConsumer,
    commands: Receiver<Command>,
    classifier: Arc<Mutex<FrameClassifier>>,
    shared: Arc<Shared>,
    running: Arc<AtomicBool>,
    sink: Arc<dyn AudioSink>,
    beep: Option<Vec<i16>>,
    sample_rate: u32,
    threshold: f32,
    wake_hop: usize,
    poll_interval: Duration,
}

impl Worker {
    fn run(self, start: Start) -> FrameConsumer {
        if let Err(e) = self.serve(start) {
            tracing::error!(error = %e, "capture session failed");
            self.shared.fail(Some(e));
        }
        // Unanswered requests are dropped; their callers see the disconnect.
        while self.commands.try_recv().is_ok() {}
        self.consumer
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn serve(&self, start: Start) -> Result<()> {
        let mut pending = match start {
            Start::Wake => self.listen()?,
            Start::Parked => None,
        };
        loop {
            let command = match pending.take() {
                Some(command) => command,
                None => match self.next_command()? {
                    Some(command) => command,
                    None => return Ok(()),
                },
            };
            let Command::Record {
                limits,
                deadline,
                reply,
            } = command;
            let result = self.record(limits, deadline);
            self.shared.end_recording();
            match result {
                Ok(recording) => {
                    self.shared.publish(SessionState::Finished);
                    if reply.send(Ok(recording)).is_err() {
                        tracing::debug!("recording caller went away");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "recording failed");
                    self.shared.fail(None);
                    if reply.send(Err(e)).is_err() {
                        tracing::debug!("recording caller went away");
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Wake phase. Returns the record request that preempted it, if any.
    fn listen(&self) -> Result<Option<Command>> {
        let mut wake = WakeWordLoop::new(self.threshold).with_hop(self.wake_hop);
        wake.arm();
        tracing::info!(
            threshold = self.threshold,
            hop = self.wake_hop,
            "listening for wake word"
        );

        while self.is_running() {
            match self.commands.try_recv() {
                Ok(command) => {
                    wake.disarm();
                    tracing::info!(
                        frames = wake.frames_seen(),
                        "manual activation, skipping wake word"
                    );
                    return Ok(Some(command));
                }
                Err(TryRecvError::Empty) => {}
                Err(TryRecvError::Disconnected) => return Ok(None),
            }

            match self.consumer.poll(self.poll_interval)? {
                Poll::Frame(frame) => {
                    let detection = {
                        let mut classifier = lock(&self.classifier);
                        wake.on_frame(&frame, &mut classifier)?
                    };
                    if let Some(detection) = detection {
                        self.acknowledge();
                        self.shared.trigger(detection);
                        return Ok(None);
                    }
                }
                Poll::Empty => {}
                Poll::Closed => {
                    tracing::info!(
                        frames = wake.frames_seen(),
                        best_score = wake.best_score(),
                        "frame source ended before the wake word"
                    );
                    self.shared.publish(SessionState::Finished);
                    return Ok(None);
                }
            }
        }
        Ok(None)
    }

    fn acknowledge(&self) {
        if let Some(tone) = &self.beep
            && let Err(e) = self.sink.play(tone, self.sample_rate)
        {
            tracing::warn!(error = %e, "failed to play acknowledgment beep");
        }
    }

    /// Parked: wait for a record request without touching the queue.
    fn next_command(&self) -> Result<Option<Command>> {
        while self.is_running() {
            if self.consumer.gate().has_overflowed() {
                return Err(HeyvoxError::QueueOverflow {
                    depth: self.consumer.depth(),
                });
            }
            match self.commands.recv_timeout(self.poll_interval) {
                Ok(command) => return Ok(Some(command)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return Ok(None),
            }
        }
        Ok(None)
    }

    fn record(&self, limits: Endpointing, deadline: Option<Instant>) -> Result<Recording> {
        self.shared.publish(SessionState::Recording);
        tracing::info!(
            silence_frames = limits.silence_frames,
            max_frames = limits.max_frames,
            "recording utterance"
        );
        let mut recorder = UtteranceRecorder::new(limits, self.sample_rate);

        while !recorder.is_finished() {
            if !self.is_running() {
                recorder.finish(FinishReason::Cancelled);
                break;
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                recorder.finish(FinishReason::MaxDuration);
                break;
            }
            match self.consumer.poll(self.poll_interval)? {
                Poll::Frame(frame) => {
                    let mut classifier = lock(&self.classifier);
                    recorder.feed(frame, &mut classifier)?;
                }
                Poll::Empty => {}
                Poll::Closed => recorder.finish(FinishReason::SourceEnded),
            }
        }

        let recording = recorder.finalize();
        match &recording {
            Recording::Complete(buffer) => tracing::info!(
                frames = buffer.len(),
                voiced = buffer.voiced_frames(),
                duration_ms = buffer.duration().as_millis() as u64,
                reason = ?buffer.reason(),
                "utterance finalized"
            ),
            Recording::Empty { reason } => {
                tracing::info!(reason = ?reason, "no speech in recording")
            }
        }
        Ok(recording)
    }
}

/// Controller for one input device.
///
/// All methods take `&self`, so one thread can block in `wait_for_wake_word`
/// or `record_utterance` while another calls `stop_listening`.
pub struct CaptureSession {
    config: CaptureConfig,
    opener: Arc<dyn SourceOpener>,
    classifier: Arc<Mutex<FrameClassifier>>,
    sink: Arc<dyn AudioSink>,
    beep: bool,
    next_id: AtomicU64,
    active: Mutex<Option<ActiveSession>>,
}

impl CaptureSession {
    /// Validate `config` and build an idle controller.
    pub fn new(
        config: CaptureConfig,
        opener: impl SourceOpener + 'static,
        classifier: FrameClassifier,
        sink: impl AudioSink + 'static,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            opener: Arc::new(opener),
            classifier: Arc::new(Mutex::new(classifier)),
            sink: Arc::new(sink),
            beep: true,
            next_id: AtomicU64::new(0),
            active: Mutex::new(None),
        })
    }

    /// Enable or disable the acknowledgment beep (default on).
    pub fn with_beep(mut self, enabled: bool) -> Self {
        self.beep = enabled;
        self
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        match lock(&self.active).as_ref() {
            Some(session) => session.shared.status().state,
            None => SessionState::Idle,
        }
    }

    /// True while a session holds the device and has not failed.
    pub fn is_listening(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .is_some_and(|session| !session.is_failed())
    }

    /// The detection that triggered the current session, if any.
    pub fn detection(&self) -> Option<Detection> {
        lock(&self.active)
            .as_ref()
            .and_then(|session| session.shared.status().detection)
    }

    /// Name of the device held by the current session.
    pub fn device_name(&self) -> Option<String> {
        lock(&self.active)
            .as_ref()
            .map(|session| session.source.device_name().to_string())
    }

    /// Open the Frame Source and arm the wake-word loop.
    ///
    /// Fails with `AlreadyListening` while a session is active. A session that
    /// failed on its own is discarded first.
    pub fn start_listening(&self) -> Result<()> {
        let mut active = lock(&self.active);
        if let Some(session) = active.as_ref()
            && !session.is_failed()
        {
            return Err(HeyvoxError::AlreadyListening);
        }
        if let Some(stale) = active.take() {
            tracing::warn!("discarding failed capture session");
            stale.shutdown();
        }
        *active = Some(self.open(Start::Wake)?);
        Ok(())
    }

    /// Block until the wake word is detected or `timeout` elapses.
    ///
    /// Returns `false` on timeout, without tearing the session down; also
    /// `false` when no session is listening, when `stop_listening` cancels the
    /// wait, when `record_utterance` activated the session manually, and when
    /// a finite source runs out. A session failure (for instance
    /// `QueueOverflow`) is returned as the error and the controller goes idle.
    ///
    /// `Duration::MAX` waits without a deadline.
    pub fn wait_for_wake_word(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now().checked_add(timeout);
        let (id, shared) = match lock(&self.active).as_ref() {
            Some(session) => (session.id, Arc::clone(&session.shared)),
            None => return Ok(false),
        };

        let outcome = {
            let mut status = shared.status();
            loop {
                if status.cancelled {
                    break Ok(false);
                }
                if status.failed {
                    let failure = status.failure.take();
                    break Err(failure.unwrap_or_else(|| {
                        HeyvoxError::Other("capture session failed".to_string())
                    }));
                }
                if status.detection.is_some() {
                    break Ok(true);
                }
                if status.state != SessionState::Armed {
                    break Ok(false);
                }
                status = match deadline {
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break Ok(false);
                        }
                        match shared.changed.wait_timeout(status, deadline - now) {
                            Ok((guard, _)) => guard,
                            Err(poisoned) => poisoned.into_inner().0,
                        }
                    }
                    None => match shared.changed.wait(status) {
                        Ok(guard) => guard,
                        Err(poisoned) => poisoned.into_inner(),
                    },
                };
            }
        };

        if outcome.is_err() {
            self.discard(id);
        }
        outcome
    }

    /// Stop the Frame Source, join the processing thread and drain the queue.
    ///
    /// Safe from any state and idempotent. Once this returns, no frame
    /// callback runs for the stopped session.
    pub fn stop_listening(&self) {
        let session = lock(&self.active).take();
        if let Some(session) = session {
            session.shutdown();
        }
    }

    /// Record one utterance and return it once endpointing finishes.
    ///
    /// Uses the open session if there is one (interrupting the wake-word loop
    /// if it is still armed); otherwise opens a transient session and stops it
    /// afterwards. Blocks for at most about `max_duration`; `Duration::MAX`
    /// records until silence or `stop_listening`. A concurrent
    /// `stop_listening` finalizes the recording with what was captured, and a
    /// second `record_utterance` while one is pending is rejected.
    pub fn record_utterance(
        &self,
        max_duration: Duration,
        silence_timeout: Duration,
    ) -> Result<Recording> {
        let entered = Instant::now();
        if max_duration.is_zero() || silence_timeout.is_zero() {
            return Err(HeyvoxError::InvalidConfig {
                key: "record_utterance".to_string(),
                message: "durations must be positive".to_string(),
            });
        }
        let limits = self.config.endpointing_for(max_duration, silence_timeout);
        let deadline = entered.checked_add(max_duration);

        let (id, commands, shared, transient) = {
            let mut active = lock(&self.active);
            if let Some(session) = active.as_ref()
                && session.is_failed()
            {
                let failure = session.shared.take_failure();
                if let Some(stale) = active.take() {
                    stale.shutdown();
                }
                return Err(failure);
            }
            let transient = active.is_none();
            if transient {
                *active = Some(self.open(Start::Parked)?);
            }
            let Some(session) = active.as_ref() else {
                return Err(HeyvoxError::Other("capture session vanished".to_string()));
            };
            if !session.shared.begin_recording() {
                return Err(HeyvoxError::Other(
                    "a recording is already in progress".to_string(),
                ));
            }
            (
                session.id,
                session.commands.clone(),
                Arc::clone(&session.shared),
                transient,
            )
        };

        let (reply, result_rx) = crossbeam_channel::bounded(1);
        let command = Command::Record {
            limits,
            deadline,
            reply,
        };
        let result = match commands.try_send(command) {
            Ok(()) => {
                drop(commands);
                self.await_recording(&result_rx, &shared, deadline)
            }
            Err(TrySendError::Full(_)) => {
                shared.end_recording();
                Err(HeyvoxError::Other(
                    "a recording is already in progress".to_string(),
                ))
            }
            Err(TrySendError::Disconnected(_)) => {
                shared.end_recording();
                ended_without_reply(&shared)
            }
        };

        let fatal = matches!(&result, Err(e) if e.is_session_fatal());
        if transient || fatal {
            self.discard(id);
        }
        result
    }

    fn await_recording(
        &self,
        result_rx: &Receiver<Result<Recording>>,
        shared: &Shared,
        deadline: Option<Instant>,
    ) -> Result<Recording> {
        let grace = self
            .config
            .poll_interval
            .saturating_mul(4)
            .saturating_add(Duration::from_millis(250));
        let hard_deadline = deadline.and_then(|deadline| deadline.checked_add(grace));
        loop {
            match result_rx.recv_timeout(self.config.poll_interval) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Disconnected) => return ended_without_reply(shared),
                Err(RecvTimeoutError::Timeout) => {
                    if shared.status().failed {
                        return match result_rx.try_recv() {
                            Ok(result) => result,
                            Err(_) => Err(shared.take_failure()),
                        };
                    }
                    if hard_deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                        return Err(HeyvoxError::Other(
                            "recorder did not finish before its deadline".to_string(),
                        ));
                    }
                }
            }
        }
    }

    /// Shut down the session `id` if it is still the active one.
    fn discard(&self, id: u64) {
        let session = {
            let mut active = lock(&self.active);
            if active.as_ref().is_some_and(|session| session.id == id) {
                active.take()
            } else {
                None
            }
        };
        if let Some(session) = session {
            session.shutdown();
        }
    }

    fn open(&self, start: Start) -> Result<ActiveSession> {
        let source = self.opener.open(&self.config)?;
        let device = source.device_name().to_string();
        let (producer, consumer) = queue::bounded(self.config.queue_depth);
        let gate = Arc::clone(producer.gate());

        lock(&self.classifier).begin_session(&self.config);

        let shared = Arc::new(Shared::new(match start {
            Start::Wake => SessionState::Armed,
            Start::Parked => SessionState::Recording,
        }));
        let running = Arc::new(AtomicBool::new(true));
        let (commands, command_rx) = crossbeam_channel::bounded(1);

        let worker = Worker {
            consumer,
            commands: command_rx,
            classifier: Arc::clone(&self.classifier),
            shared: Arc::clone(&shared),
            running: Arc::clone(&running),
            sink: Arc::clone(&self.sink),
            beep: self.beep.then(|| beep(self.config.sample_rate)),
            sample_rate: self.config.sample_rate,
            threshold: self.config.wake_threshold,
            wake_hop: self.config.wake_hop,
            poll_interval: self.config.poll_interval,
        };
        let handle = thread::Builder::new()
            .name("heyvox-session".to_string())
            .spawn(move || worker.run(start))
            .map_err(|e| HeyvoxError::AudioCapture {
                message: format!("Failed to spawn processing thread: {}", e),
            })?;

        let mut session = ActiveSession {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            source,
            gate,
            running,
            commands,
            shared,
            worker: Some(handle),
        };

        let on_frame: FrameCallback = Box::new(move |frame| {
            producer.push(frame);
        });
        if let Err(e) = session.source.start(on_frame) {
            session.shutdown();
            return Err(e);
        }
        tracing::info!(device = %device, mode = ?start, "capture session started");
        Ok(session)
    }
}

fn ended_without_reply(shared: &Shared) -> Result<Recording> {
    if shared.status().failed {
        Err(shared.take_failure())
    } else {
        Ok(Recording::Empty {
            reason: FinishReason::Cancelled,
        })
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::RecordingSink;
    use crate::audio::source::MockSourceOpener;
    use crate::classify::mock::{RecordingVad, ScriptedScorer};

    fn test_config() -> CaptureConfig {
        CaptureConfig {
            poll_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn controller(
        opener: &MockSourceOpener,
        scorer: &ScriptedScorer,
        sink: &RecordingSink,
    ) -> CaptureSession {
        let classifier =
            FrameClassifier::new(Box::new(RecordingVad::new(100)), Box::new(scorer.clone()));
        CaptureSession::new(test_config(), opener.clone(), classifier, sink.clone()).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let config = CaptureConfig {
            wake_threshold: 2.0,
            ..Default::default()
        };
        let classifier = FrameClassifier::new(
            Box::new(RecordingVad::new(100)),
            Box::new(ScriptedScorer::new(vec![])),
        );
        let result = CaptureSession::new(
            config,
            MockSourceOpener::new(),
            classifier,
            RecordingSink::new(),
        );
        assert!(matches!(result, Err(HeyvoxError::InvalidConfig { .. })));
    }

    #[test]
    fn test_idle_until_started() {
        let opener = MockSourceOpener::new().with_devices(&["session-idle"]);
        let session = controller(&opener, &ScriptedScorer::new(vec![]), &RecordingSink::new());
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.is_listening());
        assert_eq!(opener.opened(), 0);
        assert!(!session.wait_for_wake_word(Duration::ZERO).unwrap());
    }

    #[test]
    fn test_start_arms_and_second_start_fails() {
        let opener = MockSourceOpener::new()
            .with_devices(&["session-already"])
            .then_silence()
            .with_interval(Duration::from_millis(2));
        let session = controller(&opener, &ScriptedScorer::new(vec![]), &RecordingSink::new());

        session.start_listening().unwrap();
        assert_eq!(session.state(), SessionState::Armed);
        assert_eq!(session.device_name().as_deref(), Some("session-already"));
        assert!(matches!(
            session.start_listening(),
            Err(HeyvoxError::AlreadyListening)
        ));
        assert_eq!(opener.opened(), 1);

        session.stop_listening();
        assert_eq!(session.state(), SessionState::Idle);
        session.start_listening().unwrap();
        session.stop_listening();
        assert_eq!(opener.opened(), 2);
    }

    #[test]
    fn test_wait_times_out_without_teardown() {
        let opener = MockSourceOpener::new()
            .with_devices(&["session-timeout"])
            .then_silence()
            .with_interval(Duration::from_millis(2));
        let session = controller(&opener, &ScriptedScorer::new(vec![]), &RecordingSink::new());
        session.start_listening().unwrap();

        let started = Instant::now();
        assert!(!session.wait_for_wake_word(Duration::from_millis(50)).unwrap());
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(session.is_listening());
        assert_eq!(session.state(), SessionState::Armed);
        session.stop_listening();
    }

    #[test]
    fn test_trigger_then_record_in_same_session() {
        // 3 voiced frames score low, the 4th triggers; then speech and silence
        let opener = MockSourceOpener::new()
            .with_devices(&["session-cycle"])
            .with_frames(4, 1000)
            .with_frames(10, 1000)
            .with_frames(40, 0);
        let scorer = ScriptedScorer::new(vec![0.1, 0.2, 0.3, 0.9]);
        let sink = RecordingSink::new();
        let session = controller(&opener, &scorer, &sink);

        session.start_listening().unwrap();
        assert!(session.wait_for_wake_word(Duration::from_secs(2)).unwrap());
        assert_eq!(session.state(), SessionState::Triggered);
        assert_eq!(session.detection().map(|d| d.sequence), Some(3));
        assert_eq!(sink.plays(), vec![(1600, 16000)]);

        let recording = session
            .record_utterance(Duration::from_secs(5), Duration::from_millis(300))
            .unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        let buffer = recording.into_buffer().expect("speech was recorded");
        assert_eq!(buffer.reason(), FinishReason::Silence);
        assert_eq!(buffer.voiced_frames(), 10);
        assert_eq!(buffer.sequence_range(), Some((4, 23)));
        assert_eq!(scorer.calls(), 4);

        session.stop_listening();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_record_without_session_is_transient() {
        let opener = MockSourceOpener::new()
            .with_devices(&["session-transient"])
            .with_frames(5, 0)
            .with_frames(8, 2000)
            .with_frames(30, 0);
        let session = controller(&opener, &ScriptedScorer::new(vec![]), &RecordingSink::new());

        let recording = session
            .record_utterance(Duration::from_secs(5), Duration::from_millis(300))
            .unwrap();
        let buffer = recording.into_buffer().expect("speech was recorded");
        assert_eq!(buffer.voiced_frames(), 8);
        assert_eq!(buffer.sequence_range().map(|r| r.0), Some(5));

        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(opener.opened(), 1);
        assert_eq!(opener.stopped(), 1);
        assert!(!crate::audio::device::is_claimed("session-transient"));
    }

    #[test]
    fn test_record_preempts_armed_wake_loop() {
        let opener = MockSourceOpener::new()
            .with_devices(&["session-manual"])
            .with_frames(6, 1500)
            .with_frames(30, 0)
            .with_interval(Duration::from_millis(1));
        let scorer = ScriptedScorer::new(vec![]);
        let sink = RecordingSink::new();
        let session = controller(&opener, &scorer, &sink);

        session.start_listening().unwrap();
        let recording = session
            .record_utterance(Duration::from_secs(5), Duration::from_millis(300))
            .unwrap();
        assert!(!recording.is_empty() || recording.reason() == FinishReason::SourceEnded);
        assert_eq!(sink.count(), 0);
        assert!(session.detection().is_none());
        assert!(!session.wait_for_wake_word(Duration::ZERO).unwrap());
        session.stop_listening();
    }

    #[test]
    fn test_stop_is_idempotent() {
        let opener = MockSourceOpener::new()
            .with_devices(&["session-stop-twice"])
            .then_silence()
            .with_interval(Duration::from_millis(1));
        let session = controller(&opener, &ScriptedScorer::new(vec![]), &RecordingSink::new());

        session.stop_listening();
        session.start_listening().unwrap();
        session.stop_listening();
        session.stop_listening();
        assert_eq!(opener.stopped(), 1);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!crate::audio::device::is_claimed("session-stop-twice"));
    }

    #[test]
    fn test_scorer_failure_is_reported_and_session_goes_idle() {
        let opener = MockSourceOpener::new()
            .with_devices(&["session-scorer-failure"])
            .with_frames(3, 1000)
            .then_silence()
            .with_interval(Duration::from_millis(1));
        let scorer = ScriptedScorer::new(vec![]).with_failure();
        let session = controller(&opener, &scorer, &RecordingSink::new());

        session.start_listening().unwrap();
        match session.wait_for_wake_word(Duration::from_secs(2)) {
            Err(HeyvoxError::WakeWordScorer { message }) => {
                assert_eq!(message, "mock scorer failure")
            }
            other => panic!("Expected WakeWordScorer error, got {:?}", other),
        }
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!crate::audio::device::is_claimed("session-scorer-failure"));
        // restartable
        session.start_listening().unwrap();
        session.stop_listening();
    }

    #[test]
    fn test_source_start_failure_releases_device() {
        let opener = MockSourceOpener::new()
            .with_devices(&["session-start-failure"])
            .with_start_failure();
        let session = controller(&opener, &ScriptedScorer::new(vec![]), &RecordingSink::new());

        assert!(matches!(
            session.start_listening(),
            Err(HeyvoxError::AudioCapture { .. })
        ));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!crate::audio::device::is_claimed("session-start-failure"));
    }

    #[test]
    fn test_finite_source_ending_before_wake_word() {
        let opener = MockSourceOpener::new()
            .with_devices(&["session-exhausted"])
            .with_frames(5, 0);
        let session = controller(&opener, &ScriptedScorer::new(vec![]), &RecordingSink::new());

        session.start_listening().unwrap();
        assert!(!session.wait_for_wake_word(Duration::from_secs(2)).unwrap());
        assert_eq!(session.state(), SessionState::Finished);

        let recording = session
            .record_utterance(Duration::from_secs(1), Duration::from_millis(300))
            .unwrap();
        assert!(matches!(
            recording,
            Recording::Empty {
                reason: FinishReason::SourceEnded
            }
        ));
        session.stop_listening();
    }

    #[test]
    fn test_rejects_zero_record_durations() {
        let opener = MockSourceOpener::new().with_devices(&["session-zero"]);
        let session = controller(&opener, &ScriptedScorer::new(vec![]), &RecordingSink::new());
        assert!(
            session
                .record_utterance(Duration::ZERO, Duration::from_millis(300))
                .is_err()
        );
        assert_eq!(opener.opened(), 0);
    }

    #[test]
    fn test_drop_stops_session() {
        let opener = MockSourceOpener::new()
            .with_devices(&["session-drop"])
            .then_silence()
            .with_interval(Duration::from_millis(1));
        {
            let session =
                controller(&opener, &ScriptedScorer::new(vec![]), &RecordingSink::new());
            session.start_listening().unwrap();
        }
        assert_eq!(opener.stopped(), 1);
        assert!(!crate::audio::device::is_claimed("session-drop"));
    }
}
