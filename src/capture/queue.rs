//! Bounded hand-off queue between the capture thread and the processing thread.
//!
//! Each frame is moved through the channel, so it is owned by exactly one
//! side at any time. The queue never drops a frame to make room: when it is
//! full the producer marks the queue overflowed and stops enqueueing, and
//! the consumer fails with `QueueOverflow` on its next poll.

use crate::audio::frame::AudioFrame;
use crate::error::{HeyvoxError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Flags shared by both ends of the queue.
#[derive(Debug)]
pub struct QueueGate {
    open: AtomicBool,
    overflowed: AtomicBool,
}

impl QueueGate {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            overflowed: AtomicBool::new(false),
        }
    }

    /// Stop accepting frames. Checked by the producer before every enqueue.
    pub fn close(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn has_overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }
}

/// What happened to a frame offered to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Push {
    Queued,
    /// The session is no longer listening; the frame was not enqueued.
    Closed,
    /// The queue was full. The gate is now closed and the session has failed.
    Overflow,
}

/// Capture-thread end. Never blocks.
#[derive(Debug)]
pub struct FrameProducer {
    tx: Sender<AudioFrame>,
    gate: Arc<QueueGate>,
}

impl FrameProducer {
    pub fn push(&self, frame: AudioFrame) -> Push {
        if !self.gate.is_open() {
            return Push::Closed;
        }
        match self.tx.try_send(frame) {
            Ok(()) => Push::Queued,
            Err(TrySendError::Full(_)) => {
                self.gate.overflowed.store(true, Ordering::Release);
                self.gate.close();
                Push::Overflow
            }
            Err(TrySendError::Disconnected(_)) => {
                self.gate.close();
                Push::Closed
            }
        }
    }

    pub fn gate(&self) -> &Arc<QueueGate> {
        &self.gate
    }
}

/// Result of one bounded wait on the queue.
#[derive(Debug)]
pub enum Poll {
    Frame(AudioFrame),
    /// Nothing arrived within the poll interval.
    Empty,
    /// The producer is gone and the queue is drained.
    Closed,
}

/// Processing-thread end.
#[derive(Debug)]
pub struct FrameConsumer {
    rx: Receiver<AudioFrame>,
    gate: Arc<QueueGate>,
    depth: usize,
}

impl FrameConsumer {
    /// Wait up to `timeout` for the next frame.
    ///
    /// Fails with `QueueOverflow` as soon as the producer has reported an
    /// overflow, even if frames are still queued.
    pub fn poll(&self, timeout: Duration) -> Result<Poll> {
        if self.gate.has_overflowed() {
            return Err(HeyvoxError::QueueOverflow { depth: self.depth });
        }
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Poll::Frame(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(Poll::Empty),
            Err(RecvTimeoutError::Disconnected) => {
                if self.gate.has_overflowed() {
                    Err(HeyvoxError::QueueOverflow { depth: self.depth })
                } else {
                    Ok(Poll::Closed)
                }
            }
        }
    }

    /// Discard everything still queued. Returns the number of frames dropped.
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn gate(&self) -> &Arc<QueueGate> {
        &self.gate
    }
}

/// Create a queue holding at most `depth` frames.
pub fn bounded(depth: usize) -> (FrameProducer, FrameConsumer) {
    let depth = depth.max(1);
    let (tx, rx) = crossbeam_channel::bounded(depth);
    let gate = Arc::new(QueueGate::new());
    (
        FrameProducer {
            tx,
            gate: Arc::clone(&gate),
        },
        FrameConsumer { rx, gate, depth },
    )
}
