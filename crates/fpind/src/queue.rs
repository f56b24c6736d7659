//! Bounded FIFO of frames waiting for the consumer.
//!
//! The receiver pushes from a blocking thread; the consumer awaits on the
//! async side. Order of arrival is preserved.

use crate::frame::NotificationFrame;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Attempts made to enqueue a frame before it is dropped.
pub const ENQUEUE_ATTEMPTS: usize = 3;

/// Pause between enqueue attempts while the queue is full.
const ENQUEUE_RETRY_DELAY: Duration = Duration::from_millis(5);

/// Default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum EnqueueError {
    /// The queue stayed full; the frame was dropped.
    #[error("frame queue full after {attempts} attempts")]
    Full { attempts: usize },

    /// The consumer side is gone.
    #[error("frame queue closed")]
    Closed,
}

/// Creates a frame queue holding at most `capacity` pending frames.
pub fn frame_queue(capacity: usize) -> (FrameSender, FrameReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (FrameSender { tx }, FrameReceiver { rx })
}

/// Producer half, used from the receiver's blocking thread.
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<NotificationFrame>,
}

impl FrameSender {
    /// Appends a frame, retrying while the queue is full.
    ///
    /// Never blocks for longer than the retry delays. The frame is dropped
    /// when every attempt finds the queue full.
    pub fn enqueue(&self, frame: NotificationFrame) -> Result<(), EnqueueError> {
        let mut frame = frame;
        for attempt in 1..=ENQUEUE_ATTEMPTS {
            match self.tx.try_send(frame) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(_)) => return Err(EnqueueError::Closed),
                Err(TrySendError::Full(returned)) => {
                    frame = returned;
                    if attempt < ENQUEUE_ATTEMPTS {
                        std::thread::sleep(ENQUEUE_RETRY_DELAY);
                    }
                }
            }
        }
        Err(EnqueueError::Full {
            attempts: ENQUEUE_ATTEMPTS,
        })
    }

    /// Number of frames currently waiting.
    pub fn pending(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

/// Consumer half.
#[derive(Debug)]
pub struct FrameReceiver {
    rx: mpsc::Receiver<NotificationFrame>,
}

impl FrameReceiver {
    /// Waits for the next frame; `None` once every sender is gone and the
    /// queue is drained.
    pub async fn dequeue(&mut self) -> Option<NotificationFrame> {
        self.rx.recv().await
    }

    /// Takes the next frame without waiting.
    pub fn try_dequeue(&mut self) -> Option<NotificationFrame> {
        self.rx.try_recv().ok()
    }
}
