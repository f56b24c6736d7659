//! Notification receiver
//!
//! Pulls raw frames from the transport source, classifies them and pushes
//! FPIN and MPD frames onto the frame queue. Runs on a blocking thread.

use crate::decoder::{Classification, classify};
use crate::error::{FpindError, Result};
use crate::frame::{NotificationFrame, RawFrame};
use crate::queue::{EnqueueError, FrameSender};
use crate::source::FrameSource;
use tracing::{debug, error, info, warn};

/// Counters kept by the receive loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    /// Frames read from the source
    pub received: u64,
    /// Frames handed to the consumer
    pub queued: u64,
    /// Recognised frames that are never acted upon
    pub ignored: u64,
    /// Malformed records and unknown commands
    pub malformed: u64,
    /// Frames lost because the queue stayed full
    pub dropped: u64,
}

/// What happened to one received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Queued,
    Ignored,
    Unknown,
    Dropped,
}

/// Receive loop over an owned frame source.
pub struct Receiver<S> {
    source: S,
    queue: FrameSender,
    stats: ReceiverStats,
}

impl<S: FrameSource> Receiver<S> {
    pub fn new(source: S, queue: FrameSender) -> Self {
        Self {
            source,
            queue,
            stats: ReceiverStats::default(),
        }
    }

    pub fn stats(&self) -> ReceiverStats {
        self.stats
    }

    /// Runs until the source closes.
    ///
    /// Per-frame errors are logged and the loop continues. Returns an error
    /// when the source fails for good or the consumer is gone.
    pub fn run(mut self) -> Result<ReceiverStats> {
        info!(source = %self.source.describe(), "Receiver started");

        loop {
            let raw = match self.source.next_frame() {
                Ok(Some(raw)) => raw,
                Ok(None) => {
                    info!(source = %self.source.describe(), "Notification source closed");
                    return Ok(self.stats);
                }
                Err(e) if e.is_fatal_for_source() => {
                    error!(critical = true, error = %e, "Notification source failed");
                    return Err(e);
                }
                Err(e) => {
                    self.stats.malformed += 1;
                    warn!(error = %e, "Skipping unreadable notification");
                    continue;
                }
            };

            self.handle(raw)?;
        }
    }

    /// Classifies one raw frame and enqueues it if it is actionable.
    pub fn handle(&mut self, raw: RawFrame) -> Result<Disposition> {
        self.stats.received += 1;

        let command = match classify(&raw) {
            Classification::Queue(command) => command,
            Classification::Ignore(command) => {
                self.stats.ignored += 1;
                info!(command = %command, origin = %raw.origin, "Congestion notification ignored");
                return Ok(Disposition::Ignored);
            }
            Classification::Unknown(code) => {
                self.stats.malformed += 1;
                warn!(
                    code = %format!("{:#04x}", code),
                    origin = %raw.origin,
                    "Dropping frame with unknown ELS command"
                );
                return Ok(Disposition::Unknown);
            }
        };

        let origin = raw.origin;
        match self.queue.enqueue(NotificationFrame::new(raw, command)) {
            Ok(()) => {
                self.stats.queued += 1;
                debug!(command = %command, origin = %origin, "Frame queued");
                Ok(Disposition::Queued)
            }
            Err(EnqueueError::Full { attempts }) => {
                self.stats.dropped += 1;
                error!(
                    command = %command,
                    origin = %origin,
                    attempts,
                    "Frame queue full, notification dropped"
                );
                Ok(Disposition::Dropped)
            }
            Err(EnqueueError::Closed) => Err(FpindError::QueueClosed),
        }
    }
}
