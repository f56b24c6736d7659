//! Notification consumer
//!
//! Takes frames off the queue one at a time, in arrival order, and runs the
//! processing pipeline on each: decode, resolve, evaluate, act.

use crate::actuator::{Actuator, DeviceAction};
use crate::decoder::decode;
use crate::error::Result;
use crate::frame::NotificationFrame;
use crate::queue::FrameReceiver;
use crate::resolver::{Resolution, resolve};
use crate::topology::DeviceTopology;
use fc_types::PortWwn;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// Attempts made to run the pipeline on one frame.
pub const PIPELINE_ATTEMPTS: usize = 3;

/// How a processing cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The frame names no impacted ports.
    NotActionable,
    /// No local HBA has the origin port name.
    NoHost,
    /// No target behind the HBA is impacted.
    NoTargets,
    /// The host has no multipath maps.
    NoMultipath,
    /// Impacted devices were evaluated.
    Completed(Vec<DeviceAction>),
}

/// Summary of one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub origin: PortWwn,
    /// Pipeline runs, including the successful one
    pub attempts: usize,
    /// `None` when every attempt failed or the frame was malformed
    pub outcome: Option<CycleOutcome>,
}

impl CycleReport {
    pub fn paths_failed(&self) -> usize {
        self.actions().iter().filter(|a| a.is_failed()).count()
    }

    pub fn paths_skipped(&self) -> usize {
        self.actions().iter().filter(|a| !a.is_failed()).count()
    }

    fn actions(&self) -> &[DeviceAction] {
        match &self.outcome {
            Some(CycleOutcome::Completed(actions)) => actions,
            _ => &[],
        }
    }
}

/// Cumulative consumer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub paths_failed: u64,
    pub paths_skipped: u64,
}

impl ConsumerStats {
    fn record(&mut self, report: &CycleReport) {
        if report.outcome.is_some() {
            self.frames_processed += 1;
        } else {
            self.frames_dropped += 1;
        }
        self.paths_failed += report.paths_failed() as u64;
        self.paths_skipped += report.paths_skipped() as u64;
    }
}

/// Decode, resolve and act on one frame.
#[derive(Clone)]
pub struct Pipeline {
    topology: Arc<dyn DeviceTopology>,
    actuator: Actuator,
}

impl Pipeline {
    pub fn new(topology: Arc<dyn DeviceTopology>, actuator: Actuator) -> Self {
        Self { topology, actuator }
    }

    /// Runs one pass of the pipeline.
    ///
    /// Returns `Err` only for stage failures (topology enumeration, I/O);
    /// irrelevant events are reported as outcomes.
    #[instrument(skip(self, frame), fields(origin = %frame.origin(), command = %frame.command()))]
    pub async fn process(&self, frame: &NotificationFrame) -> Result<CycleOutcome> {
        let Some(impacted) = decode(frame)? else {
            return Ok(CycleOutcome::NotActionable);
        };

        // The cycle topology is owned here and dropped on every return path.
        let cycle = match resolve(self.topology.as_ref(), &impacted)? {
            Resolution::NoHost => return Ok(CycleOutcome::NoHost),
            Resolution::NoTargets => return Ok(CycleOutcome::NoTargets),
            Resolution::NoMultipath => return Ok(CycleOutcome::NoMultipath),
            Resolution::Resolved(cycle) => cycle,
        };

        Ok(CycleOutcome::Completed(self.actuator.act(&cycle).await))
    }
}

/// Long-lived consumer task.
pub struct Consumer {
    queue: FrameReceiver,
    pipeline: Pipeline,
    stats: ConsumerStats,
}

impl Consumer {
    pub fn new(queue: FrameReceiver, pipeline: Pipeline) -> Self {
        Self {
            queue,
            pipeline,
            stats: ConsumerStats::default(),
        }
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats
    }

    /// Processes frames until the queue is closed and drained.
    pub async fn run(mut self) -> ConsumerStats {
        info!("Consumer started");
        while let Some(frame) = self.queue.dequeue().await {
            self.handle_frame(frame).await;
        }
        info!(
            processed = self.stats.frames_processed,
            dropped = self.stats.frames_dropped,
            "Frame queue closed, consumer stopping"
        );
        self.stats
    }

    /// Runs the pipeline on one frame, retrying stage failures.
    pub async fn handle_frame(&mut self, frame: NotificationFrame) -> CycleReport {
        let origin = frame.origin();
        let mut attempts = 0;
        let mut outcome = None;

        while attempts < PIPELINE_ATTEMPTS {
            attempts += 1;
            match self.pipeline.process(&frame).await {
                Ok(result) => {
                    outcome = Some(result);
                    break;
                }
                Err(e) if e.is_retryable() && attempts < PIPELINE_ATTEMPTS => {
                    warn!(origin = %origin, attempt = attempts, error = %e, "Pipeline stage failed, retrying");
                }
                Err(e) if e.is_retryable() => {
                    error!(origin = %origin, attempts, error = %e, "Pipeline failed, dropping notification");
                }
                Err(e) => {
                    warn!(origin = %origin, error = %e, "Dropping malformed notification");
                    break;
                }
            }
        }

        let report = CycleReport {
            origin,
            attempts,
            outcome,
        };
        self.stats.record(&report);
        log_report(&report);
        report
    }
}

fn log_report(report: &CycleReport) {
    match &report.outcome {
        Some(CycleOutcome::Completed(_)) => info!(
            origin = %report.origin,
            failed = report.paths_failed(),
            skipped = report.paths_skipped(),
            "Cycle complete"
        ),
        Some(outcome) => debug!(origin = %report.origin, outcome = ?outcome, "Nothing to act on"),
        None => {}
    }
}
