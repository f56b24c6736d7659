//! Failover actuation
//!
//! For each impacted disk: find its multipath map, count the map's active
//! paths, and fail the disk's path only if another active path remains.
//! Devices are handled independently; a failure on one never stops the
//! others and nothing is rolled back.

use crate::flush::FlushNotifier;
use crate::multipath::{MultipathControl, active_path_count};
use crate::resolver::{CycleTopology, ImpactedDeviceRecord};
use std::fmt;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Why a device was left alone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No multipath map owns the disk.
    NoMultipathMap,
    /// The map status could not be read.
    StatusUnavailable(String),
    /// Failing the path would leave the map without an active path.
    NotEnoughActivePaths(usize),
    /// The control plane refused to fail the path.
    FailPathRejected(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoMultipathMap => write!(f, "no multipath map"),
            SkipReason::StatusUnavailable(e) => write!(f, "map status unavailable: {}", e),
            SkipReason::NotEnoughActivePaths(n) => write!(f, "not enough active paths ({})", n),
            SkipReason::FailPathRejected(e) => write!(f, "fail path rejected: {}", e),
        }
    }
}

/// What was done to one impacted device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAction {
    /// The path was failed.
    Failed {
        device: String,
        map: String,
        /// Active paths before the path was failed
        active_paths: usize,
        /// Whether the transport accepted the flush request
        flushed: bool,
    },
    Skipped { device: String, reason: SkipReason },
}

impl DeviceAction {
    pub fn is_failed(&self) -> bool {
        matches!(self, DeviceAction::Failed { .. })
    }
}

/// Fails paths through the multipath control plane and requests I/O
/// flushes from the transport.
#[derive(Clone)]
pub struct Actuator {
    control: Arc<dyn MultipathControl>,
    flush: Arc<dyn FlushNotifier>,
}

impl Actuator {
    pub fn new(control: Arc<dyn MultipathControl>, flush: Arc<dyn FlushNotifier>) -> Self {
        Self { control, flush }
    }

    /// Acts on every impacted device of the cycle, in resolution order.
    pub async fn act(&self, topology: &CycleTopology) -> Vec<DeviceAction> {
        let mut actions = Vec::with_capacity(topology.devices.len());
        for device in &topology.devices {
            actions.push(self.act_on_device(topology, device).await);
        }
        actions
    }

    #[instrument(skip(self, topology, device), fields(device = %device.name, devnum = %device.devnum))]
    async fn act_on_device(
        &self,
        topology: &CycleTopology,
        device: &ImpactedDeviceRecord,
    ) -> DeviceAction {
        let skip = |reason: SkipReason| DeviceAction::Skipped {
            device: device.name.clone(),
            reason,
        };

        let Some(map) = topology.map_for(device) else {
            warn!(serial = %device.serial, "Impacted disk is not part of a multipath map");
            return skip(SkipReason::NoMultipathMap);
        };

        let status = match self.control.map_status(&map.name).await {
            Ok(status) => status,
            Err(e) => {
                error!(map = %map.name, error = %e, "Failed to read multipath status");
                return skip(SkipReason::StatusUnavailable(e.to_string()));
            }
        };

        let active_paths = active_path_count(&status);
        if active_paths <= 1 {
            warn!(map = %map.name, active_paths, "Not enough active paths, leaving path in service");
            return skip(SkipReason::NotEnoughActivePaths(active_paths));
        }

        if let Err(e) = self.control.fail_path(&device.name).await {
            error!(map = %map.name, error = %e, "Failed to fail path");
            return skip(SkipReason::FailPathRejected(e.to_string()));
        }
        info!(map = %map.name, active_paths, "Path failed");

        let flushed = match self
            .flush
            .flush(&topology.host, topology.host.port, device.target_port)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!(
                    initiator = %topology.host.port,
                    target_port = %device.target_port,
                    error = %e,
                    "I/O flush failed after path was failed"
                );
                false
            }
        };

        DeviceAction::Failed {
            device: device.name.clone(),
            map: map.name.clone(),
            active_paths,
            flushed,
        }
    }
}
