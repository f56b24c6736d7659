//! Topology resolution
//!
//! Maps the impacted fabric ports of one notification to local objects:
//! the HBA the frame arrived on, the remote targets behind the impacted
//! ports, and the SCSI disks and multipath maps on those targets.
//!
//! Every collection built here belongs to one processing cycle and is
//! dropped with its [`CycleTopology`].

use crate::decoder::ImpactedWwnSet;
use crate::error::Result;
use crate::topology::{BlockEntry, DeviceTopology};
use fc_types::PortWwn;
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Device-mapper UUID prefix of multipath maps
const MULTIPATH_UUID_PREFIX: &str = "mpath";

/// The local HBA a notification arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FcHostRecord {
    /// Kernel name, e.g. `host6`
    pub name: String,
    /// sysfs path of the `fc_host` class device
    pub syspath: PathBuf,
    pub port: PortWwn,
}

impl FcHostRecord {
    /// SCSI host number parsed from the kernel name.
    pub fn host_number(&self) -> Option<u64> {
        self.name.strip_prefix("host")?.parse().ok()
    }
}

/// A remote target reachable through the matched host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetRecord {
    /// Kernel name, e.g. `target6:0:1`
    pub target: String,
    pub port: PortWwn,
}

/// A device-mapper multipath map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipathDeviceRecord {
    /// Map name, e.g. `mpatha`
    pub name: String,
    /// Kernel node, e.g. `dm-3`
    pub node: String,
    /// `DM_UUID` without its type prefix
    pub unique_id: String,
}

/// A SCSI disk behind an impacted target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpactedDeviceRecord {
    /// Kernel name, e.g. `sdc`
    pub name: String,
    /// `major:minor`
    pub devnum: String,
    pub serial: String,
    /// Port of the target the disk sits behind
    pub target_port: PortWwn,
}

/// Outcome of the block device walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceResolution {
    /// No multipath map exists; any matched disks were discarded.
    NoMultipath { discarded: usize },
    /// At least one multipath map exists.
    Found {
        maps: Vec<MultipathDeviceRecord>,
        devices: Vec<ImpactedDeviceRecord>,
    },
}

/// Everything resolved for one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleTopology {
    pub host: FcHostRecord,
    pub targets: Vec<TargetRecord>,
    pub maps: Vec<MultipathDeviceRecord>,
    pub devices: Vec<ImpactedDeviceRecord>,
}

impl CycleTopology {
    /// Map whose unique id equals the device serial.
    pub fn map_for(&self, device: &ImpactedDeviceRecord) -> Option<&MultipathDeviceRecord> {
        self.maps.iter().find(|m| m.unique_id == device.serial)
    }
}

/// Result of a full resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// No local HBA has the origin port name.
    NoHost,
    /// No target behind the host is in the impacted set.
    NoTargets,
    /// The host has no multipath maps.
    NoMultipath,
    Resolved(CycleTopology),
}

/// Strips the type prefix (up to and including the first `-`) from a
/// device-mapper UUID.
pub fn unique_id_from_dm_uuid(uuid: &str) -> Option<&str> {
    uuid.split_once('-')
        .map(|(_, id)| id)
        .filter(|id| !id.is_empty())
}

/// Finds the local HBA whose port name equals `origin`.
#[instrument(skip(topology))]
pub fn find_host(topology: &dyn DeviceTopology, origin: PortWwn) -> Result<Option<FcHostRecord>> {
    for entry in topology.fc_hosts()? {
        let Some(raw) = entry.port_name.as_deref() else {
            debug!(host = %entry.name, "fc_host without port_name");
            continue;
        };
        let port: PortWwn = match raw.parse() {
            Ok(port) => port,
            Err(e) => {
                warn!(host = %entry.name, error = %e, "Skipping fc_host with unparseable port_name");
                continue;
            }
        };
        if port == origin {
            return Ok(Some(FcHostRecord {
                name: entry.name,
                syspath: entry.syspath,
                port,
            }));
        }
    }
    Ok(None)
}

/// Resolves the host and the impacted targets behind it.
///
/// Returns the matched host (if any) and its impacted targets; the target
/// list is empty when no host matched.
#[instrument(skip(topology, impacted), fields(origin = %impacted.origin()))]
pub fn resolve_targets(
    topology: &dyn DeviceTopology,
    impacted: &ImpactedWwnSet,
) -> Result<(Option<FcHostRecord>, Vec<TargetRecord>)> {
    let Some(host) = find_host(topology, impacted.origin())? else {
        info!("No local HBA matches the notification origin");
        return Ok((None, Vec::new()));
    };

    let mut targets = Vec::new();
    for entry in topology.fc_targets()? {
        if entry.host.as_deref() != Some(host.name.as_str()) {
            continue;
        }
        let Some(raw) = entry.port_name.as_deref() else {
            continue;
        };
        let port: PortWwn = match raw.parse() {
            Ok(port) => port,
            Err(e) => {
                warn!(scsi_target = %entry.name, error = %e, "Skipping target with unparseable port_name");
                continue;
            }
        };
        if impacted.contains(port) {
            debug!(scsi_target = %entry.name, port = %port, "Impacted target");
            targets.push(TargetRecord {
                target: entry.name,
                port,
            });
        }
    }

    info!(host = %host.name, targets = targets.len(), "Resolved impacted targets");
    Ok((Some(host), targets))
}

fn multipath_map(entry: &BlockEntry) -> Option<MultipathDeviceRecord> {
    let uuid = entry.dm_uuid.as_deref()?;
    if !uuid.starts_with(MULTIPATH_UUID_PREFIX) {
        return None;
    }
    let Some(unique_id) = unique_id_from_dm_uuid(uuid) else {
        warn!(device = %entry.name, uuid, "Skipping multipath map with malformed DM_UUID");
        return None;
    };
    let Some(name) = entry.dm_name.clone() else {
        warn!(device = %entry.name, "Skipping multipath map without DM_NAME");
        return None;
    };
    Some(MultipathDeviceRecord {
        name,
        node: entry.name.clone(),
        unique_id: unique_id.to_string(),
    })
}

fn impacted_disk(entry: &BlockEntry, targets: &[TargetRecord]) -> Option<ImpactedDeviceRecord> {
    let scsi_target = entry.scsi_target.as_deref()?;
    let target = targets.iter().find(|t| t.target == scsi_target)?;

    let Some(serial) = entry.serial.clone() else {
        warn!(device = %entry.name, "Skipping impacted disk without ID_SERIAL");
        return None;
    };
    let (Some(major), Some(minor)) = (entry.major.as_deref(), entry.minor.as_deref()) else {
        warn!(device = %entry.name, "Skipping impacted disk without device number");
        return None;
    };

    Some(ImpactedDeviceRecord {
        name: entry.name.clone(),
        devnum: format!("{}:{}", major, minor),
        serial,
        target_port: target.port,
    })
}

/// Walks the block subsystem for multipath maps and disks behind `targets`.
#[instrument(skip(topology, targets), fields(targets = targets.len()))]
pub fn resolve_devices(
    topology: &dyn DeviceTopology,
    targets: &[TargetRecord],
) -> Result<DeviceResolution> {
    let mut maps = Vec::new();
    let mut devices = Vec::new();

    for entry in topology.block_devices()? {
        if entry.name.starts_with("dm-") {
            maps.extend(multipath_map(&entry));
        } else if entry.name.starts_with("sd") {
            devices.extend(impacted_disk(&entry, targets));
        }
    }

    if maps.is_empty() {
        info!(discarded = devices.len(), "No multipath maps present");
        return Ok(DeviceResolution::NoMultipath {
            discarded: devices.len(),
        });
    }

    info!(maps = maps.len(), devices = devices.len(), "Resolved impacted devices");
    Ok(DeviceResolution::Found { maps, devices })
}

/// Runs target and device resolution for one notification.
pub fn resolve(topology: &dyn DeviceTopology, impacted: &ImpactedWwnSet) -> Result<Resolution> {
    let (host, targets) = resolve_targets(topology, impacted)?;
    let Some(host) = host else {
        return Ok(Resolution::NoHost);
    };
    if targets.is_empty() {
        return Ok(Resolution::NoTargets);
    }

    match resolve_devices(topology, &targets)? {
        DeviceResolution::NoMultipath { .. } => Ok(Resolution::NoMultipath),
        DeviceResolution::Found { maps, devices } => Ok(Resolution::Resolved(CycleTopology {
            host,
            targets,
            maps,
            devices,
        })),
    }
}
