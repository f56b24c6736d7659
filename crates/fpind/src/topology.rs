//! Device topology snapshots
//!
//! [`DeviceTopology`] is the seam to the udev device database. It returns
//! plain owned records of the three subsystems the resolver walks:
//! `fc_host`, `fc_transport` and `block`. Interpretation (WWN parsing,
//! matching, multipath detection) is left to [`crate::resolver`].

use crate::error::Result;
use std::path::PathBuf;

/// An `fc_host` class device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FcHostEntry {
    /// Kernel name, e.g. `host6`
    pub name: String,
    /// Absolute sysfs path of the class device
    pub syspath: PathBuf,
    /// Raw `port_name` attribute
    pub port_name: Option<String>,
}

/// An `fc_transport` target device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FcTargetEntry {
    /// Kernel name, e.g. `target6:0:1`
    pub name: String,
    /// Name of the `scsi_host` ancestor, e.g. `host6`
    pub host: Option<String>,
    /// Raw `port_name` attribute
    pub port_name: Option<String>,
}

/// A `block` subsystem device with the properties the resolver reads.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockEntry {
    /// Kernel name, e.g. `sdc` or `dm-3`
    pub name: String,
    pub dm_name: Option<String>,
    pub dm_uuid: Option<String>,
    pub serial: Option<String>,
    pub major: Option<String>,
    pub minor: Option<String>,
    /// Name of the `scsi_target` ancestor, e.g. `target6:0:1`
    pub scsi_target: Option<String>,
}

/// Read access to the live device tree.
#[cfg_attr(test, mockall::automock)]
pub trait DeviceTopology: Send + Sync {
    /// Enumerates the `fc_host` subsystem.
    fn fc_hosts(&self) -> Result<Vec<FcHostEntry>>;

    /// Enumerates the `fc_transport` subsystem.
    fn fc_targets(&self) -> Result<Vec<FcTargetEntry>>;

    /// Enumerates the `block` subsystem.
    fn block_devices(&self) -> Result<Vec<BlockEntry>>;
}

#[cfg(target_os = "linux")]
pub use udev::UdevTopology;

#[cfg(target_os = "linux")]
mod udev {
    use super::{BlockEntry, DeviceTopology, FcHostEntry, FcTargetEntry};
    use crate::error::{FpindError, Result};
    use std::ffi::OsStr;
    use std::path::{Path, PathBuf};
    use tracing::{debug, instrument};

    const SCSI_HOST_DEVTYPE: &str = "scsi_host";
    const SCSI_TARGET_DEVTYPE: &str = "scsi_target";

    /// Topology backed by libudev enumeration.
    ///
    /// A udev context is created per enumeration and never held across an
    /// await point.
    #[derive(Debug, Clone)]
    pub struct UdevTopology {
        sysfs_root: PathBuf,
    }

    impl UdevTopology {
        pub fn new(sysfs_root: impl Into<PathBuf>) -> Self {
            Self {
                sysfs_root: sysfs_root.into(),
            }
        }

        fn scan<T>(
            &self,
            subsystem: &str,
            mut convert: impl FnMut(&libudev::Device) -> Option<T>,
        ) -> Result<Vec<T>> {
            let topology_err =
                |e: libudev::Error| FpindError::Topology(format!("{} enumeration: {}", subsystem, e));

            let context = libudev::Context::new().map_err(topology_err)?;
            let mut enumerator = libudev::Enumerator::new(&context).map_err(topology_err)?;
            enumerator.match_subsystem(subsystem).map_err(topology_err)?;

            let entries: Vec<T> = enumerator
                .scan_devices()
                .map_err(topology_err)?
                .filter_map(|device| convert(&device))
                .collect();

            debug!(subsystem, count = entries.len(), "Enumerated devices");
            Ok(entries)
        }

        fn syspath(&self, device: &libudev::Device) -> Option<PathBuf> {
            let devpath = property(device, "DEVPATH")?;
            Some(self.sysfs_root.join(devpath.trim_start_matches('/')))
        }
    }

    fn text(value: Option<&OsStr>) -> Option<String> {
        value
            .and_then(OsStr::to_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn property(device: &libudev::Device, key: &str) -> Option<String> {
        text(device.property_value(key))
    }

    fn attribute(device: &libudev::Device, key: &str) -> Option<String> {
        text(device.attribute_value(key))
    }

    /// Kernel name, the last component of DEVPATH.
    fn sysname(device: &libudev::Device) -> Option<String> {
        let devpath = property(device, "DEVPATH")?;
        Path::new(&devpath)
            .file_name()
            .and_then(OsStr::to_str)
            .map(str::to_string)
    }

    /// Name of the nearest ancestor with the given DEVTYPE.
    fn ancestor_sysname(device: &libudev::Device, devtype: &str) -> Option<String> {
        let parent = device.parent()?;
        if property(&parent, "DEVTYPE").as_deref() == Some(devtype) {
            return sysname(&parent);
        }
        ancestor_sysname(&parent, devtype)
    }

    impl DeviceTopology for UdevTopology {
        #[instrument(skip(self))]
        fn fc_hosts(&self) -> Result<Vec<FcHostEntry>> {
            self.scan("fc_host", |device| {
                Some(FcHostEntry {
                    name: sysname(device)?,
                    syspath: self.syspath(device)?,
                    port_name: attribute(device, "port_name"),
                })
            })
        }

        #[instrument(skip(self))]
        fn fc_targets(&self) -> Result<Vec<FcTargetEntry>> {
            self.scan("fc_transport", |device| {
                Some(FcTargetEntry {
                    name: sysname(device)?,
                    host: ancestor_sysname(device, SCSI_HOST_DEVTYPE),
                    port_name: attribute(device, "port_name"),
                })
            })
        }

        #[instrument(skip(self))]
        fn block_devices(&self) -> Result<Vec<BlockEntry>> {
            self.scan("block", |device| {
                let name = sysname(device)?;
                let mut entry = BlockEntry {
                    major: property(device, "MAJOR"),
                    minor: property(device, "MINOR"),
                    ..Default::default()
                };
                if name.starts_with("dm-") {
                    entry.dm_name = property(device, "DM_NAME");
                    entry.dm_uuid = property(device, "DM_UUID");
                } else if name.starts_with("sd") {
                    entry.serial = property(device, "ID_SERIAL");
                    entry.scsi_target = ancestor_sysname(device, SCSI_TARGET_DEVTYPE);
                }
                entry.name = name;
                Some(entry)
            })
        }
    }
}
