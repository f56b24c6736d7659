//! Fibre Channel FPIN fault-recovery daemon
//!
//! Listens for Fabric Performance Impact Notifications from the FC
//! transport and fails multipath paths through ports the fabric reports as
//! degraded, while keeping at least one active path per multipath map.
//!
//! The pipeline: a [`Receiver`] reads frames from a [`FrameSource`] onto
//! the frame queue; the [`Consumer`] decodes each frame, resolves the
//! impacted ports to local disks and multipath maps, and hands them to the
//! [`Actuator`].

pub mod actuator;
pub mod config;
pub mod consumer;
pub mod decoder;
pub mod error;
pub mod flush;
pub mod frame;
pub mod multipath;
pub mod queue;
pub mod receiver;
pub mod resolver;
pub mod source;
pub mod systemd;
pub mod topology;

pub use actuator::{Actuator, DeviceAction, SkipReason};
pub use config::{FlushMode, FpindConfig, SourceKind};
pub use consumer::{Consumer, ConsumerStats, CycleOutcome, CycleReport, PIPELINE_ATTEMPTS, Pipeline};
pub use decoder::{Classification, ImpactedWwnSet, classify, decode};
pub use error::{FpindError, Result};
pub use flush::{FlushNotifier, NoopFlushNotifier, SysfsFlushNotifier};
pub use frame::{FrameError, NotificationFrame, PayloadFormat, RawFrame};
pub use multipath::{DmMultipathControl, MultipathControl, active_path_count};
pub use queue::{ENQUEUE_ATTEMPTS, FrameReceiver, FrameSender, frame_queue};
pub use receiver::{Receiver, ReceiverStats};
pub use resolver::{
    CycleTopology, DeviceResolution, FcHostRecord, ImpactedDeviceRecord, MultipathDeviceRecord,
    Resolution, TargetRecord, resolve, resolve_devices, resolve_targets,
};
pub use source::{CharDeviceSource, FrameSource};
pub use systemd::SystemdNotifier;
pub use topology::{BlockEntry, DeviceTopology, FcHostEntry, FcTargetEntry};

#[cfg(target_os = "linux")]
pub use flush::IoctlFlushNotifier;
#[cfg(target_os = "linux")]
pub use source::NetlinkSource;
#[cfg(target_os = "linux")]
pub use topology::UdevTopology;
