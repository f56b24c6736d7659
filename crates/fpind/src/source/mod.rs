//! Notification frame sources
//!
//! A source is the transport boundary: it blocks until the kernel hands over
//! the next FC notification and returns it as a [`RawFrame`]. Sources are
//! owned by the receiver and read from a blocking thread.

mod chardev;
#[cfg(target_os = "linux")]
mod netlink;

pub use chardev::CharDeviceSource;
#[cfg(target_os = "linux")]
pub use netlink::{
    FCH_EVT_LINK_FPIN, FcTransportEvent, NetlinkSource, parse_fc_event, port_name_for_host,
};

use crate::config::{SourceConfig, SourceKind};
use crate::error::Result;
use crate::frame::RawFrame;
use std::fs::File;

/// Blocking producer of raw notification frames.
pub trait FrameSource: Send {
    /// Blocks until the next frame arrives.
    ///
    /// `Ok(None)` means the source is closed. Errors that leave the source
    /// usable (see [`crate::FpindError::is_fatal_for_source`]) may be
    /// followed by further calls.
    fn next_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Short description for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        (**self).next_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// A configured source and, when it reads the adapter character device, a
/// second handle on that same open.
pub struct OpenedSource {
    pub source: Box<dyn FrameSource>,
    pub device: Option<File>,
}

/// Opens the source selected by configuration.
pub fn open_source(config: &SourceConfig) -> Result<OpenedSource> {
    match config.kind {
        SourceKind::Chardev => {
            let source = CharDeviceSource::open(&config.device)?;
            let device = source.device_handle()?;
            Ok(OpenedSource {
                source: Box::new(source),
                device: Some(device),
            })
        }
        #[cfg(target_os = "linux")]
        SourceKind::Netlink => Ok(OpenedSource {
            source: Box::new(NetlinkSource::open(&config.sysfs_root)?),
            device: None,
        }),
        #[cfg(not(target_os = "linux"))]
        SourceKind::Netlink => Err(crate::error::FpindError::Config(
            "netlink source is only available on Linux".to_string(),
        )),
    }
}
