//! I/O flush notification
//!
//! After a path is failed the transport is told to abort I/O still
//! outstanding on the initiator/target pair, so it is retried on the
//! remaining paths instead of waiting for command timeouts.

use crate::error::{FpindError, Result};
use crate::resolver::FcHostRecord;
use async_trait::async_trait;
use fc_types::PortWwn;
use std::fs::File;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{info, instrument};

/// fc_host attribute accepting `<initiator>:<target>` flush requests
pub const IO_FLUSH_ATTR: &str = "abort_outstanding_io";

/// Tells the transport to flush I/O for an initiator/target pair.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FlushNotifier: Send + Sync {
    async fn flush(&self, host: &FcHostRecord, initiator: PortWwn, target: PortWwn) -> Result<()>;
}

/// Request text for the sysfs flush attribute.
pub fn flush_request(initiator: PortWwn, target: PortWwn) -> String {
    format!("{}:{}", initiator.to_flush_hex(), target.to_flush_hex())
}

/// Writes flush requests to `<fc_host syspath>/abort_outstanding_io`.
#[derive(Debug, Clone, Default)]
pub struct SysfsFlushNotifier;

#[async_trait]
impl FlushNotifier for SysfsFlushNotifier {
    #[instrument(skip(self, host), fields(host = %host.name))]
    async fn flush(&self, host: &FcHostRecord, initiator: PortWwn, target: PortWwn) -> Result<()> {
        let attr = host.syspath.join(IO_FLUSH_ATTR);
        let request = flush_request(initiator, target);
        let flush_err = |e: std::io::Error| FpindError::Flush {
            target: attr.display().to_string(),
            message: e.to_string(),
        };

        // The attribute must already exist; never create files in sysfs.
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&attr)
            .await
            .map_err(flush_err)?;
        file.write_all(request.as_bytes()).await.map_err(flush_err)?;
        file.flush().await.map_err(flush_err)?;

        info!(request = %request, "Requested outstanding I/O flush");
        Ok(())
    }
}

/// Logs flush requests without acting on them.
#[derive(Debug, Clone, Default)]
pub struct NoopFlushNotifier;

#[async_trait]
impl FlushNotifier for NoopFlushNotifier {
    async fn flush(&self, host: &FcHostRecord, initiator: PortWwn, target: PortWwn) -> Result<()> {
        info!(
            host = %host.name,
            initiator = %initiator,
            target_port = %target,
            "I/O flush not configured, skipping"
        );
        Ok(())
    }
}

#[cfg(target_os = "linux")]
pub use ioctl::IoctlFlushNotifier;

#[cfg(target_os = "linux")]
mod ioctl {
    use super::FlushNotifier;
    use crate::error::{FpindError, Result};
    use crate::resolver::FcHostRecord;
    use async_trait::async_trait;
    use fc_types::PortWwn;
    use std::fs::File;
    use std::os::fd::AsRawFd;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;
    use tracing::{info, instrument};

    /// Argument of the failback ioctl.
    #[repr(C)]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct HbaPortWwnInfo {
        pub initiator_hba_wwn: u64,
        pub target_hba_wwn: u64,
        pub hba_ctxt: u64,
    }

    nix::ioctl_readwrite!(fctxpd_failback_io, b'N', 0x1, HbaPortWwnInfo);

    /// Issues the failback ioctl on the adapter character device.
    ///
    /// The driver admits one open at a time, so the notifier works on a
    /// handle that stays open for its lifetime, normally a duplicate of the
    /// character device source's handle.
    #[derive(Debug, Clone)]
    pub struct IoctlFlushNotifier {
        device: PathBuf,
        file: Arc<File>,
    }

    impl IoctlFlushNotifier {
        /// Wraps an already open device handle.
        pub fn new(device: impl Into<PathBuf>, file: File) -> Self {
            Self {
                device: device.into(),
                file: Arc::new(file),
            }
        }

        /// Opens the device itself, for sources that do not hold it.
        pub fn open(device: &Path) -> Result<Self> {
            let file = File::open(device).map_err(|source| FpindError::Source {
                path: device.to_path_buf(),
                source,
            })?;
            Ok(Self::new(device, file))
        }

        fn issue(&self, mut info: HbaPortWwnInfo) -> Result<()> {
            // SAFETY: the fd stays open while `self.file` is alive and `info`
            // is a valid, exclusively borrowed repr(C) argument.
            unsafe { fctxpd_failback_io(self.file.as_raw_fd(), &mut info) }.map_err(|e| {
                FpindError::Flush {
                    target: self.device.display().to_string(),
                    message: e.to_string(),
                }
            })?;
            Ok(())
        }
    }

    #[async_trait]
    impl FlushNotifier for IoctlFlushNotifier {
        #[instrument(skip(self, host), fields(host = %host.name))]
        async fn flush(
            &self,
            host: &FcHostRecord,
            initiator: PortWwn,
            target: PortWwn,
        ) -> Result<()> {
            let hba_ctxt = host.host_number().ok_or_else(|| FpindError::Flush {
                target: self.device.display().to_string(),
                message: format!("cannot derive SCSI host number from {}", host.name),
            })?;

            let notifier = self.clone();
            let info = HbaPortWwnInfo {
                initiator_hba_wwn: initiator.as_u64(),
                target_hba_wwn: target.as_u64(),
                hba_ctxt,
            };
            tokio::task::spawn_blocking(move || notifier.issue(info))
                .await
                .map_err(|e| FpindError::Flush {
                    target: self.device.display().to_string(),
                    message: e.to_string(),
                })??;

            info!(initiator = %initiator, target_port = %target, hba_ctxt, "Issued failback ioctl");
            Ok(())
        }
    }
}

/// Flush notifier selected by configuration.
///
/// `shared` is an open handle on the adapter device, when the notification
/// source already holds one; the ioctl notifier reuses it instead of opening
/// the device a second time.
pub fn notifier_for(
    mode: crate::config::FlushMode,
    device: &Path,
    shared: Option<File>,
) -> Result<Box<dyn FlushNotifier>> {
    use crate::config::FlushMode;

    match mode {
        FlushMode::Sysfs => Ok(Box::new(SysfsFlushNotifier)),
        FlushMode::None => Ok(Box::new(NoopFlushNotifier)),
        #[cfg(target_os = "linux")]
        FlushMode::Ioctl => match shared {
            Some(file) => Ok(Box::new(IoctlFlushNotifier::new(device, file))),
            None => Ok(Box::new(IoctlFlushNotifier::open(device)?)),
        },
        #[cfg(not(target_os = "linux"))]
        FlushMode::Ioctl => {
            let _ = (device, shared);
            Err(FpindError::Config(
                "ioctl flush is only available on Linux".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FlushMode;
    use std::path::PathBuf;

    const INITIATOR: PortWwn = PortWwn::new(0x1000_0000_c9aa_0001);
    const TARGET: PortWwn = PortWwn::new(0x5001_4380_2426_baf4);

    fn host_at(syspath: PathBuf) -> FcHostRecord {
        FcHostRecord {
            name: "host6".to_string(),
            syspath,
            port: INITIATOR,
        }
    }

    #[test]
    fn test_flush_request_format() {
        assert_eq!(
            flush_request(INITIATOR, TARGET),
            "10000000c9aa0001:500143802426baf4"
        );
        assert_eq!(
            flush_request(PortWwn::new(1), PortWwn::new(2)),
            "0000000000000001:0000000000000002"
        );
    }

    #[tokio::test]
    async fn test_sysfs_flush_writes_request() {
        let dir = tempfile::tempdir().unwrap();
        let attr = dir.path().join(IO_FLUSH_ATTR);
        std::fs::write(&attr, "").unwrap();

        SysfsFlushNotifier
            .flush(&host_at(dir.path().to_path_buf()), INITIATOR, TARGET)
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&attr).unwrap(),
            "10000000c9aa0001:500143802426baf4"
        );
    }

    #[tokio::test]
    async fn test_sysfs_flush_missing_attribute() {
        let dir = tempfile::tempdir().unwrap();
        let err = SysfsFlushNotifier
            .flush(&host_at(dir.path().to_path_buf()), INITIATOR, TARGET)
            .await
            .unwrap_err();
        assert!(matches!(err, FpindError::Flush { .. }));
        assert!(!dir.path().join(IO_FLUSH_ATTR).exists());
    }

    #[tokio::test]
    async fn test_noop_flush() {
        assert!(NoopFlushNotifier
            .flush(&host_at(PathBuf::from("/nonexistent")), INITIATOR, TARGET)
            .await
            .is_ok());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_ioctl_notifier_opens_device_once() {
        assert!(matches!(
            IoctlFlushNotifier::open(Path::new("/nonexistent/fctxpd")),
            Err(FpindError::Source { .. })
        ));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_ioctl_notifier_reuses_source_handle() {
        use crate::source::CharDeviceSource;

        let device = tempfile::NamedTempFile::new().unwrap();
        let source = CharDeviceSource::open(device.path()).unwrap();
        let handle = source.device_handle().unwrap();

        // The configured path is never reopened once a handle is shared.
        let missing = Path::new("/nonexistent/fctxpd");
        let notifier = notifier_for(FlushMode::Ioctl, missing, Some(handle)).unwrap();
        assert!(notifier_for(FlushMode::Ioctl, missing, None).is_err());

        // A regular file rejects the ioctl itself, not the open.
        let err = notifier
            .flush(&host_at(PathBuf::new()), INITIATOR, TARGET)
            .await
            .unwrap_err();
        let FpindError::Flush { message, .. } = err else {
            panic!("expected a flush error, got {:?}", err);
        };
        assert!(!message.contains("No such file"), "{}", message);
    }

    #[test]
    fn test_notifier_for_mode() {
        let device = Path::new("/dev/fctxpd");
        assert!(notifier_for(FlushMode::Sysfs, device, None).is_ok());
        assert!(notifier_for(FlushMode::None, device, None).is_ok());
    }
}
