//! Configuration file support for fpind
//!
//! Loads and validates fpind configuration from TOML files.
//! Default location: /etc/fpind/fpind.conf

use crate::error::{FpindError, Result};
use crate::queue::DEFAULT_QUEUE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/fpind/fpind.conf";

/// Upper bound accepted for the frame queue capacity
const MAX_QUEUE_CAPACITY: usize = 65536;

/// Where notification frames come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Adapter character device records
    Chardev,
    /// SCSI transport netlink FC events
    Netlink,
}

/// How the transport is told to flush outstanding I/O
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Write to the fc_host `abort_outstanding_io` attribute
    Sysfs,
    /// Issue the failback ioctl on the adapter character device
    Ioctl,
    /// Log only
    None,
}

/// Notification source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Source kind
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,

    /// Adapter character device
    #[serde(default = "default_device")]
    pub device: PathBuf,

    /// sysfs mount point, used to map SCSI host numbers to port names
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
}

/// Frame queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of frames waiting for the consumer
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
}

/// Multipath control plane configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultipathConfig {
    /// Path to the dmsetup binary
    #[serde(default = "default_dmsetup_cmd")]
    pub dmsetup_cmd: String,

    /// Path to the multipathd binary
    #[serde(default = "default_multipathd_cmd")]
    pub multipathd_cmd: String,
}

/// I/O flush configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    /// Flush mechanism
    #[serde(default = "default_flush_mode")]
    pub mode: FlushMode,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Complete fpind configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FpindConfig {
    #[serde(default)]
    pub source: SourceConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub multipath: MultipathConfig,

    #[serde(default)]
    pub flush: FlushConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_source_kind() -> SourceKind {
    SourceKind::Chardev
}

fn default_device() -> PathBuf {
    PathBuf::from("/dev/fctxpd")
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from("/sys")
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_dmsetup_cmd() -> String {
    "/sbin/dmsetup".to_string()
}

fn default_multipathd_cmd() -> String {
    "/sbin/multipathd".to_string()
}

fn default_flush_mode() -> FlushMode {
    FlushMode::Sysfs
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: default_source_kind(),
            device: default_device(),
            sysfs_root: default_sysfs_root(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
        }
    }
}

impl Default for MultipathConfig {
    fn default() -> Self {
        Self {
            dmsetup_cmd: default_dmsetup_cmd(),
            multipathd_cmd: default_multipathd_cmd(),
        }
    }
}

impl Default for FlushConfig {
    fn default() -> Self {
        Self {
            mode: default_flush_mode(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl FpindConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(|e| {
                FpindError::Config(format!(
                    "Failed to parse config file {}: {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Logging is not up yet when the config is read.
                eprintln!(
                    "fpind: Config file {} not found, using defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            Err(e) => Err(FpindError::Io(e)),
        }
    }

    /// Load from default location or defaults
    pub fn load() -> Result<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.queue.capacity == 0 || self.queue.capacity > MAX_QUEUE_CAPACITY {
            return Err(FpindError::Config(format!(
                "queue capacity must be 1-{}",
                MAX_QUEUE_CAPACITY
            )));
        }

        if self.multipath.dmsetup_cmd.trim().is_empty() {
            return Err(FpindError::Config("dmsetup_cmd must not be empty".to_string()));
        }

        if self.multipath.multipathd_cmd.trim().is_empty() {
            return Err(FpindError::Config(
                "multipathd_cmd must not be empty".to_string(),
            ));
        }

        if self.source.device.as_os_str().is_empty() {
            return Err(FpindError::Config("source device must not be empty".to_string()));
        }

        if !matches!(
            self.logging.level.to_ascii_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(FpindError::Config(format!(
                "unknown log level '{}'",
                self.logging.level
            )));
        }

        Ok(())
    }
}
