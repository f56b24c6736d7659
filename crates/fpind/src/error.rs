//! Error types for fpind

use crate::frame::FrameError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// FPIN daemon errors
#[derive(Error, Debug)]
pub enum FpindError {
    /// The notification source could not be opened or bound
    #[error("Failed to open notification source {path}: {source}")]
    Source {
        /// Device node or socket description
        path: PathBuf,
        /// The underlying IO error
        #[source]
        source: io::Error,
    },

    /// A received record or payload was malformed
    #[error("Malformed frame: {0}")]
    Frame(#[from] FrameError),

    /// Device enumeration failed
    #[error("Topology error: {0}")]
    Topology(String),

    /// A control-plane command could not be spawned
    #[error("Failed to execute '{command}': {source}")]
    ControlPlaneExec {
        /// The command line
        command: String,
        /// The underlying IO error
        #[source]
        source: io::Error,
    },

    /// A control-plane command returned a non-zero exit code
    #[error("Command failed: '{command}' (exit code {exit_code}): {output}")]
    ControlPlane {
        /// The command line
        command: String,
        /// The exit code
        exit_code: i32,
        /// Combined stdout/stderr output
        output: String,
    },

    /// The transport flush interface rejected the request
    #[error("I/O flush failed on {target}: {message}")]
    Flush {
        /// sysfs attribute or device the request was sent to
        target: String,
        /// Error message
        message: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The frame queue has no consumer left
    #[error("Frame queue closed")]
    QueueClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl FpindError {
    /// Returns true if the failure came from live system state that may
    /// read differently on the next attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FpindError::Topology(_) | FpindError::Io(_))
    }

    /// Returns true if a frame source returning this error cannot produce
    /// any further frames.
    pub fn is_fatal_for_source(&self) -> bool {
        match self {
            FpindError::Frame(_) | FpindError::Topology(_) => false,
            FpindError::Io(e) => !matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
            _ => true,
        }
    }
}

/// Result type for fpind operations
pub type Result<T> = std::result::Result<T, FpindError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FpindError::Topology("udev enumerate failed".to_string());
        assert_eq!(err.to_string(), "Topology error: udev enumerate failed");
    }

    #[test]
    fn test_control_plane_display() {
        let err = FpindError::ControlPlane {
            command: "multipathd fail path sdc".to_string(),
            exit_code: 1,
            output: "fail".to_string(),
        };
        assert!(err.to_string().contains("multipathd fail path sdc"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_retryable() {
        assert!(FpindError::Topology("x".to_string()).is_retryable());
        assert!(FpindError::Io(io::Error::other("x")).is_retryable());
        assert!(!FpindError::Config("x".to_string()).is_retryable());
        assert!(!FpindError::Frame(FrameError::Oversized(4096)).is_retryable());
    }

    #[test]
    fn test_fatal_for_source() {
        assert!(!FpindError::Frame(FrameError::Oversized(4096)).is_fatal_for_source());
        assert!(!FpindError::Topology("no fc_host".to_string()).is_fatal_for_source());
        assert!(
            !FpindError::Io(io::Error::from(io::ErrorKind::Interrupted)).is_fatal_for_source()
        );
        assert!(FpindError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_fatal_for_source());
    }
}
