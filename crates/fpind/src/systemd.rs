//! Systemd readiness and status notifications.

use crate::error::{FpindError, Result};
use tracing::{debug, info};

/// Systemd notification for notify-on-ready services
///
/// Enabled when run under systemd with `Type=notify`, i.e. when
/// `NOTIFY_SOCKET` is set.
#[derive(Clone, Debug)]
pub struct SystemdNotifier {
    enabled: bool,
}

impl SystemdNotifier {
    /// Create new systemd notifier
    pub fn new() -> Self {
        Self::with_enabled(std::env::var_os("NOTIFY_SOCKET").is_some())
    }

    /// Create a notifier with an explicit enable flag
    pub fn with_enabled(enabled: bool) -> Self {
        if enabled {
            debug!("Systemd notification socket detected");
        }
        Self { enabled }
    }

    /// Send READY notification to systemd
    pub fn notify_ready(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        sd_notify::notify(false, &[sd_notify::NotifyState::Ready]).map_err(|e| {
            FpindError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to send READY notification: {}", e),
            ))
        })?;

        info!("Sent READY notification to systemd");
        Ok(())
    }

    /// Send status message to systemd
    pub fn notify_status(&self, message: &str) -> Result<()> {
        debug!(status = message, "Service status");
        if !self.enabled {
            return Ok(());
        }

        sd_notify::notify(false, &[sd_notify::NotifyState::Status(message)]).map_err(|e| {
            FpindError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to send STATUS notification: {}", e),
            ))
        })?;
        Ok(())
    }

    /// Check if systemd is available
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

impl Default for SystemdNotifier {
    fn default() -> Self {
        Self::new()
    }
}
