//! Multipath control plane
//!
//! Map status comes from `dmsetup status <map>`; paths are failed with
//! `multipathd fail path <disk>`. Commands are spawned directly, without a
//! shell.
//!
//! [`active_path_count`] is the path health evaluator: it reads a
//! device-mapper multipath status line and counts paths not marked failed.

use crate::error::{FpindError, Result};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument, trace, warn};

/// Default path to `dmsetup`.
pub const DMSETUP_CMD: &str = "/sbin/dmsetup";

/// Default path to `multipathd`.
pub const MULTIPATHD_CMD: &str = "/sbin/multipathd";

/// Device-mapper target type of multipath maps
const MULTIPATH_TARGET: &str = "multipath";

/// Path state marking a failed path in the status line
const FAILED_PATH_STATE: &str = "F";

/// Operations on the multipath layer.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MultipathControl: Send + Sync {
    /// Returns the multipath status parameters of a map, with the leading
    /// `start length multipath` fields removed.
    async fn map_status(&self, map: &str) -> Result<String>;

    /// Marks one path of a map as failed.
    async fn fail_path(&self, device: &str) -> Result<()>;
}

/// Result of a control-plane command.
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// The exit code of the command (0 = success).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecResult {
    /// Returns true if the command succeeded (exit code 0).
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Returns the combined output (stdout + stderr) for error messages.
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Runs a program with arguments and captures its output.
pub async fn exec(program: &str, args: &[&str]) -> Result<ExecResult> {
    let command = command_line(program, args);
    debug!(command = %command, "Executing control-plane command");

    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| FpindError::ControlPlaneExec {
            command: command.clone(),
            source,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if result.success() {
        trace!(command = %command, "Command succeeded");
    } else {
        warn!(
            command = %command,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command failed"
        );
    }

    Ok(result)
}

/// Runs a program and returns its stdout, failing on a non-zero exit.
pub async fn exec_checked(program: &str, args: &[&str]) -> Result<String> {
    let result = exec(program, args).await?;
    if !result.success() {
        return Err(FpindError::ControlPlane {
            command: command_line(program, args),
            exit_code: result.exit_code,
            output: result.combined_output(),
        });
    }
    Ok(result.stdout)
}

fn command_line(program: &str, args: &[&str]) -> String {
    std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strips the `start length multipath` prefix from a `dmsetup status` line.
///
/// Only the first table line is considered.
pub fn strip_status_prefix(status: &str) -> Option<String> {
    let line = status.lines().next()?;
    let mut tokens = line.split_whitespace();
    let _start = tokens.next()?;
    let _length = tokens.next()?;
    if tokens.next()? != MULTIPATH_TARGET {
        return None;
    }
    Some(tokens.collect::<Vec<_>>().join(" "))
}

fn is_devnum(token: &str) -> bool {
    let Some((major, minor)) = token.split_once(':') else {
        return false;
    };
    let decimal = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    decimal(major) && decimal(minor)
}

/// Counts active paths in a multipath status string.
///
/// Every `major:minor` token followed by a state other than `F` is an
/// active path. A device token at the very end has no state and is not
/// counted.
pub fn active_path_count(status: &str) -> usize {
    let tokens: Vec<&str> = status.split_whitespace().collect();
    tokens
        .iter()
        .enumerate()
        .filter(|(i, token)| {
            is_devnum(token)
                && tokens
                    .get(i + 1)
                    .is_some_and(|state| *state != FAILED_PATH_STATE)
        })
        .count()
}

/// Control plane backed by `dmsetup` and `multipathd`.
#[derive(Debug, Clone)]
pub struct DmMultipathControl {
    dmsetup: String,
    multipathd: String,
}

impl DmMultipathControl {
    pub fn new(dmsetup: impl Into<String>, multipathd: impl Into<String>) -> Self {
        Self {
            dmsetup: dmsetup.into(),
            multipathd: multipathd.into(),
        }
    }
}

impl Default for DmMultipathControl {
    fn default() -> Self {
        Self::new(DMSETUP_CMD, MULTIPATHD_CMD)
    }
}

#[async_trait]
impl MultipathControl for DmMultipathControl {
    #[instrument(skip(self))]
    async fn map_status(&self, map: &str) -> Result<String> {
        let output = exec_checked(&self.dmsetup, &["status", map]).await?;
        strip_status_prefix(&output).ok_or_else(|| FpindError::ControlPlane {
            command: command_line(&self.dmsetup, &["status", map]),
            exit_code: 0,
            output: format!("not a multipath status: {}", output),
        })
    }

    #[instrument(skip(self))]
    async fn fail_path(&self, device: &str) -> Result<()> {
        let output = exec_checked(&self.multipathd, &["fail", "path", device]).await?;
        // multipathd reports most refusals on stdout with a zero exit code.
        if output.trim() == "fail" {
            return Err(FpindError::ControlPlane {
                command: command_line(&self.multipathd, &["fail", "path", device]),
                exit_code: 0,
                output,
            });
        }
        debug!(device, output = %output, "Path failed");
        Ok(())
    }
}
