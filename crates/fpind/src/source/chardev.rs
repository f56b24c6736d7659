//! Adapter character device source.
//!
//! Each `read(2)` on the device returns one record: envelope plus payload,
//! see [`crate::frame`].

use super::FrameSource;
use crate::error::{FpindError, Result};
use crate::frame::{RECORD_LEN, RawFrame};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, info};

/// Reads fixed-size FPIN records from the adapter character device.
#[derive(Debug)]
pub struct CharDeviceSource<R = File> {
    reader: R,
    label: String,
    buffer: Vec<u8>,
}

impl CharDeviceSource<File> {
    /// Opens the device read-only.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|source| FpindError::Source {
            path: path.to_path_buf(),
            source,
        })?;
        info!(device = %path.display(), "Opened adapter character device");
        Ok(Self::from_reader(file, path.display().to_string()))
    }

    /// Duplicates the open device handle.
    ///
    /// The duplicate shares the open file description, so the driver sees a
    /// single open; the ioctl flush notifier issues requests on it.
    pub fn device_handle(&self) -> Result<File> {
        self.reader.try_clone().map_err(|source| FpindError::Source {
            path: self.label.clone().into(),
            source,
        })
    }
}

impl<R: Read> CharDeviceSource<R> {
    /// Wraps any reader that yields one record per `read`.
    pub fn from_reader(reader: R, label: impl Into<String>) -> Self {
        Self {
            reader,
            label: label.into(),
            buffer: vec![0u8; RECORD_LEN],
        }
    }
}

impl<R: Read + Send> FrameSource for CharDeviceSource<R> {
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            match self.reader.read(&mut self.buffer) {
                Ok(0) => {
                    debug!(device = %self.label, "End of stream");
                    return Ok(None);
                }
                Ok(n) => return Ok(Some(RawFrame::from_record(&self.buffer[..n])?)),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FpindError::Io(e)),
            }
        }
    }

    fn describe(&self) -> String {
        format!("chardev:{}", self.label)
    }
}
