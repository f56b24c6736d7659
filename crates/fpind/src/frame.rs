//! Notification frames as handed from the transport boundary to the pipeline.
//!
//! The adapter character device delivers fixed-size records laid out as the
//! driver's `fpin_payload_t`:
//!
//! ```text
//! offset  size  field
//!      0     8  origin HBA port WWN (host byte order)
//!      8     4  payload length (host byte order, <= 2048)
//!     12  2048  ELS payload
//! ```
//!
//! Only the ELS payload is wire data: it starts with a big-endian command
//! word whose leading byte is the ELS command code.

use byteorder::{BigEndian, ByteOrder, NativeEndian};
use fc_types::{ElsCommand, PortWwn};
use thiserror::Error;

/// Maximum ELS payload carried in one record.
pub const FC_PAYLOAD_MAXLEN: usize = 2048;

/// Size of the record envelope preceding the payload.
pub const ENVELOPE_LEN: usize = 12;

/// Size of one record read from the adapter character device.
pub const RECORD_LEN: usize = ENVELOPE_LEN + FC_PAYLOAD_MAXLEN;

/// Errors found while reading an envelope or decoding a payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("declared payload length {0} exceeds 2048")]
    Oversized(usize),

    #[error("port count {count} exceeds the {max} entries a payload can hold")]
    PortCount { count: u32, max: usize },
}

/// Layout of the link-integrity descriptor inside an FPIN payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Pre-standard layout written by the adapter character device: the
    /// port count follows the detecting/attached port names directly.
    Legacy,
    /// FC-LS-5 layout delivered by the SCSI transport netlink event: event
    /// type, modifier, threshold and count sit between the port names and
    /// the port count.
    FcLs,
}

/// A frame as read from a source, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// HBA port on which the ELS arrived
    pub origin: PortWwn,
    /// Descriptor layout of the payload
    pub format: PayloadFormat,
    /// ELS payload
    pub payload: Vec<u8>,
}

impl RawFrame {
    /// Parses one character-device record (envelope plus payload).
    pub fn from_record(record: &[u8]) -> Result<Self, FrameError> {
        // The envelope and at least the ELS command word must be present.
        if record.len() < ENVELOPE_LEN + 4 {
            return Err(FrameError::Truncated {
                needed: ENVELOPE_LEN + 4,
                available: record.len(),
            });
        }

        let origin = PortWwn::new(NativeEndian::read_u64(&record[0..8]));
        let declared = NativeEndian::read_u32(&record[8..12]) as usize;

        if declared > FC_PAYLOAD_MAXLEN {
            return Err(FrameError::Oversized(declared));
        }
        let available = record.len() - ENVELOPE_LEN;
        if declared < 4 || declared > available {
            return Err(FrameError::Truncated {
                needed: ENVELOPE_LEN + declared.max(4),
                available: record.len(),
            });
        }

        Ok(Self {
            origin,
            format: PayloadFormat::Legacy,
            payload: record[ENVELOPE_LEN..ENVELOPE_LEN + declared].to_vec(),
        })
    }

    /// Returns the leading ELS command word, if present.
    pub fn command_word(&self) -> Option<u32> {
        (self.payload.len() >= 4).then(|| BigEndian::read_u32(&self.payload[0..4]))
    }
}

/// A classified frame waiting in, or taken from, the frame queue.
///
/// Frames move by value from the receiver to the queue to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    origin: PortWwn,
    command: ElsCommand,
    format: PayloadFormat,
    payload: Vec<u8>,
}

impl NotificationFrame {
    /// Wraps a raw frame whose command has been classified.
    pub fn new(raw: RawFrame, command: ElsCommand) -> Self {
        Self {
            origin: raw.origin,
            command,
            format: raw.format,
            payload: raw.payload,
        }
    }

    /// HBA port on which the ELS arrived
    pub fn origin(&self) -> PortWwn {
        self.origin
    }

    /// ELS command class
    pub fn command(&self) -> ElsCommand {
        self.command
    }

    /// Descriptor layout of the payload
    pub fn format(&self) -> PayloadFormat {
        self.format
    }

    /// ELS payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

/// Builds a character-device record; used by tests and replay tooling.
pub fn encode_record(origin: PortWwn, payload: &[u8]) -> Vec<u8> {
    let len = payload.len().min(FC_PAYLOAD_MAXLEN);
    let mut record = vec![0u8; RECORD_LEN];
    NativeEndian::write_u64(&mut record[0..8], origin.as_u64());
    NativeEndian::write_u32(&mut record[8..12], len as u32);
    record[ENVELOPE_LEN..ENVELOPE_LEN + len].copy_from_slice(&payload[..len]);
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let origin = PortWwn::new(0x1000_0000_c9aa_bbcc);
        let payload = [0x16, 0, 0, 0, 0, 0, 0, 8];
        let record = encode_record(origin, &payload);
        assert_eq!(record.len(), RECORD_LEN);

        let raw = RawFrame::from_record(&record).unwrap();
        assert_eq!(raw.origin, origin);
        assert_eq!(raw.format, PayloadFormat::Legacy);
        assert_eq!(raw.payload, payload);
        assert_eq!(raw.command_word(), Some(0x1600_0000));
    }

    #[test]
    fn test_short_record_rejected() {
        let err = RawFrame::from_record(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                needed: 16,
                available: 10
            }
        );
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut record = encode_record(PortWwn::new(1), &[0x16, 0, 0, 0]);
        NativeEndian::write_u32(&mut record[8..12], 4096);
        assert_eq!(
            RawFrame::from_record(&record).unwrap_err(),
            FrameError::Oversized(4096)
        );
    }

    #[test]
    fn test_length_beyond_read_rejected() {
        let mut record = encode_record(PortWwn::new(1), &[0x16, 0, 0, 0]);
        NativeEndian::write_u32(&mut record[8..12], 64);
        let err = RawFrame::from_record(&record[..40]).unwrap_err();
        assert!(matches!(err, FrameError::Truncated { .. }));
    }

    /// Record laid out field by field as the driver fills `fpin_payload_t`.
    fn driver_record(hba_wwn: u64, els: &[u8]) -> Vec<u8> {
        let mut record = Vec::with_capacity(RECORD_LEN);
        record.extend_from_slice(&hba_wwn.to_ne_bytes());
        record.extend_from_slice(&(FC_PAYLOAD_MAXLEN as u32).to_ne_bytes());
        let mut payload = [0u8; FC_PAYLOAD_MAXLEN];
        payload[..els.len()].copy_from_slice(els);
        record.extend_from_slice(&payload);
        record
    }

    #[test]
    fn test_driver_record_accepted() {
        let els = [0x16, 0, 0, 0, 0, 0, 0, 0x2c, 0x00, 0x02, 0x00, 0x01];
        let record = driver_record(0x1000_0000_c9aa_bbcc, &els);
        assert_eq!(record.len(), RECORD_LEN);

        let raw = RawFrame::from_record(&record).unwrap();
        assert_eq!(raw.origin, PortWwn::new(0x1000_0000_c9aa_bbcc));
        assert_eq!(raw.payload.len(), FC_PAYLOAD_MAXLEN);
        assert_eq!(&raw.payload[..els.len()], &els);
        assert_eq!(raw.command_word(), Some(0x1600_0000));
    }

    #[test]
    fn test_encoded_record_matches_driver_layout() {
        let payload = [0x16u8; FC_PAYLOAD_MAXLEN];
        assert_eq!(
            encode_record(PortWwn::new(0x2000_0000_0000_0001), &payload),
            driver_record(0x2000_0000_0000_0001, &payload)
        );
    }

    #[test]
    fn test_notification_frame_accessors() {
        let raw = RawFrame {
            origin: PortWwn::new(7),
            format: PayloadFormat::FcLs,
            payload: vec![0x16, 0, 0, 0],
        };
        let frame = NotificationFrame::new(raw, ElsCommand::Fpin);
        assert_eq!(frame.origin(), PortWwn::new(7));
        assert_eq!(frame.command(), ElsCommand::Fpin);
        assert_eq!(frame.format(), PayloadFormat::FcLs);
        assert_eq!(frame.payload(), &[0x16, 0, 0, 0]);
    }
}
