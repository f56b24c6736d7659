//! FPIN payload decoding.
//!
//! Turns a queued [`NotificationFrame`] into the set of fabric ports named by
//! a link-integrity descriptor. Everything else the fabric sends is
//! recognised, logged and reported as nothing actionable.

use crate::frame::{FC_PAYLOAD_MAXLEN, FrameError, NotificationFrame, PayloadFormat, RawFrame};
use byteorder::{BigEndian, ByteOrder};
use fc_types::{DescriptorTag, ElsCommand, PortWwn};
use tracing::{debug, info, warn};

/// Offset of the first descriptor tag, shared by both layouts.
const TAG_OFFSET: usize = 8;
/// Offset of the detecting port name.
const DETECTING_WWN_OFFSET: usize = 16;
/// Offset of the attached port name.
const ATTACHED_WWN_OFFSET: usize = 24;

const WWN_LEN: usize = 8;

/// Field offsets of the link-integrity port list for one payload layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PortListLayout {
    count: usize,
    list: usize,
}

impl PortListLayout {
    fn for_format(format: PayloadFormat) -> Self {
        match format {
            PayloadFormat::Legacy => PortListLayout { count: 32, list: 36 },
            PayloadFormat::FcLs => PortListLayout { count: 44, list: 48 },
        }
    }

    fn max_ports(&self) -> usize {
        (FC_PAYLOAD_MAXLEN - self.list) / WWN_LEN
    }
}

/// What the receiver does with a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Hand to the consumer.
    Queue(ElsCommand),
    /// Recognised but never acted upon.
    Ignore(ElsCommand),
    /// Unknown ELS command code.
    Unknown(u8),
}

/// Classifies a raw frame by the leading byte of its ELS command word.
pub fn classify(raw: &RawFrame) -> Classification {
    let Some(word) = raw.command_word() else {
        return Classification::Unknown(0);
    };
    match ElsCommand::from_word(word) {
        Ok(cmd) if cmd.is_queued() => Classification::Queue(cmd),
        Ok(cmd) => Classification::Ignore(cmd),
        Err(_) => Classification::Unknown((word >> 24) as u8),
    }
}

/// Fabric ports impacted by one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImpactedWwnSet {
    origin: PortWwn,
    detecting: PortWwn,
    attached: PortWwn,
    ports: Vec<PortWwn>,
}

impl ImpactedWwnSet {
    /// Creates a set for the given origin HBA port.
    pub fn new(origin: PortWwn, ports: Vec<PortWwn>) -> Self {
        Self {
            origin,
            detecting: PortWwn::ZERO,
            attached: PortWwn::ZERO,
            ports,
        }
    }

    /// HBA port the notification arrived on.
    pub fn origin(&self) -> PortWwn {
        self.origin
    }

    /// Port that detected the link event.
    pub fn detecting(&self) -> PortWwn {
        self.detecting
    }

    /// Port attached to the detecting port.
    pub fn attached(&self) -> PortWwn {
        self.attached
    }

    /// Impacted ports in payload order.
    pub fn ports(&self) -> &[PortWwn] {
        &self.ports
    }

    /// Whether the fabric reported `wwn` as impacted.
    pub fn contains(&self, wwn: PortWwn) -> bool {
        self.ports.contains(&wwn)
    }

    /// Number of impacted ports, duplicates included.
    pub fn len(&self) -> usize {
        self.ports.len()
    }

    /// True when the descriptor listed no impacted ports.
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }
}

fn require(payload: &[u8], needed: usize) -> Result<(), FrameError> {
    if payload.len() < needed {
        return Err(FrameError::Truncated {
            needed,
            available: payload.len(),
        });
    }
    Ok(())
}

fn read_wwn(payload: &[u8], offset: usize) -> PortWwn {
    PortWwn::new(BigEndian::read_u64(&payload[offset..offset + WWN_LEN]))
}

/// Decodes a queued frame into the impacted port set.
///
/// Returns `Ok(None)` when the frame carries nothing actionable: MPD frames,
/// non link-integrity descriptors, unknown descriptor tags, or an empty port
/// list.
pub fn decode(frame: &NotificationFrame) -> Result<Option<ImpactedWwnSet>, FrameError> {
    match frame.command() {
        ElsCommand::Fpin => decode_fpin(frame),
        other => {
            info!(command = %other, origin = %frame.origin(), "Acknowledged non-FPIN frame");
            Ok(None)
        }
    }
}

fn decode_fpin(frame: &NotificationFrame) -> Result<Option<ImpactedWwnSet>, FrameError> {
    let payload = frame.payload();
    require(payload, TAG_OFFSET + 4)?;

    let raw_tag = BigEndian::read_u32(&payload[TAG_OFFSET..TAG_OFFSET + 4]);
    let tag = match DescriptorTag::try_from(raw_tag) {
        Ok(tag) => tag,
        Err(e) => {
            warn!(origin = %frame.origin(), error = %e, "Skipping FPIN with unknown descriptor");
            return Ok(None);
        }
    };
    if !tag.is_actionable() {
        info!(origin = %frame.origin(), descriptor = %tag, "FPIN descriptor not actionable");
        return Ok(None);
    }

    let layout = PortListLayout::for_format(frame.format());
    require(payload, layout.count + 4)?;

    let count = BigEndian::read_u32(&payload[layout.count..layout.count + 4]);
    if count as usize > layout.max_ports() {
        return Err(FrameError::PortCount {
            count,
            max: layout.max_ports(),
        });
    }
    let count = count as usize;
    require(payload, layout.list + count * WWN_LEN)?;

    let ports: Vec<PortWwn> = (0..count)
        .map(|i| read_wwn(payload, layout.list + i * WWN_LEN))
        .collect();

    if ports.is_empty() {
        debug!(origin = %frame.origin(), "Link integrity FPIN names no ports");
        return Ok(None);
    }

    let set = ImpactedWwnSet {
        origin: frame.origin(),
        detecting: read_wwn(payload, DETECTING_WWN_OFFSET),
        attached: read_wwn(payload, ATTACHED_WWN_OFFSET),
        ports,
    };
    info!(
        origin = %set.origin,
        detecting = %set.detecting,
        attached = %set.attached,
        count = set.len(),
        "Decoded link integrity FPIN"
    );
    Ok(Some(set))
}

/// Builds a link-integrity FPIN payload in the given layout.
///
/// Used to exercise the pipeline without an adapter.
pub fn build_link_integrity(
    format: PayloadFormat,
    detecting: PortWwn,
    attached: PortWwn,
    ports: &[PortWwn],
) -> Vec<u8> {
    build_fpin(format, DescriptorTag::LinkIntegrity.value(), detecting, attached, ports)
}

/// Builds an FPIN payload with an arbitrary descriptor tag.
pub fn build_fpin(
    format: PayloadFormat,
    tag: u32,
    detecting: PortWwn,
    attached: PortWwn,
    ports: &[PortWwn],
) -> Vec<u8> {
    let layout = PortListLayout::for_format(format);
    let mut payload = vec![0u8; layout.list + ports.len() * WWN_LEN];
    let desc_len = (payload.len() - TAG_OFFSET - 8) as u32;

    BigEndian::write_u32(&mut payload[0..4], u32::from(ElsCommand::Fpin.code()) << 24);
    BigEndian::write_u32(&mut payload[4..8], desc_len + 8);
    BigEndian::write_u32(&mut payload[TAG_OFFSET..TAG_OFFSET + 4], tag);
    BigEndian::write_u32(&mut payload[12..16], desc_len);
    BigEndian::write_u64(&mut payload[DETECTING_WWN_OFFSET..DETECTING_WWN_OFFSET + 8], detecting.as_u64());
    BigEndian::write_u64(&mut payload[ATTACHED_WWN_OFFSET..ATTACHED_WWN_OFFSET + 8], attached.as_u64());
    BigEndian::write_u32(&mut payload[layout.count..layout.count + 4], ports.len() as u32);
    for (i, wwn) in ports.iter().enumerate() {
        let at = layout.list + i * WWN_LEN;
        BigEndian::write_u64(&mut payload[at..at + WWN_LEN], wwn.as_u64());
    }
    payload
}
