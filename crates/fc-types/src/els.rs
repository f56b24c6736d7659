//! Extended Link Service command codes and FPIN descriptor tags.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// ELS command carried on the fabric notification channel.
///
/// The command code is the first byte of the ELS payload, i.e. the most
/// significant byte of the leading big-endian command word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElsCommand {
    /// Fabric Performance Impact Notification.
    Fpin,
    /// Maintenance/port-down class notification, queued like FPIN.
    Mpd,
    /// Congestion notification.
    Cjn,
}

impl ElsCommand {
    /// Returns the one-byte ELS command code.
    pub const fn code(&self) -> u8 {
        match self {
            ElsCommand::Fpin => 0x16,
            ElsCommand::Mpd => 0x82,
            ElsCommand::Cjn => 0x83,
        }
    }

    /// Classifies the leading big-endian command word of an ELS payload.
    pub fn from_word(word: u32) -> Result<Self, ParseError> {
        Self::try_from((word >> 24) as u8)
    }

    /// Returns true if frames of this class go to the processing queue.
    ///
    /// Congestion frames are recognised but never acted upon.
    pub const fn is_queued(&self) -> bool {
        matches!(self, ElsCommand::Fpin | ElsCommand::Mpd)
    }
}

impl TryFrom<u8> for ElsCommand {
    type Error = ParseError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0x16 => Ok(ElsCommand::Fpin),
            0x82 => Ok(ElsCommand::Mpd),
            0x83 => Ok(ElsCommand::Cjn),
            other => Err(ParseError::UnknownElsCommand(other)),
        }
    }
}

impl fmt::Display for ElsCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElsCommand::Fpin => "FPIN",
            ElsCommand::Mpd => "MPD",
            ElsCommand::Cjn => "CJN",
        };
        write!(f, "{}", s)
    }
}

/// FPIN notification descriptor tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DescriptorTag {
    /// Registration descriptor.
    Register,
    /// Link integrity event: a port reported bit errors or loss of signal.
    LinkIntegrity,
    /// Frame delivery event: a frame was discarded.
    Delivery,
    /// A peer port is congested.
    PeerCongestion,
    /// The attached port is congested.
    Congestion,
}

impl DescriptorTag {
    /// Returns the 32-bit wire value of the tag.
    pub const fn value(&self) -> u32 {
        match self {
            DescriptorTag::Register => 0x0002_0000,
            DescriptorTag::LinkIntegrity => 0x0002_0001,
            DescriptorTag::Delivery => 0x0002_0002,
            DescriptorTag::PeerCongestion => 0x0002_0003,
            DescriptorTag::Congestion => 0x0002_0004,
        }
    }

    /// Returns true if the descriptor names ports whose paths should be failed.
    pub const fn is_actionable(&self) -> bool {
        matches!(self, DescriptorTag::LinkIntegrity)
    }
}

impl TryFrom<u32> for DescriptorTag {
    type Error = ParseError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0x0002_0000 => Ok(DescriptorTag::Register),
            0x0002_0001 => Ok(DescriptorTag::LinkIntegrity),
            0x0002_0002 => Ok(DescriptorTag::Delivery),
            0x0002_0003 => Ok(DescriptorTag::PeerCongestion),
            0x0002_0004 => Ok(DescriptorTag::Congestion),
            other => Err(ParseError::UnknownDescriptorTag(other)),
        }
    }
}

impl fmt::Display for DescriptorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DescriptorTag::Register => "register",
            DescriptorTag::LinkIntegrity => "link-integrity",
            DescriptorTag::Delivery => "delivery",
            DescriptorTag::PeerCongestion => "peer-congestion",
            DescriptorTag::Congestion => "congestion",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_from_word_uses_leading_byte() {
        assert_eq!(ElsCommand::from_word(0x1600_0000).unwrap(), ElsCommand::Fpin);
        assert_eq!(ElsCommand::from_word(0x8200_0000).unwrap(), ElsCommand::Mpd);
        assert_eq!(ElsCommand::from_word(0x8300_0000).unwrap(), ElsCommand::Cjn);
        assert_eq!(
            ElsCommand::from_word(0x0000_0016),
            Err(ParseError::UnknownElsCommand(0x00))
        );
    }

    #[test]
    fn test_command_queueing() {
        assert!(ElsCommand::Fpin.is_queued());
        assert!(ElsCommand::Mpd.is_queued());
        assert!(!ElsCommand::Cjn.is_queued());
    }

    #[test]
    fn test_command_code_matches_try_from() {
        for cmd in [ElsCommand::Fpin, ElsCommand::Mpd, ElsCommand::Cjn] {
            assert_eq!(ElsCommand::try_from(cmd.code()).unwrap(), cmd);
        }
    }

    #[test]
    fn test_descriptor_tags() {
        assert_eq!(
            DescriptorTag::try_from(0x0002_0001).unwrap(),
            DescriptorTag::LinkIntegrity
        );
        assert!(DescriptorTag::LinkIntegrity.is_actionable());
        assert!(!DescriptorTag::Congestion.is_actionable());
        assert!(!DescriptorTag::Delivery.is_actionable());
        assert!(DescriptorTag::try_from(0x0003_0001).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(ElsCommand::Fpin.to_string(), "FPIN");
        assert_eq!(DescriptorTag::PeerCongestion.to_string(), "peer-congestion");
    }
}
