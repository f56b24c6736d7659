//! Port world wide name with safe parsing and fixed-width formatting.

use crate::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A 64-bit Fibre Channel port world wide name.
///
/// The canonical text form is `0x` followed by exactly 16 lower-case hex
/// digits, which is what the kernel exposes in `fc_host/port_name` and
/// `fc_transport/port_name`. Equality is on the numeric value, so two
/// names only match when every digit matches.
///
/// # Examples
///
/// ```
/// use fc_types::PortWwn;
///
/// let wwn: PortWwn = "0x21000024ff7b1234".parse().unwrap();
/// assert_eq!(wwn.to_string(), "0x21000024ff7b1234");
///
/// // sysfs values carry a trailing newline, udev values may not have 0x
/// let same: PortWwn = "21000024FF7B1234\n".parse().unwrap();
/// assert_eq!(wwn, same);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortWwn(u64);

impl PortWwn {
    /// The all-zero WWN, never assigned to a real port.
    pub const ZERO: PortWwn = PortWwn(0);

    /// Creates a WWN from its 64-bit value.
    pub const fn new(value: u64) -> Self {
        PortWwn(value)
    }

    /// Decodes a WWN from 8 big-endian bytes as carried in ELS payloads.
    pub const fn from_be_bytes(bytes: [u8; 8]) -> Self {
        PortWwn(u64::from_be_bytes(bytes))
    }

    /// Returns the 64-bit value.
    pub const fn as_u64(&self) -> u64 {
        self.0
    }

    /// Returns true for the all-zero WWN.
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Returns the 16 hex digits without the `0x` prefix.
    ///
    /// This is the form accepted by the `abort_outstanding_io` attribute.
    pub fn to_flush_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Display for PortWwn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016x}", self.0)
    }
}

impl FromStr for PortWwn {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);

        if digits.is_empty() || digits.len() > 16 || !digits.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(ParseError::InvalidPortWwn(s.to_string()));
        }

        u64::from_str_radix(digits, 16)
            .map(PortWwn)
            .map_err(|_| ParseError::InvalidPortWwn(s.to_string()))
    }
}

impl TryFrom<String> for PortWwn {
    type Error = ParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PortWwn> for String {
    fn from(wwn: PortWwn) -> String {
        wwn.to_string()
    }
}

impl From<u64> for PortWwn {
    fn from(value: u64) -> Self {
        PortWwn(value)
    }
}

impl From<PortWwn> for u64 {
    fn from(wwn: PortWwn) -> u64 {
        wwn.0
    }
}
