//! Common Fibre Channel types for the FPIN recovery daemon.
//!
//! This crate provides type-safe representations of the fabric primitives
//! shared between the frame decoder and the topology resolver:
//!
//! - [`PortWwn`]: 64-bit N_Port / F_Port world wide names
//! - [`ElsCommand`]: Extended Link Service command codes seen on the
//!   notification channel
//! - [`DescriptorTag`]: FPIN notification descriptor tags

mod els;
mod wwn;

pub use els::{DescriptorTag, ElsCommand};
pub use wwn::PortWwn;

/// Common error type for parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("invalid port WWN format: {0:?}")]
    InvalidPortWwn(String),

    #[error("unknown ELS command code: {0:#04x}")]
    UnknownElsCommand(u8),

    #[error("unknown FPIN descriptor tag: {0:#010x}")]
    UnknownDescriptorTag(u32),
}
