//! SCSI transport netlink source
//!
//! The FC transport class multicasts asynchronous events on the
//! `NETLINK_SCSITRANSPORT` family. Link-integrity FPINs arrive as
//! `FCH_EVT_LINK_FPIN` events whose data is the FC-LS ELS payload. The
//! event names the SCSI host number, which is mapped to the HBA port name
//! through sysfs.
//!
//! Message layout (host byte order except the ELS payload):
//!
//! ```text
//! nlmsghdr        16 bytes
//! scsi_nl_hdr      8 bytes  version, transport, magic, msgtype, msglen
//! fc_nl_event     seconds @8, vendor_id @16, host_no @24,
//!                 event_datalen @26, event_num @28, event_code @32,
//!                 event_data @36 (offsets from scsi_nl_hdr)
//! ```

use super::FrameSource;
use crate::error::{FpindError, Result};
use crate::frame::{FC_PAYLOAD_MAXLEN, FrameError, PayloadFormat, RawFrame};
use byteorder::{ByteOrder, NativeEndian};
use fc_types::PortWwn;
use netlink_sys::Socket;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Netlink protocol number of the SCSI transport family
const NETLINK_SCSITRANSPORT: isize = 18;

/// Multicast group carrying FC transport events
const SCSI_NL_GRP_FC_EVENTS: u32 = 1 << 2;

/// `nlmsg_type` of SCSI transport messages (`NLMSG_MIN_TYPE + 1`)
const SCSI_TRANSPORT_MSG: u16 = 0x11;

const SCSI_NL_MAGIC: u16 = 0xA1B2;
const SCSI_NL_TRANSPORT_FC: u8 = 1;
const FC_NL_ASYNC_EVENT: u16 = 0x0100;

/// FC transport event code for a received FPIN
pub const FCH_EVT_LINK_FPIN: u32 = 0x501;

const NLMSG_HDR_LEN: usize = 16;

// Offsets from the start of the netlink message.
const SNLH_TRANSPORT: usize = NLMSG_HDR_LEN + 1;
const SNLH_MAGIC: usize = NLMSG_HDR_LEN + 2;
const SNLH_MSGTYPE: usize = NLMSG_HDR_LEN + 4;
const EVENT_HOST_NO: usize = NLMSG_HDR_LEN + 24;
const EVENT_DATALEN: usize = NLMSG_HDR_LEN + 26;
const EVENT_CODE: usize = NLMSG_HDR_LEN + 32;
const EVENT_DATA: usize = NLMSG_HDR_LEN + 36;

/// Receive buffer size; one FC event never exceeds a page.
const RECV_BUFFER_LEN: usize = 8192;

/// An FC transport asynchronous event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FcTransportEvent {
    /// SCSI host number the event was posted on
    pub host_no: u16,
    /// FC host event code
    pub event_code: u32,
    /// Vendor or ELS data attached to the event
    pub data: Vec<u8>,
}

/// Parses one netlink message.
///
/// Returns `Ok(None)` for messages that are not FC transport asynchronous
/// events.
pub fn parse_fc_event(msg: &[u8]) -> std::result::Result<Option<FcTransportEvent>, FrameError> {
    if msg.len() < NLMSG_HDR_LEN {
        return Err(FrameError::Truncated {
            needed: NLMSG_HDR_LEN,
            available: msg.len(),
        });
    }
    if NativeEndian::read_u16(&msg[4..6]) != SCSI_TRANSPORT_MSG {
        return Ok(None);
    }
    if msg.len() < EVENT_DATA {
        return Err(FrameError::Truncated {
            needed: EVENT_DATA,
            available: msg.len(),
        });
    }
    if NativeEndian::read_u16(&msg[SNLH_MAGIC..SNLH_MAGIC + 2]) != SCSI_NL_MAGIC
        || msg[SNLH_TRANSPORT] != SCSI_NL_TRANSPORT_FC
        || NativeEndian::read_u16(&msg[SNLH_MSGTYPE..SNLH_MSGTYPE + 2]) != FC_NL_ASYNC_EVENT
    {
        return Ok(None);
    }

    let datalen = NativeEndian::read_u16(&msg[EVENT_DATALEN..EVENT_DATALEN + 2]) as usize;
    if datalen > FC_PAYLOAD_MAXLEN {
        return Err(FrameError::Oversized(datalen));
    }
    if msg.len() < EVENT_DATA + datalen {
        return Err(FrameError::Truncated {
            needed: EVENT_DATA + datalen,
            available: msg.len(),
        });
    }

    Ok(Some(FcTransportEvent {
        host_no: NativeEndian::read_u16(&msg[EVENT_HOST_NO..EVENT_HOST_NO + 2]),
        event_code: NativeEndian::read_u32(&msg[EVENT_CODE..EVENT_CODE + 4]),
        data: msg[EVENT_DATA..EVENT_DATA + datalen].to_vec(),
    }))
}

/// Reads `class/fc_host/host<N>/port_name` under the given sysfs root.
pub fn port_name_for_host(sysfs_root: &Path, host_no: u16) -> Result<PortWwn> {
    let path = sysfs_root
        .join("class/fc_host")
        .join(format!("host{}", host_no))
        .join("port_name");
    let text = fs::read_to_string(&path)
        .map_err(|e| FpindError::Topology(format!("{}: {}", path.display(), e)))?;
    text.parse()
        .map_err(|e| FpindError::Topology(format!("{}: {}", path.display(), e)))
}

/// FC transport netlink event source
pub struct NetlinkSource {
    socket: Socket,
    buffer: Vec<u8>,
    sysfs_root: PathBuf,
}

impl NetlinkSource {
    /// Opens a SCSI transport netlink socket and joins the FC event group.
    #[instrument]
    pub fn open(sysfs_root: &Path) -> Result<Self> {
        let describe = || PathBuf::from("netlink:scsitransport");

        let mut socket = Socket::new(NETLINK_SCSITRANSPORT).map_err(|source| {
            FpindError::Source {
                path: describe(),
                source,
            }
        })?;
        socket.bind_auto().map_err(|source| FpindError::Source {
            path: describe(),
            source,
        })?;
        socket
            .add_membership(SCSI_NL_GRP_FC_EVENTS)
            .map_err(|source| FpindError::Source {
                path: describe(),
                source,
            })?;

        info!(group = SCSI_NL_GRP_FC_EVENTS, "Subscribed to FC transport events");

        Ok(Self {
            socket,
            buffer: Vec::with_capacity(RECV_BUFFER_LEN),
            sysfs_root: sysfs_root.to_path_buf(),
        })
    }
}

impl FrameSource for NetlinkSource {
    fn next_frame(&mut self) -> Result<Option<RawFrame>> {
        loop {
            self.buffer.clear();
            let n = match self.socket.recv(&mut self.buffer, 0) {
                Ok(n) => n,
                Err(e) if e.raw_os_error() == Some(libc::ENOBUFS) => {
                    warn!("Netlink receive buffer overrun, events lost");
                    continue;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FpindError::Io(e)),
            };

            let Some(event) = parse_fc_event(&self.buffer[..n])? else {
                continue;
            };
            if event.event_code != FCH_EVT_LINK_FPIN {
                debug!(
                    host_no = event.host_no,
                    event_code = %format!("{:#x}", event.event_code),
                    "Ignoring FC transport event"
                );
                continue;
            }

            let origin = port_name_for_host(&self.sysfs_root, event.host_no)?;
            return Ok(Some(RawFrame {
                origin,
                format: PayloadFormat::FcLs,
                payload: event.data,
            }));
        }
    }

    fn describe(&self) -> String {
        "netlink:scsitransport".to_string()
    }
}
