//! Request header parsing and authentication.
//!
//! # Wire Format
//!
//! ```text
//! offset  size  field
//! 0       1     protocol version
//! 1       16    identity
//! 17      1     option length (N)
//! 18      N     options (skipped)
//! 18+N    1     command (1=TCP, 2=UDP)
//! 19+N    2     remote port (big-endian)
//! 21+N    1     address type (1=IPv4, 2=domain, 3=IPv6)
//! 22+N    var   address value
//! ...           payload
//! ```
//!
//! Parsing is a pure function of the first chunk and the identity set.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

use super::address::TargetAddress;
use super::identity::{canonical_identity, is_well_formed, IdentitySet};
use super::reader::FieldReader;

/// Shortest first chunk that can carry a header.
pub const MIN_HEADER_LEN: usize = 24;

/// Only UDP destination the relay tunnels (as DoH).
pub const DNS_PORT: u16 = 53;

/// Why a first chunk was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeaderError {
    /// Too short, truncated field, bad address type or empty address.
    #[error("malformed header: {0}")]
    Malformed(String),

    /// Identity not in the allowed set. Deliberately carries no detail.
    #[error("invalid user")]
    Unauthorized,

    #[error("command {0} is not supported, command 01-tcp,02-udp,03-mux")]
    UnsupportedCommand(u8),

    #[error("UDP proxy only enabled for DNS which is port 53, requested port {0}")]
    UnsupportedUdpTarget(u16),
}

impl HeaderError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::Unauthorized => "unauthorized",
            Self::UnsupportedCommand(_) => "unsupported_command",
            Self::UnsupportedUdpTarget(_) => "unsupported_udp_target",
        }
    }
}

/// Requested transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Tcp = 0x01,
    Udp = 0x02,
}

impl Command {
    pub fn from_byte(b: u8) -> Result<Self, HeaderError> {
        match b {
            0x01 => Ok(Self::Tcp),
            0x02 => Ok(Self::Udp),
            other => Err(HeaderError::UnsupportedCommand(other)),
        }
    }

    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            Self::Udp => f.write_str("udp"),
        }
    }
}

/// A parsed and authenticated request header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Protocol version, echoed in the response header.
    pub version: u8,
    /// Authenticated identity.
    pub identity: Uuid,
    pub command: Command,
    pub port: u16,
    pub address: TargetAddress,
    /// Offset of the first payload byte within the chunk.
    pub payload_offset: usize,
}

impl RequestHeader {
    /// `address:port`, used as the session's log context.
    pub fn target(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    /// True when the session tunnels DNS over HTTPS.
    pub fn is_dns(&self) -> bool {
        self.command == Command::Udp
    }
}

/// Parse and authenticate the first chunk of a session.
pub fn parse_request_header(
    buf: &[u8],
    identities: &IdentitySet,
) -> Result<RequestHeader, HeaderError> {
    if buf.len() < MIN_HEADER_LEN {
        return Err(HeaderError::Malformed(format!(
            "header is {} bytes, need at least {MIN_HEADER_LEN}",
            buf.len()
        )));
    }

    let mut reader = FieldReader::new(buf);
    let version = reader.u8("version")?;

    let identity = reader.array::<16>("identity")?;
    let canonical = canonical_identity(&identity);
    if !is_well_formed(&canonical) {
        return Err(HeaderError::Malformed("identity could not be canonicalized".to_string()));
    }
    if !identities.contains(&canonical) {
        return Err(HeaderError::Unauthorized);
    }

    let opt_len = reader.u8("option length")? as usize;
    reader.take(opt_len, "options")?;

    let command = Command::from_byte(reader.u8("command")?)?;
    let port = reader.u16_be("port")?;
    let address = TargetAddress::read(&mut reader)?;

    if command == Command::Udp && port != DNS_PORT {
        return Err(HeaderError::UnsupportedUdpTarget(port));
    }

    Ok(RequestHeader {
        version,
        identity: Uuid::from_bytes(identity),
        command,
        port,
        address,
        payload_offset: reader.position(),
    })
}

/// Encode a version-0 request header with no options.
pub fn encode_request_header(
    identity: &Uuid,
    command: Command,
    port: u16,
    address: &TargetAddress,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(MIN_HEADER_LEN + 16);
    out.push(0);
    out.extend_from_slice(identity.as_bytes());
    out.push(0);
    out.push(command.as_byte());
    out.extend_from_slice(&port.to_be_bytes());
    address.encode_into(&mut out);
    out
}
