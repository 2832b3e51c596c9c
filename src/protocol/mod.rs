//! Tunnel wire protocol.
//!
//! # Data Flow
//! ```text
//! first transport chunk
//!     → header.rs (length check, identity, options, command, port)
//!     → address.rs (IPv4 / domain / IPv6 value)
//!     → identity.rs (membership in the allowed set)
//!     → RequestHeader { version, target, payload_offset }
//!
//! first outbound chunk
//!     → response.rs (prepend [version, 0] once)
//! ```

pub mod address;
pub mod header;
pub mod identity;
pub mod response;

mod reader;

pub use address::TargetAddress;
pub use header::{
    encode_request_header, parse_request_header, Command, HeaderError, RequestHeader, DNS_PORT,
    MIN_HEADER_LEN,
};
pub use identity::IdentitySet;
pub use response::{ResponseFramer, ResponseHeader, RESPONSE_HEADER_LEN};
