//! Destination address field.
//!
//! ```text
//! type 1: 4 raw bytes           → dotted decimal
//! type 2: 1 length byte + UTF-8 → domain
//! type 3: 16 raw bytes          → 8 hex groups joined by ':' (no compression, no brackets)
//! ```

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use super::header::HeaderError;
use super::reader::FieldReader;

/// Address type constants
pub mod address_type {
    /// IPv4 address (4 bytes)
    pub const IPV4: u8 = 0x01;
    /// Domain name (length + string)
    pub const DOMAIN: u8 = 0x02;
    /// IPv6 address (16 bytes)
    pub const IPV6: u8 = 0x03;
}

/// Destination requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddress {
    Ipv4(Ipv4Addr),
    Domain(String),
    Ipv6(Ipv6Addr),
}

impl TargetAddress {
    /// Decode the type byte and value at the reader's position.
    pub(crate) fn read(reader: &mut FieldReader<'_>) -> Result<Self, HeaderError> {
        let atyp = reader.u8("address type")?;
        let address = match atyp {
            address_type::IPV4 => Self::Ipv4(Ipv4Addr::from(reader.array::<4>("ipv4 address")?)),
            address_type::DOMAIN => {
                let len = reader.u8("domain length")? as usize;
                let raw = reader.take(len, "domain")?;
                let domain = std::str::from_utf8(raw).map_err(|_| {
                    HeaderError::Malformed("domain is not valid UTF-8".to_string())
                })?;
                Self::Domain(domain.to_string())
            }
            address_type::IPV6 => Self::Ipv6(Ipv6Addr::from(reader.array::<16>("ipv6 address")?)),
            other => {
                return Err(HeaderError::Malformed(format!("invalid address type {other}")));
            }
        };

        if address.is_empty() {
            return Err(HeaderError::Malformed(format!(
                "address is empty, address type is {atyp}"
            )));
        }
        Ok(address)
    }

    /// Address type byte for this value.
    pub fn address_type(&self) -> u8 {
        match self {
            Self::Ipv4(_) => address_type::IPV4,
            Self::Domain(_) => address_type::DOMAIN,
            Self::Ipv6(_) => address_type::IPV6,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Domain(d) if d.is_empty())
    }

    /// Append the wire encoding (type byte + value).
    ///
    /// Domains longer than 255 bytes are truncated to fit the length byte.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.address_type());
        match self {
            Self::Ipv4(ip) => out.extend_from_slice(&ip.octets()),
            Self::Domain(d) => {
                let bytes = &d.as_bytes()[..d.len().min(u8::MAX as usize)];
                out.push(bytes.len() as u8);
                out.extend_from_slice(bytes);
            }
            Self::Ipv6(ip) => out.extend_from_slice(&ip.octets()),
        }
    }
}

impl fmt::Display for TargetAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ipv4(ip) => write!(f, "{ip}"),
            Self::Domain(d) => f.write_str(d),
            Self::Ipv6(ip) => {
                for (i, group) in ip.segments().iter().enumerate() {
                    if i > 0 {
                        f.write_str(":")?;
                    }
                    write!(f, "{group:x}")?;
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for TargetAddress {
    /// Classify a textual host: IP literals become typed addresses, anything else a domain.
    fn from(host: &str) -> Self {
        let trimmed = host.trim_start_matches('[').trim_end_matches(']');
        if let Ok(v4) = trimmed.parse::<Ipv4Addr>() {
            Self::Ipv4(v4)
        } else if let Ok(v6) = trimmed.parse::<Ipv6Addr>() {
            Self::Ipv6(v6)
        } else {
            Self::Domain(host.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> Result<TargetAddress, HeaderError> {
        TargetAddress::read(&mut FieldReader::new(bytes))
    }

    #[test]
    fn ipv4_is_dotted_decimal() {
        let addr = decode(&[1, 192, 168, 1, 1]).unwrap();
        assert_eq!(addr.to_string(), "192.168.1.1");
    }

    #[test]
    fn domain_uses_length_prefix() {
        let mut bytes = vec![2, 11];
        bytes.extend_from_slice(b"example.com");
        bytes.extend_from_slice(b"trailing payload");
        let addr = decode(&bytes).unwrap();
        assert_eq!(addr.to_string(), "example.com");
    }

    #[test]
    fn ipv6_is_uncompressed_lower_hex() {
        let ip: Ipv6Addr = "2001:db8:85a3::8a2e:370:7334".parse().unwrap();
        let mut bytes = vec![3];
        bytes.extend_from_slice(&ip.octets());
        let addr = decode(&bytes).unwrap();
        assert_eq!(addr.to_string(), "2001:db8:85a3:0:0:8a2e:370:7334");
    }

    #[test]
    fn unknown_type_is_malformed() {
        let err = decode(&[4, 1, 2, 3, 4]).unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn empty_domain_is_malformed() {
        let err = decode(&[2, 0]).unwrap_err();
        assert!(err.to_string().contains("address is empty"));
    }

    #[test]
    fn truncated_domain_is_malformed() {
        let err = decode(&[2, 10, b'a', b'b']).unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn invalid_utf8_domain_is_malformed() {
        let err = decode(&[2, 2, 0xff, 0xfe]).unwrap_err();
        assert_eq!(err.kind(), "malformed");
    }

    #[test]
    fn host_strings_are_classified() {
        assert_eq!(TargetAddress::from("10.0.0.1").address_type(), address_type::IPV4);
        assert_eq!(TargetAddress::from("[::1]").address_type(), address_type::IPV6);
        assert_eq!(TargetAddress::from("example.com").address_type(), address_type::DOMAIN);
    }
}
