//! Response header framing.
//!
//! The response header is two bytes, the echoed version and a zero
//! extra-length byte, and goes out exactly once per session in front of the
//! first outbound chunk.

use bytes::{BufMut, Bytes, BytesMut};

pub const RESPONSE_HEADER_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseHeader {
    version: u8,
}

impl ResponseHeader {
    pub fn new(version: u8) -> Self {
        Self { version }
    }

    pub fn to_bytes(self) -> [u8; RESPONSE_HEADER_LEN] {
        [self.version, 0]
    }
}

/// Prepends the response header to the first chunk it sees and passes every
/// later chunk through untouched.
#[derive(Debug)]
pub struct ResponseFramer {
    pending: Option<ResponseHeader>,
}

impl ResponseFramer {
    pub fn new(header: ResponseHeader) -> Self {
        Self { pending: Some(header) }
    }

    pub fn frame(&mut self, chunk: Bytes) -> Bytes {
        match self.pending.take() {
            Some(header) => {
                let mut out = BytesMut::with_capacity(RESPONSE_HEADER_LEN + chunk.len());
                out.put_slice(&header.to_bytes());
                out.put(chunk);
                out.freeze()
            }
            None => chunk,
        }
    }

    pub fn header_sent(&self) -> bool {
        self.pending.is_none()
    }
}
