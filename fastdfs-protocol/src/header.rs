//! Fixed frame header for the FastDFS binary protocol.
//!
//! Every message starts with a 10-byte header followed by exactly
//! `length` body bytes:
//!
//! ```text
//! +-------------+---------+--------+
//! | body length | command | status |
//! |  8 bytes BE | 1 byte  | 1 byte |
//! +-------------+---------+--------+
//! ```

use crate::error::ProtocolError;
use bytes::{BufMut, BytesMut};

/// Size of the fixed frame header in bytes.
pub const HEADER_BYTES: usize = 10;

/// A parsed frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Declared body length in bytes.
    pub length: u64,
    /// Command opcode.
    pub cmd: u8,
    /// Status byte; 0 means success, anything else is a remote error code.
    pub status: u8,
}

impl FrameHeader {
    pub fn new(length: u64, cmd: u8, status: u8) -> Self {
        Self {
            length,
            cmd,
            status,
        }
    }

    /// Encodes the header into a fresh buffer; callers append the body.
    ///
    /// Capacity is not reserved for the declared body: for streamed
    /// uploads `length` counts bytes that never pass through this
    /// buffer.
    pub fn encode(&self) -> BytesMut {
        let mut buf = BytesMut::with_capacity(HEADER_BYTES);
        self.encode_into(&mut buf);
        buf
    }

    /// Appends the 10 header bytes to an existing buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.put_u64(self.length);
        buf.put_u8(self.cmd);
        buf.put_u8(self.status);
    }

    /// Parses a header from the first `HEADER_BYTES` of `raw`.
    ///
    /// The length field is decoded as a genuine 64-bit unsigned integer.
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        if raw.len() < HEADER_BYTES {
            return Err(ProtocolError::TruncatedHeader { got: raw.len() });
        }
        let length = u64::from_be_bytes(raw[0..8].try_into().expect("8-byte slice"));
        Ok(Self {
            length,
            cmd: raw[8],
            status: raw[9],
        })
    }

    /// Returns whether the status byte signals success.
    pub fn is_ok(&self) -> bool {
        self.status == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(4096, 11, 0);
        let encoded = header.encode();
        assert_eq!(encoded.len(), HEADER_BYTES);

        let decoded = FrameHeader::parse(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_length_is_full_64_bits() {
        // Lengths at and above 2^31 must not be corrupted.
        let header = FrameHeader::new(1 << 33, 14, 0);
        let encoded = header.encode();
        let decoded = FrameHeader::parse(&encoded).unwrap();
        assert_eq!(decoded.length, 1 << 33);
    }

    #[test]
    fn test_truncated_header() {
        let result = FrameHeader::parse(&[0u8; 9]);
        assert!(matches!(
            result,
            Err(ProtocolError::TruncatedHeader { got: 9 })
        ));
    }

    #[test]
    fn test_status_byte() {
        let encoded = FrameHeader::new(0, 91, 2).encode();
        let decoded = FrameHeader::parse(&encoded).unwrap();
        assert!(!decoded.is_ok());
        assert_eq!(decoded.status, 2);
    }

    #[test]
    fn test_wire_layout() {
        let encoded = FrameHeader::new(0x0102, 14, 1).encode();
        assert_eq!(
            encoded.as_ref(),
            &[0, 0, 0, 0, 0, 0, 0x01, 0x02, 14, 1]
        );
    }

    proptest! {
        #[test]
        fn prop_header_roundtrip(length in any::<u64>(), cmd in any::<u8>(), status in any::<u8>()) {
            let header = FrameHeader::new(length, cmd, status);
            let decoded = FrameHeader::parse(&header.encode()).unwrap();
            prop_assert_eq!(decoded, header);
        }

        #[test]
        fn prop_parse_ignores_trailing_bytes(extra in proptest::collection::vec(any::<u8>(), 0..64)) {
            let header = FrameHeader::new(extra.len() as u64, 24, 0);
            let mut encoded = header.encode();
            encoded.extend_from_slice(&extra);
            let decoded = FrameHeader::parse(&encoded).unwrap();
            prop_assert_eq!(decoded, header);
        }
    }
}
