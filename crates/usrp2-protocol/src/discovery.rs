//! Discovery query and reply payloads.
//!
//! A host broadcasts an empty `DiscoveryQuery` frame. Each device answers
//! with a `DiscoveryReply` whose 40-byte payload identifies it:
//!
//! ```text
//! offset  size  field
//! 0       6     MAC address
//! 6       2     hardware revision
//! 8       16    FPGA image MD5
//! 24      16    firmware MD5
//! ```

use bytes::{Buf, BufMut, BytesMut};

use usrp2_core::{Error, MacAddr, Result};

use crate::frame::{self, Frame, FrameHeader, FrameKind};

/// Size of the discovery reply payload.
pub const DISCOVERY_REPLY_SIZE: usize = 40;

/// Encode a discovery query frame.
pub fn encode_query(sequence: u32) -> Vec<u8> {
    let header = FrameHeader::new(FrameKind::DiscoveryQuery).sequence(sequence);
    frame::encode_frame(&header, &[])
}

/// Identity fields a device reports in answer to a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReply {
    pub mac: MacAddr,
    pub hw_rev: u16,
    pub fpga_md5sum: [u8; 16],
    pub sw_md5sum: [u8; 16],
}

impl DiscoveryReply {
    /// Parse from a `DiscoveryReply` frame.
    pub fn from_frame(frame: &Frame<'_>) -> Result<Self> {
        if frame.header.kind != FrameKind::DiscoveryReply {
            return Err(Error::Protocol(format!(
                "expected discovery reply, got {:?}",
                frame.header.kind
            )));
        }
        Self::decode(frame.payload)
    }

    /// Parse the 40-byte payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() < DISCOVERY_REPLY_SIZE {
            return Err(Error::Protocol(format!(
                "discovery reply is {} bytes, expected {}",
                payload.len(),
                DISCOVERY_REPLY_SIZE
            )));
        }
        let mut buf = payload;
        let mut mac = [0u8; 6];
        buf.copy_to_slice(&mut mac);
        let hw_rev = buf.get_u16();
        let mut fpga_md5sum = [0u8; 16];
        buf.copy_to_slice(&mut fpga_md5sum);
        let mut sw_md5sum = [0u8; 16];
        buf.copy_to_slice(&mut sw_md5sum);
        Ok(DiscoveryReply {
            mac: MacAddr(mac),
            hw_rev,
            fpga_md5sum,
            sw_md5sum,
        })
    }

    /// Encode as a complete `DiscoveryReply` frame echoing `sequence`.
    pub fn encode(&self, sequence: u32) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(DISCOVERY_REPLY_SIZE);
        buf.put_slice(&self.mac.octets());
        buf.put_u16(self.hw_rev);
        buf.put_slice(&self.fpga_md5sum);
        buf.put_slice(&self.sw_md5sum);
        let header = FrameHeader::new(FrameKind::DiscoveryReply).sequence(sequence);
        frame::encode_frame(&header, &buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_frame;

    fn sample() -> DiscoveryReply {
        DiscoveryReply {
            mac: MacAddr([0x00, 0x50, 0xC2, 0x85, 0x31, 0x07]),
            hw_rev: 0x0401,
            fpga_md5sum: [0x11; 16],
            sw_md5sum: [0x22; 16],
        }
    }

    #[test]
    fn query_is_header_only() {
        let bytes = encode_query(3);
        assert_eq!(bytes.len(), frame::HEADER_SIZE);
        assert_eq!(bytes[0], 6);
    }

    #[test]
    fn reply_payload_layout() {
        let bytes = sample().encode(9);
        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(frame.payload.len(), DISCOVERY_REPLY_SIZE);
        assert_eq!(&frame.payload[..6], &[0x00, 0x50, 0xC2, 0x85, 0x31, 0x07]);
        assert_eq!(&frame.payload[6..8], &[0x04, 0x01]);
        assert_eq!(DiscoveryReply::from_frame(&frame).unwrap(), sample());
    }

    #[test]
    fn short_reply_is_rejected() {
        let header = FrameHeader::new(FrameKind::DiscoveryReply);
        let bytes = frame::encode_frame(&header, &[0; 12]);
        let frame = parse_frame(&bytes).unwrap();
        assert!(DiscoveryReply::from_frame(&frame).is_err());
    }

    #[test]
    fn wrong_kind_is_rejected() {
        let bytes = encode_query(1);
        let frame = parse_frame(&bytes).unwrap();
        assert!(matches!(DiscoveryReply::from_frame(&frame), Err(Error::Protocol(_))));
    }
}
