//! Binary frame header codec.
//!
//! Every datagram exchanged with a USRP2 -- control requests and replies,
//! sample frames, flow-control credits and discovery traffic -- starts with
//! the same big-endian header. This module provides a pure parser and
//! builder with no I/O dependencies.
//!
//! ```text
//! offset  size  field
//! 0       1     kind
//! 1       1     channel
//! 2       2     flags
//! 4       4     sequence
//! 8       2     opcode (control frames, zero otherwise)
//! 10      2     payload length in bytes
//! 12      8     timestamp (only when FLAG_TIMESTAMP is set)
//! ..            payload
//! ```

use bytes::{Buf, BufMut, BytesMut};

use usrp2_core::{Error, Result};

/// Fixed header size in bytes (without the optional timestamp).
pub const HEADER_SIZE: usize = 12;

/// Size of the optional timestamp field.
pub const TIMESTAMP_SIZE: usize = 8;

/// Largest datagram we send or expect: a 1500-byte MTU minus IPv4 and UDP
/// headers.
pub const MAX_FRAME_SIZE: usize = 1472;

/// Size of one sample item on the wire.
pub const ITEM_SIZE: usize = 4;

/// Items that fit in a frame carrying a timestamp.
pub const MAX_ITEMS_TIMESTAMPED: usize = (MAX_FRAME_SIZE - HEADER_SIZE - TIMESTAMP_SIZE) / ITEM_SIZE;

/// Items that fit in a frame without a timestamp.
pub const MAX_ITEMS_UNTIMED: usize = (MAX_FRAME_SIZE - HEADER_SIZE) / ITEM_SIZE;

/// First frame of a transmit burst.
pub const FLAG_START_OF_BURST: u16 = 0x0001;
/// Last frame of a transmit burst.
pub const FLAG_END_OF_BURST: u16 = 0x0002;
/// The 64-bit timestamp field follows the fixed header.
pub const FLAG_TIMESTAMP: u16 = 0x0004;
/// Control reply is a negative acknowledgment.
pub const FLAG_NACK: u16 = 0x0008;

/// Frame kind, the first header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Host to device configuration request.
    ControlRequest,
    /// Device acknowledgment of a control request.
    ControlReply,
    /// Receive samples, device to host.
    RxData,
    /// Transmit samples, host to device.
    TxData,
    /// Device returns transmit buffer space.
    TxCredit,
    /// Broadcast query for devices.
    DiscoveryQuery,
    /// Device answer to a discovery query.
    DiscoveryReply,
    /// Unrecognized kind byte.
    Unknown(u8),
}

impl FrameKind {
    pub fn from_byte(b: u8) -> Self {
        match b {
            1 => FrameKind::ControlRequest,
            2 => FrameKind::ControlReply,
            3 => FrameKind::RxData,
            4 => FrameKind::TxData,
            5 => FrameKind::TxCredit,
            6 => FrameKind::DiscoveryQuery,
            7 => FrameKind::DiscoveryReply,
            other => FrameKind::Unknown(other),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            FrameKind::ControlRequest => 1,
            FrameKind::ControlReply => 2,
            FrameKind::RxData => 3,
            FrameKind::TxData => 4,
            FrameKind::TxCredit => 5,
            FrameKind::DiscoveryQuery => 6,
            FrameKind::DiscoveryReply => 7,
            FrameKind::Unknown(b) => b,
        }
    }
}

/// Parsed frame header.
///
/// `FLAG_TIMESTAMP` is never stored in `flags` by callers: it is derived from
/// `timestamp` when encoding and consumed when parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub channel: u8,
    pub flags: u16,
    pub sequence: u32,
    pub opcode: u16,
    pub timestamp: Option<u64>,
}

impl FrameHeader {
    /// A header of the given kind with every other field zeroed.
    pub fn new(kind: FrameKind) -> Self {
        FrameHeader {
            kind,
            channel: 0,
            flags: 0,
            sequence: 0,
            opcode: 0,
            timestamp: None,
        }
    }

    pub fn channel(mut self, channel: u8) -> Self {
        self.channel = channel;
        self
    }

    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn opcode(mut self, opcode: u16) -> Self {
        self.opcode = opcode;
        self
    }

    pub fn flags(mut self, flags: u16) -> Self {
        self.flags = flags & !FLAG_TIMESTAMP;
        self
    }

    pub fn timestamp(mut self, timestamp: Option<u64>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether every bit of `flag` is set.
    pub fn has_flag(&self, flag: u16) -> bool {
        self.flags & flag == flag
    }

    /// Encoded header length, including the timestamp if present.
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + if self.timestamp.is_some() { TIMESTAMP_SIZE } else { 0 }
    }
}

/// A parsed frame: header plus a reference to the payload bytes.
#[derive(Debug, PartialEq)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    /// Payload bytes, borrowed from the receive buffer.
    pub payload: &'a [u8],
}

/// Parse a frame from a raw datagram.
///
/// The declared payload length must fit in the buffer; trailing bytes beyond
/// it are ignored.
pub fn parse_frame(data: &[u8]) -> Result<Frame<'_>> {
    if data.len() < HEADER_SIZE {
        return Err(Error::Protocol(format!(
            "frame too short: {} bytes, minimum is {}",
            data.len(),
            HEADER_SIZE
        )));
    }

    let mut buf = data;
    let kind = FrameKind::from_byte(buf.get_u8());
    let channel = buf.get_u8();
    let raw_flags = buf.get_u16();
    let sequence = buf.get_u32();
    let opcode = buf.get_u16();
    let payload_len = buf.get_u16() as usize;

    if let FrameKind::Unknown(byte) = kind {
        tracing::warn!(kind = byte, channel, sequence, "frame has unrecognized kind byte");
    }

    let timestamp = if raw_flags & FLAG_TIMESTAMP != 0 {
        if buf.remaining() < TIMESTAMP_SIZE {
            return Err(Error::Protocol(format!(
                "frame flags a timestamp but is only {} bytes",
                data.len()
            )));
        }
        Some(buf.get_u64())
    } else {
        None
    };

    if payload_len > buf.remaining() {
        return Err(Error::Protocol(format!(
            "declared payload ({} bytes) exceeds datagram ({} bytes remaining)",
            payload_len,
            buf.remaining()
        )));
    }

    let header = FrameHeader {
        kind,
        channel,
        flags: raw_flags & !FLAG_TIMESTAMP,
        sequence,
        opcode,
        timestamp,
    };

    Ok(Frame {
        header,
        payload: &buf[..payload_len],
    })
}

/// Encode a frame with an arbitrary byte payload.
pub fn encode_frame(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(header.encoded_len() + payload.len());
    put_header(&mut buf, header, payload.len());
    buf.put_slice(payload);
    buf.to_vec()
}

/// Encode a frame whose payload is a run of 32-bit sample items.
pub fn encode_items(header: &FrameHeader, items: &[u32]) -> Vec<u8> {
    let payload_len = items.len() * ITEM_SIZE;
    let mut buf = BytesMut::with_capacity(header.encoded_len() + payload_len);
    put_header(&mut buf, header, payload_len);
    for &item in items {
        buf.put_u32(item);
    }
    buf.to_vec()
}

fn put_header(buf: &mut BytesMut, header: &FrameHeader, payload_len: usize) {
    let mut flags = header.flags & !FLAG_TIMESTAMP;
    if header.timestamp.is_some() {
        flags |= FLAG_TIMESTAMP;
    }
    buf.put_u8(header.kind.to_byte());
    buf.put_u8(header.channel);
    buf.put_u16(flags);
    buf.put_u32(header.sequence);
    buf.put_u16(header.opcode);
    buf.put_u16(payload_len as u16);
    if let Some(ts) = header.timestamp {
        buf.put_u64(ts);
    }
}

/// Decode a payload of big-endian 32-bit items, appending to `out`.
///
/// The payload length must be a multiple of [`ITEM_SIZE`].
pub fn decode_items_into(payload: &[u8], out: &mut Vec<u32>) -> Result<()> {
    if payload.len() % ITEM_SIZE != 0 {
        return Err(Error::Protocol(format!(
            "sample payload length {} is not divisible by {}",
            payload.len(),
            ITEM_SIZE
        )));
    }
    out.reserve(payload.len() / ITEM_SIZE);
    out.extend(
        payload
            .chunks_exact(ITEM_SIZE)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]])),
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_capacity_constants() {
        assert_eq!(MAX_ITEMS_TIMESTAMPED, 363);
        assert_eq!(MAX_ITEMS_UNTIMED, 365);
    }

    #[test]
    fn header_layout_is_big_endian() {
        let header = FrameHeader::new(FrameKind::ControlRequest)
            .channel(2)
            .sequence(0x0102_0304)
            .opcode(0x000B);
        let bytes = encode_frame(&header, &[0xAA, 0xBB]);

        assert_eq!(
            bytes,
            vec![0x01, 0x02, 0x00, 0x00, 0x01, 0x02, 0x03, 0x04, 0x00, 0x0B, 0x00, 0x02, 0xAA, 0xBB]
        );
    }

    #[test]
    fn timestamp_sets_flag_and_field() {
        let header = FrameHeader::new(FrameKind::TxData)
            .flags(FLAG_START_OF_BURST)
            .timestamp(Some(0x1122_3344_5566_7788));
        let bytes = encode_items(&header, &[0xDEAD_BEEF]);

        assert_eq!(bytes.len(), HEADER_SIZE + TIMESTAMP_SIZE + 4);
        assert_eq!(u16::from_be_bytes([bytes[2], bytes[3]]), FLAG_START_OF_BURST | FLAG_TIMESTAMP);
        assert_eq!(&bytes[12..20], &0x1122_3344_5566_7788u64.to_be_bytes());
        assert_eq!(&bytes[20..24], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn parse_timestamped_frame() {
        let header = FrameHeader::new(FrameKind::RxData)
            .channel(5)
            .sequence(77)
            .timestamp(Some(123_456));
        let bytes = encode_items(&header, &[1, 2, 3]);

        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(frame.header, header);
        assert!(!frame.header.has_flag(FLAG_TIMESTAMP));

        let mut items = Vec::new();
        decode_items_into(frame.payload, &mut items).unwrap();
        assert_eq!(items, vec![1, 2, 3]);
    }

    #[test]
    fn parse_untimed_frame() {
        let header = FrameHeader::new(FrameKind::TxData)
            .channel(1)
            .sequence(9)
            .flags(FLAG_END_OF_BURST);
        let bytes = encode_items(&header, &[7; 4]);

        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(frame.header.timestamp, None);
        assert!(frame.header.has_flag(FLAG_END_OF_BURST));
        assert!(!frame.header.has_flag(FLAG_START_OF_BURST));
        assert_eq!(frame.payload.len(), 16);
    }

    #[test]
    fn parse_rejects_short_buffer() {
        let result = parse_frame(&[0x03, 0x00, 0x00]);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[test]
    fn parse_rejects_truncated_timestamp() {
        let mut bytes = encode_frame(&FrameHeader::new(FrameKind::RxData), &[]);
        bytes[3] |= FLAG_TIMESTAMP as u8;
        assert!(parse_frame(&bytes).is_err());
    }

    #[test]
    fn parse_rejects_overlong_payload_length() {
        let mut bytes = encode_frame(&FrameHeader::new(FrameKind::RxData), &[0; 8]);
        bytes[10] = 0x01; // declare 264 bytes
        assert!(parse_frame(&bytes).is_err());
    }

    #[test]
    fn parse_ignores_trailing_bytes() {
        let mut bytes = encode_frame(&FrameHeader::new(FrameKind::TxCredit), &[0, 0, 0, 4]);
        bytes.extend_from_slice(&[0xFF; 6]);
        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(frame.payload, &[0, 0, 0, 4]);
    }

    #[test]
    fn unknown_kind_round_trips() {
        assert_eq!(FrameKind::from_byte(0x42), FrameKind::Unknown(0x42));
        assert_eq!(FrameKind::Unknown(0x42).to_byte(), 0x42);
        for b in 1..=7u8 {
            assert_eq!(FrameKind::from_byte(b).to_byte(), b);
        }
    }

    #[test]
    fn decode_items_rejects_partial_word() {
        let mut out = Vec::new();
        assert!(decode_items_into(&[0, 1, 2], &mut out).is_err());
    }
}
