//! Sample data and flow-control frames.
//!
//! `RxData` and `TxData` frames share one layout: the header (optionally
//! timestamped) followed by big-endian 32-bit sample items. `TxCredit`
//! frames carry a single `u32`, the number of transmit frames the device has
//! drained from its buffer since the previous credit.

use bytes::{Buf, BufMut, BytesMut};

use usrp2_core::{Error, Result};

use crate::frame::{
    self, FLAG_END_OF_BURST, FLAG_START_OF_BURST, Frame, FrameHeader, FrameKind,
};

/// An owned sample frame (either direction).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleFrame {
    pub channel: u8,
    pub sequence: u32,
    /// Burst flags (`FLAG_START_OF_BURST`, `FLAG_END_OF_BURST`).
    pub flags: u16,
    pub timestamp: Option<u64>,
    /// Packed I/Q sample words.
    pub items: Vec<u32>,
}

impl SampleFrame {
    /// Decode from a parsed `RxData` or `TxData` frame.
    pub fn from_frame(frame: &Frame<'_>) -> Result<Self> {
        match frame.header.kind {
            FrameKind::RxData | FrameKind::TxData => {}
            other => {
                return Err(Error::Protocol(format!("expected sample frame, got {other:?}")));
            }
        }
        let mut items = Vec::new();
        frame::decode_items_into(frame.payload, &mut items)?;
        Ok(SampleFrame {
            channel: frame.header.channel,
            sequence: frame.header.sequence,
            flags: frame.header.flags,
            timestamp: frame.header.timestamp,
            items,
        })
    }

    /// Encode as a frame of the given kind.
    pub fn encode(&self, kind: FrameKind) -> Vec<u8> {
        let header = FrameHeader::new(kind)
            .channel(self.channel)
            .sequence(self.sequence)
            .flags(self.flags)
            .timestamp(self.timestamp);
        frame::encode_items(&header, &self.items)
    }

    pub fn start_of_burst(&self) -> bool {
        self.flags & FLAG_START_OF_BURST != 0
    }

    pub fn end_of_burst(&self) -> bool {
        self.flags & FLAG_END_OF_BURST != 0
    }
}

/// Encode a `TxCredit` frame returning `frames` credits on `channel`.
pub fn encode_credit(channel: u8, sequence: u32, frames: u32) -> Vec<u8> {
    let mut payload = BytesMut::with_capacity(4);
    payload.put_u32(frames);
    let header = FrameHeader::new(FrameKind::TxCredit)
        .channel(channel)
        .sequence(sequence);
    frame::encode_frame(&header, &payload)
}

/// Read the credit count from a `TxCredit` frame.
pub fn decode_credit(frame: &Frame<'_>) -> Result<u32> {
    if frame.header.kind != FrameKind::TxCredit {
        return Err(Error::Protocol(format!(
            "expected tx credit, got {:?}",
            frame.header.kind
        )));
    }
    let mut p = frame.payload;
    if p.len() < 4 {
        return Err(Error::Protocol(format!(
            "tx credit payload is {} bytes, expected 4",
            p.len()
        )));
    }
    Ok(p.get_u32())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_frame;

    #[test]
    fn sample_frame_survives_encoding() {
        let sf = SampleFrame {
            channel: 3,
            sequence: u32::MAX,
            flags: FLAG_START_OF_BURST,
            timestamp: Some(42),
            items: vec![0x7FFF_8001, 0, 1],
        };
        let bytes = sf.encode(FrameKind::TxData);
        let decoded = SampleFrame::from_frame(&parse_frame(&bytes).unwrap()).unwrap();
        assert_eq!(decoded, sf);
        assert!(decoded.start_of_burst());
        assert!(!decoded.end_of_burst());
    }

    #[test]
    fn control_frame_is_not_a_sample_frame() {
        let bytes = frame::encode_frame(&FrameHeader::new(FrameKind::ControlReply), &[]);
        assert!(SampleFrame::from_frame(&parse_frame(&bytes).unwrap()).is_err());
    }

    #[test]
    fn credit_frame() {
        let bytes = encode_credit(2, 10, 17);
        let frame = parse_frame(&bytes).unwrap();
        assert_eq!(frame.header.channel, 2);
        assert_eq!(decode_credit(&frame).unwrap(), 17);
    }

    #[test]
    fn short_credit_is_rejected() {
        let bytes = frame::encode_frame(&FrameHeader::new(FrameKind::TxCredit), &[0, 1]);
        assert!(decode_credit(&parse_frame(&bytes).unwrap()).is_err());
    }
}
