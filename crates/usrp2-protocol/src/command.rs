//! Control command and reply encoding.
//!
//! Each configuration operation is one [`Command`] carried in a
//! `ControlRequest` frame. The opcode travels in the header, the parameters
//! in the payload. The device answers with a `ControlReply` frame echoing the
//! sequence number and opcode; `FLAG_NACK` marks a rejection, in which case
//! the payload is a UTF-8 reason.
//!
//! All encoding/decoding in this module is pure -- no I/O is performed.

use bytes::{Buf, BufMut, BytesMut};

use usrp2_core::{Error, IqScale, MacAddr, MimoConfig, Result};

use crate::frame::{self, FLAG_NACK, Frame, FrameHeader, FrameKind};

/// Command opcodes.
pub mod opcode {
    pub const SET_RX_GAIN: u16 = 0x01;
    pub const SET_TX_GAIN: u16 = 0x02;
    pub const SET_RX_FREQ: u16 = 0x03;
    pub const SET_TX_FREQ: u16 = 0x04;
    pub const SET_RX_DECIM: u16 = 0x05;
    pub const SET_TX_INTERP: u16 = 0x06;
    pub const SET_RX_SCALE_IQ: u16 = 0x07;
    pub const SET_TX_SCALE_IQ: u16 = 0x08;
    pub const START_RX_STREAMING: u16 = 0x09;
    pub const STOP_RX_STREAMING: u16 = 0x0A;
    pub const START_TX_STREAMING: u16 = 0x0B;
    pub const STOP_TX_STREAMING: u16 = 0x0C;
    pub const CONFIG_MIMO: u16 = 0x0D;
    pub const READ_MAC_ADDR: u16 = 0x0E;
    pub const BURN_MAC_ADDR: u16 = 0x0F;
}

/// A configuration or stream-control request.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetRxGain { gain_db: f64 },
    SetTxGain { gain_db: f64 },
    /// Synthesizer frequency plus digital mixer phase increment.
    SetRxFreq { rf_freq: f64, phase_inc: i32 },
    SetTxFreq { rf_freq: f64, phase_inc: i32 },
    SetRxDecim { factor: u32 },
    SetTxInterp { factor: u32 },
    SetRxScaleIq { scale: IqScale },
    SetTxScaleIq { scale: IqScale },
    /// `items_per_frame == 0` lets the device pick.
    StartRxStreaming { channel: u8, items_per_frame: u32 },
    StopRxStreaming { channel: u8 },
    StartTxStreaming { channel: u8 },
    StopTxStreaming { channel: u8 },
    ConfigMimo { config: MimoConfig },
    ReadMacAddr,
    BurnMacAddr { mac: MacAddr },
}

impl Command {
    pub fn opcode(&self) -> u16 {
        match self {
            Command::SetRxGain { .. } => opcode::SET_RX_GAIN,
            Command::SetTxGain { .. } => opcode::SET_TX_GAIN,
            Command::SetRxFreq { .. } => opcode::SET_RX_FREQ,
            Command::SetTxFreq { .. } => opcode::SET_TX_FREQ,
            Command::SetRxDecim { .. } => opcode::SET_RX_DECIM,
            Command::SetTxInterp { .. } => opcode::SET_TX_INTERP,
            Command::SetRxScaleIq { .. } => opcode::SET_RX_SCALE_IQ,
            Command::SetTxScaleIq { .. } => opcode::SET_TX_SCALE_IQ,
            Command::StartRxStreaming { .. } => opcode::START_RX_STREAMING,
            Command::StopRxStreaming { .. } => opcode::STOP_RX_STREAMING,
            Command::StartTxStreaming { .. } => opcode::START_TX_STREAMING,
            Command::StopTxStreaming { .. } => opcode::STOP_TX_STREAMING,
            Command::ConfigMimo { .. } => opcode::CONFIG_MIMO,
            Command::ReadMacAddr => opcode::READ_MAC_ADDR,
            Command::BurnMacAddr { .. } => opcode::BURN_MAC_ADDR,
        }
    }

    /// Stream channel the command addresses (zero for device-wide commands).
    pub fn channel(&self) -> u8 {
        match self {
            Command::StartRxStreaming { channel, .. }
            | Command::StopRxStreaming { channel }
            | Command::StartTxStreaming { channel }
            | Command::StopTxStreaming { channel } => *channel,
            _ => 0,
        }
    }

    /// Encode the parameter payload.
    pub fn encode_params(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(12);
        match self {
            Command::SetRxGain { gain_db } | Command::SetTxGain { gain_db } => {
                buf.put_f64(*gain_db);
            }
            Command::SetRxFreq { rf_freq, phase_inc } | Command::SetTxFreq { rf_freq, phase_inc } => {
                buf.put_f64(*rf_freq);
                buf.put_i32(*phase_inc);
            }
            Command::SetRxDecim { factor } | Command::SetTxInterp { factor } => {
                buf.put_u32(*factor);
            }
            Command::SetRxScaleIq { scale } | Command::SetTxScaleIq { scale } => {
                buf.put_i16(scale.i);
                buf.put_i16(scale.q);
            }
            Command::StartRxStreaming { items_per_frame, .. } => {
                buf.put_u32(*items_per_frame);
            }
            Command::StopRxStreaming { .. }
            | Command::StartTxStreaming { .. }
            | Command::StopTxStreaming { .. }
            | Command::ReadMacAddr => {}
            Command::ConfigMimo { config } => {
                buf.put_u8(config.flags());
                buf.put_bytes(0, 3);
            }
            Command::BurnMacAddr { mac } => {
                buf.put_slice(&mac.octets());
                buf.put_bytes(0, 2);
            }
        }
        buf.to_vec()
    }

    /// Encode a complete `ControlRequest` frame.
    pub fn encode(&self, sequence: u32) -> Vec<u8> {
        let header = FrameHeader::new(FrameKind::ControlRequest)
            .channel(self.channel())
            .sequence(sequence)
            .opcode(self.opcode());
        frame::encode_frame(&header, &self.encode_params())
    }

    /// Decode a command from a parsed `ControlRequest` frame.
    pub fn decode(frame: &Frame<'_>) -> Result<Command> {
        if frame.header.kind != FrameKind::ControlRequest {
            return Err(Error::Protocol(format!(
                "expected control request, got {:?}",
                frame.header.kind
            )));
        }

        let channel = frame.header.channel;
        let op = frame.header.opcode;
        let mut p = frame.payload;
        let need = |n: usize, p: &[u8]| -> Result<()> {
            if p.len() < n {
                Err(Error::Protocol(format!(
                    "command 0x{:02X} payload is {} bytes, expected {}",
                    op,
                    p.len(),
                    n
                )))
            } else {
                Ok(())
            }
        };

        let cmd = match op {
            opcode::SET_RX_GAIN | opcode::SET_TX_GAIN => {
                need(8, p)?;
                let gain_db = p.get_f64();
                if op == opcode::SET_RX_GAIN {
                    Command::SetRxGain { gain_db }
                } else {
                    Command::SetTxGain { gain_db }
                }
            }
            opcode::SET_RX_FREQ | opcode::SET_TX_FREQ => {
                need(12, p)?;
                let rf_freq = p.get_f64();
                let phase_inc = p.get_i32();
                if op == opcode::SET_RX_FREQ {
                    Command::SetRxFreq { rf_freq, phase_inc }
                } else {
                    Command::SetTxFreq { rf_freq, phase_inc }
                }
            }
            opcode::SET_RX_DECIM => {
                need(4, p)?;
                Command::SetRxDecim { factor: p.get_u32() }
            }
            opcode::SET_TX_INTERP => {
                need(4, p)?;
                Command::SetTxInterp { factor: p.get_u32() }
            }
            opcode::SET_RX_SCALE_IQ | opcode::SET_TX_SCALE_IQ => {
                need(4, p)?;
                let scale = IqScale::new(p.get_i16(), p.get_i16());
                if op == opcode::SET_RX_SCALE_IQ {
                    Command::SetRxScaleIq { scale }
                } else {
                    Command::SetTxScaleIq { scale }
                }
            }
            opcode::START_RX_STREAMING => {
                need(4, p)?;
                Command::StartRxStreaming {
                    channel,
                    items_per_frame: p.get_u32(),
                }
            }
            opcode::STOP_RX_STREAMING => Command::StopRxStreaming { channel },
            opcode::START_TX_STREAMING => Command::StartTxStreaming { channel },
            opcode::STOP_TX_STREAMING => Command::StopTxStreaming { channel },
            opcode::CONFIG_MIMO => {
                need(1, p)?;
                let flags = p.get_u8();
                let config = MimoConfig::from_flags(flags).ok_or_else(|| {
                    Error::Protocol(format!("invalid MIMO flags 0x{flags:02X}"))
                })?;
                Command::ConfigMimo { config }
            }
            opcode::READ_MAC_ADDR => Command::ReadMacAddr,
            opcode::BURN_MAC_ADDR => {
                need(6, p)?;
                Command::BurnMacAddr {
                    mac: mac_from_slice(p),
                }
            }
            other => {
                return Err(Error::Protocol(format!("unknown opcode 0x{other:02X}")));
            }
        };
        Ok(cmd)
    }
}

fn mac_from_slice(p: &[u8]) -> MacAddr {
    MacAddr([p[0], p[1], p[2], p[3], p[4], p[5]])
}

/// Acknowledgment status of a control reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyStatus {
    Ack,
    /// Rejected, with the device-supplied reason.
    Nack(String),
}

/// A device reply to a control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlReply {
    /// Echoed request sequence number.
    pub sequence: u32,
    /// Echoed request opcode.
    pub opcode: u16,
    /// Echoed channel.
    pub channel: u8,
    pub status: ReplyStatus,
    /// Result data for commands that return something (empty otherwise).
    pub payload: Vec<u8>,
}

impl ControlReply {
    /// A positive acknowledgment.
    pub fn ack(sequence: u32, opcode: u16, channel: u8, payload: Vec<u8>) -> Self {
        ControlReply {
            sequence,
            opcode,
            channel,
            status: ReplyStatus::Ack,
            payload,
        }
    }

    /// A negative acknowledgment with a reason.
    pub fn nack(sequence: u32, opcode: u16, channel: u8, reason: &str) -> Self {
        ControlReply {
            sequence,
            opcode,
            channel,
            status: ReplyStatus::Nack(reason.to_string()),
            payload: Vec::new(),
        }
    }

    /// Parse a `ControlReply` frame.
    pub fn from_frame(frame: &Frame<'_>) -> Result<Self> {
        if frame.header.kind != FrameKind::ControlReply {
            return Err(Error::Protocol(format!(
                "expected control reply, got {:?}",
                frame.header.kind
            )));
        }
        let status = if frame.header.has_flag(FLAG_NACK) {
            ReplyStatus::Nack(String::from_utf8_lossy(frame.payload).into_owned())
        } else {
            ReplyStatus::Ack
        };
        let payload = match status {
            ReplyStatus::Ack => frame.payload.to_vec(),
            ReplyStatus::Nack(_) => Vec::new(),
        };
        Ok(ControlReply {
            sequence: frame.header.sequence,
            opcode: frame.header.opcode,
            channel: frame.header.channel,
            status,
            payload,
        })
    }

    /// Encode as a `ControlReply` frame.
    pub fn encode(&self) -> Vec<u8> {
        let (flags, payload): (u16, &[u8]) = match &self.status {
            ReplyStatus::Ack => (0, self.payload.as_slice()),
            ReplyStatus::Nack(reason) => (FLAG_NACK, reason.as_bytes()),
        };
        let header = FrameHeader::new(FrameKind::ControlReply)
            .channel(self.channel)
            .sequence(self.sequence)
            .opcode(self.opcode)
            .flags(flags);
        frame::encode_frame(&header, payload)
    }

    /// Convert a negative acknowledgment into [`Error::Rejected`].
    pub fn into_result(self) -> Result<ControlReply> {
        match self.status {
            ReplyStatus::Ack => Ok(self),
            ReplyStatus::Nack(reason) => Err(Error::Rejected {
                opcode: self.opcode,
                reason,
            }),
        }
    }

    /// Read the payload as one big-endian `u32`.
    pub fn payload_u32(&self) -> Result<u32> {
        let mut p = self.payload.as_slice();
        if p.len() < 4 {
            return Err(Error::Protocol(format!(
                "reply to 0x{:02X} carries {} bytes, expected a u32",
                self.opcode,
                p.len()
            )));
        }
        Ok(p.get_u32())
    }

    /// Read the payload as a MAC address.
    pub fn payload_mac(&self) -> Result<MacAddr> {
        if self.payload.len() < 6 {
            return Err(Error::Protocol(format!(
                "reply to 0x{:02X} carries {} bytes, expected a MAC address",
                self.opcode,
                self.payload.len()
            )));
        }
        Ok(mac_from_slice(&self.payload))
    }
}

/// Payload for a reply carrying a MAC address (6 octets plus 2 pad bytes).
pub fn mac_payload(mac: &MacAddr) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_slice(&mac.octets());
    buf.put_bytes(0, 2);
    buf.to_vec()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
