//! usrp2-protocol: wire codec for the USRP2 host driver.
//!
//! Pure encoding and decoding of every datagram exchanged with a device. No
//! sockets, no tasks: the driver and the test harness both build on this
//! crate so that they agree on the wire format by construction.
//!
//! - [`frame`] -- common frame header, raw parse/encode
//! - [`command`] -- control requests ([`Command`]) and replies ([`ControlReply`])
//! - [`discovery`] -- discovery query and reply payloads
//! - [`stream`] -- sample frames and transmit flow-control credits
//! - [`convert`] -- host sample formats to and from 32-bit wire words

pub mod command;
pub mod convert;
pub mod discovery;
pub mod frame;
pub mod stream;

pub use command::{opcode, Command, ControlReply, ReplyStatus};
pub use convert::WireSample;
pub use discovery::DiscoveryReply;
pub use frame::{parse_frame, Frame, FrameHeader, FrameKind};
pub use stream::SampleFrame;
