//! Network transport for the USRP2 host driver.
//!
//! Devices speak UDP. [`UdpTransport`] is the one transport: it serves both
//! broadcast discovery and the per-session connected socket.

pub mod udp;

pub use udp::{resolve, UdpTransport, DEVICE_PORT};
