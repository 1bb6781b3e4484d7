//! usrp2-core: Core types and error definitions for the USRP2 host driver.
//!
//! This crate holds the value types shared by the wire codec, the transport
//! and the driver, so that applications and test tools can name devices,
//! tuning results and transmit metadata without pulling in any I/O.
//!
//! # Key types
//!
//! - [`DeviceDescriptor`] -- identity of a device found by discovery
//! - [`MacAddr`] / [`MacFilter`] -- hardware addresses and scan filters
//! - [`TuneResult`] -- outcome of a center frequency request
//! - [`TxMetadata`] -- per-call transmit timestamp and burst flags
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod mac;
pub mod types;

pub use error::{Error, Result};
pub use mac::{MacAddr, MacFilter, ParseMacError, VENDOR_PREFIX};
pub use types::*;
