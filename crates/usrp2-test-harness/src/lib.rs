//! usrp2-test-harness: test utilities for the USRP2 host driver.
//!
//! [`MockDevice`] emulates a device over loopback UDP so the driver's
//! discovery, control, and streaming paths can be tested without hardware.

pub mod mock_device;

pub use mock_device::{MockDevice, RecordedRequest, DEFAULT_TX_CAPACITY};
