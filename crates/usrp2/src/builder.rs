//! Usrp2Builder -- fluent builder for opening a [`Usrp2`] session.
//!
//! Separates configuration from construction: callers pick the network
//! segment, which device to use, the attached front end and protocol
//! timing before any socket is opened.
//!
//! # Example
//!
//! ```no_run
//! use usrp2::builder::Usrp2Builder;
//! use usrp2::models::xcvr2450;
//! use std::time::Duration;
//!
//! # async fn example() -> usrp2_core::Result<()> {
//! let usrp = Usrp2Builder::new()
//!     .interface("192.168.10.255")
//!     .address("30:0a")
//!     .model(xcvr2450())
//!     .ack_timeout(Duration::from_millis(100))
//!     .build()
//!     .await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use usrp2_core::{DeviceDescriptor, Error, IqScale, MacFilter, Result};

use crate::control::{DEFAULT_ACK_TIMEOUT, DEFAULT_MAX_ATTEMPTS};
use crate::discovery::{self, DiscoveryOptions, DEFAULT_DISCOVERY_TIMEOUT};
use crate::models::{self, FrontEndModel};
use crate::session::Usrp2;
use crate::tx::DEFAULT_TX_TIMEOUT;

/// Protocol timing and host-side sample options for a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Wait per control attempt before re-sending.
    pub ack_timeout: Duration,
    /// Sends per control request.
    pub max_attempts: u32,
    /// Bound on waiting for transmit credit.
    pub tx_timeout: Duration,
    /// Scaling applied to complex `i16` samples before transmission.
    pub tx_iq_scale: IqScale,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            tx_timeout: DEFAULT_TX_TIMEOUT,
            tx_iq_scale: IqScale::IDENTITY,
        }
    }
}

/// Fluent builder for [`Usrp2`].
///
/// Either [`interface`](Self::interface) (discover, then connect) or
/// [`descriptor`](Self::descriptor) (connect directly) must be set.
pub struct Usrp2Builder {
    interface: Option<String>,
    address: String,
    descriptor: Option<DeviceDescriptor>,
    model: Option<FrontEndModel>,
    discovery_timeout: Duration,
    options: SessionOptions,
}

impl Default for Usrp2Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Usrp2Builder {
    pub fn new() -> Self {
        Usrp2Builder {
            interface: None,
            address: String::new(),
            descriptor: None,
            model: None,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            options: SessionOptions::default(),
        }
    }

    /// Broadcast or target address of the segment to search,
    /// `host` or `host:port`.
    pub fn interface(mut self, interface: &str) -> Self {
        self.interface = Some(interface.to_string());
        self
    }

    /// MAC address (full or two-octet suffix) of the device to open.
    /// Empty selects the only device on the segment.
    pub fn address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    /// Connect to an already-discovered device, skipping discovery.
    pub fn descriptor(mut self, descriptor: DeviceDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }

    /// Attached daughterboard (default: WBX).
    pub fn model(mut self, model: FrontEndModel) -> Self {
        self.model = Some(model);
        self
    }

    /// Control acknowledgment window (default: 50ms).
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.options.ack_timeout = timeout;
        self
    }

    /// Sends per control request (default: 3).
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.options.max_attempts = attempts;
        self
    }

    /// Length of the discovery window (default: 300ms).
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Bound on waiting for transmit credit (default: 1s).
    pub fn tx_timeout(mut self, timeout: Duration) -> Self {
        self.options.tx_timeout = timeout;
        self
    }

    /// Host-side scaling for complex `i16` transmit samples.
    pub fn tx_iq_scale(mut self, scale: IqScale) -> Self {
        self.options.tx_iq_scale = scale;
        self
    }

    /// Resolve the device and open the session.
    pub async fn build(self) -> Result<Usrp2> {
        let model = self.model.unwrap_or_else(models::wbx);
        let descriptor = match self.descriptor {
            Some(d) => d,
            None => {
                let interface = self.interface.as_deref().ok_or_else(|| {
                    Error::InvalidParameter(
                        "interface is required: call .interface() or .descriptor() before .build()"
                            .into(),
                    )
                })?;
                let filter: MacFilter = self.address.parse()?;
                let options = DiscoveryOptions {
                    timeout: self.discovery_timeout,
                    ..DiscoveryOptions::default()
                };
                select_one(discovery::find_with_options(interface, filter, &options).await?, &self.address)?
            }
        };
        Usrp2::connect(descriptor, model, self.options).await
    }
}

fn select_one(mut found: Vec<DeviceDescriptor>, address: &str) -> Result<DeviceDescriptor> {
    let wanted = if address.is_empty() { "any address" } else { address };
    match found.len() {
        1 => Ok(found.remove(0)),
        0 => Err(Error::AmbiguousOrNotFound(format!("no device found ({wanted})"))),
        n => Err(Error::AmbiguousOrNotFound(format!(
            "{n} devices found ({wanted}); specify a MAC address"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options() {
        let o = SessionOptions::default();
        assert_eq!(o.ack_timeout, Duration::from_millis(50));
        assert_eq!(o.max_attempts, 3);
        assert_eq!(o.tx_timeout, Duration::from_secs(1));
        assert_eq!(o.tx_iq_scale, IqScale::IDENTITY);
    }

    #[tokio::test]
    async fn build_requires_interface_or_descriptor() {
        let result = Usrp2Builder::new().build().await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn bad_address_is_invalid_parameter() {
        let result = Usrp2Builder::new()
            .interface("127.0.0.1")
            .address("zz:zz")
            .build()
            .await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn select_one_counts() {
        let d = DeviceDescriptor {
            mac: usrp2_core::MacAddr::from_suffix([0, 1]),
            addr: "127.0.0.1:49152".parse().unwrap(),
            hw_rev: 0,
            fpga_md5sum: [0; 16],
            sw_md5sum: [0; 16],
        };
        assert_eq!(select_one(vec![d.clone()], "").unwrap(), d);
        assert!(matches!(select_one(vec![], ""), Err(Error::AmbiguousOrNotFound(_))));
        let err = select_one(vec![d.clone(), d], "").unwrap_err();
        assert!(err.to_string().contains("2 devices found"));
    }
}
