//! Device discovery on the local network.
//!
//! The host broadcasts a `DiscoveryQuery` frame to the segment and collects
//! `DiscoveryReply` frames until the window closes. Because UDP is lossy the
//! window is split into rounds and the query is re-sent at the start of
//! each. Replies are deduplicated by MAC address.
//!
//! # Usage
//!
//! ```no_run
//! use usrp2::discovery;
//!
//! # async fn example() -> usrp2_core::Result<()> {
//! for dev in discovery::find("192.168.10.255", "").await? {
//!     println!("{}", dev);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;

use usrp2_core::{DeviceDescriptor, Error, MacAddr, MacFilter, Result};
use usrp2_protocol::discovery::{self, DiscoveryReply};
use usrp2_protocol::frame::{self, MAX_FRAME_SIZE};
use usrp2_transport::{UdpTransport, DEVICE_PORT};

/// Default length of the discovery window.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_millis(300);

/// Default number of query rounds in the window.
pub const DEFAULT_QUERY_ATTEMPTS: u32 = 3;

/// Options controlling a discovery scan.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Total time spent collecting replies.
    pub timeout: Duration,
    /// Number of rounds the window is split into; the query is sent once
    /// per round.
    pub query_attempts: u32,
    /// Port used when the interface address has none.
    pub device_port: u16,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DISCOVERY_TIMEOUT,
            query_attempts: DEFAULT_QUERY_ATTEMPTS,
            device_port: DEVICE_PORT,
        }
    }
}

/// Find devices reachable through `interface` whose MAC matches `mac_filter`.
///
/// `mac_filter` is empty (all devices), a full address, or a two-octet
/// suffix. An unparsable filter is [`Error::InvalidParameter`]; finding
/// nothing is an empty list.
pub async fn find(interface: &str, mac_filter: &str) -> Result<Vec<DeviceDescriptor>> {
    let filter: MacFilter = mac_filter.parse()?;
    find_with_options(interface, filter, &DiscoveryOptions::default()).await
}

/// [`find`] with explicit options and a pre-parsed filter.
pub async fn find_with_options(
    interface: &str,
    filter: MacFilter,
    options: &DiscoveryOptions,
) -> Result<Vec<DeviceDescriptor>> {
    let target = usrp2_transport::resolve(interface, options.device_port).await?;
    let transport = UdpTransport::bind_for(target).await?;
    transport.set_broadcast(true)?;

    tracing::debug!(target = %target, filter = %filter, "discovering USRP2 devices");

    let rounds = options.query_attempts.max(1);
    let round_len = options.timeout / rounds;
    let mut found: HashMap<MacAddr, DeviceDescriptor> = HashMap::new();
    let mut buf = vec![0u8; MAX_FRAME_SIZE];

    for round in 0..rounds {
        transport.send_to(&discovery::encode_query(round), target).await?;

        let deadline = tokio::time::Instant::now() + round_len;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match transport.recv_from(&mut buf, remaining).await {
                Ok((n, src)) => {
                    if let Some(dev) = parse_reply(&buf[..n], src) {
                        if filter.matches(&dev.mac) && !found.contains_key(&dev.mac) {
                            tracing::debug!(mac = %dev.mac, addr = %dev.addr, "found device");
                            found.insert(dev.mac, dev);
                        }
                    }
                }
                Err(Error::Timeout) => break,
                Err(e) => {
                    tracing::trace!(error = %e, "discovery receive error");
                }
            }
        }
    }

    let mut devices: Vec<DeviceDescriptor> = found.into_values().collect();
    devices.sort_by_key(|d| d.mac);
    tracing::debug!(count = devices.len(), "discovery complete");
    Ok(devices)
}

/// Decode one datagram; anything other than a well-formed reply is `None`.
fn parse_reply(data: &[u8], src: SocketAddr) -> Option<DeviceDescriptor> {
    let reply = frame::parse_frame(data)
        .and_then(|f| DiscoveryReply::from_frame(&f))
        .map_err(|e| tracing::trace!(remote = %src, error = %e, "ignoring non-discovery datagram"))
        .ok()?;
    Some(DeviceDescriptor {
        mac: reply.mac,
        addr: src,
        hw_rev: reply.hw_rev,
        fpga_md5sum: reply.fpga_md5sum,
        sw_md5sum: reply.sw_md5sum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use usrp2_test_harness::MockDevice;

    fn quick() -> DiscoveryOptions {
        DiscoveryOptions {
            timeout: Duration::from_millis(150),
            ..DiscoveryOptions::default()
        }
    }

    #[tokio::test]
    async fn finds_single_device() {
        let device = MockDevice::start().await.unwrap();
        let found = find_with_options(&device.addr().to_string(), MacFilter::Any, &quick())
            .await
            .unwrap();
        assert_eq!(found, vec![device.descriptor().await]);
    }

    #[tokio::test]
    async fn deduplicates_across_rounds() {
        let device = MockDevice::start().await.unwrap();
        let options = DiscoveryOptions {
            query_attempts: 5,
            ..quick()
        };
        let found = find_with_options(&device.addr().to_string(), MacFilter::Any, &options)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn filter_selects_device() {
        let device = MockDevice::start().await.unwrap();
        device
            .add_neighbour(MockDevice::default_identity(MacAddr::from_suffix([0x00, 0x02])))
            .await;

        let all = find_with_options(&device.addr().to_string(), MacFilter::Any, &quick())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);

        let filter: MacFilter = "00:02".parse().unwrap();
        let one = find_with_options(&device.addr().to_string(), filter, &quick())
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].mac, MacAddr::from_suffix([0x00, 0x02]));
    }

    #[tokio::test]
    async fn malformed_replies_are_ignored() {
        let device = MockDevice::start().await.unwrap();
        device.send_malformed_discovery().await;
        let found = find_with_options(&device.addr().to_string(), MacFilter::Any, &quick())
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn silence_is_empty_not_error() {
        let device = MockDevice::start().await.unwrap();
        device.ignore_discovery().await;
        let found = find_with_options(&device.addr().to_string(), MacFilter::Any, &quick())
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn bad_filter_is_invalid_parameter() {
        let result = find("127.0.0.1", "not-a-mac").await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }
}
