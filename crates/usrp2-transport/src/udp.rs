//! UDP datagram socket for device traffic.
//!
//! [`UdpTransport`] wraps a [`tokio::net::UdpSocket`] and maps its failures
//! onto the driver's [`Error`] type. Discovery uses an unconnected socket
//! with broadcast enabled; a session binds its own socket and connects it to
//! the device so that stray datagrams from other hosts are dropped by the OS.
//!
//! # Example
//!
//! ```no_run
//! use usrp2_transport::UdpTransport;
//! use std::time::Duration;
//!
//! # async fn example() -> usrp2_core::Result<()> {
//! let transport = UdpTransport::bind("0.0.0.0:0").await?;
//! transport.set_broadcast(true)?;
//!
//! let target = usrp2_transport::resolve("192.168.10.255", usrp2_transport::DEVICE_PORT).await?;
//! transport.send_to(b"query", target).await?;
//!
//! let mut buf = [0u8; 1472];
//! let (n, src) = transport.recv_from(&mut buf, Duration::from_millis(100)).await?;
//! println!("{} bytes from {}", n, src);
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;
use usrp2_core::{Error, Result};

/// UDP port devices listen on.
pub const DEVICE_PORT: u16 = 49152;

/// Resolve an interface or device address.
///
/// Accepts `"host:port"` or a bare `"host"`, in which case `default_port` is
/// used. The first resolved address wins.
pub async fn resolve(addr: &str, default_port: u16) -> Result<SocketAddr> {
    let addr = addr.trim();
    if addr.is_empty() {
        return Err(Error::InvalidParameter("empty network address".into()));
    }
    if let Ok(sa) = addr.parse::<SocketAddr>() {
        return Ok(sa);
    }

    let with_port = if addr.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok()) {
        addr.to_string()
    } else {
        format!("{addr}:{default_port}")
    };

    let mut addrs = tokio::net::lookup_host(with_port.as_str()).await.map_err(|e| {
        tracing::debug!(addr = %with_port, error = %e, "address lookup failed");
        Error::InvalidParameter(format!("cannot resolve '{addr}': {e}"))
    })?;
    addrs
        .next()
        .ok_or_else(|| Error::InvalidParameter(format!("'{addr}' resolved to no addresses")))
}

/// A bound UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    /// Bind to a local address such as `"0.0.0.0:0"`.
    pub async fn bind(addr: &str) -> Result<Self> {
        tracing::debug!(addr = %addr, "binding UDP socket");

        let socket = UdpSocket::bind(addr).await.map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "failed to bind UDP socket");
            Error::Io(e)
        })?;
        let local_addr = socket.local_addr()?;

        tracing::debug!(local = %local_addr, "UDP socket bound");
        Ok(Self { socket, local_addr })
    }

    /// Bind an ephemeral port on the wildcard address of `peer`'s family.
    pub async fn bind_for(peer: SocketAddr) -> Result<Self> {
        let wildcard = if peer.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        Self::bind(wildcard).await
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Enable or disable sending to broadcast addresses.
    pub fn set_broadcast(&self, enable: bool) -> Result<()> {
        tracing::debug!(local = %self.local_addr, enable, "setting broadcast");
        self.socket.set_broadcast(enable).map_err(Error::Io)
    }

    /// Set the default destination and filter inbound datagrams to it.
    pub async fn connect(&self, addr: SocketAddr) -> Result<()> {
        self.socket.connect(addr).await.map_err(|e| {
            tracing::error!(local = %self.local_addr, remote = %addr, error = %e, "failed to connect UDP socket");
            Error::Io(e)
        })?;
        tracing::debug!(local = %self.local_addr, remote = %addr, "UDP socket connected");
        Ok(())
    }

    /// Send one datagram to `addr`.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> Result<()> {
        tracing::trace!(local = %self.local_addr, remote = %addr, bytes = data.len(), "sending datagram");
        self.socket.send_to(data, addr).await.map_err(|e| {
            tracing::warn!(local = %self.local_addr, remote = %addr, error = %e, "send failed");
            Error::Transport(e.to_string())
        })?;
        Ok(())
    }

    /// Send one datagram to the connected peer.
    ///
    /// Fails with [`Error::Transport`] if the socket is not connected or the
    /// OS rejects the write.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        tracing::trace!(local = %self.local_addr, bytes = data.len(), "sending datagram");
        let n = self.socket.send(data).await.map_err(|e| {
            tracing::warn!(local = %self.local_addr, error = %e, "send failed");
            Error::Transport(e.to_string())
        })?;
        if n != data.len() {
            return Err(Error::Transport(format!(
                "short datagram write: {} of {} bytes",
                n,
                data.len()
            )));
        }
        Ok(())
    }

    /// Receive one datagram, waiting at most `timeout`.
    ///
    /// Returns [`Error::Timeout`] if nothing arrives in time.
    pub async fn recv_from(&self, buf: &mut [u8], timeout: Duration) -> Result<(usize, SocketAddr)> {
        match tokio::time::timeout(timeout, self.socket.recv_from(buf)).await {
            Ok(Ok((n, src))) => {
                tracing::trace!(local = %self.local_addr, remote = %src, bytes = n, "received datagram");
                Ok((n, src))
            }
            Ok(Err(e)) => {
                tracing::error!(local = %self.local_addr, error = %e, "receive failed");
                Err(Error::Io(e))
            }
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Receive one datagram with no deadline.
    ///
    /// Used by long-running receive loops that are cancelled by aborting
    /// their task.
    pub async fn recv_next(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        let (n, src) = self.socket.recv_from(buf).await.map_err(|e| {
            tracing::error!(local = %self.local_addr, error = %e, "receive failed");
            Error::Io(e)
        })?;
        tracing::trace!(local = %self.local_addr, remote = %src, bytes = n, "received datagram");
        Ok((n, src))
    }
}
