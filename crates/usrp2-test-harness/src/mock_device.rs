//! In-process UDP emulator of a USRP2.
//!
//! [`MockDevice`] binds a loopback socket and answers the host protocol the
//! way a device would: discovery queries get an identity reply, control
//! requests get acknowledged (or rejected, or ignored, as scripted), and
//! transmit frames are recorded and optionally credited back. Tests drive
//! the receive path by pushing `RxData` frames with
//! [`send_rx`](MockDevice::send_rx).
//!
//! # Example
//!
//! ```
//! use usrp2_test_harness::MockDevice;
//! use usrp2_protocol::opcode;
//!
//! # async fn example() -> usrp2_core::Result<()> {
//! let device = MockDevice::start().await?;
//! device.nack(opcode::SET_RX_DECIM, "decimation out of range").await;
//!
//! // Point a session at device.descriptor() and exercise it ...
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use usrp2_core::{DeviceDescriptor, Error, MacAddr, Result};
use usrp2_protocol::command::{self, Command, ControlReply};
use usrp2_protocol::discovery::DiscoveryReply;
use usrp2_protocol::frame::{self, FrameHeader, FrameKind, MAX_FRAME_SIZE};
use usrp2_protocol::stream::{self, SampleFrame};
use usrp2_transport::UdpTransport;

/// Transmit buffer capacity reported when TX streaming starts.
pub const DEFAULT_TX_CAPACITY: u32 = 32;

/// A control request as the device received it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    pub sequence: u32,
    pub command: Command,
}

#[derive(Debug)]
struct DeviceState {
    identity: DiscoveryReply,
    /// Extra identities answered on every discovery query, emulating other
    /// devices on the same segment.
    neighbours: Vec<DiscoveryReply>,
    answer_discovery: bool,
    malformed_discovery: bool,
    /// Host that last addressed us; target for RX and credit frames.
    peer: Option<SocketAddr>,
    requests: Vec<RecordedRequest>,
    tx_frames: Vec<SampleFrame>,
    nacks: HashMap<u16, String>,
    /// Replies still to be swallowed, per opcode.
    dropped: HashMap<u16, usize>,
    silent: HashSet<u16>,
    tx_capacity: u32,
    auto_credit: bool,
    credit_seq: u32,
}

/// A scriptable emulated device on the loopback interface.
///
/// The responder task runs until the `MockDevice` is dropped.
pub struct MockDevice {
    transport: Arc<UdpTransport>,
    state: Arc<Mutex<DeviceState>>,
    task: JoinHandle<()>,
}

impl MockDevice {
    /// Start a device with a default identity (MAC `00:50:c2:85:00:01`).
    pub async fn start() -> Result<Self> {
        Self::with_identity(Self::default_identity(MacAddr::from_suffix([0x00, 0x01]))).await
    }

    /// Start a device that reports `identity` to discovery.
    pub async fn with_identity(identity: DiscoveryReply) -> Result<Self> {
        let transport = Arc::new(UdpTransport::bind("127.0.0.1:0").await?);
        let state = Arc::new(Mutex::new(DeviceState {
            identity,
            neighbours: Vec::new(),
            answer_discovery: true,
            malformed_discovery: false,
            peer: None,
            requests: Vec::new(),
            tx_frames: Vec::new(),
            nacks: HashMap::new(),
            dropped: HashMap::new(),
            silent: HashSet::new(),
            tx_capacity: DEFAULT_TX_CAPACITY,
            auto_credit: true,
            credit_seq: 0,
        }));

        tracing::debug!(addr = %transport.local_addr(), "mock device listening");

        let task = tokio::spawn(serve(Arc::clone(&transport), Arc::clone(&state)));
        Ok(Self {
            transport,
            state,
            task,
        })
    }

    /// A plausible identity for `mac`.
    pub fn default_identity(mac: MacAddr) -> DiscoveryReply {
        DiscoveryReply {
            mac,
            hw_rev: 0x0400,
            fpga_md5sum: [0xA5; 16],
            sw_md5sum: [0x5A; 16],
        }
    }

    /// Socket address the device listens on.
    pub fn addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// The descriptor discovery would produce for this device.
    pub async fn descriptor(&self) -> DeviceDescriptor {
        let identity = self.state.lock().await.identity.clone();
        DeviceDescriptor {
            mac: identity.mac,
            addr: self.addr(),
            hw_rev: identity.hw_rev,
            fpga_md5sum: identity.fpga_md5sum,
            sw_md5sum: identity.sw_md5sum,
        }
    }

    /// Current MAC address (changes when the host burns a new one).
    pub async fn mac(&self) -> MacAddr {
        self.state.lock().await.identity.mac
    }

    /// Also answer discovery on behalf of another device.
    pub async fn add_neighbour(&self, identity: DiscoveryReply) {
        self.state.lock().await.neighbours.push(identity);
    }

    /// Stop answering discovery queries.
    pub async fn ignore_discovery(&self) {
        self.state.lock().await.answer_discovery = false;
    }

    /// Precede every discovery reply with a truncated one.
    pub async fn send_malformed_discovery(&self) {
        self.state.lock().await.malformed_discovery = true;
    }

    /// Reject every request with `opcode`.
    pub async fn nack(&self, opcode: u16, reason: &str) {
        self.state.lock().await.nacks.insert(opcode, reason.to_string());
    }

    /// Swallow the next `count` replies to `opcode` (the requests are still
    /// recorded and applied).
    pub async fn drop_replies(&self, opcode: u16, count: usize) {
        self.state.lock().await.dropped.insert(opcode, count);
    }

    /// Never reply to `opcode`.
    pub async fn never_reply(&self, opcode: u16) {
        self.state.lock().await.silent.insert(opcode);
    }

    /// Capacity, in frames, reported when TX streaming starts.
    pub async fn set_tx_capacity(&self, frames: u32) {
        self.state.lock().await.tx_capacity = frames;
    }

    /// Whether each received TX frame is immediately credited back.
    pub async fn set_auto_credit(&self, enable: bool) {
        self.state.lock().await.auto_credit = enable;
    }

    /// All control requests received so far.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Commands received so far, without sequence numbers.
    pub async fn commands(&self) -> Vec<Command> {
        self.state
            .lock()
            .await
            .requests
            .iter()
            .map(|r| r.command.clone())
            .collect()
    }

    /// TX frames received so far, in arrival order.
    pub async fn tx_frames(&self) -> Vec<SampleFrame> {
        self.state.lock().await.tx_frames.clone()
    }

    /// Send an `RxData` frame to the host.
    pub async fn send_rx(
        &self,
        channel: u8,
        sequence: u32,
        timestamp: Option<u64>,
        items: &[u32],
    ) -> Result<()> {
        let sf = SampleFrame {
            channel,
            sequence,
            flags: 0,
            timestamp,
            items: items.to_vec(),
        };
        self.send_raw(&sf.encode(FrameKind::RxData)).await
    }

    /// Return `frames` transmit credits on `channel`.
    pub async fn send_credit(&self, channel: u8, frames: u32) -> Result<()> {
        let seq = {
            let mut s = self.state.lock().await;
            s.credit_seq = s.credit_seq.wrapping_add(1);
            s.credit_seq
        };
        self.send_raw(&stream::encode_credit(channel, seq, frames)).await
    }

    /// Send an arbitrary datagram to the host.
    pub async fn send_raw(&self, data: &[u8]) -> Result<()> {
        let peer = self.state.lock().await.peer.ok_or(Error::NotConnected)?;
        self.transport.send_to(data, peer).await
    }
}

impl Drop for MockDevice {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Responder loop.
async fn serve(transport: Arc<UdpTransport>, state: Arc<Mutex<DeviceState>>) {
    let mut buf = vec![0u8; MAX_FRAME_SIZE + 64];
    loop {
        let (n, src) = match transport.recv_next(&mut buf).await {
            Ok(v) => v,
            Err(e) => {
                tracing::trace!(error = %e, "mock device receive error");
                continue;
            }
        };

        let replies = match frame::parse_frame(&buf[..n]) {
            Ok(frame) => handle_frame(&state, &frame, src).await,
            Err(e) => {
                tracing::debug!(error = %e, "mock device ignoring malformed datagram");
                Vec::new()
            }
        };

        for reply in replies {
            if let Err(e) = transport.send_to(&reply, src).await {
                tracing::debug!(error = %e, "mock device send failed");
            }
        }
    }
}

async fn handle_frame(
    state: &Mutex<DeviceState>,
    frame: &frame::Frame<'_>,
    src: SocketAddr,
) -> Vec<Vec<u8>> {
    let mut s = state.lock().await;
    match frame.header.kind {
        FrameKind::DiscoveryQuery => {
            if !s.answer_discovery {
                return Vec::new();
            }
            let seq = frame.header.sequence;
            let mut out = Vec::new();
            if s.malformed_discovery {
                let header = FrameHeader::new(FrameKind::DiscoveryReply).sequence(seq);
                out.push(frame::encode_frame(&header, &[0u8; 10]));
            }
            out.push(s.identity.encode(seq));
            out.extend(s.neighbours.iter().map(|n| n.encode(seq)));
            out
        }
        FrameKind::ControlRequest => {
            s.peer = Some(src);
            let header = &frame.header;
            let cmd = match Command::decode(frame) {
                Ok(cmd) => cmd,
                Err(e) => {
                    let reply =
                        ControlReply::nack(header.sequence, header.opcode, header.channel, &e.to_string());
                    return vec![reply.encode()];
                }
            };
            s.requests.push(RecordedRequest {
                sequence: header.sequence,
                command: cmd.clone(),
            });

            let reply = match s.nacks.get(&header.opcode).cloned() {
                Some(reason) => {
                    ControlReply::nack(header.sequence, header.opcode, header.channel, &reason)
                }
                None => {
                    let payload = apply_command(&mut s, &cmd);
                    ControlReply::ack(header.sequence, header.opcode, header.channel, payload)
                }
            };

            if s.silent.contains(&header.opcode) {
                return Vec::new();
            }
            if let Some(left) = s.dropped.get_mut(&header.opcode) {
                if *left > 0 {
                    *left -= 1;
                    tracing::trace!(seq = header.sequence, opcode = header.opcode, "mock device dropping reply");
                    return Vec::new();
                }
            }
            vec![reply.encode()]
        }
        FrameKind::TxData => {
            s.peer = Some(src);
            match SampleFrame::from_frame(frame) {
                Ok(sf) => {
                    let channel = sf.channel;
                    s.tx_frames.push(sf);
                    if s.auto_credit {
                        s.credit_seq = s.credit_seq.wrapping_add(1);
                        return vec![stream::encode_credit(channel, s.credit_seq, 1)];
                    }
                    Vec::new()
                }
                Err(e) => {
                    tracing::debug!(error = %e, "mock device ignoring bad TX frame");
                    Vec::new()
                }
            }
        }
        _ => Vec::new(),
    }
}

/// Apply side effects of an accepted command; returns the reply payload.
fn apply_command(s: &mut DeviceState, cmd: &Command) -> Vec<u8> {
    match cmd {
        Command::StartTxStreaming { .. } => s.tx_capacity.to_be_bytes().to_vec(),
        Command::ReadMacAddr => command::mac_payload(&s.identity.mac),
        Command::BurnMacAddr { mac } => {
            s.identity.mac = *mac;
            Vec::new()
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use usrp2_protocol::command::ReplyStatus;
    use usrp2_protocol::opcode;
    use usrp2_protocol::discovery;

    async fn host() -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0").await.unwrap()
    }

    async fn recv_reply(host: &UdpTransport) -> ControlReply {
        let mut buf = [0u8; 2048];
        let (n, _) = host.recv_from(&mut buf, Duration::from_secs(2)).await.unwrap();
        ControlReply::from_frame(&frame::parse_frame(&buf[..n]).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn answers_discovery() {
        let device = MockDevice::start().await.unwrap();
        let host = host().await;
        host.send_to(&discovery::encode_query(1), device.addr()).await.unwrap();

        let mut buf = [0u8; 2048];
        let (n, src) = host.recv_from(&mut buf, Duration::from_secs(2)).await.unwrap();
        let reply = DiscoveryReply::from_frame(&frame::parse_frame(&buf[..n]).unwrap()).unwrap();
        assert_eq!(src, device.addr());
        assert_eq!(reply.mac, MacAddr::from_suffix([0, 1]));
    }

    #[tokio::test]
    async fn acks_and_records_commands() {
        let device = MockDevice::start().await.unwrap();
        let host = host().await;
        let cmd = Command::SetRxGain { gain_db: 12.5 };
        host.send_to(&cmd.encode(40), device.addr()).await.unwrap();

        let reply = recv_reply(&host).await;
        assert_eq!(reply.sequence, 40);
        assert_eq!(reply.status, ReplyStatus::Ack);
        assert_eq!(device.commands().await, vec![cmd]);
    }

    #[tokio::test]
    async fn scripted_nack() {
        let device = MockDevice::start().await.unwrap();
        device.nack(opcode::SET_TX_INTERP, "bad interp").await;
        let host = host().await;
        host.send_to(&Command::SetTxInterp { factor: 3 }.encode(1), device.addr())
            .await
            .unwrap();
        let reply = recv_reply(&host).await;
        assert_eq!(reply.status, ReplyStatus::Nack("bad interp".into()));
    }

    #[tokio::test]
    async fn start_tx_reports_capacity() {
        let device = MockDevice::start().await.unwrap();
        device.set_tx_capacity(5).await;
        let host = host().await;
        host.send_to(&Command::StartTxStreaming { channel: 0 }.encode(1), device.addr())
            .await
            .unwrap();
        assert_eq!(recv_reply(&host).await.payload_u32().unwrap(), 5);
    }

    #[tokio::test]
    async fn send_rx_requires_peer() {
        let device = MockDevice::start().await.unwrap();
        let result = device.send_rx(0, 1, None, &[1]).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }
}
