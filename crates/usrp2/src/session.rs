//! Device session: one open connection to one USRP2.
//!
//! [`Usrp2`] owns a UDP socket connected to the device, the control channel
//! that serializes configuration requests, and the RX and TX engines. A
//! single background task reads every datagram the device sends and routes
//! it: control replies to the control channel, receive samples to the RX
//! engine, transmit credits to the TX engine. That task never waits on a
//! control request, so replies keep flowing while samples stream.
//!
//! Configuration methods return `Ok` only once the device has acknowledged
//! the command. The last acknowledged value of each setting is cached and
//! can be read back with [`Usrp2::settings`]; a failed call leaves the
//! cache untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use num_complex::Complex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use usrp2_core::{
    DeviceDescriptor, Error, IqScale, MacAddr, MimoConfig, Result, TuneResult, TxMetadata,
};
use usrp2_protocol::convert::{self, WireSample};
use usrp2_protocol::frame::{self, FrameKind, MAX_FRAME_SIZE};
use usrp2_protocol::{stream, Command, ControlReply, SampleFrame};
use usrp2_transport::UdpTransport;

use crate::builder::{SessionOptions, Usrp2Builder};
use crate::control::ControlChannel;
use crate::models::FrontEndModel;
use crate::rx::{RxEngine, RxSampleHandler};
use crate::tune::{self, FrequencyCaps};
use crate::tx::TxEngine;

/// Valid RX decimation and TX interpolation factors.
pub const RATE_FACTOR_RANGE: std::ops::RangeInclusive<u32> = 4..=512;

/// Last acknowledged value of each device setting. `None` until set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub rx_gain: Option<f64>,
    pub tx_gain: Option<f64>,
    pub rx_tune: Option<TuneResult>,
    pub tx_tune: Option<TuneResult>,
    pub rx_decim: Option<u32>,
    pub tx_interp: Option<u32>,
    pub rx_scale_iq: Option<IqScale>,
    pub tx_scale_iq: Option<IqScale>,
    pub mimo: Option<MimoConfig>,
}

/// An open session with one USRP2.
pub struct Usrp2 {
    descriptor: DeviceDescriptor,
    mac: Mutex<MacAddr>,
    model: FrontEndModel,
    options: SessionOptions,
    control: Arc<ControlChannel>,
    rx: Arc<RxEngine>,
    tx: Arc<TxEngine>,
    settings: Mutex<Settings>,
    connected: Arc<AtomicBool>,
    inbound: JoinHandle<()>,
}

impl Usrp2 {
    /// Discover and open the device at `address` on `interface`.
    ///
    /// An empty `address` selects the only device found. Zero or several
    /// matches is [`Error::AmbiguousOrNotFound`].
    pub async fn make(interface: &str, address: &str) -> Result<Usrp2> {
        Usrp2Builder::new()
            .interface(interface)
            .address(address)
            .build()
            .await
    }

    /// Open a session to a known device.
    pub async fn connect(
        descriptor: DeviceDescriptor,
        model: FrontEndModel,
        options: SessionOptions,
    ) -> Result<Usrp2> {
        let transport = Arc::new(UdpTransport::bind_for(descriptor.addr).await?);
        transport.connect(descriptor.addr).await?;

        let control = Arc::new(ControlChannel::new(
            Arc::clone(&transport),
            options.ack_timeout,
            options.max_attempts,
        ));
        let rx = Arc::new(RxEngine::new());
        let tx = Arc::new(TxEngine::new(Arc::clone(&transport), options.tx_timeout));
        let connected = Arc::new(AtomicBool::new(true));

        let inbound = {
            let control = Arc::clone(&control);
            let rx = Arc::clone(&rx);
            let tx = Arc::clone(&tx);
            let connected = Arc::clone(&connected);
            tokio::spawn(async move {
                inbound_loop(transport, control, rx, tx, connected).await;
            })
        };

        tracing::debug!(mac = %descriptor.mac, remote = %descriptor.addr, model = model.model_id, "USRP2 session open");

        Ok(Usrp2 {
            mac: Mutex::new(descriptor.mac),
            descriptor,
            model,
            options,
            control,
            rx,
            tx,
            settings: Mutex::new(Settings::default()),
            connected,
            inbound,
        })
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    async fn request(&self, command: Command) -> Result<ControlReply> {
        self.ensure_connected()?;
        self.control.request(&command).await
    }

    /// Whether the session is open.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stop the inbound task and fail any request in flight. Idempotent.
    pub async fn close(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inbound.abort();
        self.control.cancel().await;
        tracing::debug!(mac = %self.descriptor.mac, "USRP2 session closed");
    }

    // -----------------------------------------------------------------
    // Identity
    // -----------------------------------------------------------------

    /// The device as it was discovered.
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn model(&self) -> &FrontEndModel {
        &self.model
    }

    /// Cached MAC address. Reflects a successful [`burn_mac_addr`](Self::burn_mac_addr).
    pub async fn mac_addr(&self) -> MacAddr {
        *self.mac.lock().await
    }

    /// Query the device for its MAC address.
    pub async fn read_mac_addr(&self) -> Result<MacAddr> {
        self.request(Command::ReadMacAddr).await?.payload_mac()
    }

    /// Program a new MAC address into the device.
    pub async fn burn_mac_addr(&self, new_mac: MacAddr) -> Result<()> {
        self.request(Command::BurnMacAddr { mac: new_mac }).await?;
        let mut mac = self.mac.lock().await;
        let old = *mac;
        *mac = new_mac;
        tracing::info!(old = %old, new = %new_mac, "MAC address burned");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Configuration
    // -----------------------------------------------------------------

    /// Snapshot of the acknowledged settings.
    pub async fn settings(&self) -> Settings {
        self.settings.lock().await.clone()
    }

    pub async fn set_rx_gain(&self, gain_db: f64) -> Result<()> {
        self.request(Command::SetRxGain { gain_db }).await?;
        self.settings.lock().await.rx_gain = Some(gain_db);
        tracing::debug!(gain_db, "RX gain set");
        Ok(())
    }

    pub async fn set_tx_gain(&self, gain_db: f64) -> Result<()> {
        self.request(Command::SetTxGain { gain_db }).await?;
        self.settings.lock().await.tx_gain = Some(gain_db);
        tracing::debug!(gain_db, "TX gain set");
        Ok(())
    }

    /// Tune the receive path. Nothing is sent if the frequency is unreachable.
    pub async fn set_rx_center_freq(&self, freq: f64) -> Result<TuneResult> {
        let plan = tune::plan(freq, path_caps(self.model.rx.as_ref(), "receive")?)?;
        self.request(Command::SetRxFreq {
            rf_freq: plan.result.rf_freq,
            phase_inc: plan.phase_inc,
        })
        .await?;
        self.settings.lock().await.rx_tune = Some(plan.result);
        tracing::debug!(requested = freq, rf = plan.result.rf_freq, baseband = plan.result.baseband_freq, "RX tuned");
        Ok(plan.result)
    }

    /// Tune the transmit path. Nothing is sent if the frequency is unreachable.
    pub async fn set_tx_center_freq(&self, freq: f64) -> Result<TuneResult> {
        let plan = tune::plan(freq, path_caps(self.model.tx.as_ref(), "transmit")?)?;
        self.request(Command::SetTxFreq {
            rf_freq: plan.result.rf_freq,
            phase_inc: plan.phase_inc,
        })
        .await?;
        self.settings.lock().await.tx_tune = Some(plan.result);
        tracing::debug!(requested = freq, rf = plan.result.rf_freq, baseband = plan.result.baseband_freq, "TX tuned");
        Ok(plan.result)
    }

    pub async fn set_rx_decim(&self, factor: u32) -> Result<()> {
        check_rate_factor(factor, "decimation")?;
        self.request(Command::SetRxDecim { factor }).await?;
        self.settings.lock().await.rx_decim = Some(factor);
        Ok(())
    }

    pub async fn set_tx_interp(&self, factor: u32) -> Result<()> {
        check_rate_factor(factor, "interpolation")?;
        self.request(Command::SetTxInterp { factor }).await?;
        self.settings.lock().await.tx_interp = Some(factor);
        Ok(())
    }

    /// Set the device-side RX IQ scaling. [`RxFrame::to_complex_i16_scaled`]
    /// undoes it on the host.
    ///
    /// [`RxFrame::to_complex_i16_scaled`]: crate::rx::RxFrame::to_complex_i16_scaled
    pub async fn set_rx_scale_iq(&self, scale: IqScale) -> Result<()> {
        self.request(Command::SetRxScaleIq { scale }).await?;
        self.settings.lock().await.rx_scale_iq = Some(scale);
        Ok(())
    }

    /// Set the device-side TX IQ scaling, applied in the FPGA to every
    /// transmitted sample. Independent of the host-side scale that
    /// [`tx_16sc`](Self::tx_16sc) applies; the two multiply.
    pub async fn set_tx_scale_iq(&self, scale: IqScale) -> Result<()> {
        self.request(Command::SetTxScaleIq { scale }).await?;
        self.settings.lock().await.tx_scale_iq = Some(scale);
        Ok(())
    }

    pub async fn config_mimo(&self, config: MimoConfig) -> Result<()> {
        self.request(Command::ConfigMimo { config }).await?;
        self.settings.lock().await.mimo = Some(config);
        tracing::debug!(flags = config.flags(), "MIMO configured");
        Ok(())
    }

    // -----------------------------------------------------------------
    // Receive
    // -----------------------------------------------------------------

    /// Start receiving on `channel`. Every accepted frame is passed to
    /// `handler` on the inbound task.
    ///
    /// `items_per_frame` of zero lets the device choose.
    pub async fn start_rx_streaming<H: RxSampleHandler>(
        &self,
        channel: u8,
        items_per_frame: u32,
        handler: H,
    ) -> Result<()> {
        self.ensure_connected()?;
        let previous = self.rx.begin(channel, items_per_frame, Box::new(handler)).await?;
        let command = Command::StartRxStreaming {
            channel,
            items_per_frame,
        };
        match self.control.request(&command).await {
            Ok(_) => {
                tracing::debug!(channel, items_per_frame, "RX streaming started");
                Ok(())
            }
            Err(e) => {
                self.rx.restore(previous).await;
                Err(e)
            }
        }
    }

    /// Stop receiving on `channel`. Idle channels return `Ok` without I/O.
    pub async fn stop_rx_streaming(&self, channel: u8) -> Result<()> {
        self.ensure_connected()?;
        crate::rx::check_channel(channel)?;
        if !self.rx.is_streaming(channel).await {
            return Ok(());
        }
        self.control.request(&Command::StopRxStreaming { channel }).await?;
        self.rx.finish(channel).await;
        tracing::debug!(channel, "RX streaming stopped");
        Ok(())
    }

    pub async fn is_rx_streaming(&self, channel: u8) -> bool {
        self.rx.is_streaming(channel).await
    }

    /// Overrun events on `channel` since its last start.
    pub async fn rx_overruns(&self, channel: u8) -> u64 {
        self.rx.overruns(channel).await
    }

    /// Frames lost on `channel` since its last start.
    pub async fn rx_missing(&self, channel: u8) -> u64 {
        self.rx.missing(channel).await
    }

    // -----------------------------------------------------------------
    // Transmit
    // -----------------------------------------------------------------

    /// Prepare `channel` for transmission. Returns the device's buffer
    /// capacity in frames.
    pub async fn start_tx_streaming(&self, channel: u8) -> Result<u32> {
        self.ensure_connected()?;
        self.tx.start(&self.control, channel).await
    }

    /// Stop transmission on `channel`. Idle channels return `Ok` without I/O.
    pub async fn stop_tx_streaming(&self, channel: u8) -> Result<()> {
        self.ensure_connected()?;
        self.tx.stop(&self.control, channel).await
    }

    pub async fn is_tx_streaming(&self, channel: u8) -> bool {
        self.tx.is_streaming(channel).await
    }

    /// Transmit samples of any wire type, unscaled.
    pub async fn transmit<T: WireSample>(
        &self,
        channel: u8,
        samples: &[T],
        metadata: &TxMetadata,
    ) -> Result<()> {
        self.ensure_connected()?;
        tracing::trace!(channel, format = %T::FORMAT, samples = samples.len(), "encoding TX samples");
        self.tx
            .transmit(channel, &convert::encode_slice(samples), metadata)
            .await
    }

    /// Transmit complex floats in `[-1.0, +1.0]`; out of range values clamp.
    pub async fn tx_32fc(
        &self,
        channel: u8,
        samples: &[Complex<f32>],
        metadata: &TxMetadata,
    ) -> Result<()> {
        self.transmit(channel, samples, metadata).await
    }

    /// Transmit complex `i16` samples, scaled on the host by the builder's
    /// [`tx_iq_scale`](crate::builder::Usrp2Builder::tx_iq_scale) before
    /// encoding.
    ///
    /// This is a separate stage from [`set_tx_scale_iq`](Self::set_tx_scale_iq),
    /// which the device applies after the samples arrive. Configure only one
    /// of them unless both scalings are wanted.
    pub async fn tx_16sc(
        &self,
        channel: u8,
        samples: &[Complex<i16>],
        metadata: &TxMetadata,
    ) -> Result<()> {
        self.ensure_connected()?;
        let words = convert::encode_scaled(samples, self.options.tx_iq_scale);
        self.tx.transmit(channel, &words, metadata).await
    }

    /// Transmit packed wire words as-is.
    pub async fn tx_raw(&self, channel: u8, words: &[u32], metadata: &TxMetadata) -> Result<()> {
        self.ensure_connected()?;
        self.tx.transmit(channel, words, metadata).await
    }
}

impl Drop for Usrp2 {
    fn drop(&mut self) {
        self.inbound.abort();
    }
}

fn path_caps<'a>(caps: Option<&'a FrequencyCaps>, path: &str) -> Result<&'a FrequencyCaps> {
    caps.ok_or_else(|| Error::InvalidParameter(format!("front end has no {path} path")))
}

fn check_rate_factor(factor: u32, what: &str) -> Result<()> {
    if RATE_FACTOR_RANGE.contains(&factor) {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "{what} {factor} outside {}..={}",
            RATE_FACTOR_RANGE.start(),
            RATE_FACTOR_RANGE.end()
        )))
    }
}

/// Clears the session's connected flag when the inbound task ends, however
/// it ends.
struct DisconnectOnExit(Arc<AtomicBool>);

impl Drop for DisconnectOnExit {
    fn drop(&mut self) {
        if self.0.swap(false, Ordering::SeqCst) {
            tracing::debug!("inbound task ended, session disconnected");
        }
    }
}

/// Background task: receive every datagram from the device and route it.
async fn inbound_loop(
    transport: Arc<UdpTransport>,
    control: Arc<ControlChannel>,
    rx: Arc<RxEngine>,
    tx: Arc<TxEngine>,
    connected: Arc<AtomicBool>,
) {
    let _guard = DisconnectOnExit(Arc::clone(&connected));
    let mut buf = vec![0u8; MAX_FRAME_SIZE + 64];
    while connected.load(Ordering::SeqCst) {
        let n = match transport.recv_next(&mut buf).await {
            Ok((n, _)) => n,
            Err(e) => {
                tracing::debug!(error = %e, "inbound receive error");
                continue;
            }
        };

        let frame = match frame::parse_frame(&buf[..n]) {
            Ok(f) => f,
            Err(e) => {
                tracing::warn!(len = n, error = %e, "dropping malformed datagram");
                continue;
            }
        };

        match frame.header.kind {
            FrameKind::ControlReply => match ControlReply::from_frame(&frame) {
                Ok(reply) => control.deliver(reply).await,
                Err(e) => tracing::warn!(error = %e, "bad control reply"),
            },
            FrameKind::RxData => match SampleFrame::from_frame(&frame) {
                Ok(sf) => rx.dispatch(sf).await,
                Err(e) => tracing::warn!(channel = frame.header.channel, error = %e, "bad RX frame"),
            },
            FrameKind::TxCredit => match stream::decode_credit(&frame) {
                Ok(frames) => tx.credit(frame.header.channel, frames).await,
                Err(e) => tracing::warn!(channel = frame.header.channel, error = %e, "bad TX credit"),
            },
            other => {
                tracing::trace!(kind = ?other, seq = frame.header.sequence, "ignoring unexpected frame kind");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use usrp2_core::MimoClock;
    use usrp2_protocol::frame::{FLAG_END_OF_BURST, FLAG_START_OF_BURST};
    use usrp2_protocol::opcode;
    use usrp2_test_harness::{MockDevice, DEFAULT_TX_CAPACITY};

    use crate::models;
    use crate::rx::RxFrame;

    /// Set `RUST_LOG=usrp2=trace` to see protocol traffic.
    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    async fn open(device: &MockDevice) -> Usrp2 {
        init_tracing();
        Usrp2Builder::new()
            .descriptor(device.descriptor().await)
            .build()
            .await
            .unwrap()
    }

    async fn wait_for_tx_frames(device: &MockDevice, n: usize) -> Vec<SampleFrame> {
        for _ in 0..200 {
            let frames = device.tx_frames().await;
            if frames.len() >= n {
                return frames;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("device did not receive {n} TX frames");
    }

    async fn wait_for_len(seen: &StdMutex<Vec<u32>>, n: usize) {
        for _ in 0..200 {
            if seen.lock().unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("handler did not see {n} frames");
    }

    #[tokio::test]
    async fn gain_commands_are_acknowledged_and_cached() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        usrp.set_rx_gain(12.5).await.unwrap();
        usrp.set_tx_gain(-3.0).await.unwrap();

        assert_eq!(
            device.commands().await,
            vec![
                Command::SetRxGain { gain_db: 12.5 },
                Command::SetTxGain { gain_db: -3.0 }
            ]
        );
        let s = usrp.settings().await;
        assert_eq!(s.rx_gain, Some(12.5));
        assert_eq!(s.tx_gain, Some(-3.0));
    }

    #[tokio::test]
    async fn rejected_command_leaves_cache_unchanged() {
        let device = MockDevice::start().await.unwrap();
        device.nack(opcode::SET_TX_GAIN, "gain out of range").await;
        let usrp = open(&device).await;

        let result = usrp.set_tx_gain(99.0).await;
        assert!(matches!(result, Err(Error::Rejected { .. })));
        assert_eq!(usrp.settings().await.tx_gain, None);
    }

    #[tokio::test]
    async fn center_freq_returns_tune_result() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        let t = usrp.set_rx_center_freq(100.1e6).await.unwrap();
        assert_eq!(t.requested_freq, 100.1e6);
        assert_eq!(t.rf_freq, 100.1e6);
        assert_eq!(t.baseband_freq, 0.0);
        assert_eq!(
            device.commands().await,
            vec![Command::SetRxFreq {
                rf_freq: 100.1e6,
                phase_inc: 0
            }]
        );
        assert_eq!(usrp.settings().await.rx_tune, Some(t));
    }

    #[tokio::test]
    async fn unreachable_freq_sends_nothing() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        let result = usrp.set_tx_center_freq(7.0e9).await;
        assert!(matches!(result, Err(Error::FrequencyOutOfRange { .. })));
        assert!(device.commands().await.is_empty());
    }

    #[tokio::test]
    async fn missing_path_is_invalid_parameter() {
        let device = MockDevice::start().await.unwrap();
        let usrp = Usrp2Builder::new()
            .descriptor(device.descriptor().await)
            .model(models::basic_tx())
            .build()
            .await
            .unwrap();
        let result = usrp.set_rx_center_freq(10.0e6).await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn rate_factors_are_validated() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        assert!(matches!(usrp.set_rx_decim(3).await, Err(Error::InvalidParameter(_))));
        assert!(matches!(usrp.set_tx_interp(513).await, Err(Error::InvalidParameter(_))));
        assert!(device.commands().await.is_empty());

        usrp.set_rx_decim(16).await.unwrap();
        usrp.set_tx_interp(512).await.unwrap();
        let s = usrp.settings().await;
        assert_eq!(s.rx_decim, Some(16));
        assert_eq!(s.tx_interp, Some(512));
    }

    #[tokio::test]
    async fn scale_and_mimo_commands() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        let scale = IqScale::new(512, 2048);
        let mimo = MimoConfig {
            clock: MimoClock::LockToSma,
            provide_clock_to_mimo: true,
        };
        usrp.set_rx_scale_iq(scale).await.unwrap();
        usrp.set_tx_scale_iq(IqScale::IDENTITY).await.unwrap();
        usrp.config_mimo(mimo).await.unwrap();

        assert_eq!(
            device.commands().await,
            vec![
                Command::SetRxScaleIq { scale },
                Command::SetTxScaleIq {
                    scale: IqScale::IDENTITY
                },
                Command::ConfigMimo { config: mimo },
            ]
        );
        assert_eq!(usrp.settings().await.mimo, Some(mimo));
    }

    #[tokio::test]
    async fn rx_stream_delivers_and_counts_gaps() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        usrp.start_rx_streaming(0, 100, move |f: &RxFrame| {
            sink.lock().unwrap().push(f.sequence);
        })
        .await
        .unwrap();
        assert!(usrp.is_rx_streaming(0).await);

        for seq in [1, 2, 3, 6, 7] {
            device.send_rx(0, seq, Some(seq as u64 * 100), &[seq]).await.unwrap();
        }
        wait_for_len(&seen, 5).await;

        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 6, 7]);
        assert_eq!(usrp.rx_overruns(0).await, 1);
        assert_eq!(usrp.rx_missing(0).await, 2);

        usrp.stop_rx_streaming(0).await.unwrap();
        assert!(!usrp.is_rx_streaming(0).await);
        assert_eq!(usrp.rx_missing(0).await, 2);
    }

    #[tokio::test]
    async fn control_replies_flow_while_streaming() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        usrp.start_rx_streaming(1, 0, |_: &RxFrame| {}).await.unwrap();
        for seq in 0..50 {
            device.send_rx(1, seq, None, &[0; 16]).await.unwrap();
        }
        usrp.set_rx_gain(1.0).await.unwrap();
        usrp.stop_rx_streaming(1).await.unwrap();
    }

    #[tokio::test]
    async fn stop_idle_rx_is_noop() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        usrp.stop_rx_streaming(4).await.unwrap();
        usrp.stop_tx_streaming(4).await.unwrap();
        assert!(device.requests().await.is_empty());
        assert_eq!(usrp.rx_overruns(4).await, 0);
    }

    #[tokio::test]
    async fn failed_rx_start_restores_idle() {
        let device = MockDevice::start().await.unwrap();
        device.nack(opcode::START_RX_STREAMING, "busy").await;
        let usrp = open(&device).await;

        let result = usrp.start_rx_streaming(2, 0, |_: &RxFrame| {}).await;
        assert!(matches!(result, Err(Error::Rejected { .. })));
        assert!(!usrp.is_rx_streaming(2).await);
    }

    #[tokio::test]
    async fn second_start_is_already_streaming() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        usrp.start_rx_streaming(0, 0, |_: &RxFrame| {}).await.unwrap();
        let again = usrp.start_rx_streaming(0, 0, |_: &RxFrame| {}).await;
        assert!(matches!(again, Err(Error::AlreadyStreaming(0))));

        usrp.start_tx_streaming(0).await.unwrap();
        assert!(matches!(usrp.start_tx_streaming(0).await, Err(Error::AlreadyStreaming(0))));
    }

    #[tokio::test]
    async fn tx_before_start_is_not_streaming() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        let result = usrp.tx_raw(0, &[1, 2, 3], &TxMetadata::burst_now()).await;
        assert!(matches!(result, Err(Error::NotStreaming(0))));
    }

    #[tokio::test]
    async fn tx_burst_is_fragmented() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        assert_eq!(usrp.start_tx_streaming(3).await.unwrap(), DEFAULT_TX_CAPACITY);
        let words: Vec<u32> = (0..733).collect();
        usrp.tx_raw(3, &words, &TxMetadata::burst_at(1000)).await.unwrap();

        let frames = wait_for_tx_frames(&device, 3).await;
        assert_eq!(frames.len(), 3);
        assert_eq!(
            frames.iter().map(|f| f.sequence).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(frames[0].flags, FLAG_START_OF_BURST);
        assert_eq!(frames[0].timestamp, Some(1000));
        assert_eq!(frames[0].items.len(), 363);
        assert_eq!(frames[1].flags, 0);
        assert_eq!(frames[1].items.len(), 365);
        assert_eq!(frames[2].flags, FLAG_END_OF_BURST);
        assert_eq!(frames[2].items.len(), 5);

        let sent: Vec<u32> = frames.iter().flat_map(|f| f.items.iter().copied()).collect();
        assert_eq!(sent, words);
    }

    #[tokio::test]
    async fn empty_transmit_is_invalid() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;
        usrp.start_tx_streaming(0).await.unwrap();

        let result = usrp.tx_raw(0, &[], &TxMetadata::burst_now()).await;
        assert!(matches!(result, Err(Error::InvalidParameter(_))));
    }

    #[tokio::test]
    async fn tx_16sc_applies_host_scale() {
        let device = MockDevice::start().await.unwrap();
        let usrp = Usrp2Builder::new()
            .descriptor(device.descriptor().await)
            .tx_iq_scale(IqScale::new(512, 512))
            .build()
            .await
            .unwrap();
        // Device-side scaling does not change what the host encodes.
        usrp.set_tx_scale_iq(IqScale::new(2048, 2048)).await.unwrap();
        usrp.start_tx_streaming(0).await.unwrap();

        usrp.tx_16sc(0, &[Complex::new(1000, -1000)], &TxMetadata::burst_now())
            .await
            .unwrap();
        let frames = wait_for_tx_frames(&device, 1).await;
        assert_eq!(frames[0].items, vec![convert::pack(500, -500)]);
        assert_eq!(frames[0].timestamp, None);
    }

    #[tokio::test]
    async fn tx_32fc_clamps() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;
        usrp.start_tx_streaming(0).await.unwrap();

        usrp.tx_32fc(0, &[Complex::new(2.0, -1.0)], &TxMetadata::burst_now())
            .await
            .unwrap();
        let frames = wait_for_tx_frames(&device, 1).await;
        assert_eq!(frames[0].items, vec![convert::pack(32767, -32767)]);
    }

    #[tokio::test]
    async fn tx_without_credit_times_out() {
        let device = MockDevice::start().await.unwrap();
        device.set_tx_capacity(2).await;
        device.set_auto_credit(false).await;
        let usrp = Usrp2Builder::new()
            .descriptor(device.descriptor().await)
            .tx_timeout(Duration::from_millis(100))
            .build()
            .await
            .unwrap();
        usrp.start_tx_streaming(0).await.unwrap();

        let words = vec![0u32; 365 * 3];
        let result = usrp.tx_raw(0, &words, &TxMetadata::burst_now()).await;
        assert!(matches!(result, Err(Error::Timeout)));
        assert_eq!(wait_for_tx_frames(&device, 2).await.len(), 2);
    }

    #[tokio::test]
    async fn tx_resumes_when_credit_returns() {
        let device = MockDevice::start().await.unwrap();
        device.set_tx_capacity(1).await;
        device.set_auto_credit(false).await;
        let usrp = Arc::new(open(&device).await);
        usrp.start_tx_streaming(0).await.unwrap();

        let sender = {
            let usrp = Arc::clone(&usrp);
            tokio::spawn(async move {
                let words = vec![7u32; 365 * 2];
                usrp.tx_raw(0, &words, &TxMetadata::burst_now()).await
            })
        };
        wait_for_tx_frames(&device, 1).await;
        device.send_credit(0, 1).await.unwrap();

        sender.await.unwrap().unwrap();
        assert_eq!(wait_for_tx_frames(&device, 2).await.len(), 2);
    }

    #[tokio::test]
    async fn mac_read_and_burn() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        assert_eq!(usrp.mac_addr().await, device.mac().await);
        assert_eq!(usrp.read_mac_addr().await.unwrap(), device.mac().await);

        let new_mac = MacAddr::from_suffix([0xBE, 0xEF]);
        usrp.burn_mac_addr(new_mac).await.unwrap();
        assert_eq!(usrp.mac_addr().await, new_mac);
        assert_eq!(device.mac().await, new_mac);
        assert_eq!(usrp.descriptor().mac, MacAddr::from_suffix([0, 1]));
    }

    #[tokio::test]
    async fn closed_session_is_not_connected() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        usrp.close().await;
        usrp.close().await;
        assert!(!usrp.is_connected());
        assert!(matches!(usrp.set_rx_gain(1.0).await, Err(Error::NotConnected)));
        assert!(matches!(usrp.start_tx_streaming(0).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn panicking_handler_keeps_session_usable() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        usrp.start_rx_streaming(0, 0, move |f: &RxFrame| {
            if f.sequence == 2 {
                panic!("handler failure on frame 2");
            }
            sink.lock().unwrap().push(f.sequence);
        })
        .await
        .unwrap();

        for seq in 1..=3 {
            device.send_rx(0, seq, None, &[seq]).await.unwrap();
        }
        wait_for_len(&seen, 1).await;

        // Control replies still arrive after the panic.
        usrp.set_rx_gain(1.0).await.unwrap();
        assert!(usrp.is_connected());
        assert!(!usrp.is_rx_streaming(0).await);
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        usrp.stop_rx_streaming(0).await.unwrap();

        // The channel can be restarted with a new handler.
        usrp.start_rx_streaming(0, 0, |_: &RxFrame| {}).await.unwrap();
    }

    #[tokio::test]
    async fn inbound_task_exit_disconnects() {
        let device = MockDevice::start().await.unwrap();
        let usrp = open(&device).await;

        usrp.inbound.abort();
        for _ in 0..200 {
            if !usrp.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!usrp.is_connected());
        assert!(matches!(usrp.set_rx_gain(1.0).await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn make_selects_single_device() {
        let device = MockDevice::start().await.unwrap();
        let usrp = Usrp2::make(&device.addr().to_string(), "").await.unwrap();
        assert_eq!(usrp.descriptor(), &device.descriptor().await);
    }

    #[tokio::test]
    async fn make_rejects_ambiguous_and_missing() {
        let device = MockDevice::start().await.unwrap();
        device
            .add_neighbour(MockDevice::default_identity(MacAddr::from_suffix([0, 2])))
            .await;
        let interface = device.addr().to_string();

        let ambiguous = Usrp2::make(&interface, "").await;
        assert!(matches!(ambiguous, Err(Error::AmbiguousOrNotFound(_))));

        let chosen = Usrp2::make(&interface, "00:02").await.unwrap();
        assert_eq!(chosen.mac_addr().await, MacAddr::from_suffix([0, 2]));

        let missing = Usrp2::make(&interface, "00:09").await;
        assert!(matches!(missing, Err(Error::AmbiguousOrNotFound(_))));
    }
}
