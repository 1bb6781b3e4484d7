//! Core value types shared by the protocol codec, transport and driver.

use std::fmt;
use std::net::SocketAddr;

use crate::mac::MacAddr;

/// Number of stream channels a device exposes (channel ids `0..MAX_CHAN`).
pub const MAX_CHAN: u8 = 30;

/// Properties of a USRP2 found on the local network.
///
/// Produced by discovery; one entry per responding device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Hardware address of the device.
    pub mac: MacAddr,
    /// Network endpoint the device answered from.
    pub addr: SocketAddr,
    /// Hardware revision.
    pub hw_rev: u16,
    /// MD5 of the loaded FPGA image.
    pub fpga_md5sum: [u8; 16],
    /// MD5 of the running firmware.
    pub sw_md5sum: [u8; 16],
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} hw_rev = 0x{:04x} fpga_md5sum = {} sw_md5sum = {} ({})",
            self.mac,
            self.hw_rev,
            hex(&self.fpga_md5sum),
            hex(&self.sw_md5sum),
            self.addr
        )
    }
}

/// Outcome of a center frequency request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TuneResult {
    /// Frequency the caller asked for, in hertz.
    pub requested_freq: f64,
    /// Frequency the digital mixer was set to, in hertz.
    pub baseband_freq: f64,
    /// Frequency the RF synthesizer was set to, in hertz.
    pub rf_freq: f64,
    /// `requested - (rf + baseband)`, in hertz.
    pub residual_freq: f64,
}

impl TuneResult {
    /// The frequency actually reached (`rf + baseband`).
    pub fn achieved_freq(&self) -> f64 {
        self.rf_freq + self.baseband_freq
    }
}

/// Per-call transmit metadata.
///
/// The timestamp labels the first sample of the call. Burst flags apply to
/// the first and last frame the call produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TxMetadata {
    /// Device sample time of the first sample.
    pub timestamp: u64,
    /// Transmit on arrival; the timestamp is not sent.
    pub send_now: bool,
    /// First frame starts a burst.
    pub start_of_burst: bool,
    /// Last frame ends a burst.
    pub end_of_burst: bool,
}

impl TxMetadata {
    /// Metadata for a single complete burst sent immediately.
    pub fn burst_now() -> Self {
        TxMetadata {
            timestamp: 0,
            send_now: true,
            start_of_burst: true,
            end_of_burst: true,
        }
    }

    /// Metadata for a burst scheduled at `timestamp`.
    pub fn burst_at(timestamp: u64) -> Self {
        TxMetadata {
            timestamp,
            send_now: false,
            start_of_burst: true,
            end_of_burst: true,
        }
    }
}

/// Fixed-point I/Q magnitude scaling, applied as `x * factor / UNITY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IqScale {
    /// In-phase factor.
    pub i: i16,
    /// Quadrature factor.
    pub q: i16,
}

impl IqScale {
    /// Factor value that leaves samples unchanged.
    pub const UNITY: i16 = 1024;

    /// Scaling that leaves both components unchanged.
    pub const IDENTITY: IqScale = IqScale {
        i: Self::UNITY,
        q: Self::UNITY,
    };

    pub fn new(i: i16, q: i16) -> Self {
        IqScale { i, q }
    }
}

impl Default for IqScale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Host-side representation of transmit and receive samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Complex `f32`, components in `[-1.0, +1.0]`.
    Complex32F,
    /// Complex `i16`, subject to IQ scaling.
    Complex16S,
    /// Packed wire words, passed through untouched.
    Raw32,
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleFormat::Complex32F => "32fc",
            SampleFormat::Complex16S => "16sc",
            SampleFormat::Raw32 => "raw",
        };
        f.write_str(name)
    }
}

/// Clock reference used when devices are chained over the MIMO cable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MimoClock {
    /// Free-running, no external lock.
    #[default]
    DontLock,
    /// Lock to the external reference on the SMA connector.
    LockToSma,
    /// Lock to the clock arriving over the MIMO cable.
    LockToMimo,
}

/// MIMO clocking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MimoConfig {
    /// Reference this device locks to.
    pub clock: MimoClock,
    /// Drive our clock out onto the MIMO cable.
    pub provide_clock_to_mimo: bool,
}

impl MimoConfig {
    pub const FLAG_LOCK_TO_SMA: u8 = 0x01;
    pub const FLAG_LOCK_TO_MIMO: u8 = 0x02;
    pub const FLAG_PROVIDE_CLK_TO_MIMO: u8 = 0x04;

    /// Encode as the device's flag byte.
    pub fn flags(&self) -> u8 {
        let mut flags = match self.clock {
            MimoClock::DontLock => 0,
            MimoClock::LockToSma => Self::FLAG_LOCK_TO_SMA,
            MimoClock::LockToMimo => Self::FLAG_LOCK_TO_MIMO,
        };
        if self.provide_clock_to_mimo {
            flags |= Self::FLAG_PROVIDE_CLK_TO_MIMO;
        }
        flags
    }

    /// Decode a flag byte. Returns `None` if both lock bits are set.
    pub fn from_flags(flags: u8) -> Option<Self> {
        let clock = match flags & 0x03 {
            0 => MimoClock::DontLock,
            Self::FLAG_LOCK_TO_SMA => MimoClock::LockToSma,
            Self::FLAG_LOCK_TO_MIMO => MimoClock::LockToMimo,
            _ => return None,
        };
        Some(MimoConfig {
            clock,
            provide_clock_to_mimo: flags & Self::FLAG_PROVIDE_CLK_TO_MIMO != 0,
        })
    }
}
