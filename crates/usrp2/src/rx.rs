//! Receive streaming engine.
//!
//! The device pushes `RxData` frames for every channel that is streaming.
//! [`RxEngine`] holds one [`RxChannelState`] per channel, runs each frame's
//! sequence number through a [`SequenceTracker`], and hands accepted frames
//! to the channel's [`RxSampleHandler`] on the session's inbound task.
//!
//! Lost frames are counted, not reported as errors: a jump in sequence
//! numbers bumps the channel's overrun count by one and its missing-frame
//! count by the size of the gap. Late or duplicate frames are dropped
//! without touching the counters.
//!
//! A handler that panics is dropped and its channel goes idle; the
//! inbound task and every other channel carry on.

use std::panic::{self, AssertUnwindSafe};

use num_complex::Complex;
use tokio::sync::Mutex;

use usrp2_core::{Error, IqScale, Result, MAX_CHAN};
use usrp2_protocol::convert::{self, WireSample};
use usrp2_protocol::frame::{FLAG_END_OF_BURST, FLAG_START_OF_BURST, MAX_ITEMS_TIMESTAMPED};
use usrp2_protocol::SampleFrame;

/// Largest items-per-frame a caller may request.
pub const MAX_RX_ITEMS_PER_FRAME: u32 = MAX_ITEMS_TIMESTAMPED as u32;

/// Serial-number window: forward distances below this are "newer".
const SEQ_HALF_RANGE: u32 = 1 << 31;

/// What to do with a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqVerdict {
    /// In order, or after a gap of `missing` frames.
    Deliver { missing: u32 },
    /// Duplicate or older than the last delivered frame.
    Discard,
}

/// Per-channel sequence gap detector.
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    last: Option<u32>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify `seq` and, if it is delivered, make it the new reference.
    ///
    /// The first frame after construction is always delivered.
    pub fn observe(&mut self, seq: u32) -> SeqVerdict {
        let Some(last) = self.last else {
            self.last = Some(seq);
            return SeqVerdict::Deliver { missing: 0 };
        };
        let forward = seq.wrapping_sub(last);
        if forward == 0 || forward >= SEQ_HALF_RANGE {
            return SeqVerdict::Discard;
        }
        self.last = Some(seq);
        SeqVerdict::Deliver {
            missing: forward - 1,
        }
    }

    pub fn last(&self) -> Option<u32> {
        self.last
    }
}

/// One received frame as handed to a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RxFrame {
    pub channel: u8,
    pub sequence: u32,
    /// Device sample time of the first item, when the device sent one.
    pub timestamp: Option<u64>,
    pub flags: u16,
    /// Packed wire words.
    pub items: Vec<u32>,
}

impl RxFrame {
    pub fn start_of_burst(&self) -> bool {
        self.flags & FLAG_START_OF_BURST != 0
    }

    pub fn end_of_burst(&self) -> bool {
        self.flags & FLAG_END_OF_BURST != 0
    }

    /// Items as complex 16-bit samples.
    pub fn to_complex_i16(&self) -> Vec<Complex<i16>> {
        convert::decode_slice(&self.items)
    }

    /// Items as complex floats in `[-1.0, +1.0]`.
    pub fn to_complex_f32(&self) -> Vec<Complex<f32>> {
        convert::decode_slice(&self.items)
    }

    /// Items as complex 16-bit samples with the device's RX IQ scaling
    /// undone. `scale` is the value last passed to `set_rx_scale_iq`.
    pub fn to_complex_i16_scaled(&self, scale: IqScale) -> Vec<Complex<i16>> {
        convert::decode_scaled(&self.items, scale)
    }

    /// Items decoded to any wire sample type.
    pub fn samples<T: WireSample>(&self) -> Vec<T> {
        convert::decode_slice(&self.items)
    }
}

impl From<SampleFrame> for RxFrame {
    fn from(sf: SampleFrame) -> Self {
        RxFrame {
            channel: sf.channel,
            sequence: sf.sequence,
            timestamp: sf.timestamp,
            flags: sf.flags,
            items: sf.items,
        }
    }
}

/// Consumer of received frames.
///
/// Called on the session's inbound task, once per delivered frame and in
/// arrival order. A slow handler delays every other inbound datagram,
/// control replies included.
pub trait RxSampleHandler: Send + 'static {
    fn handle(&mut self, frame: &RxFrame);
}

impl<F> RxSampleHandler for F
where
    F: FnMut(&RxFrame) + Send + 'static,
{
    fn handle(&mut self, frame: &RxFrame) {
        self(frame)
    }
}

/// Receive state of one channel.
pub struct RxChannelState {
    pub channel: u8,
    pub streaming: bool,
    pub items_per_frame: u32,
    pub tracker: SequenceTracker,
    pub overruns: u64,
    pub missing: u64,
    handler: Option<Box<dyn RxSampleHandler>>,
}

impl RxChannelState {
    fn idle(channel: u8) -> Self {
        Self {
            channel,
            streaming: false,
            items_per_frame: 0,
            tracker: SequenceTracker::new(),
            overruns: 0,
            missing: 0,
            handler: None,
        }
    }
}

impl std::fmt::Debug for RxChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RxChannelState")
            .field("channel", &self.channel)
            .field("streaming", &self.streaming)
            .field("items_per_frame", &self.items_per_frame)
            .field("last_seq", &self.tracker.last())
            .field("overruns", &self.overruns)
            .field("missing", &self.missing)
            .finish()
    }
}

/// Check a channel id against [`MAX_CHAN`].
pub(crate) fn check_channel(channel: u8) -> Result<()> {
    if channel >= MAX_CHAN {
        return Err(Error::InvalidParameter(format!(
            "channel {channel} out of range (0..{MAX_CHAN})"
        )));
    }
    Ok(())
}

/// Channel table for the receive direction.
pub struct RxEngine {
    channels: Mutex<Vec<RxChannelState>>,
}

impl Default for RxEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RxEngine {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new((0..MAX_CHAN).map(RxChannelState::idle).collect()),
        }
    }

    /// Install a fresh streaming state on `channel`.
    ///
    /// Returns the state it replaced so a failed start can be rolled back
    /// with [`restore`](Self::restore).
    pub async fn begin(
        &self,
        channel: u8,
        items_per_frame: u32,
        handler: Box<dyn RxSampleHandler>,
    ) -> Result<RxChannelState> {
        check_channel(channel)?;
        if items_per_frame > MAX_RX_ITEMS_PER_FRAME {
            return Err(Error::InvalidParameter(format!(
                "items_per_frame {items_per_frame} exceeds {MAX_RX_ITEMS_PER_FRAME}"
            )));
        }

        let mut channels = self.channels.lock().await;
        let slot = &mut channels[channel as usize];
        if slot.streaming {
            return Err(Error::AlreadyStreaming(channel));
        }
        let fresh = RxChannelState {
            streaming: true,
            items_per_frame,
            handler: Some(handler),
            ..RxChannelState::idle(channel)
        };
        Ok(std::mem::replace(slot, fresh))
    }

    /// Put back a state returned by [`begin`](Self::begin).
    pub async fn restore(&self, previous: RxChannelState) {
        let mut channels = self.channels.lock().await;
        let idx = previous.channel as usize;
        channels[idx] = previous;
    }

    /// Mark `channel` idle. Counters are kept.
    pub async fn finish(&self, channel: u8) {
        let mut channels = self.channels.lock().await;
        if let Some(slot) = channels.get_mut(channel as usize) {
            slot.streaming = false;
            slot.handler = None;
        }
    }

    pub async fn is_streaming(&self, channel: u8) -> bool {
        let channels = self.channels.lock().await;
        channels.get(channel as usize).is_some_and(|s| s.streaming)
    }

    /// Overruns since the channel last started streaming.
    pub async fn overruns(&self, channel: u8) -> u64 {
        let channels = self.channels.lock().await;
        channels.get(channel as usize).map_or(0, |s| s.overruns)
    }

    /// Missing frames since the channel last started streaming.
    pub async fn missing(&self, channel: u8) -> u64 {
        let channels = self.channels.lock().await;
        channels.get(channel as usize).map_or(0, |s| s.missing)
    }

    /// Route one received frame.
    pub async fn dispatch(&self, frame: SampleFrame) {
        let mut channels = self.channels.lock().await;
        let Some(state) = channels.get_mut(frame.channel as usize) else {
            tracing::trace!(channel = frame.channel, "RX frame for unknown channel, dropping");
            return;
        };
        if !state.streaming {
            tracing::trace!(channel = frame.channel, seq = frame.sequence, "RX frame for idle channel, dropping");
            return;
        }

        match state.tracker.observe(frame.sequence) {
            SeqVerdict::Discard => {
                tracing::trace!(channel = frame.channel, seq = frame.sequence, "late RX frame discarded");
            }
            SeqVerdict::Deliver { missing } => {
                if missing > 0 {
                    state.overruns += 1;
                    state.missing += missing as u64;
                    tracing::debug!(channel = frame.channel, seq = frame.sequence, missing, "RX overrun");
                }
                let (channel, seq) = (frame.channel, frame.sequence);
                let rx_frame = RxFrame::from(frame);
                let panicked = match state.handler.as_mut() {
                    Some(handler) => {
                        panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&rx_frame))).is_err()
                    }
                    None => false,
                };
                if panicked {
                    tracing::warn!(channel, seq, "RX handler panicked, channel marked idle");
                    state.streaming = false;
                    state.handler = None;
                }
            }
        }
    }
}
