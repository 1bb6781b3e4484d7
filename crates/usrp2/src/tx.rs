//! Transmit streaming engine.
//!
//! A transmit call is split into frames that fit one datagram. The first
//! frame carries the call's timestamp (unless it is `send_now`) and
//! therefore holds two fewer items than the rest. Burst flags go on the
//! first and last frame only.
//!
//! Flow control is credit based. Starting TX streaming returns the device's
//! buffer capacity in frames, which seeds a [`CreditWindow`]. Each frame
//! sent consumes one credit; `TxCredit` frames from the device give them
//! back. With no credit left the caller waits, up to the configured TX
//! timeout.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};

use usrp2_core::{Error, Result, TxMetadata, MAX_CHAN};
use usrp2_protocol::frame::{
    FrameKind, FLAG_END_OF_BURST, FLAG_START_OF_BURST, MAX_ITEMS_TIMESTAMPED, MAX_ITEMS_UNTIMED,
};
use usrp2_protocol::{Command, SampleFrame};
use usrp2_transport::UdpTransport;

use crate::control::ControlChannel;
use crate::rx::check_channel;

/// Default bound on waiting for transmit credit.
pub const DEFAULT_TX_TIMEOUT: Duration = Duration::from_secs(1);

/// One frame's share of a transmit call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSpan {
    /// Item indices carried by this frame.
    pub range: Range<usize>,
    pub flags: u16,
    pub timestamp: Option<u64>,
}

/// Split `len` items into frames according to `metadata`.
pub fn fragment(len: usize, metadata: &TxMetadata) -> Vec<FrameSpan> {
    let mut spans = Vec::new();
    let mut start = 0;
    while start < len {
        let first = start == 0;
        let timestamp = (first && !metadata.send_now).then_some(metadata.timestamp);
        let room = if timestamp.is_some() {
            MAX_ITEMS_TIMESTAMPED
        } else {
            MAX_ITEMS_UNTIMED
        };
        let end = (start + room).min(len);

        let mut flags = 0;
        if first && metadata.start_of_burst {
            flags |= FLAG_START_OF_BURST;
        }
        if end == len && metadata.end_of_burst {
            flags |= FLAG_END_OF_BURST;
        }

        spans.push(FrameSpan {
            range: start..end,
            flags,
            timestamp,
        });
        start = end;
    }
    spans
}

/// Transmit credits for one channel.
#[derive(Debug)]
pub struct CreditWindow {
    permits: Semaphore,
    capacity: u32,
}

impl CreditWindow {
    /// A full window of `capacity` frames.
    pub fn new(capacity: u32) -> Self {
        Self {
            permits: Semaphore::new(capacity as usize),
            capacity,
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Credits currently available.
    pub fn available(&self) -> u32 {
        self.permits.available_permits() as u32
    }

    /// Consume one credit, waiting at most `timeout` for it.
    pub async fn take(&self, timeout: Duration) -> Result<()> {
        match tokio::time::timeout(timeout, self.permits.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                Ok(())
            }
            // The semaphore is never closed.
            Ok(Err(_)) => Err(Error::NotConnected),
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Return `frames` credits, never exceeding capacity.
    pub fn replenish(&self, frames: u32) {
        let room = self.capacity.saturating_sub(self.available());
        let n = frames.min(room);
        if n < frames {
            tracing::debug!(frames, room, "credit return exceeds capacity, capping");
        }
        self.permits.add_permits(n as usize);
    }
}

/// State of a channel that is streaming.
#[derive(Debug)]
struct TxStream {
    next_seq: u32,
    window: Arc<CreditWindow>,
}

/// Channel table for the transmit direction.
pub struct TxEngine {
    transport: Arc<UdpTransport>,
    /// Per-channel stream state. The lock is held for an entire transmit
    /// call, which serializes calls on one channel.
    streams: Vec<Mutex<Option<TxStream>>>,
    /// Credit routing for the inbound task. Never held across I/O.
    windows: Mutex<HashMap<u8, Arc<CreditWindow>>>,
    tx_timeout: Duration,
}

impl TxEngine {
    pub fn new(transport: Arc<UdpTransport>, tx_timeout: Duration) -> Self {
        Self {
            transport,
            streams: (0..MAX_CHAN).map(|_| Mutex::new(None)).collect(),
            windows: Mutex::new(HashMap::new()),
            tx_timeout,
        }
    }

    fn slot(&self, channel: u8) -> Result<&Mutex<Option<TxStream>>> {
        check_channel(channel)?;
        Ok(&self.streams[channel as usize])
    }

    /// Ask the device to accept TX frames on `channel` and open the credit
    /// window it reports. Returns the capacity in frames.
    pub async fn start(&self, control: &ControlChannel, channel: u8) -> Result<u32> {
        let mut stream = self.slot(channel)?.lock().await;
        if stream.is_some() {
            return Err(Error::AlreadyStreaming(channel));
        }

        let reply = control.request(&Command::StartTxStreaming { channel }).await?;
        let capacity = reply.payload_u32()?;
        if capacity == 0 {
            return Err(Error::Protocol(format!(
                "device reported zero TX capacity on channel {channel}"
            )));
        }

        let window = Arc::new(CreditWindow::new(capacity));
        self.windows.lock().await.insert(channel, Arc::clone(&window));
        *stream = Some(TxStream {
            next_seq: 0,
            window,
        });
        tracing::debug!(channel, capacity, "TX streaming started");
        Ok(capacity)
    }

    /// Stop TX on `channel`. Idle channels succeed without any I/O.
    pub async fn stop(&self, control: &ControlChannel, channel: u8) -> Result<()> {
        let mut stream = self.slot(channel)?.lock().await;
        if stream.is_none() {
            return Ok(());
        }
        control.request(&Command::StopTxStreaming { channel }).await?;
        *stream = None;
        self.windows.lock().await.remove(&channel);
        tracing::debug!(channel, "TX streaming stopped");
        Ok(())
    }

    pub async fn is_streaming(&self, channel: u8) -> bool {
        match self.slot(channel) {
            Ok(slot) => slot.lock().await.is_some(),
            Err(_) => false,
        }
    }

    /// Credits currently available on `channel` (zero when idle).
    pub async fn credits(&self, channel: u8) -> u32 {
        self.windows
            .lock()
            .await
            .get(&channel)
            .map_or(0, |w| w.available())
    }

    /// Credit returned by the device, routed by the inbound task.
    pub async fn credit(&self, channel: u8, frames: u32) {
        let window = self.windows.lock().await.get(&channel).cloned();
        match window {
            Some(w) => {
                tracing::trace!(channel, frames, "TX credit");
                w.replenish(frames);
            }
            None => tracing::trace!(channel, frames, "TX credit for idle channel, ignoring"),
        }
    }

    /// Send `words` on `channel` as one or more frames.
    pub async fn transmit(&self, channel: u8, words: &[u32], metadata: &TxMetadata) -> Result<()> {
        let mut guard = self.slot(channel)?.lock().await;
        let stream = guard.as_mut().ok_or(Error::NotStreaming(channel))?;
        if words.is_empty() {
            return Err(Error::InvalidParameter("nothing to transmit".into()));
        }

        let spans = fragment(words.len(), metadata);
        tracing::trace!(channel, items = words.len(), frames = spans.len(), "transmitting");

        for span in spans {
            stream.window.take(self.tx_timeout).await.map_err(|e| {
                tracing::debug!(channel, seq = stream.next_seq, "no TX credit before timeout");
                e
            })?;

            let frame = SampleFrame {
                channel,
                sequence: stream.next_seq,
                flags: span.flags,
                timestamp: span.timestamp,
                items: words[span.range].to_vec(),
            };
            stream.next_seq = stream.next_seq.wrapping_add(1);
            self.transport.send(&frame.encode(FrameKind::TxData)).await?;
        }
        Ok(())
    }
}
