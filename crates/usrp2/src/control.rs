//! Control request/reply exchange.
//!
//! [`ControlChannel`] sends one [`Command`] at a time and waits for the
//! matching acknowledgment. The sequence counter lock is held for the whole
//! exchange, so requests from concurrent callers queue behind each other.
//! Replies are delivered by the session's inbound task through
//! [`deliver`](ControlChannel::deliver); a reply whose sequence number does
//! not match the outstanding request is stale and is dropped.
//!
//! Datagrams get lost, so an unanswered request is re-sent, byte for byte,
//! every `ack_timeout` until `max_attempts` sends have gone unanswered.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, Mutex};

use usrp2_core::{Error, Result};
use usrp2_protocol::{Command, ControlReply};
use usrp2_transport::UdpTransport;

/// Default time to wait for an acknowledgment before re-sending.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_millis(50);

/// Default number of sends per request.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

struct Outstanding {
    sequence: u32,
    reply_tx: oneshot::Sender<ControlReply>,
}

/// Serialized command channel to one device.
pub struct ControlChannel {
    transport: Arc<UdpTransport>,
    /// Next sequence number. Locked for the duration of a request.
    next_seq: Mutex<u32>,
    outstanding: Mutex<Option<Outstanding>>,
    ack_timeout: Duration,
    max_attempts: u32,
}

impl ControlChannel {
    pub fn new(transport: Arc<UdpTransport>, ack_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            transport,
            next_seq: Mutex::new(1),
            outstanding: Mutex::new(None),
            ack_timeout,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Send `command` and wait for its acknowledgment.
    ///
    /// Returns the reply on ack, [`Error::Rejected`] on a negative ack, and
    /// [`Error::Timeout`] once every attempt has gone unanswered.
    pub async fn request(&self, command: &Command) -> Result<ControlReply> {
        let mut next = self.next_seq.lock().await;
        let seq = *next;
        *next = next.wrapping_add(1);

        let (reply_tx, mut reply_rx) = oneshot::channel();
        *self.outstanding.lock().await = Some(Outstanding {
            sequence: seq,
            reply_tx,
        });

        let datagram = command.encode(seq);
        let opcode = command.opcode();

        for attempt in 1..=self.max_attempts {
            tracing::trace!(seq, opcode, attempt, "sending control request");
            if let Err(e) = self.transport.send(&datagram).await {
                self.outstanding.lock().await.take();
                return Err(e);
            }

            match tokio::time::timeout(self.ack_timeout, &mut reply_rx).await {
                Ok(Ok(reply)) => {
                    tracing::trace!(seq, opcode, status = ?reply.status, "control reply");
                    return reply.into_result();
                }
                Ok(Err(_)) => {
                    // Sender dropped without a reply: the session was torn down.
                    return Err(Error::NotConnected);
                }
                Err(_) => {
                    tracing::debug!(seq, opcode, attempt, "no acknowledgment, retrying");
                }
            }
        }

        self.outstanding.lock().await.take();
        tracing::warn!(seq, opcode, attempts = self.max_attempts, "control request timed out");
        Err(Error::Timeout)
    }

    /// Route a reply received by the inbound task.
    pub async fn deliver(&self, reply: ControlReply) {
        let mut slot = self.outstanding.lock().await;
        match slot.as_ref().map(|o| o.sequence) {
            Some(expected) if expected == reply.sequence => {
                if let Some(o) = slot.take() {
                    let _ = o.reply_tx.send(reply);
                }
            }
            Some(expected) => {
                tracing::debug!(
                    seq = reply.sequence,
                    expected,
                    opcode = reply.opcode,
                    "discarding stale control reply"
                );
            }
            None => {
                tracing::debug!(seq = reply.sequence, opcode = reply.opcode, "discarding unsolicited control reply");
            }
        }
    }

    /// Fail any request in flight with [`Error::NotConnected`].
    pub async fn cancel(&self) {
        self.outstanding.lock().await.take();
    }
}
