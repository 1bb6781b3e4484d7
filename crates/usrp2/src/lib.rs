//! Host-side driver for networked USRP2 software-defined radios.
//!
//! This crate talks to USRP2 devices over UDP on a local Ethernet segment.
//! It provides:
//!
//! - **Discovery** ([`discovery`]) -- find devices on a segment and filter
//!   them by MAC address.
//! - **Control channel** ([`control`]) -- sequence-numbered configuration
//!   requests with acknowledgment and retransmission.
//! - **Receive streaming** ([`rx`]) -- per-channel sample delivery to a
//!   caller-supplied handler, with overrun and missing-frame accounting.
//! - **Transmit streaming** ([`tx`]) -- fragmentation into frames, burst
//!   flags and credit-based flow control.
//! - **Frequency planning** ([`tune`]) -- split a center frequency between
//!   the RF synthesizer and the digital mixer.
//! - **Front-end models** ([`models`]) -- tuning capabilities of the
//!   supported daughterboards.
//! - **Usrp2** ([`session`]) -- an open device session tying the above
//!   together, built with [`Usrp2Builder`] ([`builder`]).
//!
//! # Example
//!
//! ```no_run
//! use usrp2::rx::RxFrame;
//! use usrp2::Usrp2;
//!
//! # async fn example() -> usrp2_core::Result<()> {
//! let usrp = Usrp2::make("192.168.10.255", "").await?;
//! usrp.set_rx_decim(16).await?;
//! let tune = usrp.set_rx_center_freq(915.0e6).await?;
//! println!("tuned to {} Hz", tune.achieved_freq());
//!
//! usrp.start_rx_streaming(0, 0, |frame: &RxFrame| {
//!     let samples = frame.to_complex_f32();
//!     println!("{} samples", samples.len());
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod builder;
pub mod control;
pub mod discovery;
pub mod models;
pub mod rx;
pub mod session;
pub mod tune;
pub mod tx;

pub use builder::{SessionOptions, Usrp2Builder};
pub use rx::{RxFrame, RxSampleHandler};
pub use session::{Settings, Usrp2};
pub use tune::{FrequencyCaps, TunePlan};
