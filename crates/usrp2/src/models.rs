//! Daughterboard front-end definitions.
//!
//! A USRP2 motherboard digitizes at a fixed 100 MS/s; what it can tune to
//! depends on the daughterboard fitted. Each supported board is described by
//! a [`FrontEndModel`] returned from a factory function:
//!
//! | Model     | model_id   | RX                     | TX                     |
//! |-----------|------------|------------------------|------------------------|
//! | Basic RX  | `basic_rx` | DC to 50 MHz (no LO)   | --                     |
//! | Basic TX  | `basic_tx` | --                     | DC to 50 MHz (no LO)   |
//! | RFX2400   | `rfx2400`  | 2.3 to 2.9 GHz         | 2.3 to 2.9 GHz         |
//! | WBX       | `wbx`      | 50 MHz to 2.2 GHz      | 50 MHz to 2.2 GHz      |
//! | XCVR2450  | `xcvr2450` | 2.4-2.5, 4.9-5.85 GHz  | 2.4-2.5, 4.9-5.85 GHz  |
//!
//! Ranges are synthesizer ranges; the digital mixer extends each by half
//! the DSP rate.

use crate::tune::FrequencyCaps;

/// Motherboard ADC/DAC rate feeding the digital mixers.
pub const DSP_RATE: f64 = 100.0e6;

/// Static description of a daughterboard.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontEndModel {
    /// Human-readable name (e.g. "WBX").
    pub name: &'static str,
    /// Machine-readable identifier (e.g. "wbx").
    pub model_id: &'static str,
    /// Receive path tuning, `None` for transmit-only boards.
    pub rx: Option<FrequencyCaps>,
    /// Transmit path tuning, `None` for receive-only boards.
    pub tx: Option<FrequencyCaps>,
}

pub fn basic_rx() -> FrontEndModel {
    FrontEndModel {
        name: "Basic RX",
        model_id: "basic_rx",
        rx: Some(FrequencyCaps::new(0.0, 0.0, 0.0, DSP_RATE)),
        tx: None,
    }
}

pub fn basic_tx() -> FrontEndModel {
    FrontEndModel {
        name: "Basic TX",
        model_id: "basic_tx",
        rx: None,
        tx: Some(FrequencyCaps::new(0.0, 0.0, 0.0, DSP_RATE)),
    }
}

pub fn rfx2400() -> FrontEndModel {
    let caps = FrequencyCaps::new(2.3e9, 2.9e9, 4.0e6, DSP_RATE);
    FrontEndModel {
        name: "RFX2400",
        model_id: "rfx2400",
        rx: Some(caps.clone()),
        tx: Some(caps),
    }
}

/// WBX wideband transceiver. The default front end.
pub fn wbx() -> FrontEndModel {
    let caps = FrequencyCaps::new(50.0e6, 2.2e9, 100.0e3, DSP_RATE);
    FrontEndModel {
        name: "WBX",
        model_id: "wbx",
        rx: Some(caps.clone()),
        tx: Some(caps),
    }
}

pub fn xcvr2450() -> FrontEndModel {
    let caps = FrequencyCaps::new(2.4e9, 2.5e9, 1.0e6, DSP_RATE).with_range(4.9e9, 5.85e9);
    FrontEndModel {
        name: "XCVR2450",
        model_id: "xcvr2450",
        rx: Some(caps.clone()),
        tx: Some(caps),
    }
}

/// All known front ends.
pub fn all_models() -> Vec<FrontEndModel> {
    vec![basic_rx(), basic_tx(), rfx2400(), wbx(), xcvr2450()]
}

/// Look up a front end by `model_id`.
pub fn by_id(model_id: &str) -> Option<FrontEndModel> {
    all_models().into_iter().find(|m| m.model_id == model_id)
}
