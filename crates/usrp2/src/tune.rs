//! Center frequency planning.
//!
//! A USRP2 reaches a requested center frequency with two stages: the
//! daughterboard synthesizer (coarse, on a fixed step grid, within one or
//! more tuning ranges) and the FPGA's digital mixer (fine, within half the
//! DSP rate either side of the synthesizer, quantized to the 32-bit phase
//! accumulator). [`plan`] splits a request between the two.

use usrp2_core::{Error, Result, TuneResult};

/// Phase accumulator width of the digital mixer.
pub const PHASE_ACCUMULATOR_BITS: u32 = 32;

/// A contiguous synthesizer tuning range, in hertz.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthRange {
    pub min: f64,
    pub max: f64,
}

/// Tuning capabilities of one signal path.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyCaps {
    /// Synthesizer ranges, ascending. A fixed-LO front end has a single
    /// zero-width range.
    pub ranges: Vec<SynthRange>,
    /// Synthesizer step; zero means continuously tunable.
    pub step: f64,
    /// Digital mixer sample rate.
    pub dsp_rate: f64,
}

impl FrequencyCaps {
    /// Single-range capabilities.
    pub fn new(min: f64, max: f64, step: f64, dsp_rate: f64) -> Self {
        FrequencyCaps {
            ranges: vec![SynthRange { min, max }],
            step,
            dsp_rate,
        }
    }

    /// Add another synthesizer range.
    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.ranges.push(SynthRange { min, max });
        self
    }

    /// Frequency resolution of the mixer.
    pub fn mixer_resolution(&self) -> f64 {
        self.dsp_rate / 2f64.powi(PHASE_ACCUMULATOR_BITS as i32)
    }

    /// Lowest and highest reachable frequency.
    pub fn reachable(&self) -> (f64, f64) {
        let half = self.dsp_rate / 2.0;
        let lo = self.ranges.iter().map(|r| r.min).fold(f64::INFINITY, f64::min);
        let hi = self.ranges.iter().map(|r| r.max).fold(f64::NEG_INFINITY, f64::max);
        ((lo - half).max(0.0), hi + half)
    }
}

/// A tuning solution: what to program and what it achieves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TunePlan {
    pub result: TuneResult,
    /// Mixer phase increment per sample.
    pub phase_inc: i32,
}

/// Split `requested` between synthesizer and mixer.
///
/// The synthesizer goes to the step-grid point nearest `requested`, clamped
/// into the closest range; the mixer covers what is left. Among ranges the
/// one leaving the smallest residual wins, so the mixer stays near center.
pub fn plan(requested: f64, caps: &FrequencyCaps) -> Result<TunePlan> {
    let (min, max) = caps.reachable();
    let out_of_range = || Error::FrequencyOutOfRange {
        requested,
        min,
        max,
    };

    if !requested.is_finite() || requested < 0.0 || caps.ranges.is_empty() {
        return Err(out_of_range());
    }

    let on_grid = if caps.step > 0.0 {
        (requested / caps.step).round() * caps.step
    } else {
        requested
    };

    let rf = caps
        .ranges
        .iter()
        .map(|r| on_grid.clamp(r.min, r.max))
        .min_by(|a, b| (requested - a).abs().total_cmp(&(requested - b).abs()))
        .ok_or_else(out_of_range)?;

    let offset = requested - rf;
    if offset.abs() > caps.dsp_rate / 2.0 {
        return Err(out_of_range());
    }

    let resolution = caps.mixer_resolution();
    let phase_inc = (offset / resolution)
        .round()
        .clamp(i32::MIN as f64, i32::MAX as f64) as i32;
    let baseband_freq = phase_inc as f64 * resolution;

    Ok(TunePlan {
        result: TuneResult {
            requested_freq: requested,
            baseband_freq,
            rf_freq: rf,
            residual_freq: requested - (rf + baseband_freq),
        },
        phase_inc,
    })
}
