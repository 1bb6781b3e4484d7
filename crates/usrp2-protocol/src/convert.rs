//! Sample word conversion.
//!
//! A wire sample is one 32-bit word: I in the high 16 bits, Q in the low 16
//! bits, both two's-complement. Host samples come in three formats, each a
//! [`WireSample`] implementation:
//!
//! - `Complex<f32>`: components clamped to `[-1.0, +1.0]` and scaled by 32767.
//!   Out-of-range input is clamped, never rejected. NaN encodes as 0.
//! - `Complex<i16>`: packed as-is. [`scale_iq`] / [`unscale_iq`] apply an
//!   [`IqScale`] with saturation.
//! - `u32`: raw passthrough.
//!
//! Everything here is pure and stateless.

use num_complex::Complex;

use usrp2_core::{IqScale, SampleFormat};

/// Full-scale magnitude of a 16-bit component.
pub const FULL_SCALE: f32 = 32767.0;

/// Pack two components into a wire word.
pub fn pack(i: i16, q: i16) -> u32 {
    ((i as u16 as u32) << 16) | (q as u16 as u32)
}

/// Split a wire word into its components.
pub fn unpack(word: u32) -> (i16, i16) {
    ((word >> 16) as u16 as i16, word as u16 as i16)
}

fn f32_to_component(x: f32) -> i16 {
    if x.is_nan() {
        return 0;
    }
    (x.clamp(-1.0, 1.0) * FULL_SCALE).round() as i16
}

fn component_to_f32(x: i16) -> f32 {
    x as f32 / FULL_SCALE
}

fn saturate(x: f64) -> i16 {
    x.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// A host sample type with a fixed wire encoding.
pub trait WireSample: Copy + Send + 'static {
    /// Format tag, for logging.
    const FORMAT: SampleFormat;

    fn to_wire(self) -> u32;

    fn from_wire(word: u32) -> Self;
}

impl WireSample for Complex<f32> {
    const FORMAT: SampleFormat = SampleFormat::Complex32F;

    fn to_wire(self) -> u32 {
        pack(f32_to_component(self.re), f32_to_component(self.im))
    }

    fn from_wire(word: u32) -> Self {
        let (i, q) = unpack(word);
        Complex::new(component_to_f32(i), component_to_f32(q))
    }
}

impl WireSample for Complex<i16> {
    const FORMAT: SampleFormat = SampleFormat::Complex16S;

    fn to_wire(self) -> u32 {
        pack(self.re, self.im)
    }

    fn from_wire(word: u32) -> Self {
        let (i, q) = unpack(word);
        Complex::new(i, q)
    }
}

impl WireSample for u32 {
    const FORMAT: SampleFormat = SampleFormat::Raw32;

    fn to_wire(self) -> u32 {
        self
    }

    fn from_wire(word: u32) -> Self {
        word
    }
}

/// Apply `scale` to a sample: `x * s / 1024`, rounded and saturated.
pub fn scale_iq(sample: Complex<i16>, scale: IqScale) -> Complex<i16> {
    let unity = IqScale::UNITY as f64;
    Complex::new(
        saturate(sample.re as f64 * scale.i as f64 / unity),
        saturate(sample.im as f64 * scale.q as f64 / unity),
    )
}

/// Invert [`scale_iq`]: `x * 1024 / s`, rounded and saturated.
///
/// A zero factor yields zero for that component.
pub fn unscale_iq(sample: Complex<i16>, scale: IqScale) -> Complex<i16> {
    let unity = IqScale::UNITY as f64;
    let undo = |x: i16, s: i16| {
        if s == 0 {
            0
        } else {
            saturate(x as f64 * unity / s as f64)
        }
    };
    Complex::new(undo(sample.re, scale.i), undo(sample.im, scale.q))
}

/// Encode a buffer of host samples.
pub fn encode_slice<T: WireSample>(samples: &[T]) -> Vec<u32> {
    samples.iter().map(|s| s.to_wire()).collect()
}

/// Decode a buffer of wire words.
pub fn decode_slice<T: WireSample>(words: &[u32]) -> Vec<T> {
    words.iter().map(|&w| T::from_wire(w)).collect()
}

/// Scale then encode a buffer of `i16` samples.
pub fn encode_scaled(samples: &[Complex<i16>], scale: IqScale) -> Vec<u32> {
    if scale == IqScale::IDENTITY {
        return encode_slice(samples);
    }
    samples.iter().map(|&s| scale_iq(s, scale).to_wire()).collect()
}

/// Decode then unscale a buffer of wire words.
pub fn decode_scaled(words: &[u32], scale: IqScale) -> Vec<Complex<i16>> {
    words
        .iter()
        .map(|&w| unscale_iq(Complex::<i16>::from_wire(w), scale))
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
