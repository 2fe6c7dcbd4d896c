//! Fixed-point requantization.
//!
//! A real rescale factor `r` is stored as a normalized Q31 `multiplier` in
//! `[2^30, 2^31)` and a right `shift`, so that `r ≈ multiplier * 2^(-31 - shift)`.
//! Applying it to an i32 accumulator is a rounding doubling high multiply
//! followed by a rounding power-of-two division:
//!
//! - the high multiply rounds the 64-bit product to nearest, ties toward
//!   positive infinity, and saturates the single overflow case
//!   `i32::MIN * i32::MIN`;
//! - the power-of-two division rounds to nearest, ties away from zero.
//!
//! These are the gemmlowp conventions, which keeps quantized output
//! bit-exact with other runtimes implementing the same operator.

use crate::error::{Result, TransposeConvError};
use crate::tensor::QuantParams;

/// A real multiplier expressed as a Q31 multiplier and right shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QuantizedMultiplier {
    pub multiplier: i32,
    /// Right shift applied after the Q31 multiply; negative values shift left.
    pub shift: i32,
}

impl QuantizedMultiplier {
    /// The real value this pair represents.
    pub fn approximate(&self) -> f64 {
        self.multiplier as f64 * 2f64.powi(-31 - self.shift)
    }
}

/// Splits `value` into a mantissa in `[0.5, 1)` and a binary exponent.
fn frexp(value: f64) -> (f64, i32) {
    if value == 0.0 || !value.is_finite() {
        return (value, 0);
    }
    let bits = value.to_bits();
    let biased = ((bits >> 52) & 0x7ff) as i32;
    if biased == 0 {
        // subnormal: renormalize first
        let (m, e) = frexp(value * 2f64.powi(54));
        return (m, e - 54);
    }
    let mantissa = f64::from_bits((bits & !(0x7ff << 52)) | (1022 << 52));
    (mantissa, biased - 1022)
}

/// Derives the fixed-point multiplier and shift for `real_multiplier`.
///
/// Zero maps to `(0, 0)`, which collapses every accumulator to the output
/// zero-point. Multipliers too small to survive a 31-bit right shift collapse
/// the same way.
pub fn quantize_multiplier(real_multiplier: f64) -> Result<QuantizedMultiplier> {
    if !real_multiplier.is_finite() || real_multiplier < 0.0 {
        return Err(TransposeConvError::InvalidMultiplier(real_multiplier));
    }
    if real_multiplier == 0.0 {
        return Ok(QuantizedMultiplier::default());
    }
    let (q, mut exponent) = frexp(real_multiplier);
    let mut q_fixed = (q * (1i64 << 31) as f64).round() as i64;
    debug_assert!(q_fixed <= 1i64 << 31);
    if q_fixed == 1i64 << 31 {
        q_fixed /= 2;
        exponent += 1;
    }
    let shift = -exponent;
    if shift > 31 {
        log::debug!("real multiplier {real_multiplier} underflows the fixed-point range, using zero");
        return Ok(QuantizedMultiplier::default());
    }
    if shift < -30 {
        return Err(TransposeConvError::InvalidMultiplier(real_multiplier));
    }
    Ok(QuantizedMultiplier {
        multiplier: q_fixed as i32,
        shift,
    })
}

/// `round(a * b / 2^31)`, saturating the one overflowing input pair.
#[inline]
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let ab = a as i64 * b as i64;
    let nudge: i64 = if ab >= 0 { 1 << 30 } else { 1 - (1 << 30) };
    ((ab + nudge) / (1i64 << 31)) as i32
}

/// `round(x / 2^exponent)` with ties away from zero.
#[inline]
pub fn rounding_divide_by_pot(x: i32, exponent: i32) -> i32 {
    debug_assert!((0..=31).contains(&exponent));
    let mask = ((1i64 << exponent) - 1) as i32;
    let remainder = x & mask;
    let threshold = (mask >> 1) + (x < 0) as i32;
    (x >> exponent) + (remainder > threshold) as i32
}

/// Applies `qm` to an accumulator.
#[inline]
pub fn multiply_by_quantized_multiplier(x: i32, qm: QuantizedMultiplier) -> i32 {
    let left_shift = if qm.shift < 0 { -qm.shift } else { 0 };
    let right_shift = if qm.shift > 0 { qm.shift } else { 0 };
    rounding_divide_by_pot(
        saturating_rounding_doubling_high_mul(x.saturating_mul(1 << left_shift), qm.multiplier),
        right_shift,
    )
}

/// `input_scale * filter_scale / output_scale`, computed in double precision.
pub fn real_multiplier(input: &QuantParams, filter: &QuantParams, output: &QuantParams) -> f64 {
    let input_product_scale = input.scale as f64 * filter.scale as f64;
    input_product_scale / output.scale as f64
}

/// Clamp bounds of a uint8 output with no fused activation: the full code range.
pub fn activation_range_u8() -> (i32, i32) {
    (u8::MIN as i32, u8::MAX as i32)
}

/// Per-call constants of the quantized kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequantParams {
    pub input_offset: i32,
    pub filter_offset: i32,
    pub output_offset: i32,
    pub output_multiplier: QuantizedMultiplier,
    pub activation_min: i32,
    pub activation_max: i32,
}

impl RequantParams {
    pub fn new(
        input: &QuantParams,
        filter: &QuantParams,
        output: &QuantParams,
        output_multiplier: QuantizedMultiplier,
    ) -> Self {
        let (activation_min, activation_max) = activation_range_u8();
        Self {
            input_offset: -input.zero_point,
            filter_offset: -filter.zero_point,
            output_offset: output.zero_point,
            output_multiplier,
            activation_min,
            activation_max,
        }
    }

    #[inline]
    pub fn requantize(&self, acc: i32) -> u8 {
        let scaled = multiply_by_quantized_multiplier(acc, self.output_multiplier);
        scaled
            .saturating_add(self.output_offset)
            .clamp(self.activation_min, self.activation_max) as u8
    }
}
