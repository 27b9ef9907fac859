//! Exact integer decomposition of numbers for the codec.
//!
//! Every finite `f64` is `mantissa * 2^exponent` with an odd (or zero)
//! integer mantissa of at most 53 significant bits, so the pair fits two
//! signed varints and round-trips exactly on every platform.

use crate::error::{ValueError, ValueResult};

/// Decompose a finite `f64` into `(mantissa, exponent)` with
/// `value == mantissa * 2^exponent` and `mantissa` odd or zero.
pub fn decompose(value: f64) -> ValueResult<(i64, i64)> {
    if !value.is_finite() {
        return Err(ValueError::NonFiniteNumber);
    }
    if value == 0.0 {
        return Ok((0, 0));
    }

    let bits = value.to_bits();
    let sign = if bits >> 63 == 1 { -1i64 } else { 1i64 };
    let biased = ((bits >> 52) & 0x7ff) as i64;
    let fraction = bits & 0xf_ffff_ffff_ffff;

    let (mut mantissa, mut exponent) = if biased == 0 {
        // Subnormal: no implicit leading bit.
        (fraction as i64, -1074i64)
    } else {
        (((1u64 << 52) | fraction) as i64, biased - 1075)
    };

    while mantissa & 1 == 0 {
        mantissa >>= 1;
        exponent += 1;
    }
    Ok((sign * mantissa, exponent))
}

/// Recompose a number from its `(mantissa, exponent)` pair.
pub fn recompose(mantissa: i64, exponent: i64) -> f64 {
    (mantissa as f64) * (exponent as f64).exp2()
}
