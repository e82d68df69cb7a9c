use fixed::types::I32F32;

/// Q32.32 fixed-point: 32 integer bits, 32 fractional bits.
pub type Fixed64 = I32F32;

/// Currency amounts (payments, feeder shares). Whole units only.
pub type Money = i64;

/// Ticks are the atomic unit of simulation time.
pub type Ticks = u64;

/// Exact `numerator / denominator` as a Fixed64, truncated toward zero.
///
/// Returns `None` for a zero denominator or a quotient that does not fit.
/// Pure integer arithmetic, so it is safe to call inside the sim loop.
pub fn ratio_to_fixed64(numerator: u64, denominator: u64) -> Option<Fixed64> {
    if denominator == 0 {
        return None;
    }
    let bits = (u128::from(numerator) << 32) / u128::from(denominator);
    i64::try_from(bits).ok().map(Fixed64::from_bits)
}

/// Scale `amount` by `part / whole` with floor division.
///
/// Used wherever a money amount is divided along with a cargo count. The
/// remainder is left with whoever keeps the `whole - part` share.
#[inline]
pub fn proportional_share(amount: Money, part: u32, whole: u32) -> Money {
    if whole == 0 {
        return 0;
    }
    let scaled = i128::from(amount) * i128::from(part) / i128::from(whole);
    scaled as Money
}

/// Convert Fixed64 to f64. Use only for display, never in the sim loop.
#[inline]
pub fn fixed64_to_f64(v: Fixed64) -> f64 {
    v.to_num::<f64>()
}
