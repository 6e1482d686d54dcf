//! Decimal representation of sample values
//!
//! Values are stored as integer mantissas sharing one decimal exponent per
//! block: `value = mantissa * 10^scale`. Three mantissas at the edges of the
//! `i64` range are reserved for +Inf, -Inf and the staleness marker.

/// Mantissa for +Inf
pub const V_INF_POS: i64 = i64::MAX;
/// Mantissa for -Inf
pub const V_INF_NEG: i64 = i64::MIN;
/// Mantissa for the staleness marker
pub const V_STALE_NAN: i64 = i64::MAX - 1;

const V_MAX: i64 = i64::MAX - 2;
const V_MIN: i64 = i64::MIN + 1;

/// Bit pattern of the staleness marker NaN
pub const STALE_NAN_BITS: u64 = 0x7ff0000000000002;

const CONVERSION_PRECISION: f64 = 1e12;

const DECIMAL_MULTIPLIERS: [i64; 19] = [
    1,
    10,
    100,
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
    100_000_000_000,
    1_000_000_000_000,
    10_000_000_000_000,
    100_000_000_000_000,
    1_000_000_000_000_000,
    10_000_000_000_000_000,
    100_000_000_000_000_000,
    1_000_000_000_000_000_000,
];

/// Returns the staleness marker NaN
pub fn stale_nan() -> f64 {
    f64::from_bits(STALE_NAN_BITS)
}

/// Returns true if `f` is the staleness marker
pub fn is_stale_nan(f: f64) -> bool {
    f.to_bits() == STALE_NAN_BITS
}

/// Returns true if `v` is one of the reserved mantissas
#[inline]
pub fn is_special_value(v: i64) -> bool {
    !(V_MIN..=V_MAX).contains(&v)
}

/// Rescales `a` and `b` to a common exponent and returns it.
///
/// The side with the bigger exponent is multiplied up as far as its values
/// allow without overflowing; whatever cannot be absorbed that way is taken
/// off the other side by dividing it down. Special values are left untouched.
pub fn calibrate_scale<'s>(
    mut a: &'s mut [i64],
    ae: i16,
    mut b: &'s mut [i64],
    be: i16,
) -> i16 {
    if ae == be {
        return ae;
    }
    if a.is_empty() {
        return be;
    }
    if b.is_empty() {
        return ae;
    }

    let (mut ae, mut be) = (ae as i32, be as i32);
    if ae < be {
        std::mem::swap(&mut a, &mut b);
        std::mem::swap(&mut ae, &mut be);
    }

    let mut up_exp = ae - be;
    let mut down_exp = 0i32;
    for &v in a.iter() {
        let max_up = max_up_exponent(v);
        if up_exp - max_up > down_exp {
            down_exp = up_exp - max_up;
        }
    }
    up_exp -= down_exp;

    if up_exp > 0 {
        let m = decimal_multiplier(up_exp);
        for v in a.iter_mut().filter(|v| !is_special_value(**v)) {
            *v *= m;
        }
    }
    if down_exp > 0 {
        if down_exp > 18 {
            for v in b.iter_mut().filter(|v| !is_special_value(**v)) {
                *v = 0;
            }
        } else {
            let m = decimal_multiplier(down_exp);
            for v in b.iter_mut().filter(|v| !is_special_value(**v)) {
                *v /= m;
            }
        }
    }
    (be + down_exp) as i16
}

fn decimal_multiplier(exp: i32) -> i64 {
    // Only zeros and special values can be scaled past 10^18, and scaling
    // does not change them.
    DECIMAL_MULTIPLIERS.get(exp as usize).copied().unwrap_or(1)
}

/// Returns the biggest exponent `e` such that `v * 10^e` fits in an `i64`.
fn max_up_exponent(v: i64) -> i32 {
    if v == 0 || is_special_value(v) {
        return 1024;
    }
    let u = v.unsigned_abs();
    if u > i64::MAX as u64 {
        return 0;
    }
    for e in (1..DECIMAL_MULTIPLIERS.len()).rev() {
        if u <= (i64::MAX / DECIMAL_MULTIPLIERS[e]) as u64 {
            return e as i32;
        }
    }
    0
}

/// Returns `v * 10^e`
pub fn to_float(v: i64, e: i16) -> f64 {
    if is_special_value(v) {
        return match v {
            V_INF_POS => f64::INFINITY,
            V_INF_NEG => f64::NEG_INFINITY,
            _ => stale_nan(),
        };
    }
    let f = v as f64;
    // Dividing keeps more precision than multiplying by a negative power.
    if e < 0 {
        f / 10f64.powi(-(e as i32))
    } else {
        f * 10f64.powi(e as i32)
    }
}

/// Converts each mantissa in `va` with exponent `e` to a float and appends it to `dst`
pub fn append_decimal_to_float(dst: &mut Vec<f64>, va: &[i64], e: i16) {
    dst.reserve(va.len());
    dst.extend(va.iter().map(|&v| to_float(v, e)));
}

/// Converts `f` to `(v, e)` such that `f = v * 10^e`, minimizing `v`.
///
/// For instance `-1.234` becomes `(-1234, -3)`. Any NaN is stored as the
/// staleness marker.
pub fn from_float(f: f64) -> (i64, i16) {
    if f == 0.0 {
        return (0, 0);
    }
    if f.is_nan() {
        return (V_STALE_NAN, 0);
    }
    if f.is_infinite() {
        return if f > 0.0 { (V_INF_POS, 0) } else { (V_INF_NEG, 0) };
    }
    if f > 0.0 {
        let (v, e) = positive_float_to_decimal(f);
        return (v.min(V_MAX), e);
    }
    let (v, e) = positive_float_to_decimal(-f);
    ((-v).max(V_MIN), e)
}

fn positive_float_to_decimal(f: f64) -> (i64, i16) {
    let u = f as u64;
    if u as f64 != f {
        return positive_float_to_decimal_slow(f);
    }
    // Integers
    if u < 1 << 55 && u % 10 != 0 {
        return (u as i64, 0);
    }
    decimal_and_scale(u)
}

fn decimal_and_scale(mut u: u64) -> (i64, i16) {
    let mut scale = 0i16;
    // float64 holds only 53 significant bits; drop the garbage digits.
    while u >= 1 << 55 {
        u /= 10;
        scale += 1;
    }
    if u % 10 != 0 {
        return (u as i64, scale);
    }
    u /= 10;
    scale += 1;
    while u != 0 && u % 10 == 0 {
        u /= 10;
        scale += 1;
    }
    (u as i64, scale)
}

fn positive_float_to_decimal_slow(mut f: f64) -> (i64, i16) {
    let mut scale = 0i16;
    let mut prec = CONVERSION_PRECISION;
    if f > 1e6 || f < 1e-6 {
        if f > 1e6 {
            prec = 1e15;
        }
        let exp = frexp_exponent(f).clamp(-1022, 1023);
        scale = (exp as f64 * (std::f64::consts::LN_2 / std::f64::consts::LN_10)) as i16;
        f *= 10f64.powi(-(scale as i32));
    }

    // Shift decimal digits left until the fractional part is negligible.
    while f < prec {
        let x = f.trunc();
        let frac = f - x;
        if frac * prec < x {
            f = x;
            break;
        }
        if (1.0 - frac) * prec < x {
            f = x + 1.0;
            break;
        }
        f *= 100.0;
        scale -= 2;
    }
    let mut u = f as u64;
    if u % 10 != 0 {
        return (u as i64, scale);
    }
    u /= 10;
    scale += 1;
    (u as i64, scale)
}

/// Binary exponent of `f` as returned by C `frexp`: `f = m * 2^exp`, `m` in `[0.5, 1)`.
fn frexp_exponent(f: f64) -> i32 {
    let biased = ((f.to_bits() >> 52) & 0x7ff) as i32;
    if biased == 0 {
        return -1022;
    }
    biased - 1022
}

/// Converts `src` to mantissas sharing one exponent, appends them to `dst`
/// and returns the exponent.
pub fn append_float_to_decimal(dst: &mut Vec<i64>, src: &[f64]) -> i16 {
    if src.is_empty() {
        return 0;
    }
    if src.iter().all(|&f| f == 0.0) {
        dst.extend(std::iter::repeat(0).take(src.len()));
        return 0;
    }

    let mut va = Vec::with_capacity(src.len());
    let mut ea = Vec::with_capacity(src.len());
    let mut min_exp = i32::MAX;
    for &f in src {
        let (v, e) = from_float(f);
        va.push(v);
        ea.push(e as i32);
        if (e as i32) < min_exp && !is_special_value(v) {
            min_exp = e as i32;
        }
    }
    if min_exp == i32::MAX {
        // Only special values.
        dst.extend_from_slice(&va);
        return 0;
    }

    // Not every value may be upscaled to min_exp without overflow.
    let mut down_exp = 0i32;
    for (&v, &e) in va.iter().zip(ea.iter()) {
        let up_exp = e - min_exp;
        let max_up = max_up_exponent(v);
        if up_exp - max_up > down_exp {
            down_exp = up_exp - max_up;
        }
    }
    min_exp += down_exp;

    dst.reserve(va.len());
    for (&v, &e) in va.iter().zip(ea.iter()) {
        if is_special_value(v) {
            dst.push(v);
            continue;
        }
        let mut v = v;
        let mut adj = e - min_exp;
        while adj > 0 {
            v *= 10;
            adj -= 1;
        }
        while adj < 0 {
            v /= 10;
            adj += 1;
        }
        dst.push(v);
    }
    min_exp as i16
}
