//! Numeric literal shapes and conversions.
//!
//! The lexer uses the shape predicates to classify an idchar run as `Nat`,
//! `Int`, or `Float`; the reader uses the conversion functions to turn the
//! raw literal text into a fixed-width value, diagnosing overflow at the
//! literal's span. Underscore digit-separators are legal only between two
//! digits.

use fhex::FromHex;

// ---------------------------------------------------------------------------
// Shape predicates
// ---------------------------------------------------------------------------

/// Consume one or more digits with embedded underscores. Returns the number
/// of bytes consumed, or None if the run does not start with a digit or an
/// underscore is misplaced.
fn digit_run(s: &[u8], hex: bool) -> Option<usize> {
    let is_digit = |b: u8| {
        if hex {
            b.is_ascii_hexdigit()
        } else {
            b.is_ascii_digit()
        }
    };

    if s.is_empty() || !is_digit(s[0]) {
        return None;
    }
    let mut i = 1;
    while i < s.len() {
        if is_digit(s[i]) {
            i += 1;
        } else if s[i] == b'_' {
            // Underscore must sit between two digits
            if i + 1 >= s.len() || !is_digit(s[i + 1]) {
                return None;
            }
            i += 2;
        } else {
            break;
        }
    }
    Some(i)
}

/// `nat ::= digits | '0x' hexdigits`
pub fn is_nat(s: &str) -> bool {
    let b = s.as_bytes();
    if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        matches!(digit_run(rest.as_bytes(), true), Some(n) if n == rest.len())
    } else {
        matches!(digit_run(b, false), Some(n) if n == b.len())
    }
}

/// `int ::= ('+'|'-') nat`
pub fn is_int(s: &str) -> bool {
    match s.strip_prefix('+').or_else(|| s.strip_prefix('-')) {
        Some(rest) => is_nat(rest),
        None => false,
    }
}

/// `float ::= sign? (dec | hex | 'inf' | 'nan' | 'nan:canonical' |
///            'nan:arithmetic' | 'nan:0x' hexdigits)`
///
/// A plain digit run without `.` or an exponent is a `Nat`, not a `Float`.
pub fn is_float(s: &str) -> bool {
    let body = s
        .strip_prefix('+')
        .or_else(|| s.strip_prefix('-'))
        .unwrap_or(s);

    match body {
        "inf" | "nan" | "nan:canonical" | "nan:arithmetic" => return true,
        _ => {}
    }
    if let Some(payload) = body.strip_prefix("nan:0x") {
        let b = payload.as_bytes();
        return matches!(digit_run(b, true), Some(n) if n == b.len());
    }

    if let Some(rest) = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X")) {
        float_shape(rest.as_bytes(), true)
    } else {
        float_shape(body.as_bytes(), false)
    }
}

/// `mantissa ('.' mantissa?)? (exp sign? digits)?` with at least a dot or an
/// exponent present.
fn float_shape(b: &[u8], hex: bool) -> bool {
    let Some(mut i) = digit_run(b, hex) else {
        return false;
    };
    let mut has_dot = false;
    if i < b.len() && b[i] == b'.' {
        has_dot = true;
        i += 1;
        if let Some(n) = digit_run(&b[i..], hex) {
            i += n;
        }
    }
    let exp_char = if hex { (b'p', b'P') } else { (b'e', b'E') };
    let mut has_exp = false;
    if i < b.len() && (b[i] == exp_char.0 || b[i] == exp_char.1) {
        has_exp = true;
        i += 1;
        if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
            i += 1;
        }
        // Exponents are decimal even for hex floats
        match digit_run(&b[i..], false) {
            Some(n) => i += n,
            None => return false,
        }
    }
    i == b.len() && (has_dot || has_exp)
}

// ---------------------------------------------------------------------------
// Integer conversion
// ---------------------------------------------------------------------------

/// Split an optional sign off the front of a literal.
fn split_sign(s: &str) -> (bool, &str) {
    if let Some(rest) = s.strip_prefix('-') {
        (true, rest)
    } else if let Some(rest) = s.strip_prefix('+') {
        (false, rest)
    } else {
        (false, s)
    }
}

/// Parse the magnitude of a nat, with overflow detection.
fn magnitude(s: &str) -> Option<u64> {
    let (radix, digits) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(rest) => (16u64, rest),
        None => (10u64, s),
    };
    let mut acc: u64 = 0;
    let mut any = false;
    for c in digits.chars() {
        if c == '_' {
            continue;
        }
        let d = c.to_digit(radix as u32)? as u64;
        acc = acc.checked_mul(radix)?.checked_add(d)?;
        any = true;
    }
    any.then_some(acc)
}

/// Parse an unsigned 32-bit literal.
pub fn nat32(s: &str) -> Option<u32> {
    magnitude(s).and_then(|m| u32::try_from(m).ok())
}

/// Parse an i32 literal. The text format accepts the union of the signed and
/// unsigned ranges: `-2^31 ..= 2^32-1`, with unsigned values wrapping.
pub fn i32_lit(s: &str) -> Option<i32> {
    let (negative, body) = split_sign(s);
    let m = magnitude(body)?;
    if negative {
        if m > 1 << 31 {
            return None;
        }
        Some((m as i64).wrapping_neg() as i32)
    } else {
        u32::try_from(m).ok().map(|v| v as i32)
    }
}

/// Parse an i64 literal, accepting `-2^63 ..= 2^64-1`.
pub fn i64_lit(s: &str) -> Option<i64> {
    let (negative, body) = split_sign(s);
    let m = magnitude(body)?;
    if negative {
        if m > 1 << 63 {
            return None;
        }
        Some(m.wrapping_neg() as i64)
    } else {
        Some(m as i64)
    }
}

// ---------------------------------------------------------------------------
// Float conversion
// ---------------------------------------------------------------------------

// NaN bit layout constants per IEEE 754 binary32/binary64.
const F32_QUIET: u32 = 0x7FC0_0000;
const F32_EXP: u32 = 0x7F80_0000;
const F32_PAYLOAD_MAX: u64 = 0x7F_FFFF;
const F64_QUIET: u64 = 0x7FF8_0000_0000_0000;
const F64_EXP: u64 = 0x7FF0_0000_0000_0000;
const F64_PAYLOAD_MAX: u64 = 0xF_FFFF_FFFF_FFFF;

/// Parse an f32 literal: decimal or hex float, `inf`, `nan`, `nan:0x…`, or a
/// plain integer used in a float position. Rejects `nan:canonical` /
/// `nan:arithmetic` (result-pattern syntax) and decimal values that overflow
/// to infinity.
pub fn f32_lit(s: &str) -> Option<f32> {
    let (negative, body) = split_sign(s);
    let v = f32_body(body)?;
    Some(if negative { -v } else { v })
}

fn f32_body(body: &str) -> Option<f32> {
    match body {
        "inf" => return Some(f32::INFINITY),
        "nan" => return Some(f32::from_bits(F32_QUIET)),
        _ => {}
    }
    if let Some(payload) = body.strip_prefix("nan:0x") {
        let p = magnitude(&format!("0x{payload}"))?;
        if p == 0 || p > F32_PAYLOAD_MAX {
            return None;
        }
        return Some(f32::from_bits(F32_EXP | p as u32));
    }
    let clean: String = body.chars().filter(|&c| c != '_').collect();
    if clean.starts_with("0x") || clean.starts_with("0X") {
        if is_nat(&clean) {
            return Some(magnitude(&clean)? as f32);
        }
        return f32::from_hex(&clean);
    }
    let v: f32 = clean.parse().ok()?;
    // Decimal overflow to infinity is out of range; a literal `inf` is the
    // only way to spell infinity.
    if v.is_infinite() { None } else { Some(v) }
}

/// Parse an f64 literal; see [`f32_lit`].
pub fn f64_lit(s: &str) -> Option<f64> {
    let (negative, body) = split_sign(s);
    let v = f64_body(body)?;
    Some(if negative { -v } else { v })
}

fn f64_body(body: &str) -> Option<f64> {
    match body {
        "inf" => return Some(f64::INFINITY),
        "nan" => return Some(f64::from_bits(F64_QUIET)),
        _ => {}
    }
    if let Some(payload) = body.strip_prefix("nan:0x") {
        let p = magnitude(&format!("0x{payload}"))?;
        if p == 0 || p > F64_PAYLOAD_MAX {
            return None;
        }
        return Some(f64::from_bits(F64_EXP | p));
    }
    let clean: String = body.chars().filter(|&c| c != '_').collect();
    if clean.starts_with("0x") || clean.starts_with("0X") {
        if is_nat(&clean) {
            return Some(magnitude(&clean)? as f64);
        }
        return f64::from_hex(&clean);
    }
    let v: f64 = clean.parse().ok()?;
    if v.is_infinite() { None } else { Some(v) }
}
