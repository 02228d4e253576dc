//! Utilities Module - shared numeric coercion
//!
//! Conversions between `f64` and JSON values used by computed expressions,
//! helpers and the script interpreter.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static FLOAT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[+-]?(Infinity|\d+\.?\d*(?:[eE][+-]?\d+)?|\.\d+(?:[eE][+-]?\d+)?)")
        .expect("valid regex")
});

/// Convert an `f64` to JSON: integral values become integers, non-finite become null
pub fn number_value(n: f64) -> Value {
    if !n.is_finite() {
        return Value::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        return Value::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Parse the longest numeric prefix of `s` (leading whitespace ignored)
///
/// Returns NaN when no prefix parses, mirroring how dashboard expressions
/// have always treated strings such as `"12.5 degC"`.
pub fn parse_float(s: &str) -> f64 {
    let s = s.trim_start();
    let Some(m) = FLOAT_PREFIX.find(s) else {
        return f64::NAN;
    };
    let text = m.as_str();
    match text.trim_start_matches(['+', '-']) {
        "Infinity" if text.starts_with('-') => f64::NEG_INFINITY,
        "Infinity" => f64::INFINITY,
        _ => text.parse().unwrap_or(f64::NAN),
    }
}

/// Numeric coercion for computed expressions
///
/// Numbers pass through, strings parse their numeric prefix, booleans become
/// 0/1. Anything else, or NaN, is `None`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => parse_float(s),
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Null | Value::Array(_) | Value::Object(_) => return None,
    };
    (!n.is_nan()).then_some(n)
}
