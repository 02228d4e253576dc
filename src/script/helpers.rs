//! Built-in functions: the `helpers` object handed to scripts and transforms,
//! plus the small global library (`Math`, `JSON`, `Object`, conversions)

use std::cmp::Ordering;

use super::interp::Scope;
use super::value::{number_to_string, ScriptValue};
use super::ScriptError;
use crate::util::parse_float;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    // helpers
    Clamp,
    Lerp,
    Round,
    Format,
    ColorRamp,
    Min,
    Max,
    Abs,
    // Math
    MathRound,
    Floor,
    Ceil,
    Trunc,
    Sign,
    Sqrt,
    Pow,
    // conversions
    Number,
    String,
    Boolean,
    ParseFloat,
    ParseInt,
    IsNaN,
    IsFinite,
    // Object / Array / JSON
    ObjectKeys,
    ObjectValues,
    ObjectEntries,
    ObjectAssign,
    ArrayIsArray,
    JsonStringify,
    JsonParse,
    Error,
}

/// The `helpers` object
pub fn helpers_object() -> ScriptValue {
    ScriptValue::object([
        ("clamp", ScriptValue::builtin(Builtin::Clamp)),
        ("lerp", ScriptValue::builtin(Builtin::Lerp)),
        ("round", ScriptValue::builtin(Builtin::Round)),
        ("format", ScriptValue::builtin(Builtin::Format)),
        ("colorRamp", ScriptValue::builtin(Builtin::ColorRamp)),
        ("min", ScriptValue::builtin(Builtin::Min)),
        ("max", ScriptValue::builtin(Builtin::Max)),
        ("abs", ScriptValue::builtin(Builtin::Abs)),
    ])
}

/// Declare the global library in a fresh root scope
pub fn install_globals(scope: &Scope) {
    let math = ScriptValue::object([
        ("round", ScriptValue::builtin(Builtin::MathRound)),
        ("floor", ScriptValue::builtin(Builtin::Floor)),
        ("ceil", ScriptValue::builtin(Builtin::Ceil)),
        ("trunc", ScriptValue::builtin(Builtin::Trunc)),
        ("sign", ScriptValue::builtin(Builtin::Sign)),
        ("sqrt", ScriptValue::builtin(Builtin::Sqrt)),
        ("pow", ScriptValue::builtin(Builtin::Pow)),
        ("abs", ScriptValue::builtin(Builtin::Abs)),
        ("min", ScriptValue::builtin(Builtin::Min)),
        ("max", ScriptValue::builtin(Builtin::Max)),
        ("PI", ScriptValue::Number(std::f64::consts::PI)),
        ("E", ScriptValue::Number(std::f64::consts::E)),
    ]);
    let object = ScriptValue::object([
        ("keys", ScriptValue::builtin(Builtin::ObjectKeys)),
        ("values", ScriptValue::builtin(Builtin::ObjectValues)),
        ("entries", ScriptValue::builtin(Builtin::ObjectEntries)),
        ("assign", ScriptValue::builtin(Builtin::ObjectAssign)),
    ]);
    let json = ScriptValue::object([
        ("stringify", ScriptValue::builtin(Builtin::JsonStringify)),
        ("parse", ScriptValue::builtin(Builtin::JsonParse)),
    ]);
    let array = ScriptValue::object([("isArray", ScriptValue::builtin(Builtin::ArrayIsArray))]);

    let globals = [
        ("Math", math),
        ("Object", object),
        ("JSON", json),
        ("Array", array),
        ("Number", ScriptValue::builtin(Builtin::Number)),
        ("String", ScriptValue::builtin(Builtin::String)),
        ("Boolean", ScriptValue::builtin(Builtin::Boolean)),
        ("parseFloat", ScriptValue::builtin(Builtin::ParseFloat)),
        ("parseInt", ScriptValue::builtin(Builtin::ParseInt)),
        ("isNaN", ScriptValue::builtin(Builtin::IsNaN)),
        ("isFinite", ScriptValue::builtin(Builtin::IsFinite)),
        ("Error", ScriptValue::builtin(Builtin::Error)),
        ("NaN", ScriptValue::Number(f64::NAN)),
        ("Infinity", ScriptValue::Number(f64::INFINITY)),
    ];
    for (name, value) in globals {
        scope.declare(name, value, true);
    }
}

fn arg(args: &[ScriptValue], i: usize) -> ScriptValue {
    args.get(i).cloned().unwrap_or_default()
}

fn num(args: &[ScriptValue], i: usize) -> f64 {
    args.get(i).map(ScriptValue::to_number).unwrap_or(f64::NAN)
}

/// `Math.round`: halves round toward +infinity
fn js_round(x: f64) -> f64 {
    (x + 0.5).floor()
}

pub fn call_builtin(builtin: Builtin, args: &[ScriptValue]) -> Result<ScriptValue, ScriptError> {
    let value = match builtin {
        Builtin::Clamp => {
            let (v, lo, hi) = (num(args, 0), num(args, 1), num(args, 2));
            ScriptValue::Number(js_min(&[js_max(&[v, lo]), hi]))
        }
        Builtin::Lerp => {
            let (a, b, t) = (num(args, 0), num(args, 1), num(args, 2));
            ScriptValue::Number(a + (b - a) * t)
        }
        Builtin::Round => ScriptValue::Number(round(num(args, 0), args.get(1))),
        Builtin::Format => ScriptValue::str(format(&arg(args, 0), args.get(1))),
        Builtin::ColorRamp => color_ramp(num(args, 0), &arg(args, 1)),
        Builtin::Min => ScriptValue::Number(js_min(&numbers(args))),
        Builtin::Max => ScriptValue::Number(js_max(&numbers(args))),
        Builtin::Abs => ScriptValue::Number(num(args, 0).abs()),

        Builtin::MathRound => ScriptValue::Number(js_round(num(args, 0))),
        Builtin::Floor => ScriptValue::Number(num(args, 0).floor()),
        Builtin::Ceil => ScriptValue::Number(num(args, 0).ceil()),
        Builtin::Trunc => ScriptValue::Number(num(args, 0).trunc()),
        Builtin::Sign => {
            let n = num(args, 0);
            ScriptValue::Number(if n.is_nan() || n == 0.0 { n } else { n.signum() })
        }
        Builtin::Sqrt => ScriptValue::Number(num(args, 0).sqrt()),
        Builtin::Pow => ScriptValue::Number(num(args, 0).powf(num(args, 1))),

        Builtin::Number => ScriptValue::Number(args.first().map_or(0.0, ScriptValue::to_number)),
        Builtin::String => ScriptValue::str(args.first().map_or(String::new(), ScriptValue::to_display)),
        Builtin::Boolean => ScriptValue::Bool(arg(args, 0).truthy()),
        Builtin::ParseFloat => ScriptValue::Number(parse_float(&arg(args, 0).to_display())),
        Builtin::ParseInt => ScriptValue::Number(parse_int(&arg(args, 0).to_display(), args.get(1))),
        Builtin::IsNaN => ScriptValue::Bool(num(args, 0).is_nan()),
        Builtin::IsFinite => ScriptValue::Bool(num(args, 0).is_finite()),

        Builtin::ObjectKeys => ScriptValue::array(
            entries_of(&arg(args, 0))
                .into_iter()
                .map(|(k, _)| ScriptValue::Str(k.into()))
                .collect(),
        ),
        Builtin::ObjectValues => ScriptValue::array(
            entries_of(&arg(args, 0))
                .into_iter()
                .map(|(_, v)| v)
                .collect(),
        ),
        Builtin::ObjectEntries => ScriptValue::array(
            entries_of(&arg(args, 0))
                .into_iter()
                .map(|(k, v)| ScriptValue::array(vec![ScriptValue::Str(k.into()), v]))
                .collect(),
        ),
        Builtin::ObjectAssign => {
            let ScriptValue::Object(target) = arg(args, 0) else {
                return Err(ScriptError::Type(
                    "Object.assign target must be an object".to_string(),
                ));
            };
            for source in args.iter().skip(1) {
                for (k, v) in entries_of(source) {
                    target.set(k, v);
                }
            }
            ScriptValue::Object(target)
        }
        Builtin::ArrayIsArray => ScriptValue::Bool(matches!(arg(args, 0), ScriptValue::Array(_))),
        Builtin::JsonStringify => {
            let value = arg(args, 0).to_json();
            let text = if args.get(2).is_some_and(ScriptValue::truthy) {
                serde_json::to_string_pretty(&value)
            } else {
                serde_json::to_string(&value)
            };
            text.map(|t| ScriptValue::str(t))
                .map_err(|e| ScriptError::Thrown(e.to_string()))?
        }
        Builtin::JsonParse => {
            let text = arg(args, 0).to_display();
            let parsed: serde_json::Value = serde_json::from_str(&text)
                .map_err(|e| ScriptError::Thrown(format!("JSON.parse: {}", e)))?;
            ScriptValue::from_json(&parsed)
        }
        Builtin::Error => ScriptValue::object([
            ("name", ScriptValue::str("Error")),
            ("message", ScriptValue::str(arg(args, 0).to_display())),
        ]),
    };
    Ok(value)
}

fn numbers(args: &[ScriptValue]) -> Vec<f64> {
    args.iter().map(ScriptValue::to_number).collect()
}

/// `Math.min`: NaN wins, empty is +Infinity
fn js_min(values: &[f64]) -> f64 {
    values.iter().try_fold(f64::INFINITY, |acc, &v| {
        if v.is_nan() {
            None
        } else {
            Some(acc.min(v))
        }
    })
    .unwrap_or(f64::NAN)
}

fn js_max(values: &[f64]) -> f64 {
    values.iter().try_fold(f64::NEG_INFINITY, |acc, &v| {
        if v.is_nan() {
            None
        } else {
            Some(acc.max(v))
        }
    })
    .unwrap_or(f64::NAN)
}

/// `round(v, precision)`: precision defaults to 0
pub fn round(value: f64, precision: Option<&ScriptValue>) -> f64 {
    let digits = precision.map(ScriptValue::to_number).unwrap_or(0.0);
    let digits = if digits.is_finite() { digits.trunc() } else { 0.0 };
    let factor = 10f64.powf(digits);
    js_round(value * factor) / factor
}

/// `format(value, digits)`: numbers fixed-point (2 digits by default), else `String(value)`
pub fn format(value: &ScriptValue, digits: Option<&ScriptValue>) -> String {
    match value {
        ScriptValue::Number(n) => {
            let digits = digits
                .map(ScriptValue::to_number)
                .filter(|d| d.is_finite() && *d >= 0.0)
                .unwrap_or(2.0) as usize;
            to_fixed(*n, digits)
        }
        other => other.to_display(),
    }
}

/// `Number.prototype.toFixed`
pub fn to_fixed(n: f64, digits: usize) -> String {
    if !n.is_finite() || n.abs() >= 1e21 {
        return number_to_string(n);
    }
    let digits = digits.min(100);
    let text = format!("{:.*}", digits, n);
    // -0.00 prints as 0.00
    if text.starts_with('-') && text[1..].chars().all(|c| c == '0' || c == '.') {
        text[1..].to_string()
    } else {
        text
    }
}

fn parse_int(text: &str, radix: Option<&ScriptValue>) -> f64 {
    let radix = radix.map(ScriptValue::to_number).unwrap_or(10.0);
    if radix == 10.0 || radix == 0.0 || radix.is_nan() {
        return parse_float(text).trunc();
    }
    let radix = radix as u32;
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }
    let trimmed = text.trim();
    let (negative, digits) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let digits = if radix == 16 {
        digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits)
    } else {
        digits
    };
    let valid: String = digits.chars().take_while(|c| c.is_digit(radix)).collect();
    if valid.is_empty() {
        return f64::NAN;
    }
    let value = valid
        .chars()
        .filter_map(|c| c.to_digit(radix))
        .fold(0f64, |acc, d| acc * f64::from(radix) + f64::from(d));
    if negative {
        -value
    } else {
        value
    }
}

fn entries_of(value: &ScriptValue) -> Vec<(String, ScriptValue)> {
    match value {
        ScriptValue::Object(map) => map
            .entries()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
        ScriptValue::Array(items) => items
            .to_vec()
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        _ => Vec::new(),
    }
}

/// `colorRamp(value, stops)`
///
/// Stops are `{stop, color}` objects, sorted by `stop` first. Below the first
/// stop or above the last the end colors apply; between two stops the nearer
/// one by interpolation ratio wins (`ratio < 0.5` picks the lower stop).
pub fn color_ramp(value: f64, stops: &ScriptValue) -> ScriptValue {
    let ScriptValue::Array(items) = stops else {
        return ScriptValue::Null;
    };
    let mut stops: Vec<(f64, ScriptValue)> = items
        .to_vec()
        .iter()
        .filter_map(|item| match item {
            ScriptValue::Object(map) => {
                let stop = map.get("stop")?.to_number();
                (!stop.is_nan()).then(|| (stop, map.get("color").unwrap_or_default()))
            }
            _ => None,
        })
        .collect();
    stops.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let (Some(first), Some(last)) = (stops.first(), stops.last()) else {
        return ScriptValue::Null;
    };
    if value.is_nan() || value <= first.0 {
        return first.1.clone();
    }
    if value >= last.0 {
        return last.1.clone();
    }
    for pair in stops.windows(2) {
        let (lo, hi) = (&pair[0], &pair[1]);
        if value >= lo.0 && value <= hi.0 {
            let span = hi.0 - lo.0;
            let ratio = if span > 0.0 { (value - lo.0) / span } else { 0.0 };
            return if ratio < 0.5 { lo.1.clone() } else { hi.1.clone() };
        }
    }
    last.1.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stops() -> ScriptValue {
        ScriptValue::array(vec![
            ScriptValue::object([
                ("stop", ScriptValue::Number(10.0)),
                ("color", ScriptValue::str("blue")),
            ]),
            ScriptValue::object([
                ("stop", ScriptValue::Number(0.0)),
                ("color", ScriptValue::str("red")),
            ]),
        ])
    }

    fn color(value: f64) -> String {
        color_ramp(value, &stops()).to_display()
    }

    #[test]
    fn color_ramp_boundaries() {
        assert_eq!(color(0.0), "red");
        assert_eq!(color(20.0), "blue");
        assert_eq!(color(4.0), "red");
        assert_eq!(color(6.0), "blue");
        assert_eq!(color(-5.0), "red");
        assert_eq!(color(5.0), "blue");
    }

    #[test]
    fn color_ramp_without_stops() {
        assert!(color_ramp(1.0, &ScriptValue::array(vec![])).is_nullish());
        assert!(color_ramp(1.0, &ScriptValue::Null).is_nullish());
    }

    #[test]
    fn clamp_and_lerp() {
        let clamp = |v: f64| {
            call_builtin(Builtin::Clamp, &[v.into(), 0.0.into(), 10.0.into()])
                .unwrap()
                .to_number()
        };
        assert_eq!(clamp(-1.0), 0.0);
        assert_eq!(clamp(5.0), 5.0);
        assert_eq!(clamp(11.0), 10.0);
        let lerp = call_builtin(Builtin::Lerp, &[0.0.into(), 10.0.into(), 0.25.into()]).unwrap();
        assert_eq!(lerp.to_number(), 2.5);
    }

    #[test]
    fn round_half_up() {
        assert_eq!(round(2.5, None), 3.0);
        assert_eq!(round(-2.5, None), -2.0);
        assert_eq!(round(3.14159, Some(&ScriptValue::Number(2.0))), 3.14);
    }

    #[test]
    fn format_numbers_and_others() {
        assert_eq!(format(&ScriptValue::Number(3.14159), None), "3.14");
        assert_eq!(format(&ScriptValue::Number(2.0), Some(&ScriptValue::Number(0.0))), "2");
        assert_eq!(
            format(&ScriptValue::str("2024-05-01T12:00:00Z"), None),
            "2024-05-01T12:00:00Z"
        );
        assert_eq!(format(&ScriptValue::Bool(true), None), "true");
    }

    #[test]
    fn min_max_follow_math_semantics() {
        assert_eq!(js_min(&[]), f64::INFINITY);
        assert_eq!(js_max(&[1.0, 3.0, 2.0]), 3.0);
        assert!(js_min(&[1.0, f64::NAN]).is_nan());
    }

    #[test]
    fn parse_int_radix() {
        assert_eq!(parse_int("42.9px", None), 42.0);
        assert_eq!(parse_int("ff", Some(&ScriptValue::Number(16.0))), 255.0);
        assert_eq!(parse_int("-0x1A", Some(&ScriptValue::Number(16.0))), -26.0);
        assert!(parse_int("zz", Some(&ScriptValue::Number(10.0))).is_nan());
    }

    #[test]
    fn json_builtins() {
        let parsed = call_builtin(Builtin::JsonParse, &[ScriptValue::str(r#"{"a":[1,2]}"#)]).unwrap();
        let text = call_builtin(Builtin::JsonStringify, &[parsed]).unwrap();
        assert_eq!(text.to_display(), r#"{"a":[1,2]}"#);
        assert!(call_builtin(Builtin::JsonParse, &[ScriptValue::str("{")]).is_err());
    }

    #[test]
    fn to_fixed_negative_zero() {
        assert_eq!(to_fixed(-0.001, 2), "0.00");
        assert_eq!(to_fixed(1.5, 0), "2");
    }
}
