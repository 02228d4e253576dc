//! Literal tokens embedded in binding expressions
//!
//! Recognizes quoted strings, unsigned decimal numbers, `true`, `false` and
//! `null`. Anything else is not a literal.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::util::number_value;

static NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("valid regex"));

/// Parse `text` as a literal, returning `None` when it is not one
///
/// ```
/// use faceplate::binding::try_evaluate_literal;
/// use serde_json::json;
///
/// assert_eq!(try_evaluate_literal("\"abc\""), Some(json!("abc")));
/// assert_eq!(try_evaluate_literal("42"), Some(json!(42)));
/// assert_eq!(try_evaluate_literal("Temperature"), None);
/// ```
pub fn try_evaluate_literal(text: &str) -> Option<Value> {
    let text = text.trim();

    if let Some(inner) = unquote(text) {
        return Some(Value::String(inner.to_string()));
    }

    if NUMBER.is_match(text) {
        if !text.contains('.') {
            if let Ok(n) = text.parse::<u64>() {
                return Some(Value::from(n));
            }
        }
        return text.parse::<f64>().ok().map(number_value);
    }

    match text {
        "true" => Some(Value::Bool(true)),
        "false" => Some(Value::Bool(false)),
        "null" => Some(Value::Null),
        _ => None,
    }
}

/// True when `text` parses as a literal
pub fn is_literal(text: &str) -> bool {
    try_evaluate_literal(text).is_some()
}

fn unquote(text: &str) -> Option<&str> {
    if text.len() < 2 {
        return None;
    }
    let first = text.chars().next()?;
    if (first == '"' || first == '\'') && text.ends_with(first) {
        Some(&text[1..text.len() - 1])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn double_quoted_string() {
        assert_eq!(try_evaluate_literal("\"abc\""), Some(json!("abc")));
    }

    #[test]
    fn single_quoted_string() {
        assert_eq!(try_evaluate_literal("'Running'"), Some(json!("Running")));
    }

    #[test]
    fn empty_quoted_string() {
        assert_eq!(try_evaluate_literal("''"), Some(json!("")));
    }

    #[test]
    fn mismatched_quotes_are_not_literal() {
        assert_eq!(try_evaluate_literal("'abc\""), None);
        assert_eq!(try_evaluate_literal("\""), None);
    }

    #[test]
    fn integer() {
        assert_eq!(try_evaluate_literal("42"), Some(json!(42)));
    }

    #[test]
    fn decimal() {
        assert_eq!(try_evaluate_literal(" 12.5 "), Some(json!(12.5)));
    }

    #[test]
    fn negative_and_exponent_are_not_literal() {
        assert_eq!(try_evaluate_literal("-4"), None);
        assert_eq!(try_evaluate_literal("1e3"), None);
        assert_eq!(try_evaluate_literal("1."), None);
    }

    #[test]
    fn keywords() {
        assert_eq!(try_evaluate_literal("true"), Some(json!(true)));
        assert_eq!(try_evaluate_literal("false"), Some(json!(false)));
        assert_eq!(try_evaluate_literal("null"), Some(Value::Null));
        assert_eq!(try_evaluate_literal("True"), None);
    }

    #[test]
    fn field_name_is_not_literal() {
        assert_eq!(try_evaluate_literal("Temperature"), None);
        assert!(!is_literal("Parent->Status"));
    }
}
