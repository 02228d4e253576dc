//! Computed field expressions
//!
//! A field-mode expression containing arithmetic operators (e.g.
//! `Temperature * 1.8 + 32`) is evaluated by substituting each referenced
//! field with its numeric value and evaluating the resulting pure-arithmetic
//! string. The substituted text must match `^[\d\s+\-*/%().]+$` before it is
//! evaluated; nothing else ever reaches the evaluator.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

static OPERATOR_CHARS: &[char] = &['+', '-', '*', '/', '%', '(', ')'];

static BARE_PATH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z_][\w.]*(?:\s*->\s*[A-Za-z_][\w.]*)*$").expect("valid regex")
});

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z_][\w.]*(?:\s*->\s*[A-Za-z_][\w.]*)*").expect("valid regex")
});

static SAFE_ARITHMETIC: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\d\s+\-*/%().]+$").expect("valid regex"));

#[derive(Debug, Error, PartialEq)]
pub enum ComputeError {
    #[error("substituted expression '{0}' contains non-arithmetic characters")]
    Unsafe(String),
    #[error("invalid arithmetic at position {position}: {message}")]
    Syntax { position: usize, message: String },
}

/// True when the expression uses operators and is not a bare field path
pub fn is_computed_expression(expression: &str) -> bool {
    let trimmed = expression.trim();
    trimmed.contains(OPERATOR_CHARS) && !BARE_PATH.is_match(trimmed)
}

/// Identifier/path tokens referenced by a computed expression
///
/// Tokens immediately followed by `(` are function names and are skipped.
/// Order of first appearance is preserved, duplicates dropped.
pub fn extract_identifiers(expression: &str) -> Vec<String> {
    let mut identifiers: Vec<String> = Vec::new();
    for m in IDENTIFIER.find_iter(expression) {
        if expression[m.end()..].starts_with('(') {
            continue;
        }
        let token = m.as_str().trim().to_string();
        if !identifiers.contains(&token) {
            identifiers.push(token);
        }
    }
    identifiers
}

/// Replace every identifier with its value using word-boundary matching
///
/// Longer identifiers are substituted first so a field named `Temp` cannot
/// clobber part of `Temperature` even when boundaries coincide.
pub fn substitute(expression: &str, values: &[(String, f64)]) -> String {
    let mut ordered: Vec<&(String, f64)> = values.iter().collect();
    ordered.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut result = expression.to_string();
    for (identifier, value) in ordered {
        let pattern = format!(r"\b{}\b", regex::escape(identifier));
        let Ok(re) = Regex::new(&pattern) else {
            continue;
        };
        let replacement = format_number(*value);
        result = re
            .replace_all(&result, regex::NoExpand(&replacement))
            .into_owned();
    }
    result
}

fn format_number(value: f64) -> String {
    if value < 0.0 {
        format!("({})", value)
    } else {
        value.to_string()
    }
}

/// Validate and evaluate a substituted arithmetic string
pub fn evaluate_arithmetic(substituted: &str) -> Result<f64, ComputeError> {
    if !SAFE_ARITHMETIC.is_match(substituted) {
        return Err(ComputeError::Unsafe(substituted.to_string()));
    }
    let mut parser = Arithmetic::new(substituted);
    let value = parser.expression()?;
    parser.skip_whitespace();
    if parser.pos < parser.bytes.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(value)
}

/// Recursive-descent evaluator over `+ - * / % ( )` and decimal numbers
struct Arithmetic<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Arithmetic<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn error(&self, message: &str) -> ComputeError {
        ComputeError::Syntax {
            position: self.pos,
            message: message.to_string(),
        }
    }

    fn skip_whitespace(&mut self) {
        while self.bytes.get(self.pos).is_some_and(u8::is_ascii_whitespace) {
            self.pos += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_whitespace();
        self.bytes.get(self.pos).copied()
    }

    fn expression(&mut self) -> Result<f64, ComputeError> {
        let mut value = self.term()?;
        while let Some(op @ (b'+' | b'-')) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            value = if op == b'+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, ComputeError> {
        let mut value = self.unary()?;
        while let Some(op @ (b'*' | b'/' | b'%')) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            value = match op {
                b'*' => value * rhs,
                b'/' => value / rhs,
                _ => value % rhs,
            };
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64, ComputeError> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(b'+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Result<f64, ComputeError> {
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                let value = self.expression()?;
                if self.peek() != Some(b')') {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => {
                let start = self.pos;
                while self
                    .bytes
                    .get(self.pos)
                    .is_some_and(|c| c.is_ascii_digit() || *c == b'.')
                {
                    self.pos += 1;
                }
                let text = std::str::from_utf8(&self.bytes[start..self.pos])
                    .map_err(|_| self.error("invalid number"))?;
                text.parse::<f64>().map_err(|_| self.error("invalid number"))
            }
            Some(_) => Err(self.error("unexpected character")),
            None => Err(self.error("unexpected end of expression")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_computed_expressions() {
        assert!(is_computed_expression("Temperature * 1.8 + 32"));
        assert!(is_computed_expression("(A + B) / 2"));
        assert!(!is_computed_expression("Temperature"));
        assert!(!is_computed_expression("Parent -> Status"));
        assert!(!is_computed_expression("Parent->Status"));
    }

    #[test]
    fn extracts_identifiers_skipping_calls() {
        assert_eq!(
            extract_identifiers("Temperature * 1.8 + 32"),
            vec!["Temperature".to_string()]
        );
        assert_eq!(
            extract_identifiers("abs(Flow) + Parent->Level - Flow"),
            vec!["Flow".to_string(), "Parent->Level".to_string()]
        );
    }

    #[test]
    fn substitutes_on_word_boundaries() {
        let out = substitute(
            "Temp + Temperature",
            &[("Temp".to_string(), 1.0), ("Temperature".to_string(), 2.0)],
        );
        assert_eq!(out, "1 + 2");
    }

    #[test]
    fn negative_values_are_parenthesized() {
        let out = substitute("10 - A", &[("A".to_string(), -5.0)]);
        assert_eq!(out, "10 - (-5)");
        assert_eq!(evaluate_arithmetic(&out).unwrap(), 15.0);
    }

    #[test]
    fn fahrenheit_conversion() {
        let out = substitute("Temperature * 1.8 + 32", &[("Temperature".to_string(), 100.0)]);
        assert_eq!(evaluate_arithmetic(&out).unwrap(), 212.0);
    }

    #[test]
    fn precedence_and_parentheses() {
        assert_eq!(evaluate_arithmetic("2 + 3 * 4").unwrap(), 14.0);
        assert_eq!(evaluate_arithmetic("(2 + 3) * 4").unwrap(), 20.0);
        assert_eq!(evaluate_arithmetic("7 % 4").unwrap(), 3.0);
        assert_eq!(evaluate_arithmetic("-(1 + 1)").unwrap(), -2.0);
    }

    #[test]
    fn unsubstituted_identifier_is_rejected() {
        let err = evaluate_arithmetic("Temperature * 1.8").unwrap_err();
        assert!(matches!(err, ComputeError::Unsafe(_)));
    }

    #[test]
    fn malformed_arithmetic_is_rejected() {
        assert!(matches!(
            evaluate_arithmetic("1 +"),
            Err(ComputeError::Syntax { .. })
        ));
        assert!(matches!(
            evaluate_arithmetic("(1 + 2"),
            Err(ComputeError::Syntax { .. })
        ));
        assert!(matches!(
            evaluate_arithmetic("1.2.3"),
            Err(ComputeError::Syntax { .. })
        ));
    }
}
