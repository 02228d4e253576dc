//! Expression classification and key normalization
//!
//! Mode precedence is fixed: explicit mode, then the `script:` prefix, then
//! literal detection, then field. A field literally named `true` is therefore
//! read as the boolean unless the binding sets `mode: field`.

use std::borrow::Borrow;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::ast::{Binding, BindingMode};

use super::literal::is_literal;

/// Prefix marking an expression as a script body
pub const SCRIPT_PREFIX: &str = "script:";

/// Separator between hops of an indirect field path
pub const PATH_SEPARATOR: &str = "->";

static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static ARROW: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*->\s*").expect("valid regex"));

/// Deduplication identity of an expression: `mode::normalized-text`
///
/// Uses Arc<str> so call stacks and index entries clone in O(1).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExpressionKey(Arc<str>);

impl ExpressionKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Mode part of the key
    pub fn mode(&self) -> Option<BindingMode> {
        match self.0.split_once("::")?.0 {
            "literal" => Some(BindingMode::Literal),
            "field" => Some(BindingMode::Field),
            "script" => Some(BindingMode::Script),
            _ => None,
        }
    }

    /// Parse a raw key string, accepting only well-formed `mode::text`
    pub fn parse(raw: &str) -> Option<Self> {
        let key = Self(Arc::from(raw));
        key.mode().map(|_| key)
    }
}

impl Deref for ExpressionKey {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ExpressionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExpressionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Build the canonical key for an expression
///
/// Whitespace runs collapse to one space and the path separator loses its
/// surrounding whitespace, so `' Foo  ->  Bar '` and `'Foo -> Bar'` share a key.
pub fn make_expression_key(expression: &str, mode: BindingMode) -> ExpressionKey {
    let collapsed = WHITESPACE.replace_all(expression.trim(), " ");
    let normalized = ARROW.replace_all(&collapsed, PATH_SEPARATOR);
    ExpressionKey(Arc::from(format!("{}::{}", mode, normalized)))
}

/// Strip the `script:` prefix if present
pub fn strip_script_prefix(expression: &str) -> &str {
    let trimmed = expression.trim();
    trimmed
        .strip_prefix(SCRIPT_PREFIX)
        .map(str::trim)
        .unwrap_or(trimmed)
}

/// Resolve the mode of an expression given an optional explicit mode
pub fn classify_expression(expression: &str, explicit: Option<BindingMode>) -> BindingMode {
    if let Some(mode) = explicit {
        return mode;
    }
    let trimmed = expression.trim();
    if trimmed.starts_with(SCRIPT_PREFIX) {
        BindingMode::Script
    } else if is_literal(trimmed) {
        BindingMode::Literal
    } else {
        BindingMode::Field
    }
}

/// Resolve a binding's mode
pub fn classify(binding: &Binding) -> BindingMode {
    classify_expression(&binding.expression, binding.mode)
}

/// Classify and normalize in one step: `(mode, expression-without-prefix)`
pub fn classify_and_normalize(expression: &str, explicit: Option<BindingMode>) -> (BindingMode, String) {
    let mode = classify_expression(expression, explicit);
    (mode, strip_script_prefix(expression).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_whitespace_insensitive() {
        assert_eq!(
            make_expression_key(" Foo  ->  Bar ", BindingMode::Field),
            make_expression_key("Foo -> Bar", BindingMode::Field)
        );
        assert_eq!(
            make_expression_key("Foo->Bar", BindingMode::Field).as_str(),
            "field::Foo->Bar"
        );
    }

    #[test]
    fn key_includes_mode() {
        assert_ne!(
            make_expression_key("42", BindingMode::Literal),
            make_expression_key("42", BindingMode::Field)
        );
    }

    #[test]
    fn key_mode_roundtrip() {
        let key = make_expression_key("a + b", BindingMode::Script);
        assert_eq!(key.mode(), Some(BindingMode::Script));
        assert_eq!(ExpressionKey::parse("field::Level"), Some(make_expression_key("Level", BindingMode::Field)));
        assert_eq!(ExpressionKey::parse("Level"), None);
    }

    #[test]
    fn explicit_mode_wins() {
        assert_eq!(
            classify_expression("script: 1", Some(BindingMode::Field)),
            BindingMode::Field
        );
        assert_eq!(classify_expression("true", Some(BindingMode::Field)), BindingMode::Field);
    }

    #[test]
    fn script_prefix() {
        assert_eq!(classify_expression("  script: 1 + 1", None), BindingMode::Script);
        assert_eq!(strip_script_prefix("  script: 1 + 1"), "1 + 1");
    }

    #[test]
    fn literal_shadows_field_named_like_a_literal() {
        assert_eq!(classify_expression("true", None), BindingMode::Literal);
        assert_eq!(classify_expression("'Open'", None), BindingMode::Literal);
    }

    #[test]
    fn field_fallback() {
        assert_eq!(classify_expression("Parent->Status", None), BindingMode::Field);
    }

    #[test]
    fn classify_binding() {
        let binding = Binding::new("g", "value", "script: context.entityId");
        assert_eq!(classify(&binding), BindingMode::Script);
        let (mode, normalized) = classify_and_normalize(&binding.expression, binding.mode);
        assert_eq!(mode, BindingMode::Script);
        assert_eq!(normalized, "context.entityId");
    }
}
