//! Script values
//!
//! Objects and arrays have reference semantics (shared behind a lock), the
//! rest are immutable. `undefined` is the same value as `null`.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::util::number_value;

use super::helpers::Builtin;
use super::interp::{HostFn, Scope};
use super::node::FunctionDef;

/// Nesting limit when converting to JSON (cyclic objects end up as null)
const JSON_DEPTH_LIMIT: usize = 64;

pub type ObjectMap = BTreeMap<Arc<str>, ScriptValue>;

#[derive(Clone, Default)]
pub struct ObjectRef(Arc<RwLock<ObjectMap>>);

impl ObjectRef {
    pub fn new(map: ObjectMap) -> Self {
        Self(Arc::new(RwLock::new(map)))
    }

    pub fn get(&self, key: &str) -> Option<ScriptValue> {
        self.0.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<Arc<str>>, value: ScriptValue) {
        self.0.write().insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.read().contains_key(key)
    }

    /// Snapshot of the entries in key order
    pub fn entries(&self) -> Vec<(Arc<str>, ScriptValue)> {
        self.0
            .read()
            .iter()
            .map(|(k, v)| (Arc::clone(k), v.clone()))
            .collect()
    }

    pub fn keys(&self) -> Vec<Arc<str>> {
        self.0.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[derive(Clone, Default)]
pub struct ArrayRef(Arc<RwLock<Vec<ScriptValue>>>);

impl ArrayRef {
    pub fn new(items: Vec<ScriptValue>) -> Self {
        Self(Arc::new(RwLock::new(items)))
    }

    pub fn get(&self, index: usize) -> Option<ScriptValue> {
        self.0.read().get(index).cloned()
    }

    /// Set an element, padding with null past the end
    pub fn set(&self, index: usize, value: ScriptValue) {
        let mut items = self.0.write();
        if index >= items.len() {
            items.resize(index + 1, ScriptValue::Null);
        }
        items[index] = value;
    }

    pub fn push(&self, value: ScriptValue) -> usize {
        let mut items = self.0.write();
        items.push(value);
        items.len()
    }

    pub fn pop(&self) -> Option<ScriptValue> {
        self.0.write().pop()
    }

    pub fn to_vec(&self) -> Vec<ScriptValue> {
        self.0.read().clone()
    }

    pub fn len(&self) -> usize {
        self.0.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// User function plus the scope it closes over
pub struct Closure {
    pub def: Arc<FunctionDef>,
    pub env: Scope,
}

/// Function implemented in Rust
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Native {
    /// Routed to the invocation's `ScriptHost`
    Host(HostFn),
    Builtin(Builtin),
}

#[derive(Clone, Default)]
pub enum ScriptValue {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(Arc<str>),
    Array(ArrayRef),
    Object(ObjectRef),
    Function(Arc<Closure>),
    Native(Native),
}

impl ScriptValue {
    pub fn str(s: impl Into<Arc<str>>) -> Self {
        Self::Str(s.into())
    }

    pub fn array(items: Vec<ScriptValue>) -> Self {
        Self::Array(ArrayRef::new(items))
    }

    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<Arc<str>>,
        I: IntoIterator<Item = (K, ScriptValue)>,
    {
        Self::Object(ObjectRef::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn host(function: HostFn) -> Self {
        Self::Native(Native::Host(function))
    }

    pub fn builtin(function: Builtin) -> Self {
        Self::Native(Native::Builtin(function))
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Function(_) | Self::Native(_))
    }

    pub fn truthy(&self) -> bool {
        match self {
            Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::Str(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Function(_) | Self::Native(_) => true,
        }
    }

    /// `typeof`; null reports "undefined" since the two are one value here
    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Null => "undefined",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Array(_) | Self::Object(_) => "object",
            Self::Function(_) | Self::Native(_) => "function",
        }
    }

    /// `Number(v)`
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::Str(s) => string_to_number(s),
            Self::Array(items) => match items.len() {
                0 => 0.0,
                1 => items.get(0).map(|v| v.to_number()).unwrap_or(f64::NAN),
                _ => f64::NAN,
            },
            Self::Object(_) | Self::Function(_) | Self::Native(_) => f64::NAN,
        }
    }

    /// `String(v)`
    pub fn to_display(&self) -> String {
        match self {
            Self::Null => "null".to_string(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => number_to_string(*n),
            Self::Str(s) => s.to_string(),
            Self::Array(items) => items
                .to_vec()
                .iter()
                .map(|v| match v {
                    Self::Null => String::new(),
                    other => other.to_display(),
                })
                .collect::<Vec<_>>()
                .join(","),
            Self::Object(_) => "[object Object]".to_string(),
            Self::Function(_) | Self::Native(_) => "function".to_string(),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a.ptr_eq(b),
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Native(a), Self::Native(b)) => a == b,
            _ => false,
        }
    }

    /// `==`: numbers, strings and booleans compare numerically across types
    pub fn loose_equals(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Null, _) | (_, Self::Null) => false,
            (Self::Number(_) | Self::Str(_) | Self::Bool(_), Self::Number(_) | Self::Bool(_))
            | (Self::Number(_) | Self::Bool(_), Self::Str(_)) => {
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }

    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Self::str(s.as_str()),
            Value::Array(items) => Self::array(items.iter().map(Self::from_json).collect()),
            Value::Object(map) => Self::object(
                map.iter()
                    .map(|(k, v)| (Arc::<str>::from(k.as_str()), Self::from_json(v))),
            ),
        }
    }

    /// Functions and non-finite numbers become null
    pub fn to_json(&self) -> Value {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> Value {
        if depth > JSON_DEPTH_LIMIT {
            return Value::Null;
        }
        match self {
            Self::Null | Self::Function(_) | Self::Native(_) => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => number_value(*n),
            Self::Str(s) => Value::String(s.to_string()),
            Self::Array(items) => Value::Array(
                items
                    .to_vec()
                    .iter()
                    .map(|v| v.to_json_at(depth + 1))
                    .collect(),
            ),
            Self::Object(map) => Value::Object(
                map.entries()
                    .into_iter()
                    .filter(|(_, v)| !v.is_callable())
                    .map(|(k, v)| (k.to_string(), v.to_json_at(depth + 1)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for ScriptValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Function(closure) => match &closure.def.name {
                Some(name) => write!(f, "[function {}]", name),
                None => f.write_str("[function]"),
            },
            Self::Native(native) => write!(f, "[native {:?}]", native),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl From<Value> for ScriptValue {
    fn from(value: Value) -> Self {
        Self::from_json(&value)
    }
}

impl From<f64> for ScriptValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for ScriptValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for ScriptValue {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

/// `Number("...")`: whole-string numeric parse, blank is 0
pub fn string_to_number(s: &str) -> f64 {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    match trimmed {
        "Infinity" | "+Infinity" => f64::INFINITY,
        "-Infinity" => f64::NEG_INFINITY,
        // reject Rust-only spellings such as "inf" and "NaN"
        t if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') => f64::NAN,
        t => t.parse().unwrap_or(f64::NAN),
    }
}

/// `String(n)` for numbers
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let abs = n.abs();
    if (1e-6..1e21).contains(&abs) {
        if n.fract() == 0.0 {
            format!("{:.0}", n)
        } else {
            n.to_string()
        }
    } else {
        let formatted = format!("{:e}", n);
        match formatted.split_once('e') {
            Some((mantissa, exp)) if !exp.starts_with('-') => format!("{}e+{}", mantissa, exp),
            _ => formatted,
        }
    }
}
