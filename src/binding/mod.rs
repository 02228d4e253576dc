//! Binding Module - expression bindings between store fields and components
//!
//! - `literal`: literal token recognition (`"abc"`, `42`, `true`, `null`)
//! - `classify`: mode inference and expression keys
//! - `computed`: operator expressions over fields (`Temperature * 1.8 + 32`)
//! - `map`: target/metadata/dependency indices rebuilt per faceplate load
//!
//! Data flow:
//! ```text
//! Binding { component, property, expression, mode? }
//!            │
//!            ▼
//!   classify → (mode, normalized)  ──►  ExpressionKey "mode::text"
//!            │
//!            ▼
//!   BindingMap { targets, metadata, dependents }
//! ```

mod classify;
pub mod computed;
mod literal;
mod map;

pub use classify::{
    classify, classify_and_normalize, classify_expression, make_expression_key,
    strip_script_prefix, ExpressionKey, PATH_SEPARATOR, SCRIPT_PREFIX,
};
pub use literal::{is_literal, try_evaluate_literal};
pub use map::{compute_dependencies, slot_key, BindingMap, BindingTarget, ExpressionMeta};

pub use crate::ast::{Binding, BindingMode};
