//! AST Module - faceplate records parsed from YAML/JSON
//!
//! Contains the static configuration a runtime session is built from:
//! - `faceplate`: Faceplate, Component, Binding, EventHandler, ScriptModule
//!
//! These types represent the "what" - structure loaded from a saved faceplate.
//! For evaluation, see the `runtime` module.

mod faceplate;

// Re-export all public types
pub use faceplate::{
    Action, AnimationRule, Binding, BindingMode, Component, ComponentKind, EventHandler,
    Faceplate, LayoutEntry, NotificationChannel, RuleOperator, ScriptModule, ValueSource,
};
