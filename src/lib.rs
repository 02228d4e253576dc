//! Faceplate - live data-binding runtime for industrial faceplates
//!
//! A faceplate is a small operator panel (gauges, toggles, texts, shapes)
//! whose component properties are bound to fields of an entity in a
//! field store. The runtime evaluates the bindings, keeps them current
//! through store notifications, and executes the operator's actions.

pub mod ast;
pub mod binding;
pub mod config;
pub mod error;
pub mod event;
pub mod runtime;
pub mod script;
pub mod store;
pub mod util;

pub use ast::{Action, Binding, BindingMode, Component, ComponentKind, EventHandler, Faceplate};
pub use binding::{BindingMap, ExpressionKey};
pub use config::{RuntimeConfig, ScriptLimits};
pub use error::{FaceplateError, FixSuggestion, Result};
pub use event::{Event, EventKind, EventLog};
pub use runtime::{Engine, EventPayload, FaceplateRuntime};
pub use store::{FieldStore, FieldType, FieldValue, MemoryStore};
