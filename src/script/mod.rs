//! Script Module - sandboxed expression language for bindings
//!
//! Script bindings, transforms, module code and action scripts are written in
//! a small JavaScript-like language and interpreted from an AST. There is no
//! dynamic code execution: the only way out of the sandbox is the host
//! functions the runtime places on `context`.
//!
//! - `lexer`/`parser`: source → [`Program`] / [`Expr`]
//! - `interp`: async tree-walking [`Interpreter`] with step and depth limits
//! - `helpers`: `helpers.*` and the global library (`Math`, `JSON`, ...)
//! - `modules`: [`ModuleRegistry`] of compiled module exports

mod helpers;
mod interp;
mod lexer;
mod modules;
mod node;
mod parser;
mod value;

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use crate::config::ScriptLimits;

pub use helpers::{color_ramp, format, helpers_object, round, to_fixed, Builtin};
pub use interp::{HostFn, Interpreter, NoHost, Scope, ScriptHost};
pub use modules::{ModuleFailure, ModuleRegistry};
pub use node::{Expr, Program};
pub use parser::{parse_expression, parse_program};
pub use value::{ArrayRef, ObjectMap, ObjectRef, ScriptValue};

/// Errors raised while compiling or running a script
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ScriptError {
    #[error("syntax error at offset {position}: {message}")]
    Syntax { position: usize, message: String },

    #[error("{0} is not defined")]
    Undefined(String),

    #[error("{0} is not a function")]
    NotCallable(String),

    #[error("cannot read property '{0}' of null")]
    NullAccess(String),

    #[error("invalid assignment target: {0}")]
    InvalidAssignment(String),

    #[error("assignment to constant '{0}'")]
    ConstAssignment(String),

    #[error("maximum call depth of {0} exceeded")]
    CallDepth(usize),

    #[error("step budget of {0} exceeded")]
    StepBudget(u64),

    #[error("{0}")]
    Host(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("{0}")]
    Thrown(String),
}

static RETURN_KEYWORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\breturn\b").expect("valid regex"));

/// Turn a script binding body into a function body
///
/// A body that mentions `return` is used as is. A body ending in `;` is a
/// statement list and returns nothing. Anything else is a single expression.
pub fn normalize_body(body: &str) -> String {
    let trimmed = body.trim();
    if RETURN_KEYWORD.is_match(trimmed) {
        trimmed.to_string()
    } else if trimmed.ends_with(';') {
        format!("{}\nreturn undefined;", trimmed)
    } else {
        format!("return ({});", trimmed)
    }
}

pub fn compile_body(body: &str) -> Result<Program, ScriptError> {
    parse_program(&normalize_body(body))
}

/// A compiled transform
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// `value => ...` style: evaluated, then called with `(value, context, helpers)`
    Arrow(Expr),
    /// Statements run with `value`, `context` and `helpers` in scope
    Body(Program),
}

pub fn compile_transform(text: &str) -> Result<Transform, ScriptError> {
    let text = text.trim();
    if text.contains("=>") {
        parse_expression(text).map(Transform::Arrow)
    } else {
        parse_program(text).map(Transform::Body)
    }
}

// ═══════════════════════════════════════════
// COMPILE CACHE
// ═══════════════════════════════════════════

/// Compiled bodies and transforms keyed by exact source text
///
/// Failures are cached too, so a broken script is parsed once. Reporting is
/// the caller's concern: the cache outlives binding-map rebuilds.
#[derive(Debug, Default)]
pub struct ScriptCache {
    bodies: DashMap<String, Result<Arc<Program>, ScriptError>>,
    transforms: DashMap<String, Result<Arc<Transform>, ScriptError>>,
}

impl ScriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(&self, source: &str) -> Result<Arc<Program>, ScriptError> {
        lookup(&self.bodies, source, |s| compile_body(s).map(Arc::new))
    }

    pub fn transform(&self, source: &str) -> Result<Arc<Transform>, ScriptError> {
        lookup(&self.transforms, source, |s| compile_transform(s).map(Arc::new))
    }

    pub fn len(&self) -> usize {
        self.bodies.len() + self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.bodies.clear();
        self.transforms.clear();
    }
}

fn lookup<T>(
    cache: &DashMap<String, Result<Arc<T>, ScriptError>>,
    source: &str,
    compile: impl FnOnce(&str) -> Result<Arc<T>, ScriptError>,
) -> Result<Arc<T>, ScriptError> {
    if let Some(hit) = cache.get(source) {
        return hit.value().clone();
    }
    match cache.entry(source.to_string()) {
        Entry::Occupied(hit) => hit.get().clone(),
        Entry::Vacant(slot) => slot.insert(compile(source)).value().clone(),
    }
}

// ═══════════════════════════════════════════
// INVOCATION
// ═══════════════════════════════════════════

/// Run a compiled body with `helpers` plus the given globals in scope
///
/// The result is converted to JSON before the invocation's scopes are released.
pub async fn run_body(
    program: &Program,
    host: Arc<dyn ScriptHost>,
    limits: ScriptLimits,
    globals: Vec<(&str, ScriptValue)>,
) -> Result<Value, ScriptError> {
    let interp = Interpreter::new(host, limits);
    let scope = interp.root_scope();
    scope.declare("helpers", helpers_object(), true);
    for (name, value) in globals {
        scope.declare(name, value, true);
    }
    let result = interp.run_program(program, &scope).await.map(|v| v.to_json());
    interp.release();
    result
}

/// Apply a compiled transform to `value`
pub async fn run_transform(
    transform: &Transform,
    value: &Value,
    context: ScriptValue,
    host: Arc<dyn ScriptHost>,
    limits: ScriptLimits,
) -> Result<Value, ScriptError> {
    let interp = Interpreter::new(host, limits);
    let scope = interp.root_scope();
    let helpers = helpers_object();
    let input = ScriptValue::from_json(value);
    scope.declare("helpers", helpers.clone(), true);

    let result = match transform {
        Transform::Arrow(expr) => match interp.eval(expr, &scope).await {
            Ok(function) if function.is_callable() => interp
                .call(&function, vec![input, context, helpers])
                .await
                .map(|v| v.to_json()),
            Ok(_) => Ok(value.clone()),
            Err(e) => Err(e),
        },
        Transform::Body(program) => {
            scope.declare("value", input, false);
            scope.declare("context", context, true);
            interp.run_program(program, &scope).await.map(|v| v.to_json())
        }
    };
    interp.release();
    result
}
