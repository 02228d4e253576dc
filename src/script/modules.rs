//! Script module registry
//!
//! Each module runs once with `helpers`, `module` and `exports` in scope.
//! Whatever `module.exports` holds afterwards is the module's value.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::ast::ScriptModule;
use crate::config::ScriptLimits;

use super::helpers::helpers_object;
use super::interp::{Interpreter, NoHost, Scope};
use super::parser::parse_program;
use super::value::{ObjectMap, ObjectRef, ScriptValue};
use super::ScriptError;

/// A module that failed to compile or initialize
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleFailure {
    pub module: String,
    pub error: ScriptError,
}

/// Compiled modules by name
#[derive(Default)]
pub struct ModuleRegistry {
    exports: FxHashMap<Arc<str>, ScriptValue>,
    order: Vec<Arc<str>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile every module, collecting failures without stopping
    ///
    /// Unnamed modules are called `module-{n}` (1-based position). Blank code
    /// is skipped. A later module with the same name replaces the earlier one.
    pub async fn compile(modules: &[ScriptModule], limits: ScriptLimits) -> (Self, Vec<ModuleFailure>) {
        let mut registry = Self::new();
        let mut failures = Vec::new();

        for (index, module) in modules.iter().enumerate() {
            let name = match module.name.trim() {
                "" => format!("module-{}", index + 1),
                name => name.to_string(),
            };
            if module.code.trim().is_empty() {
                debug!(module = %name, "Skipping empty script module");
                continue;
            }
            match run_module(&module.code, limits).await {
                Ok(exports) => registry.insert(&name, exports),
                Err(error) => {
                    warn!(module = %name, error = %error, "Script module failed to compile");
                    failures.push(ModuleFailure {
                        module: name,
                        error,
                    });
                }
            }
        }

        (registry, failures)
    }

    fn insert(&mut self, name: &str, exports: ScriptValue) {
        let name: Arc<str> = Arc::from(name);
        if self.exports.insert(Arc::clone(&name), exports).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<ScriptValue> {
        self.exports.get(name).cloned()
    }

    pub fn names(&self) -> &[Arc<str>] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// All module exports as one object keyed by name (`context.modules()`)
    pub fn to_object(&self) -> ScriptValue {
        let map: ObjectMap = self
            .order
            .iter()
            .filter_map(|name| Some((Arc::clone(name), self.exports.get(name)?.clone())))
            .collect();
        ScriptValue::Object(ObjectRef::new(map))
    }
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.order)
            .finish()
    }
}

/// Execute module code and return its exports
async fn run_module(code: &str, limits: ScriptLimits) -> Result<ScriptValue, ScriptError> {
    let program = parse_program(code)?;
    let interp = Interpreter::retaining(Arc::new(NoHost), limits);
    let scope: Scope = interp.root_scope();

    let exports = ScriptValue::Object(ObjectRef::new(ObjectMap::new()));
    let module = ScriptValue::object([("exports", exports.clone())]);
    scope.declare("helpers", helpers_object(), true);
    scope.declare("module", module.clone(), true);
    scope.declare("exports", exports, false);

    interp.run_program(&program, &scope).await?;

    match &module {
        ScriptValue::Object(obj) => Ok(obj.get("exports").unwrap_or_default()),
        _ => Ok(ScriptValue::Null),
    }
}
