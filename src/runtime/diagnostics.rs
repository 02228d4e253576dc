//! Compilation and runtime error lists
//!
//! Binding evaluation never fails outward: problems land here and the
//! affected expression resolves to null.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

/// A script module or script body that failed to compile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompilationError {
    /// Module name, or `script:<expression key>` for binding bodies
    pub module: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeErrorKind {
    Evaluation,
    Transform,
    CircularDependency { chain: Vec<String> },
    DepthExceeded { chain: Vec<String> },
    Action,
}

impl RuntimeErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Evaluation => "evaluation",
            Self::Transform => "transform",
            Self::CircularDependency { .. } => "circular_dependency",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::Action => "action",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeError {
    pub kind: RuntimeErrorKind,
    /// Expression key, `transform:<component>:<property>` or handler id
    pub context: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct Diagnostics {
    compilation: RwLock<Vec<CompilationError>>,
    runtime: RwLock<Vec<RuntimeError>>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_compilation(&self, module: impl Into<String>, message: impl Into<String>) {
        self.compilation.write().push(CompilationError {
            module: module.into(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Record unless `module` already has a compilation error; true if recorded
    pub fn record_compilation_once(&self, module: impl Into<String>, message: impl Into<String>) -> bool {
        let module = module.into();
        let mut compilation = self.compilation.write();
        if compilation.iter().any(|e| e.module == module) {
            return false;
        }
        compilation.push(CompilationError {
            module,
            message: message.into(),
            timestamp: Utc::now(),
        });
        true
    }

    pub fn record_runtime(
        &self,
        kind: RuntimeErrorKind,
        context: impl Into<String>,
        message: impl Into<String>,
    ) {
        self.runtime.write().push(RuntimeError {
            kind,
            context: context.into(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    pub fn compilation_errors(&self) -> Vec<CompilationError> {
        self.compilation.read().clone()
    }

    pub fn runtime_errors(&self) -> Vec<RuntimeError> {
        self.runtime.read().clone()
    }

    /// Runtime errors of one kind (compared by label, ignoring chains)
    pub fn runtime_errors_of(&self, label: &str) -> Vec<RuntimeError> {
        self.runtime
            .read()
            .iter()
            .filter(|e| e.kind.label() == label)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.compilation.write().clear();
        self.runtime.write().clear();
    }

    pub fn is_empty(&self) -> bool {
        self.compilation.read().is_empty() && self.runtime.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_and_clears() {
        let diagnostics = Diagnostics::new();
        diagnostics.record_compilation("units", "syntax error");
        diagnostics.record_runtime(
            RuntimeErrorKind::CircularDependency {
                chain: vec!["script::a".into(), "script::b".into()],
            },
            "script::a",
            "circular dependency",
        );
        diagnostics.record_runtime(RuntimeErrorKind::Action, "h1", "boom");

        assert_eq!(diagnostics.compilation_errors()[0].module, "units");
        assert_eq!(diagnostics.runtime_errors().len(), 2);
        assert_eq!(diagnostics.runtime_errors_of("circular_dependency").len(), 1);

        diagnostics.clear();
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn compilation_once_until_cleared() {
        let diagnostics = Diagnostics::new();
        assert!(diagnostics.record_compilation_once("script:k", "bad"));
        assert!(!diagnostics.record_compilation_once("script:k", "bad"));
        assert_eq!(diagnostics.compilation_errors().len(), 1);

        diagnostics.clear();
        assert!(diagnostics.record_compilation_once("script:k", "bad"));
    }

    #[test]
    fn kind_serializes_with_tag() {
        let kind = RuntimeErrorKind::DepthExceeded {
            chain: vec!["k".into()],
        };
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "depth_exceeded");
        assert_eq!(json["chain"][0], "k");
    }
}
