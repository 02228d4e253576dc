//! Transform applier
//!
//! Post-processes a raw expression value for one binding target. A transform
//! can never take a good value away: on any failure the raw value is
//! delivered and the failure recorded.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::binding::{BindingTarget, ExpressionKey};
use crate::script::{helpers_object, run_transform, HostFn, ScriptValue};

use super::diagnostics::RuntimeErrorKind;
use super::engine::{Engine, ModuleHost};

pub(crate) async fn apply(engine: &Arc<Engine>, target: &BindingTarget, key: &ExpressionKey, value: &Value) -> Value {
    let Some(text) = target
        .transform
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
    else {
        return value.clone();
    };
    let label = format!("transform:{}:{}", target.component, target.property);

    let transform = match engine.scripts().transform(text) {
        Ok(transform) => transform,
        Err(e) => {
            if engine.first_report(&label) {
                warn!(target = %label, error = %e, "Transform failed to compile");
                engine
                    .diagnostics()
                    .record_runtime(RuntimeErrorKind::Transform, &label, e.to_string());
            }
            return value.clone();
        }
    };

    let context = transform_context(engine, target, key);
    let host = Arc::new(ModuleHost::new(engine.modules()));
    match run_transform(&transform, value, context, host, engine.config().script).await {
        Ok(transformed) => transformed,
        Err(e) => {
            warn!(target = %label, error = %e, "Transform failed");
            engine
                .diagnostics()
                .record_runtime(RuntimeErrorKind::Transform, label, e.to_string());
            value.clone()
        }
    }
}

fn transform_context(engine: &Engine, target: &BindingTarget, key: &ExpressionKey) -> ScriptValue {
    let optional = |id: Option<Arc<str>>| id.map_or(ScriptValue::Null, ScriptValue::Str);
    ScriptValue::object([
        ("component", ScriptValue::Str(Arc::clone(&target.component))),
        ("property", ScriptValue::Str(Arc::clone(&target.property))),
        ("expressionKey", ScriptValue::str(key.as_str())),
        ("entityId", optional(engine.entity_id())),
        ("faceplateId", optional(engine.faceplate_id())),
        ("helpers", helpers_object()),
        ("module", ScriptValue::host(HostFn::Module)),
        ("modules", ScriptValue::host(HostFn::Modules)),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Binding, ScriptModule};
    use crate::config::RuntimeConfig;
    use crate::event::NoopEmitter;
    use crate::script::ModuleRegistry;
    use crate::store::{FieldValue, MemoryStore};
    use serde_json::json;

    async fn run(transform: &str, modules: &[ScriptModule]) -> (Arc<Engine>, Value) {
        let store = MemoryStore::new();
        store.define_field("Level");
        store.insert_entity("tank-1", "Tank");
        store.set("tank-1", "Level", FieldValue::Float(0.42));

        let engine = Engine::new(Arc::new(store), RuntimeConfig::default(), Arc::new(NoopEmitter::new()));
        let (registry, _) = ModuleRegistry::compile(modules, RuntimeConfig::default().script).await;
        engine.install_modules(registry);
        engine.set_entity_id(Some("tank-1"));
        engine.rebuild(&[Binding::new("gauge", "value", "Level").with_transform(transform)]);
        engine.evaluate_all().await;
        let value = engine.binding_value("gauge", "value").unwrap_or_default();
        (engine, value)
    }

    #[tokio::test]
    async fn blank_transform_passes_value_through() {
        let (_, value) = run("   ", &[]).await;
        assert_eq!(value, json!(0.42));
    }

    #[tokio::test]
    async fn arrow_transform() {
        let (_, value) = run("v => helpers.round(v * 100)", &[]).await;
        assert_eq!(value, json!(42));
    }

    #[tokio::test]
    async fn body_transform_sees_context() {
        let (_, value) = run("return context.component + '.' + context.property + '=' + value;", &[]).await;
        assert_eq!(value, json!("gauge.value=0.42"));
    }

    #[tokio::test]
    async fn transform_uses_module() {
        let modules = [ScriptModule::new("fmt", "exports.pct = v => (v * 100).toFixed(0) + '%';")];
        let (_, value) = run("(v, ctx) => ctx.module('fmt').pct(v)", &modules).await;
        assert_eq!(value, json!("42%"));
    }

    #[tokio::test]
    async fn throwing_transform_keeps_raw_value() {
        let (engine, value) = run("v => { throw new Error('nope'); }", &[]).await;
        assert_eq!(value, json!(0.42));
        let errors = engine.diagnostics().runtime_errors_of("transform");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].context, "transform:gauge:value");
        assert_eq!(errors[0].message, "nope");
    }

    #[tokio::test]
    async fn uncompilable_transform_keeps_raw_value() {
        let (engine, value) = run("v => (", &[]).await;
        assert_eq!(value, json!(0.42));
        assert_eq!(engine.diagnostics().runtime_errors_of("transform").len(), 1);
    }
}
