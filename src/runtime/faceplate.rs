//! FaceplateRuntime - host-facing facade
//!
//! One runtime per open faceplate. It owns the engine, the notification
//! subscriptions and the action queue, and exposes the bound-value map the
//! renderer draws from.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::ast::{AnimationRule, Faceplate, RuleOperator};
use crate::binding::{classify_and_normalize, make_expression_key, ExpressionMeta};
use crate::config::RuntimeConfig;
use crate::error::Result;
use crate::event::{EventKind, EventLog};
use crate::script::{ModuleRegistry, ScriptValue};
use crate::store::FieldStore;
use crate::util::coerce_number;

use super::actions::{ActionQueue, EventPayload};
use super::diagnostics::{CompilationError, RuntimeError};
use super::engine::Engine;
use super::notify::NotificationManager;

pub struct FaceplateRuntime {
    engine: Arc<Engine>,
    events: Arc<EventLog>,
    notifications: NotificationManager,
    actions: ActionQueue,
    faceplate: RwLock<Arc<Faceplate>>,
    live: AtomicBool,
}

impl FaceplateRuntime {
    pub fn new(store: Arc<dyn FieldStore>, config: RuntimeConfig) -> Self {
        let events = Arc::new(EventLog::new());
        let live = config.live;
        let engine = Engine::new(store, config, events.clone());
        Self {
            notifications: NotificationManager::new(Arc::clone(&engine)),
            actions: ActionQueue::new(Arc::clone(&engine)),
            engine,
            events,
            faceplate: RwLock::new(Arc::new(Faceplate::default())),
            live: AtomicBool::new(live),
        }
    }

    /// Load a faceplate for an entity: compile modules, build the map,
    /// subscribe, evaluate everything
    #[instrument(skip(self, faceplate), fields(faceplate = %faceplate.id))]
    pub async fn initialize(&self, faceplate: Faceplate, entity_id: Option<&str>) -> Result<()> {
        faceplate.validate()?;
        self.engine.diagnostics().clear();
        self.engine.set_faceplate_id(Some(&faceplate.id));
        self.engine.set_entity_id(entity_id);

        let (registry, failures) =
            ModuleRegistry::compile(&faceplate.script_modules, self.engine.config().script).await;
        for failure in &failures {
            warn!(module = %failure.module, error = %failure.error, "Script module failed to compile");
            self.engine
                .diagnostics()
                .record_compilation(failure.module.clone(), failure.error.to_string());
        }
        self.engine.emit(EventKind::ModulesCompiled {
            compiled: registry.len(),
            failed: failures.len(),
        });
        self.engine.install_modules(registry);

        info!(components = faceplate.components.len(), "Faceplate loaded");
        self.engine.emit(EventKind::FaceplateLoaded {
            faceplate_id: Arc::from(faceplate.id.as_str()),
            entity_id: self.engine.entity_id(),
            component_count: faceplate.components.len(),
        });
        *self.faceplate.write() = Arc::new(faceplate);

        self.rebuild().await;
        Ok(())
    }

    /// Rebind to another entity; the map is rebuilt so stale values vanish
    pub async fn set_entity(&self, entity_id: Option<&str>) {
        self.engine.set_entity_id(entity_id);
        self.rebuild().await;
    }

    /// Toggle live subscriptions without re-evaluating
    pub async fn set_live(&self, live: bool) {
        self.live.store(live, Ordering::SeqCst);
        let channels = self.faceplate().channel_fields();
        self.notifications.refresh(live, &channels).await;
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Re-evaluate every binding against the current store contents
    pub async fn refresh(&self) {
        self.engine.evaluate_all().await;
    }

    async fn rebuild(&self) {
        let faceplate = self.faceplate();
        self.engine.rebuild(&faceplate.all_bindings());
        self.notifications
            .refresh(self.is_live(), &faceplate.channel_fields())
            .await;
        self.engine.evaluate_all().await;
    }

    // ═══════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════

    /// Queue an interaction event; runs after every earlier event
    pub fn handle_event_triggered(&self, payload: EventPayload) -> Result<()> {
        self.actions.enqueue(payload)
    }

    /// Wait for the action queue to drain
    pub async fn flush_events(&self) {
        self.actions.flush().await;
    }

    /// Stop the action worker, drop subscriptions and clear all state
    pub async fn teardown(&self) {
        self.actions.shutdown().await;
        self.notifications.teardown().await;
        self.engine.reset();
        self.engine.emit(EventKind::RuntimeTornDown);
        info!("Runtime torn down");
    }

    // ═══════════════════════════════════════════
    // READ SIDE
    // ═══════════════════════════════════════════

    pub fn binding_value_map(&self) -> BTreeMap<String, Value> {
        self.engine.binding_value_map()
    }

    pub fn binding_value(&self, component: &str, property: &str) -> Option<Value> {
        self.engine.binding_value(component, property)
    }

    pub fn expression_value_map(&self) -> BTreeMap<String, Value> {
        self.engine.expression_value_map()
    }

    pub fn last_updated(&self, component: &str) -> Option<BTreeMap<String, DateTime<Utc>>> {
        self.engine.last_updated(component)
    }

    pub fn compilation_errors(&self) -> Vec<CompilationError> {
        self.engine.diagnostics().compilation_errors()
    }

    pub fn runtime_errors(&self) -> Vec<RuntimeError> {
        self.engine.diagnostics().runtime_errors()
    }

    pub fn clear_errors(&self) {
        self.engine.diagnostics().clear();
    }

    /// CSS classes whose animation rule currently holds for `component`
    pub async fn animation_classes(&self, component: &str) -> Vec<String> {
        let faceplate = self.faceplate();
        let Some(component) = faceplate.component(component) else {
            return Vec::new();
        };
        let mut classes = Vec::new();
        for rule in &component.animation_rules {
            let value = self.rule_value(rule).await;
            if rule_matches(rule.operator, &value, &rule.value) {
                classes.push(rule.class.clone());
            }
        }
        classes
    }

    /// Tracked value when a binding shares the expression, else a fresh evaluation
    ///
    /// Untracked expressions have no subscription keeping a cached value current.
    async fn rule_value(&self, rule: &AnimationRule) -> Value {
        let (mode, normalized) = classify_and_normalize(&rule.expression, rule.mode);
        let key = make_expression_key(&normalized, mode);
        if self.engine.binding_map().contains(&key) {
            if let Some(value) = self.engine.expression_value(&key) {
                return value;
            }
        }
        let meta = ExpressionMeta::new(normalized, mode);
        self.engine.evaluate(&key, &meta, &[]).await
    }

    pub fn faceplate(&self) -> Arc<Faceplate> {
        self.faceplate.read().clone()
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }
}

fn rule_matches(operator: RuleOperator, actual: &Value, expected: &Value) -> bool {
    if operator == RuleOperator::Truthy {
        return ScriptValue::from_json(actual).truthy();
    }
    let numbers = coerce_number(actual).zip(coerce_number(expected));
    match operator {
        RuleOperator::Eq | RuleOperator::Ne => {
            let equal = match numbers {
                Some((a, b)) => a == b,
                None => loose_text(actual) == loose_text(expected),
            };
            equal == (operator == RuleOperator::Eq)
        }
        _ => {
            let Some((a, b)) = numbers else {
                return false;
            };
            match operator {
                RuleOperator::Gt => a > b,
                RuleOperator::Ge => a >= b,
                RuleOperator::Lt => a < b,
                _ => a <= b,
            }
        }
    }
}

fn loose_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rule_comparisons() {
        assert!(rule_matches(RuleOperator::Gt, &json!(90), &json!(80)));
        assert!(rule_matches(RuleOperator::Ge, &json!("80 %"), &json!(80)));
        assert!(!rule_matches(RuleOperator::Lt, &json!(null), &json!(1)));
        assert!(rule_matches(RuleOperator::Eq, &json!("alarm"), &json!("alarm")));
        assert!(rule_matches(RuleOperator::Eq, &json!("1"), &json!(1)));
        assert!(rule_matches(RuleOperator::Ne, &json!("ok"), &json!("alarm")));
        assert!(rule_matches(RuleOperator::Truthy, &json!(true), &Value::Null));
        assert!(!rule_matches(RuleOperator::Truthy, &json!(0), &Value::Null));
        assert!(!rule_matches(RuleOperator::Truthy, &json!(""), &Value::Null));
    }
}
