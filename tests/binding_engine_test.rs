//! # Binding Engine Tests
//!
//! End-to-end properties of the evaluation engine:
//! - dedup of concurrent evaluations
//! - circular dependency and depth ceiling
//! - literal detection and key normalization
//! - fan-out, computed expressions, transform safety
//! - rebuild semantics and module isolation

use std::sync::Arc;
use std::time::Duration;

use faceplate::ast::{Binding, ScriptModule};
use faceplate::binding::{make_expression_key, try_evaluate_literal, BindingMode};
use faceplate::event::NoopEmitter;
use faceplate::runtime::Engine;
use faceplate::script::ModuleRegistry;
use faceplate::store::{FieldStore, FieldValue, MemoryStore};
use faceplate::RuntimeConfig;
use futures::future::join_all;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use serde_json::{json, Value};

// ============================================================================
// TEST HELPERS
// ============================================================================

fn tank_store() -> Arc<MemoryStore> {
    let store = MemoryStore::new();
    store.define_field("Temperature");
    store.define_field("Name");
    store.insert_entity("tank-1", "Tank");
    store.set("tank-1", "Temperature", FieldValue::Float(100.0));
    store.set("tank-1", "Name", FieldValue::String("North".into()));
    Arc::new(store)
}

fn engine(store: &Arc<MemoryStore>, bindings: &[Binding]) -> Arc<Engine> {
    let engine = Engine::new(store.clone(), RuntimeConfig::default(), Arc::new(NoopEmitter::new()));
    engine.set_entity_id(Some("tank-1"));
    engine.rebuild(bindings);
    engine
}

fn chain(length: usize) -> Vec<Binding> {
    (1..=length)
        .map(|i| {
            let expression = if i == length {
                "script: return 'done';".to_string()
            } else {
                format!("script: return context.evalBinding('s{}', 'value');", i + 1)
            };
            Binding::new(format!("s{}", i), "value", expression)
        })
        .collect()
}

// ============================================================================
// DEDUP
// ============================================================================

#[tokio::test]
async fn concurrent_evaluations_share_one_read() {
    let store = tank_store();
    store.set_read_delay(Some(Duration::from_millis(30)));
    let engine = engine(&store, &[]);

    let results = join_all((0..8).map(|_| engine.evaluate_text("Temperature", &[]))).await;

    assert_eq!(store.read_count(), 1);
    assert!(results.iter().all(|v| *v == json!(100)));
    assert_eq!(engine.in_flight_count(), 0);

    // a later request is a fresh evaluation
    engine.evaluate_text("Temperature", &[]).await;
    assert_eq!(store.read_count(), 2);
}

#[tokio::test]
async fn concurrent_script_evaluations_run_once() {
    let store = tank_store();
    store.set_read_delay(Some(Duration::from_millis(30)));
    let engine = engine(&store, &[]);
    let script = "script: const n = (context.getState('runs') ?? 0) + 1; context.setState('runs', n); return context.get('Temperature') + n;";

    let results = join_all((0..4).map(|_| engine.evaluate_text(script, &[]))).await;
    assert!(results.iter().all(|v| *v == json!(101)));
    assert_eq!(store.read_count(), 1);
}

// ============================================================================
// CIRCULARITY & DEPTH
// ============================================================================

#[tokio::test]
async fn circular_bindings_resolve_to_null_with_one_error() {
    let store = tank_store();
    let engine = engine(
        &store,
        &[
            Binding::new("a", "value", "script: return context.evalBinding('b', 'value');"),
            Binding::new("b", "value", "script: return context.evalBinding('a', 'value');"),
        ],
    );
    let map = engine.binding_map();
    let a = map.key_for_target("a", "value").unwrap().clone();
    let b = map.key_for_target("b", "value").unwrap().clone();

    let value = engine.refresh_key(&a).await;
    assert_eq!(value, Value::Null);

    let errors = engine.diagnostics().runtime_errors_of("circular_dependency");
    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors[0].kind,
        faceplate::runtime::RuntimeErrorKind::CircularDependency {
            chain: vec![a.to_string(), b.to_string(), a.to_string()],
        }
    );
    assert_eq!(engine.binding_value("a", "value"), Some(Value::Null));
}

#[tokio::test]
async fn circular_chain_is_reported_once_by_evaluate_all() {
    let store = tank_store();
    let engine = engine(
        &store,
        &[
            Binding::new("a", "value", "script: return context.evalBinding('b', 'value');"),
            Binding::new("b", "value", "script: return context.evalBinding('c', 'value');"),
            Binding::new("c", "value", "script: return context.evalBinding('a', 'value');"),
        ],
    );

    engine.evaluate_all().await;
    assert_eq!(engine.diagnostics().runtime_errors_of("circular_dependency").len(), 1);
    for component in ["a", "b", "c"] {
        assert_eq!(engine.binding_value(component, "value"), Some(Value::Null));
    }

    // same generation: still one
    engine.evaluate_all().await;
    assert_eq!(engine.diagnostics().runtime_errors_of("circular_dependency").len(), 1);
}

#[tokio::test]
async fn chain_of_fifty_succeeds() {
    let store = tank_store();
    let engine = engine(&store, &chain(50));
    let first = engine.binding_map().key_for_target("s1", "value").unwrap().clone();
    assert_eq!(engine.refresh_key(&first).await, json!("done"));
    assert!(engine.diagnostics().runtime_errors().is_empty());
}

#[tokio::test]
async fn chain_of_fifty_one_hits_depth_ceiling() {
    let store = tank_store();
    let engine = engine(&store, &chain(51));
    let first = engine.binding_map().key_for_target("s1", "value").unwrap().clone();
    assert_eq!(engine.refresh_key(&first).await, Value::Null);

    let errors = engine.diagnostics().runtime_errors_of("depth_exceeded");
    assert_eq!(errors.len(), 1);
    let last = engine.binding_map().key_for_target("s51", "value").unwrap().clone();
    assert_eq!(errors[0].context, last.to_string());
    assert_eq!(engine.expression_value(&last), Some(Value::Null));
}

// ============================================================================
// LITERALS & KEYS
// ============================================================================

#[test]
fn literal_detection() {
    assert_eq!(try_evaluate_literal("\"abc\""), Some(json!("abc")));
    assert_eq!(try_evaluate_literal("42"), Some(json!(42)));
    assert_eq!(try_evaluate_literal("true"), Some(json!(true)));
    assert_eq!(try_evaluate_literal("Temperature"), None);
}

#[test]
fn key_normalization_example() {
    assert_eq!(
        make_expression_key(" Foo  ->  Bar ", BindingMode::Field),
        make_expression_key("Foo -> Bar", BindingMode::Field)
    );
}

proptest! {
    #[test]
    fn key_ignores_whitespace_runs(
        words in proptest::collection::vec("[A-Za-z][A-Za-z0-9_]{0,8}", 1..4),
        pads in proptest::collection::vec(" {1,4}", 5),
    ) {
        let canonical = words.join(" -> ");
        let padded = format!(
            "{}{}{}",
            pads[0],
            words.join(&format!("{}->{}", pads[1], pads[2])),
            pads[3]
        );
        prop_assert_eq!(
            make_expression_key(&padded, BindingMode::Field),
            make_expression_key(&canonical, BindingMode::Field)
        );
    }
}

// ============================================================================
// FAN-OUT & COMPUTED
// ============================================================================

#[tokio::test]
async fn fan_out_updates_every_target() {
    let store = tank_store();
    let engine = engine(
        &store,
        &[
            Binding::new("gauge", "value", "Temperature"),
            Binding::new("label", "text", " Temperature "),
        ],
    );
    assert_eq!(engine.binding_map().len(), 1);

    engine.evaluate_all().await;
    assert_eq!(engine.binding_value("gauge", "value"), Some(json!(100)));
    assert_eq!(engine.binding_value("label", "text"), Some(json!(100)));

    let temperature = store.field_type("Temperature").await.unwrap();
    store
        .write("tank-1", &temperature, FieldValue::Float(55.5))
        .await
        .unwrap();
    engine.evaluate_all().await;
    assert_eq!(engine.binding_value("gauge", "value"), Some(json!(55.5)));
    assert_eq!(engine.binding_value("label", "text"), Some(json!(55.5)));
}

#[tokio::test]
async fn computed_expression() {
    let store = tank_store();
    let engine = engine(
        &store,
        &[
            Binding::new("f", "value", "Temperature * 1.8 + 32"),
            Binding::new("g", "value", "Missing * 1.8 + 32"),
        ],
    );
    engine.evaluate_all().await;
    assert_eq!(engine.binding_value("f", "value"), Some(json!(212)));
    assert_eq!(engine.binding_value("g", "value"), Some(Value::Null));
}

// ============================================================================
// TRANSFORMS, REBUILD, MODULES
// ============================================================================

#[tokio::test]
async fn failing_transform_keeps_raw_value() {
    let store = tank_store();
    let engine = engine(
        &store,
        &[
            Binding::new("a", "value", "Temperature").with_transform("v => { throw new Error('boom'); }"),
            Binding::new("b", "value", "Temperature").with_transform("v => v / 10"),
        ],
    );
    engine.evaluate_all().await;
    assert_eq!(engine.binding_value("a", "value"), Some(json!(100)));
    assert_eq!(engine.binding_value("b", "value"), Some(json!(10)));
    assert_eq!(engine.diagnostics().runtime_errors_of("transform").len(), 1);
}

#[tokio::test]
async fn rebuild_clears_previous_state() {
    let store = tank_store();
    let engine = engine(&store, &[Binding::new("gauge", "value", "Temperature")]);
    engine.evaluate_all().await;
    let before = engine.generation();

    engine.rebuild(&[Binding::new("label", "text", "Name")]);
    assert!(engine.generation() > before);
    assert_eq!(engine.binding_value("gauge", "value"), None);
    assert_eq!(engine.binding_value("label", "text"), Some(Value::Null));
    assert!(engine.expression_value_map().is_empty());

    engine.evaluate_all().await;
    assert_eq!(engine.binding_value("label", "text"), Some(json!("North")));
}

#[tokio::test]
async fn evaluation_in_flight_during_rebuild_is_discarded() {
    let store = tank_store();
    store.set_read_delay(Some(Duration::from_millis(50)));
    let bindings = [Binding::new("gauge", "value", "Temperature")];
    let engine = engine(&store, &bindings);

    tokio::join!(engine.evaluate_all(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        engine.rebuild(&bindings);
    });

    assert_eq!(store.read_count(), 1);
    assert_eq!(engine.binding_value("gauge", "value"), Some(Value::Null));
    assert!(engine.expression_value_map().is_empty());
}

#[tokio::test]
async fn broken_module_does_not_block_siblings() {
    let modules = [
        ScriptModule::new("broken", "exports.f = (;"),
        ScriptModule::new("units", "exports.toF = c => c * 1.8 + 32;"),
    ];
    let (registry, failures) = ModuleRegistry::compile(&modules, RuntimeConfig::default().script).await;
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].module, "broken");
    let names: Vec<&str> = registry.names().iter().map(|n| n.as_ref()).collect();
    assert_eq!(names, ["units"]);

    let store = tank_store();
    let engine = engine(
        &store,
        &[Binding::new(
            "f",
            "value",
            "script: return context.module('units').toF(context.get('Temperature'));",
        )],
    );
    engine.install_modules(registry);
    engine.evaluate_all().await;
    assert_eq!(engine.binding_value("f", "value"), Some(json!(212)));
}
