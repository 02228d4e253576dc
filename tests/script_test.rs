//! # Script Sandbox Tests
//!
//! Binding-style scripts run through the public compile/run API with a
//! small in-memory host standing in for the engine.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use faceplate::script::{compile_body, run_body, HostFn, NoHost, ScriptError, ScriptHost, ScriptValue};
use faceplate::ScriptLimits;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

struct FieldsHost {
    fields: HashMap<&'static str, Value>,
}

#[async_trait]
impl ScriptHost for FieldsHost {
    async fn call(&self, function: HostFn, args: Vec<ScriptValue>) -> Result<ScriptValue, ScriptError> {
        match (function, args.first()) {
            (HostFn::Get, Some(ScriptValue::Str(name))) => Ok(self
                .fields
                .get(name.as_ref())
                .map(ScriptValue::from_json)
                .unwrap_or_default()),
            _ => Err(ScriptError::Host(format!("{:?} not supported", function))),
        }
    }
}

async fn run_with_fields(source: &str, fields: &[(&'static str, Value)], limits: ScriptLimits) -> Result<Value, ScriptError> {
    let program = compile_body(source)?;
    let host = Arc::new(FieldsHost {
        fields: fields.iter().cloned().collect(),
    });
    let context = ScriptValue::object([("get", ScriptValue::host(HostFn::Get))]);
    run_body(&program, host, limits, vec![("context", context)]).await
}

#[tokio::test]
async fn binding_script_builds_display_object() {
    let source = r#"
        const t = context.get('Temperature');
        const stops = [
            { stop: 0, color: 'blue' },
            { stop: 50, color: 'green' },
            { stop: 100, color: 'red' },
        ];
        return { text: helpers.format(t, 1) + ' C', color: helpers.colorRamp(t, stops) };
    "#;
    let value = run_with_fields(source, &[("Temperature", json!(100))], ScriptLimits::default())
        .await
        .unwrap();
    assert_eq!(value, json!({ "text": "100.0 C", "color": "red" }));
}

#[tokio::test]
async fn missing_field_reads_as_null() {
    let value = run_with_fields("context.get('Nope') ?? 'n/a'", &[], ScriptLimits::default())
        .await
        .unwrap();
    assert_eq!(value, json!("n/a"));
}

#[tokio::test]
async fn recursion_respects_call_depth_limit() {
    let source = "function depth(n) { return n <= 0 ? 0 : 1 + depth(n - 1); } return depth(30);";
    let ok = run_with_fields(source, &[], ScriptLimits::default()).await;
    assert_eq!(ok, Ok(json!(30)));

    let tight = ScriptLimits {
        max_call_depth: 10,
        ..ScriptLimits::default()
    };
    let err = run_with_fields(source, &[], tight).await;
    assert!(matches!(err, Err(ScriptError::CallDepth(_))));
}

#[tokio::test]
async fn step_budget_stops_long_scripts() {
    let source = "return [1, 2, 3, 4, 5, 6, 7, 8].map(x => x * x).reduce((a, b) => a + b, 0);";
    assert_eq!(
        run_with_fields(source, &[], ScriptLimits::default()).await,
        Ok(json!(204))
    );

    let tight = ScriptLimits {
        max_steps: 10,
        ..ScriptLimits::default()
    };
    assert!(matches!(
        run_with_fields(source, &[], tight).await,
        Err(ScriptError::StepBudget(_))
    ));
}

#[tokio::test]
async fn sandbox_has_no_host_without_context() {
    let program = compile_body("context.get('Temperature')").unwrap();
    let err = run_body(&program, Arc::new(NoHost), ScriptLimits::default(), Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ScriptError::Undefined(_)));
}

#[test]
fn syntax_errors_carry_position() {
    let err = compile_body("return (1 + ;").unwrap_err();
    assert!(matches!(err, ScriptError::Syntax { .. }));
}
