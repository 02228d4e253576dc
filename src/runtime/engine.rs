//! Evaluation engine
//!
//! Owns every piece of per-session state: the binding map, value maps,
//! script-state buckets, the in-flight evaluation table and the generation
//! counter. Locks are short and never held across `.await`.
//!
//! ```text
//! evaluate(key, meta, stack)
//!   │ no entity ─────────────► null
//!   │ key ∈ stack ───────────► null + CircularDependency
//!   │ |stack| ≥ max depth ───► null + DepthExceeded
//!   │ in flight? ────────────► share the running evaluation
//!   ▼
//! dispatch: literal │ field (simple / computed) │ script
//!   ▼
//! expression value map ──► fan_out ──► transform ──► bound value map
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

use crate::ast::{Binding, BindingMode};
use crate::binding::computed::{evaluate_arithmetic, extract_identifiers, is_computed_expression, substitute};
use crate::binding::{
    classify_and_normalize, make_expression_key, try_evaluate_literal, BindingMap, ExpressionKey,
    ExpressionMeta,
};
use crate::config::RuntimeConfig;
use crate::event::{EventEmitter, EventKind};
use crate::script::{run_body, HostFn, ModuleRegistry, ScriptCache, ScriptError, ScriptHost, ScriptValue};
use crate::store::FieldStore;
use crate::util::{coerce_number, number_value};

use super::diagnostics::{Diagnostics, RuntimeErrorKind};
use super::resolver::PathResolver;
use super::transform;

#[derive(Debug, Clone, Default)]
struct Session {
    faceplate_id: Option<Arc<str>>,
    entity_id: Option<Arc<str>>,
}

type InFlight = DashMap<ExpressionKey, Arc<OnceCell<Value>>>;

/// Removes the leader's in-flight entry on every exit path
struct InFlightGuard<'a> {
    table: &'a InFlight,
    key: &'a ExpressionKey,
    cell: Arc<OnceCell<Value>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.table
            .remove_if(self.key, |_, cell| Arc::ptr_eq(cell, &self.cell));
    }
}

pub struct Engine {
    store: Arc<dyn FieldStore>,
    config: RuntimeConfig,
    emitter: Arc<dyn EventEmitter>,
    resolver: PathResolver,
    scripts: ScriptCache,
    diagnostics: Diagnostics,
    session: RwLock<Session>,
    map: RwLock<Arc<BindingMap>>,
    modules: RwLock<Arc<ModuleRegistry>>,
    /// Bumped on every rebuild; writes tagged with an older value are dropped
    generation: AtomicU64,
    expression_values: DashMap<ExpressionKey, Value>,
    bound_values: DashMap<String, Value>,
    last_updated: DashMap<Arc<str>, FxHashMap<Arc<str>, DateTime<Utc>>>,
    /// `getState`/`setState` buckets by expression key (or `action:<id>`)
    state: DashMap<String, FxHashMap<String, Value>>,
    in_flight: InFlight,
    /// Transform compile failures and cycles already recorded this generation
    reported: DashSet<String>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn FieldStore>,
        config: RuntimeConfig,
        emitter: Arc<dyn EventEmitter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            resolver: PathResolver::new(Arc::clone(&store)),
            store,
            config,
            emitter,
            scripts: ScriptCache::new(),
            diagnostics: Diagnostics::new(),
            session: RwLock::new(Session::default()),
            map: RwLock::new(Arc::new(BindingMap::new())),
            modules: RwLock::new(Arc::new(ModuleRegistry::new())),
            generation: AtomicU64::new(0),
            expression_values: DashMap::new(),
            bound_values: DashMap::new(),
            last_updated: DashMap::new(),
            state: DashMap::new(),
            in_flight: DashMap::new(),
            reported: DashSet::new(),
        })
    }

    // ═══════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════

    pub fn store(&self) -> &Arc<dyn FieldStore> {
        &self.store
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn scripts(&self) -> &ScriptCache {
        &self.scripts
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// True the first time `label` is reported in the current generation
    pub(crate) fn first_report(&self, label: &str) -> bool {
        self.reported.insert(label.to_string())
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        self.emitter.emit(kind);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn binding_map(&self) -> Arc<BindingMap> {
        Arc::clone(&self.map.read())
    }

    pub fn modules(&self) -> Arc<ModuleRegistry> {
        Arc::clone(&self.modules.read())
    }

    pub fn install_modules(&self, registry: ModuleRegistry) {
        *self.modules.write() = Arc::new(registry);
    }

    pub fn entity_id(&self) -> Option<Arc<str>> {
        self.session.read().entity_id.clone()
    }

    pub fn faceplate_id(&self) -> Option<Arc<str>> {
        self.session.read().faceplate_id.clone()
    }

    pub fn set_entity_id(&self, entity_id: Option<&str>) {
        self.session.write().entity_id = entity_id.filter(|id| !id.trim().is_empty()).map(Arc::from);
    }

    pub fn set_faceplate_id(&self, faceplate_id: Option<&str>) {
        self.session.write().faceplate_id = faceplate_id.map(Arc::from);
    }

    // ═══════════════════════════════════════════
    // REBUILD
    // ═══════════════════════════════════════════

    /// Replace the binding map and clear all per-map state
    ///
    /// Synchronous: nothing can observe a half-built map. Returns the new
    /// generation.
    pub fn rebuild(&self, bindings: &[Binding]) -> u64 {
        let map = BindingMap::build(bindings);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.expression_values.clear();
        self.bound_values.clear();
        self.last_updated.clear();
        self.state.clear();
        self.in_flight.clear();
        self.reported.clear();
        self.resolver.clear();

        for slot in map.slots() {
            self.bound_values.insert(slot.clone(), Value::Null);
        }
        for component in map.components() {
            self.last_updated
                .insert(Arc::clone(component), FxHashMap::default());
        }

        info!(
            generation,
            expressions = map.len(),
            targets = map.slots().len(),
            "Binding map rebuilt"
        );
        self.emit(EventKind::BindingsRebuilt {
            expression_count: map.len(),
            target_count: map.slots().len(),
        });
        *self.map.write() = Arc::new(map);
        generation
    }

    /// Drop everything, including compiled scripts and modules
    pub fn reset(&self) {
        self.rebuild(&[]);
        self.scripts.clear();
        self.install_modules(ModuleRegistry::new());
    }

    // ═══════════════════════════════════════════
    // EVALUATION
    // ═══════════════════════════════════════════

    /// Evaluate one expression; failures resolve to null
    pub fn evaluate<'a>(
        self: &'a Arc<Self>,
        key: &'a ExpressionKey,
        meta: &'a ExpressionMeta,
        stack: &'a [ExpressionKey],
    ) -> BoxFuture<'a, Value> {
        async move {
            let Some(entity_id) = self.entity_id() else {
                return Value::Null;
            };
            let generation = self.generation();

            // before the in-flight lookup: joining an evaluation that waits on us never resolves
            if let Some(start) = stack.iter().position(|k| k == key) {
                // one report per cycle, whichever member it was entered from
                let mut members: Vec<&str> = stack[start..].iter().map(ExpressionKey::as_str).collect();
                members.sort_unstable();
                if self.first_report(&format!("cycle:{}", members.join("\n"))) {
                    let mut chain: Vec<String> = stack.iter().map(ToString::to_string).collect();
                    chain.push(key.to_string());
                    warn!(key = %key, chain = %chain.join(" -> "), "Circular dependency");
                    self.fail(
                        key,
                        RuntimeErrorKind::CircularDependency { chain },
                        "circular dependency detected",
                        generation,
                    );
                }
                return Value::Null;
            }
            if stack.len() >= self.config.max_call_depth {
                let chain: Vec<String> = stack.iter().map(ToString::to_string).collect();
                warn!(key = %key, depth = stack.len(), "Maximum evaluation depth exceeded");
                self.fail(
                    key,
                    RuntimeErrorKind::DepthExceeded { chain },
                    format!("evaluation depth exceeded {}", self.config.max_call_depth),
                    generation,
                );
                return Value::Null;
            }

            let mut next = stack.to_vec();
            next.push(key.clone());

            // nested script evaluations carry their own stack and must not share
            let shared = meta.mode != BindingMode::Script || stack.is_empty();
            if !shared {
                return self.dispatch(key, meta, entity_id, next, generation).await;
            }

            let (cell, leader) = match self.in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => (Arc::clone(entry.get()), false),
                Entry::Vacant(entry) => {
                    let cell = Arc::new(OnceCell::new());
                    entry.insert(Arc::clone(&cell));
                    (cell, true)
                }
            };
            let _guard = leader.then(|| InFlightGuard {
                table: &self.in_flight,
                key,
                cell: Arc::clone(&cell),
            });
            cell.get_or_init(|| self.dispatch(key, meta, entity_id, next, generation))
                .await
                .clone()
        }
        .boxed()
    }

    fn dispatch<'a>(
        self: &'a Arc<Self>,
        key: &'a ExpressionKey,
        meta: &'a ExpressionMeta,
        entity_id: Arc<str>,
        stack: Vec<ExpressionKey>,
        generation: u64,
    ) -> BoxFuture<'a, Value> {
        async move {
            let value = match meta.mode {
                BindingMode::Literal => try_evaluate_literal(&meta.expression)
                    .unwrap_or_else(|| Value::String(meta.expression.clone())),
                BindingMode::Field => self.evaluate_field(key, &meta.expression, &entity_id, generation).await,
                BindingMode::Script => {
                    self.evaluate_script(key, &meta.expression, entity_id, stack, generation)
                        .await
                }
            };
            if generation == self.generation() {
                self.expression_values.insert(key.clone(), value.clone());
                self.emit(EventKind::ExpressionEvaluated {
                    key: Arc::from(key.as_str()),
                    value: value.clone(),
                });
            } else {
                debug!(key = %key, "Discarding stale evaluation");
            }
            value
        }
        .boxed()
    }

    fn fail(&self, key: &ExpressionKey, kind: RuntimeErrorKind, message: impl Into<String>, generation: u64) {
        let message = message.into();
        self.emit(EventKind::ExpressionFailed {
            key: Arc::from(key.as_str()),
            error: message.clone(),
        });
        self.diagnostics.record_runtime(kind, key.as_str(), message);
        if generation == self.generation() {
            self.expression_values.insert(key.clone(), Value::Null);
        }
    }

    async fn evaluate_field(&self, key: &ExpressionKey, expression: &str, entity_id: &str, generation: u64) -> Value {
        if !is_computed_expression(expression) {
            return self.read_path(entity_id, expression).await.unwrap_or(Value::Null);
        }

        let mut operands = Vec::new();
        for identifier in extract_identifiers(expression) {
            let Some(raw) = self.read_path(entity_id, &identifier).await else {
                return Value::Null;
            };
            let Some(number) = coerce_number(&raw) else {
                debug!(key = %key, operand = %identifier, "Operand is not numeric");
                return Value::Null;
            };
            operands.push((identifier, number));
        }

        let substituted = substitute(expression, &operands);
        match evaluate_arithmetic(&substituted) {
            Ok(n) => number_value(n),
            Err(e) => {
                warn!(key = %key, error = %e, "Computed expression rejected");
                self.fail(key, RuntimeErrorKind::Evaluation, e.to_string(), generation);
                Value::Null
            }
        }
    }

    /// Read a field path for an entity; `None` when unresolvable or unreadable
    pub async fn read_path(&self, entity_id: &str, expression: &str) -> Option<Value> {
        let path = self.resolver.resolve(expression).await;
        if path.is_empty() {
            return None;
        }
        match self.store.read(entity_id, &path).await {
            Ok(value) => Some(value.to_json()),
            Err(e) => {
                debug!(entity_id, expression, error = %e, "Field read failed");
                None
            }
        }
    }

    async fn evaluate_script(
        self: &Arc<Self>,
        key: &ExpressionKey,
        body: &str,
        entity_id: Arc<str>,
        stack: Vec<ExpressionKey>,
        generation: u64,
    ) -> Value {
        let program = match self.scripts.body(body) {
            Ok(program) => program,
            Err(e) => {
                // the failure stays cached across reloads; the diagnostics list does not
                if self.diagnostics.record_compilation_once(format!("script:{}", key), e.to_string()) {
                    warn!(key = %key, error = %e, "Script failed to compile");
                }
                return Value::Null;
            }
        };

        let context = self.script_context(key, &entity_id);
        let host = Arc::new(ExpressionHost {
            engine: Arc::clone(self),
            key: key.clone(),
            stack,
        });
        match run_body(&program, host, self.config.script, vec![("context", context)]).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Script evaluation failed");
                self.fail(key, RuntimeErrorKind::Evaluation, e.to_string(), generation);
                Value::Null
            }
        }
    }

    fn script_context(&self, key: &ExpressionKey, entity_id: &str) -> ScriptValue {
        let faceplate_id = self
            .faceplate_id()
            .map_or(ScriptValue::Null, ScriptValue::Str);
        ScriptValue::object([
            ("entityId", ScriptValue::str(entity_id)),
            ("faceplateId", faceplate_id),
            ("expressionKey", ScriptValue::str(key.as_str())),
            ("get", ScriptValue::host(HostFn::Get)),
            ("getCached", ScriptValue::host(HostFn::GetCached)),
            ("getBindingValue", ScriptValue::host(HostFn::GetBindingValue)),
            ("evalBinding", ScriptValue::host(HostFn::EvalBinding)),
            ("setState", ScriptValue::host(HostFn::SetState)),
            ("getState", ScriptValue::host(HostFn::GetState)),
            ("bindingsSnapshot", ScriptValue::host(HostFn::BindingsSnapshot)),
            ("module", ScriptValue::host(HostFn::Module)),
            ("modules", ScriptValue::host(HostFn::Modules)),
        ])
    }

    /// Evaluate an ad hoc field path through the engine (`context.get`)
    pub async fn get_path(self: &Arc<Self>, path: &str, stack: &[ExpressionKey]) -> Value {
        let key = make_expression_key(path, BindingMode::Field);
        let meta = self
            .binding_map()
            .meta(&key)
            .cloned()
            .unwrap_or_else(|| ExpressionMeta::new(path.trim(), BindingMode::Field));
        self.evaluate(&key, &meta, stack).await
    }

    /// Classify and evaluate arbitrary expression text (actions, animation rules)
    pub async fn evaluate_text(self: &Arc<Self>, text: &str, stack: &[ExpressionKey]) -> Value {
        let (mode, normalized) = classify_and_normalize(text, None);
        let key = make_expression_key(&normalized, mode);
        let meta = self
            .binding_map()
            .meta(&key)
            .cloned()
            .unwrap_or_else(|| ExpressionMeta::new(normalized, mode));
        self.evaluate(&key, &meta, stack).await
    }

    /// Re-evaluate the expression driving `component:property`
    pub async fn eval_binding(self: &Arc<Self>, component: &str, property: &str, stack: &[ExpressionKey]) -> Value {
        let map = self.binding_map();
        let Some(key) = map.key_for_target(component, property) else {
            debug!(component, property, "No binding for target");
            return Value::Null;
        };
        let Some(meta) = map.meta(key) else {
            return Value::Null;
        };
        self.evaluate(key, meta, stack).await
    }

    /// Evaluate a tracked key at top level and fan the result out
    pub async fn refresh_key(self: &Arc<Self>, key: &ExpressionKey) -> Value {
        let map = self.binding_map();
        let Some(meta) = map.meta(key) else {
            return Value::Null;
        };
        let generation = self.generation();
        let value = self.evaluate(key, meta, &[]).await;
        self.fan_out(&map, key, &value, generation).await;
        value
    }

    /// Evaluate every tracked key concurrently, then fan out each result
    #[instrument(skip(self), fields(generation = self.generation()))]
    pub async fn evaluate_all(self: &Arc<Self>) {
        let map = self.binding_map();
        debug!(keys = map.len(), "Evaluating all bindings");
        join_all(map.keys().iter().map(|key| self.refresh_key(key))).await;
    }

    /// Accept a value delivered by a notification without re-reading the store
    pub async fn deliver(self: &Arc<Self>, key: &ExpressionKey, value: Value, generation: u64) {
        if generation != self.generation() {
            return;
        }
        self.expression_values.insert(key.clone(), value.clone());
        self.emit(EventKind::ExpressionEvaluated {
            key: Arc::from(key.as_str()),
            value: value.clone(),
        });
        let map = self.binding_map();
        self.fan_out(&map, key, &value, generation).await;
    }

    /// React to a change of `dependency`
    ///
    /// Only the keys depending on it are refreshed; a field-mode key whose
    /// expression is exactly the dependency takes the delivered value. With no
    /// known dependents everything is refreshed.
    pub async fn on_dependency_changed(self: &Arc<Self>, dependency: &str, delivered: Value, generation: u64) {
        if generation != self.generation() {
            debug!(dependency, "Ignoring notification from a previous binding map");
            return;
        }
        let map = self.binding_map();
        let Some(keys) = map.dependents(dependency).filter(|keys| !keys.is_empty()) else {
            self.evaluate_all().await;
            return;
        };

        join_all(keys.iter().map(|key| {
            let delivered = &delivered;
            let map = &map;
            async move {
                let direct = map.meta(key).is_some_and(|meta| {
                    meta.mode == BindingMode::Field && meta.expression.trim() == dependency
                });
                if direct {
                    self.deliver(key, delivered.clone(), generation).await;
                } else {
                    self.refresh_key(key).await;
                }
            }
        }))
        .await;
    }

    async fn fan_out(self: &Arc<Self>, map: &BindingMap, key: &ExpressionKey, value: &Value, generation: u64) {
        for target in map.targets(key) {
            let transformed = transform::apply(self, target, key, value).await;
            if generation != self.generation() {
                return;
            }
            self.bound_values.insert(target.slot(), transformed);
            self.last_updated
                .entry(Arc::clone(&target.component))
                .or_default()
                .insert(Arc::clone(&target.property), Utc::now());
        }
    }

    // ═══════════════════════════════════════════
    // VALUE MAPS & STATE
    // ═══════════════════════════════════════════

    pub fn binding_value(&self, component: &str, property: &str) -> Option<Value> {
        self.bound_values
            .get(&crate::binding::slot_key(component, property))
            .map(|v| v.value().clone())
    }

    pub fn binding_value_map(&self) -> BTreeMap<String, Value> {
        self.bound_values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn expression_value(&self, key: &str) -> Option<Value> {
        self.expression_values.get(key).map(|v| v.value().clone())
    }

    pub fn expression_value_map(&self) -> BTreeMap<String, Value> {
        self.expression_values
            .iter()
            .map(|entry| (entry.key().to_string(), entry.value().clone()))
            .collect()
    }

    /// Last update per property of a component
    pub fn last_updated(&self, component: &str) -> Option<BTreeMap<String, DateTime<Utc>>> {
        self.last_updated.get(component).map(|bucket| {
            bucket
                .iter()
                .map(|(property, at)| (property.to_string(), *at))
                .collect()
        })
    }

    /// Cached expression value by key, or by field path
    pub fn cached(&self, key: &str) -> Option<Value> {
        self.expression_value(key).or_else(|| {
            let field_key = make_expression_key(key, BindingMode::Field);
            self.expression_value(&field_key)
        })
    }

    pub fn set_state(&self, bucket: &str, name: &str, value: Value) {
        self.state
            .entry(bucket.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    pub fn get_state(&self, bucket: &str, name: &str) -> Option<Value> {
        self.state.get(bucket)?.get(name).cloned()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("generation", &self.generation())
            .field("expressions", &self.binding_map().len())
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

// ═══════════════════════════════════════════
// SCRIPT HOSTS
// ═══════════════════════════════════════════

pub(crate) fn string_arg(args: &[ScriptValue], index: usize, function: &str) -> Result<String, ScriptError> {
    match args.get(index) {
        Some(ScriptValue::Str(s)) => Ok(s.to_string()),
        Some(ScriptValue::Number(_)) => Ok(args[index].to_display()),
        _ => Err(ScriptError::Type(format!(
            "{}() expects a string as argument {}",
            function,
            index + 1
        ))),
    }
}

/// `module(name)` / `modules()`; `None` for any other function
pub(crate) fn module_call(
    modules: &ModuleRegistry,
    function: HostFn,
    args: &[ScriptValue],
) -> Option<Result<ScriptValue, ScriptError>> {
    match function {
        HostFn::Module => Some(
            string_arg(args, 0, "module").map(|name| modules.get(&name).unwrap_or_default()),
        ),
        HostFn::Modules => Some(Ok(modules.to_object())),
        _ => None,
    }
}

fn unavailable(function: HostFn) -> ScriptError {
    ScriptError::Host(format!("{:?} is not available in this context", function))
}

/// Host functions of a binding script
struct ExpressionHost {
    engine: Arc<Engine>,
    key: ExpressionKey,
    /// Call stack including `key`
    stack: Vec<ExpressionKey>,
}

#[async_trait]
impl ScriptHost for ExpressionHost {
    async fn call(&self, function: HostFn, args: Vec<ScriptValue>) -> Result<ScriptValue, ScriptError> {
        let engine = &self.engine;
        let value = match function {
            HostFn::Get => {
                let path = string_arg(&args, 0, "get")?;
                engine.get_path(&path, &self.stack).await
            }
            HostFn::GetCached => {
                let key = string_arg(&args, 0, "getCached")?;
                engine.cached(&key).unwrap_or(Value::Null)
            }
            HostFn::GetBindingValue => {
                let component = string_arg(&args, 0, "getBindingValue")?;
                let property = string_arg(&args, 1, "getBindingValue")?;
                engine
                    .binding_value(&component, &property)
                    .unwrap_or(Value::Null)
            }
            HostFn::EvalBinding => {
                let component = string_arg(&args, 0, "evalBinding")?;
                let property = string_arg(&args, 1, "evalBinding")?;
                engine.eval_binding(&component, &property, &self.stack).await
            }
            HostFn::SetState => {
                let name = string_arg(&args, 0, "setState")?;
                let value = args.get(1).map(ScriptValue::to_json).unwrap_or(Value::Null);
                engine.set_state(self.key.as_str(), &name, value);
                Value::Null
            }
            HostFn::GetState => {
                let name = string_arg(&args, 0, "getState")?;
                match engine.get_state(self.key.as_str(), &name) {
                    Some(value) => value,
                    None => return Ok(args.get(1).cloned().unwrap_or_default()),
                }
            }
            HostFn::BindingsSnapshot => Value::Object(engine.binding_value_map().into_iter().collect()),
            HostFn::Module | HostFn::Modules => {
                return module_call(&engine.modules(), function, &args)
                    .unwrap_or_else(|| Err(unavailable(function)));
            }
            HostFn::Set => return Err(unavailable(function)),
        };
        Ok(ScriptValue::from_json(&value))
    }
}

/// Host for transforms: module accessors only
pub(crate) struct ModuleHost {
    modules: Arc<ModuleRegistry>,
}

impl ModuleHost {
    pub(crate) fn new(modules: Arc<ModuleRegistry>) -> Self {
        Self { modules }
    }
}

#[async_trait]
impl ScriptHost for ModuleHost {
    async fn call(&self, function: HostFn, args: Vec<ScriptValue>) -> Result<ScriptValue, ScriptError> {
        module_call(&self.modules, function, &args).unwrap_or_else(|| Err(unavailable(function)))
    }
}
