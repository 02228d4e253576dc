//! Tree-walking interpreter
//!
//! Evaluation is async because host functions (`context.get(...)`) read the
//! store. Recursion goes through boxed futures. Every expression and
//! statement costs one step against `ScriptLimits::max_steps`; user function
//! calls nest at most `ScriptLimits::max_call_depth` deep.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::config::ScriptLimits;

use super::helpers::{call_builtin, install_globals, to_fixed};
use super::node::{
    ArrayItem, AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, FunctionDef, Literal, LogicalOp,
    Pattern, Program, Property, Stmt, UnaryOp,
};
use super::value::{number_to_string, ArrayRef, Closure, Native, ObjectMap, ObjectRef, ScriptValue};
use super::ScriptError;

type SResult<T> = Result<T, ScriptError>;
type Eval<'a> = BoxFuture<'a, SResult<ScriptValue>>;

// ═══════════════════════════════════════════
// HOST
// ═══════════════════════════════════════════

/// Functions whose implementation lives outside the interpreter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostFn {
    /// `context.get(path)`
    Get,
    /// `context.getCached(key)`
    GetCached,
    /// `context.getBindingValue(component, property)`
    GetBindingValue,
    /// `context.evalBinding(component, property)`
    EvalBinding,
    SetState,
    GetState,
    BindingsSnapshot,
    Module,
    Modules,
    /// `context.set(path, value)` in action scripts
    Set,
}

#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn call(&self, function: HostFn, args: Vec<ScriptValue>) -> SResult<ScriptValue>;
}

/// Host for code with no context (module initialization)
#[derive(Debug, Default)]
pub struct NoHost;

#[async_trait]
impl ScriptHost for NoHost {
    async fn call(&self, function: HostFn, _args: Vec<ScriptValue>) -> SResult<ScriptValue> {
        Err(ScriptError::Host(format!(
            "{:?} is not available here",
            function
        )))
    }
}

// ═══════════════════════════════════════════
// SCOPE
// ═══════════════════════════════════════════

struct Slot {
    value: ScriptValue,
    constant: bool,
}

struct Frame {
    vars: RwLock<FxHashMap<Arc<str>, Slot>>,
    parent: Option<Scope>,
}

/// Lexical scope chain
#[derive(Clone)]
pub struct Scope(Arc<Frame>);

impl Scope {
    pub fn root() -> Self {
        Self(Arc::new(Frame {
            vars: RwLock::new(FxHashMap::default()),
            parent: None,
        }))
    }

    pub fn child(&self) -> Self {
        Self(Arc::new(Frame {
            vars: RwLock::new(FxHashMap::default()),
            parent: Some(self.clone()),
        }))
    }

    pub fn declare(&self, name: impl Into<Arc<str>>, value: ScriptValue, constant: bool) {
        self.0
            .vars
            .write()
            .insert(name.into(), Slot { value, constant });
    }

    pub fn lookup(&self, name: &str) -> Option<ScriptValue> {
        let mut scope = self;
        loop {
            if let Some(slot) = scope.0.vars.read().get(name) {
                return Some(slot.value.clone());
            }
            scope = scope.0.parent.as_ref()?;
        }
    }

    pub fn assign(&self, name: &str, value: ScriptValue) -> SResult<()> {
        let mut scope = self;
        loop {
            {
                let mut vars = scope.0.vars.write();
                if let Some(slot) = vars.get_mut(name) {
                    if slot.constant {
                        return Err(ScriptError::ConstAssignment(name.to_string()));
                    }
                    slot.value = value;
                    return Ok(());
                }
            }
            scope = scope
                .0
                .parent
                .as_ref()
                .ok_or_else(|| ScriptError::Undefined(name.to_string()))?;
        }
    }

    /// Drop every variable (breaks closure ↔ scope reference cycles)
    fn clear(&self) {
        self.0.vars.write().clear();
    }
}

// ═══════════════════════════════════════════
// INTERPRETER
// ═══════════════════════════════════════════

enum Flow {
    Normal,
    Return(ScriptValue),
}

enum Place {
    Var(Arc<str>),
    Prop(ObjectRef, Arc<str>),
    Elem(ArrayRef, usize),
}

/// One invocation's evaluator: step counter, call depth and host
pub struct Interpreter {
    host: Arc<dyn ScriptHost>,
    limits: ScriptLimits,
    steps: AtomicU64,
    depth: AtomicUsize,
    /// Scopes created by this invocation, cleared by `release`
    scopes: Option<Mutex<Vec<Scope>>>,
}

struct DepthGuard<'a>(&'a AtomicUsize);

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Interpreter {
    /// Interpreter whose scopes are released after the invocation
    pub fn new(host: Arc<dyn ScriptHost>, limits: ScriptLimits) -> Self {
        Self {
            host,
            limits,
            steps: AtomicU64::new(0),
            depth: AtomicUsize::new(0),
            scopes: Some(Mutex::new(Vec::new())),
        }
    }

    /// Interpreter whose scopes outlive it (module initialization: exported
    /// closures keep their scope)
    pub fn retaining(host: Arc<dyn ScriptHost>, limits: ScriptLimits) -> Self {
        Self {
            scopes: None,
            ..Self::new(host, limits)
        }
    }

    /// Fresh root scope with the global library installed
    pub fn root_scope(&self) -> Scope {
        let scope = Scope::root();
        install_globals(&scope);
        self.track(&scope);
        scope
    }

    fn track(&self, scope: &Scope) {
        if let Some(scopes) = &self.scopes {
            scopes.lock().push(scope.clone());
        }
    }

    fn child_scope(&self, parent: &Scope) -> Scope {
        let scope = parent.child();
        self.track(&scope);
        scope
    }

    /// Clear every scope this invocation created
    ///
    /// Values must already be converted out (e.g. to JSON) before calling.
    pub fn release(&self) {
        if let Some(scopes) = &self.scopes {
            let scopes = std::mem::take(&mut *scopes.lock());
            for scope in scopes {
                scope.clear();
            }
        }
    }

    pub fn steps_used(&self) -> u64 {
        self.steps.load(Ordering::SeqCst)
    }

    fn tick(&self) -> SResult<()> {
        let steps = self.steps.fetch_add(1, Ordering::SeqCst) + 1;
        if steps > self.limits.max_steps {
            return Err(ScriptError::StepBudget(self.limits.max_steps));
        }
        Ok(())
    }

    /// Run a program; the value of its `return`, or null
    pub async fn run_program(&self, program: &Program, scope: &Scope) -> SResult<ScriptValue> {
        match self.exec_block(&program.body, scope).await? {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(ScriptValue::Null),
        }
    }

    pub async fn eval(&self, expr: &Expr, scope: &Scope) -> SResult<ScriptValue> {
        self.eval_expr(expr, scope).await
    }

    /// Call any callable value
    pub fn call<'a>(&'a self, callee: &'a ScriptValue, args: Vec<ScriptValue>) -> Eval<'a> {
        async move {
            match callee {
                ScriptValue::Function(closure) => self.call_closure(closure, args).await,
                ScriptValue::Native(Native::Host(function)) => self.host.call(*function, args).await,
                ScriptValue::Native(Native::Builtin(builtin)) => call_builtin(*builtin, &args),
                other => Err(ScriptError::NotCallable(other.type_of().to_string())),
            }
        }
        .boxed()
    }

    async fn call_closure(&self, closure: &Closure, args: Vec<ScriptValue>) -> SResult<ScriptValue> {
        let depth = self.depth.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = DepthGuard(&self.depth);
        if depth > self.limits.max_call_depth {
            return Err(ScriptError::CallDepth(self.limits.max_call_depth));
        }

        let scope = self.child_scope(&closure.env);
        let mut args = args.into_iter();
        for param in &closure.def.params {
            let arg = args.next().unwrap_or_default();
            self.bind_pattern(param, arg, &scope, false).await?;
        }

        match &closure.def.body {
            FunctionBody::Expr(expr) => self.eval_expr(expr, &scope).await,
            FunctionBody::Block(body) => match self.exec_block(body, &scope).await? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(ScriptValue::Null),
            },
        }
    }

    fn closure(&self, def: &Arc<FunctionDef>, scope: &Scope) -> ScriptValue {
        ScriptValue::Function(Arc::new(Closure {
            def: Arc::clone(def),
            env: scope.clone(),
        }))
    }

    // ═══════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════

    fn exec_block<'a>(&'a self, body: &'a [Stmt], scope: &'a Scope) -> BoxFuture<'a, SResult<Flow>> {
        async move {
            // function declarations are visible throughout their block
            for stmt in body {
                if let Stmt::Function(def) = stmt {
                    if let Some(name) = &def.name {
                        scope.declare(Arc::clone(name), self.closure(def, scope), false);
                    }
                }
            }
            for stmt in body {
                if let Flow::Return(value) = self.exec_stmt(stmt, scope).await? {
                    return Ok(Flow::Return(value));
                }
            }
            Ok(Flow::Normal)
        }
        .boxed()
    }

    fn exec_stmt<'a>(&'a self, stmt: &'a Stmt, scope: &'a Scope) -> BoxFuture<'a, SResult<Flow>> {
        async move {
            self.tick()?;
            match stmt {
                Stmt::Decl { kind, declarations } => {
                    for (pattern, init) in declarations {
                        let value = match init {
                            Some(expr) => self.eval_expr(expr, scope).await?,
                            None => ScriptValue::Null,
                        };
                        self.bind_pattern(pattern, value, scope, *kind == DeclKind::Const)
                            .await?;
                    }
                    Ok(Flow::Normal)
                }
                Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
                Stmt::Expr(expr) => {
                    self.eval_expr(expr, scope).await?;
                    Ok(Flow::Normal)
                }
                Stmt::If {
                    cond,
                    then,
                    otherwise,
                } => {
                    if self.eval_expr(cond, scope).await?.truthy() {
                        self.exec_stmt(then, scope).await
                    } else if let Some(otherwise) = otherwise {
                        self.exec_stmt(otherwise, scope).await
                    } else {
                        Ok(Flow::Normal)
                    }
                }
                Stmt::Block(body) => {
                    let inner = self.child_scope(scope);
                    self.exec_block(body, &inner).await
                }
                Stmt::Return(expr) => {
                    let value = match expr {
                        Some(expr) => self.eval_expr(expr, scope).await?,
                        None => ScriptValue::Null,
                    };
                    Ok(Flow::Return(value))
                }
                Stmt::Throw(expr) => {
                    let value = self.eval_expr(expr, scope).await?;
                    let message = match &value {
                        ScriptValue::Object(map) => map
                            .get("message")
                            .map(|m| m.to_display())
                            .unwrap_or_else(|| value.to_display()),
                        other => other.to_display(),
                    };
                    Err(ScriptError::Thrown(message))
                }
            }
        }
        .boxed()
    }

    fn bind_pattern<'a>(
        &'a self,
        pattern: &'a Pattern,
        value: ScriptValue,
        scope: &'a Scope,
        constant: bool,
    ) -> BoxFuture<'a, SResult<()>> {
        async move {
            match pattern {
                Pattern::Ident(name) => scope.declare(Arc::clone(name), value, constant),
                Pattern::Default(name, default) => {
                    let value = if value.is_nullish() {
                        self.eval_expr(default, scope).await?
                    } else {
                        value
                    };
                    scope.declare(Arc::clone(name), value, constant);
                }
                Pattern::Object(entries) => {
                    for (key, local, default) in entries {
                        let mut item = get_property(&value, key)?;
                        if item.is_nullish() {
                            if let Some(default) = default {
                                item = self.eval_expr(default, scope).await?;
                            }
                        }
                        scope.declare(Arc::clone(local), item, constant);
                    }
                }
                Pattern::Array(items) => {
                    let ScriptValue::Array(array) = &value else {
                        return Err(ScriptError::Type(format!(
                            "{} is not iterable",
                            value.type_of()
                        )));
                    };
                    for (index, name) in items.iter().enumerate() {
                        if let Some(name) = name {
                            let item = array.get(index).unwrap_or_default();
                            scope.declare(Arc::clone(name), item, constant);
                        }
                    }
                }
            }
            Ok(())
        }
        .boxed()
    }

    // ═══════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════

    fn eval_expr<'a>(&'a self, expr: &'a Expr, scope: &'a Scope) -> Eval<'a> {
        async move {
            self.tick()?;
            match expr {
                Expr::Literal(lit) => Ok(match lit {
                    Literal::Null => ScriptValue::Null,
                    Literal::Bool(b) => ScriptValue::Bool(*b),
                    Literal::Number(n) => ScriptValue::Number(*n),
                    Literal::Str(s) => ScriptValue::Str(Arc::clone(s)),
                }),
                Expr::Ident(name) => scope
                    .lookup(name)
                    .ok_or_else(|| ScriptError::Undefined(name.to_string())),
                Expr::Array(items) => Ok(ScriptValue::array(self.eval_items(items, scope).await?)),
                Expr::Object(properties) => {
                    let mut map = ObjectMap::new();
                    for property in properties {
                        match property {
                            Property::KeyValue(key, value) => {
                                let value = self.eval_expr(value, scope).await?;
                                map.insert(Arc::clone(key), value);
                            }
                            Property::Spread(source) => {
                                match self.eval_expr(source, scope).await? {
                                    ScriptValue::Object(obj) => map.extend(obj.entries()),
                                    ScriptValue::Array(items) => {
                                        for (i, v) in items.to_vec().into_iter().enumerate() {
                                            map.insert(Arc::from(i.to_string()), v);
                                        }
                                    }
                                    _ => {}
                                }
                            }
                        }
                    }
                    Ok(ScriptValue::Object(ObjectRef::new(map)))
                }
                Expr::Template { quasis, exprs } => {
                    let mut out = String::new();
                    for (i, quasi) in quasis.iter().enumerate() {
                        out.push_str(quasi);
                        if let Some(expr) = exprs.get(i) {
                            out.push_str(&self.eval_expr(expr, scope).await?.to_display());
                        }
                    }
                    Ok(ScriptValue::str(out))
                }
                Expr::Unary(op, operand) => {
                    if let (UnaryOp::Typeof, Expr::Ident(name)) = (op, &**operand) {
                        let type_name = scope.lookup(name).map_or("undefined", |v| v.type_of());
                        return Ok(ScriptValue::str(type_name));
                    }
                    let value = self.eval_expr(operand, scope).await?;
                    Ok(match op {
                        UnaryOp::Not => ScriptValue::Bool(!value.truthy()),
                        UnaryOp::Neg => ScriptValue::Number(-value.to_number()),
                        UnaryOp::Plus => ScriptValue::Number(value.to_number()),
                        UnaryOp::Typeof => ScriptValue::str(value.type_of()),
                    })
                }
                Expr::Binary(op, left, right) => {
                    let left = self.eval_expr(left, scope).await?;
                    let right = self.eval_expr(right, scope).await?;
                    Ok(binary(*op, &left, &right))
                }
                Expr::Logical(op, left, right) => {
                    let left = self.eval_expr(left, scope).await?;
                    let short_circuit = match op {
                        LogicalOp::And => !left.truthy(),
                        LogicalOp::Or => left.truthy(),
                        LogicalOp::Nullish => !left.is_nullish(),
                    };
                    if short_circuit {
                        Ok(left)
                    } else {
                        self.eval_expr(right, scope).await
                    }
                }
                Expr::Conditional(test, then, otherwise) => {
                    if self.eval_expr(test, scope).await?.truthy() {
                        self.eval_expr(then, scope).await
                    } else {
                        self.eval_expr(otherwise, scope).await
                    }
                }
                Expr::Member {
                    object,
                    property,
                    optional,
                } => {
                    let object = self.eval_expr(object, scope).await?;
                    if *optional && object.is_nullish() {
                        return Ok(ScriptValue::Null);
                    }
                    get_property(&object, property)
                }
                Expr::Index {
                    object,
                    index,
                    optional,
                } => {
                    let object = self.eval_expr(object, scope).await?;
                    if *optional && object.is_nullish() {
                        return Ok(ScriptValue::Null);
                    }
                    let key = property_key(&self.eval_expr(index, scope).await?);
                    get_property(&object, &key)
                }
                Expr::Call { callee, args } => self.eval_call(callee, args, scope).await,
                Expr::Function(def) => Ok(self.closure(def, scope)),
                Expr::Assign { op, target, value } => {
                    let place = self.place(target, scope).await?;
                    let new_value = match op {
                        AssignOp::Set => self.eval_expr(value, scope).await?,
                        AssignOp::Compound(op) => {
                            let current = read_place(&place, scope)?;
                            let rhs = self.eval_expr(value, scope).await?;
                            binary(*op, &current, &rhs)
                        }
                    };
                    write_place(place, new_value.clone(), scope)?;
                    Ok(new_value)
                }
            }
        }
        .boxed()
    }

    async fn eval_items(&self, items: &[ArrayItem], scope: &Scope) -> SResult<Vec<ScriptValue>> {
        let mut values = Vec::with_capacity(items.len());
        for item in items {
            match item {
                ArrayItem::Item(expr) => values.push(self.eval_expr(expr, scope).await?),
                ArrayItem::Spread(expr) => match self.eval_expr(expr, scope).await? {
                    ScriptValue::Array(array) => values.extend(array.to_vec()),
                    ScriptValue::Str(s) => {
                        values.extend(s.chars().map(|c| ScriptValue::str(c.to_string())))
                    }
                    other => {
                        return Err(ScriptError::Type(format!(
                            "{} is not iterable",
                            other.type_of()
                        )))
                    }
                },
            }
        }
        Ok(values)
    }

    async fn eval_call(&self, callee: &Expr, args: &[ArrayItem], scope: &Scope) -> SResult<ScriptValue> {
        match callee {
            Expr::Member {
                object,
                property,
                optional,
            } => {
                let receiver = self.eval_expr(object, scope).await?;
                if *optional && receiver.is_nullish() {
                    return Ok(ScriptValue::Null);
                }
                let args = self.eval_items(args, scope).await?;
                self.call_method(receiver, property, args).await
            }
            Expr::Index {
                object,
                index,
                optional,
            } => {
                let receiver = self.eval_expr(object, scope).await?;
                if *optional && receiver.is_nullish() {
                    return Ok(ScriptValue::Null);
                }
                let key = property_key(&self.eval_expr(index, scope).await?);
                let args = self.eval_items(args, scope).await?;
                self.call_method(receiver, &key, args).await
            }
            other => {
                let function = self.eval_expr(other, scope).await?;
                let args = self.eval_items(args, scope).await?;
                if !function.is_callable() {
                    return Err(ScriptError::NotCallable(describe(other)));
                }
                self.call(&function, args).await
            }
        }
    }

    fn call_method<'a>(&'a self, receiver: ScriptValue, name: &'a str, args: Vec<ScriptValue>) -> Eval<'a> {
        async move {
            match &receiver {
                ScriptValue::Array(array) => {
                    if let Some(result) = self.array_method(array, name, &args).await {
                        return result;
                    }
                }
                ScriptValue::Str(s) => {
                    if let Some(result) = string_method(s, name, &args) {
                        return result;
                    }
                }
                ScriptValue::Number(n) => {
                    if let Some(result) = number_method(*n, name, &args) {
                        return result;
                    }
                }
                _ => {}
            }
            let function = get_property(&receiver, name)?;
            if !function.is_callable() {
                return Err(ScriptError::NotCallable(name.to_string()));
            }
            self.call(&function, args).await
        }
        .boxed()
    }

    /// Array methods; `None` when `name` is not one
    async fn array_method(
        &self,
        array: &ArrayRef,
        name: &str,
        args: &[ScriptValue],
    ) -> Option<SResult<ScriptValue>> {
        let result = match name {
            "map" | "filter" | "find" | "findIndex" | "some" | "every" | "forEach" => {
                self.iterate(array, name, args).await
            }
            "reduce" => self.reduce(array, args).await,
            "sort" => self.sort(array, args.first()).await,
            "includes" => {
                let needle = args.first().cloned().unwrap_or_default();
                Ok(ScriptValue::Bool(array.to_vec().iter().any(|v| {
                    v.strict_equals(&needle)
                        || matches!((v, &needle), (ScriptValue::Number(a), ScriptValue::Number(b)) if a.is_nan() && b.is_nan())
                })))
            }
            "indexOf" => {
                let needle = args.first().cloned().unwrap_or_default();
                let index = array.to_vec().iter().position(|v| v.strict_equals(&needle));
                Ok(ScriptValue::Number(index.map_or(-1.0, |i| i as f64)))
            }
            "join" => {
                let separator = match args.first() {
                    Some(ScriptValue::Null) | None => ",".to_string(),
                    Some(sep) => sep.to_display(),
                };
                let parts: Vec<String> = array
                    .to_vec()
                    .iter()
                    .map(|v| if v.is_nullish() { String::new() } else { v.to_display() })
                    .collect();
                Ok(ScriptValue::str(parts.join(&separator)))
            }
            "slice" => {
                let items = array.to_vec();
                let (start, end) = slice_bounds(items.len(), args);
                Ok(ScriptValue::array(items[start..end].to_vec()))
            }
            "concat" => {
                let mut items = array.to_vec();
                for arg in args {
                    match arg {
                        ScriptValue::Array(other) => items.extend(other.to_vec()),
                        other => items.push(other.clone()),
                    }
                }
                Ok(ScriptValue::array(items))
            }
            "push" => {
                let mut len = array.len();
                for arg in args {
                    len = array.push(arg.clone());
                }
                Ok(ScriptValue::Number(len as f64))
            }
            "pop" => Ok(array.pop().unwrap_or_default()),
            "reverse" => {
                let mut items = array.to_vec();
                items.reverse();
                for (i, v) in items.into_iter().enumerate() {
                    array.set(i, v);
                }
                Ok(ScriptValue::Array(array.clone()))
            }
            _ => return None,
        };
        Some(result)
    }

    async fn iterate(&self, array: &ArrayRef, name: &str, args: &[ScriptValue]) -> SResult<ScriptValue> {
        let callback = args.first().cloned().unwrap_or_default();
        if !callback.is_callable() {
            return Err(ScriptError::NotCallable(format!("{} callback", name)));
        }
        let this = ScriptValue::Array(array.clone());
        let mut mapped = Vec::new();
        for (index, item) in array.to_vec().into_iter().enumerate() {
            let result = self
                .call(&callback, vec![item.clone(), ScriptValue::Number(index as f64), this.clone()])
                .await?;
            match name {
                "map" => mapped.push(result),
                "filter" if result.truthy() => mapped.push(item),
                "find" if result.truthy() => return Ok(item),
                "findIndex" if result.truthy() => return Ok(ScriptValue::Number(index as f64)),
                "some" if result.truthy() => return Ok(ScriptValue::Bool(true)),
                "every" if !result.truthy() => return Ok(ScriptValue::Bool(false)),
                _ => {}
            }
        }
        Ok(match name {
            "map" | "filter" => ScriptValue::array(mapped),
            "findIndex" => ScriptValue::Number(-1.0),
            "some" => ScriptValue::Bool(false),
            "every" => ScriptValue::Bool(true),
            _ => ScriptValue::Null,
        })
    }

    async fn reduce(&self, array: &ArrayRef, args: &[ScriptValue]) -> SResult<ScriptValue> {
        let callback = args.first().cloned().unwrap_or_default();
        if !callback.is_callable() {
            return Err(ScriptError::NotCallable("reduce callback".to_string()));
        }
        let items = array.to_vec();
        let mut entries = items.into_iter().enumerate();
        let mut acc = match args.get(1) {
            Some(initial) => initial.clone(),
            None => match entries.next() {
                Some((_, first)) => first,
                None => {
                    return Err(ScriptError::Type(
                        "reduce of empty array with no initial value".to_string(),
                    ))
                }
            },
        };
        let this = ScriptValue::Array(array.clone());
        for (index, item) in entries {
            acc = self
                .call(
                    &callback,
                    vec![acc, item, ScriptValue::Number(index as f64), this.clone()],
                )
                .await?;
        }
        Ok(acc)
    }

    /// In-place insertion sort; default order compares display strings
    async fn sort(&self, array: &ArrayRef, comparator: Option<&ScriptValue>) -> SResult<ScriptValue> {
        let mut items = array.to_vec();
        for i in 1..items.len() {
            let mut j = i;
            while j > 0 {
                let greater = match comparator {
                    Some(cmp) if cmp.is_callable() => {
                        self.call(cmp, vec![items[j - 1].clone(), items[j].clone()])
                            .await?
                            .to_number()
                            > 0.0
                    }
                    _ => items[j - 1].to_display() > items[j].to_display(),
                };
                if !greater {
                    break;
                }
                items.swap(j - 1, j);
                j -= 1;
            }
        }
        for (i, v) in items.into_iter().enumerate() {
            array.set(i, v);
        }
        Ok(ScriptValue::Array(array.clone()))
    }

    async fn place(&self, target: &Expr, scope: &Scope) -> SResult<Place> {
        let (object, key) = match target {
            Expr::Ident(name) => return Ok(Place::Var(Arc::clone(name))),
            Expr::Member {
                object, property, ..
            } => (self.eval_expr(object, scope).await?, property.to_string()),
            Expr::Index { object, index, .. } => {
                let object = self.eval_expr(object, scope).await?;
                let key = property_key(&self.eval_expr(index, scope).await?);
                (object, key)
            }
            other => return Err(ScriptError::InvalidAssignment(describe(other))),
        };
        match object {
            ScriptValue::Object(obj) => Ok(Place::Prop(obj, Arc::from(key))),
            ScriptValue::Array(array) => key
                .parse::<usize>()
                .map(|i| Place::Elem(array, i))
                .map_err(|_| ScriptError::InvalidAssignment(format!("array property '{}'", key))),
            ScriptValue::Null => Err(ScriptError::NullAccess(key)),
            other => Err(ScriptError::InvalidAssignment(format!(
                "property '{}' of {}",
                key,
                other.type_of()
            ))),
        }
    }
}

// ═══════════════════════════════════════════
// OPERATORS & PROPERTIES
// ═══════════════════════════════════════════

fn read_place(place: &Place, scope: &Scope) -> SResult<ScriptValue> {
    match place {
        Place::Var(name) => scope
            .lookup(name)
            .ok_or_else(|| ScriptError::Undefined(name.to_string())),
        Place::Prop(obj, key) => Ok(obj.get(key).unwrap_or_default()),
        Place::Elem(array, index) => Ok(array.get(*index).unwrap_or_default()),
    }
}

fn write_place(place: Place, value: ScriptValue, scope: &Scope) -> SResult<()> {
    match place {
        Place::Var(name) => scope.assign(&name, value),
        Place::Prop(obj, key) => {
            obj.set(key, value);
            Ok(())
        }
        Place::Elem(array, index) => {
            array.set(index, value);
            Ok(())
        }
    }
}

pub fn binary(op: BinaryOp, left: &ScriptValue, right: &ScriptValue) -> ScriptValue {
    use ScriptValue::{Array, Bool, Number, Object, Str};
    match op {
        BinaryOp::Add => match (left, right) {
            (Str(_) | Array(_) | Object(_), _) | (_, Str(_) | Array(_) | Object(_)) => {
                ScriptValue::str(format!("{}{}", left.to_display(), right.to_display()))
            }
            _ => Number(left.to_number() + right.to_number()),
        },
        BinaryOp::Sub => Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Bool(left.loose_equals(right)),
        BinaryOp::Ne => Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Bool(left.strict_equals(right)),
        BinaryOp::StrictNe => Bool(!left.strict_equals(right)),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = match (left, right) {
                (Str(a), Str(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            Bool(match ordering {
                None => false,
                Some(ordering) => match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::Le => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                },
            })
        }
    }
}

fn property_key(value: &ScriptValue) -> String {
    match value {
        ScriptValue::Number(n) => number_to_string(*n),
        other => other.to_display(),
    }
}

/// `value[key]`; reading from null is an error
pub fn get_property(value: &ScriptValue, key: &str) -> SResult<ScriptValue> {
    Ok(match value {
        ScriptValue::Null => return Err(ScriptError::NullAccess(key.to_string())),
        ScriptValue::Object(obj) => obj.get(key).unwrap_or_default(),
        ScriptValue::Array(array) => match key {
            "length" => ScriptValue::Number(array.len() as f64),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|i| array.get(i))
                .unwrap_or_default(),
        },
        ScriptValue::Str(s) => match key {
            "length" => ScriptValue::Number(s.chars().count() as f64),
            _ => key
                .parse::<usize>()
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| ScriptValue::str(c.to_string()))
                .unwrap_or_default(),
        },
        ScriptValue::Bool(_)
        | ScriptValue::Number(_)
        | ScriptValue::Function(_)
        | ScriptValue::Native(_) => ScriptValue::Null,
    })
}

fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(name) => name.to_string(),
        Expr::Member {
            object, property, ..
        } => format!("{}.{}", describe(object), property),
        Expr::Call { callee, .. } => format!("{}(...)", describe(callee)),
        _ => "expression".to_string(),
    }
}

/// JS `slice(start, end)` bounds over `len` items
fn slice_bounds(len: usize, args: &[ScriptValue]) -> (usize, usize) {
    let resolve = |arg: Option<&ScriptValue>, default: usize| -> usize {
        match arg {
            None | Some(ScriptValue::Null) => default,
            Some(v) => {
                let n = v.to_number();
                if n.is_nan() {
                    0
                } else if n < 0.0 {
                    len.saturating_sub((-n) as usize)
                } else {
                    (n as usize).min(len)
                }
            }
        }
    };
    let start = resolve(args.first(), 0);
    let end = resolve(args.get(1), len);
    (start, end.max(start))
}

/// Longest string `repeat` and `padStart`/`padEnd` may build, in chars
const MAX_STRING_LENGTH: usize = 1 << 20;

fn string_method(s: &str, name: &str, args: &[ScriptValue]) -> Option<SResult<ScriptValue>> {
    let text_arg = |i: usize| args.get(i).map(|v| v.to_display()).unwrap_or_default();
    let chars: Vec<char> = s.chars().collect();
    let value = match name {
        "toUpperCase" => ScriptValue::str(s.to_uppercase()),
        "toLowerCase" => ScriptValue::str(s.to_lowercase()),
        "trim" => ScriptValue::str(s.trim()),
        "trimStart" => ScriptValue::str(s.trim_start()),
        "trimEnd" => ScriptValue::str(s.trim_end()),
        "toString" => ScriptValue::str(s),
        "includes" => ScriptValue::Bool(s.contains(text_arg(0).as_str())),
        "startsWith" => ScriptValue::Bool(s.starts_with(text_arg(0).as_str())),
        "endsWith" => ScriptValue::Bool(s.ends_with(text_arg(0).as_str())),
        "indexOf" => ScriptValue::Number(
            s.find(text_arg(0).as_str())
                .map_or(-1.0, |byte| s[..byte].chars().count() as f64),
        ),
        "split" => match args.first() {
            None | Some(ScriptValue::Null) => ScriptValue::array(vec![ScriptValue::str(s)]),
            Some(sep) => {
                let sep = sep.to_display();
                let parts: Vec<ScriptValue> = if sep.is_empty() {
                    chars.iter().map(|c| ScriptValue::str(c.to_string())).collect()
                } else {
                    s.split(sep.as_str()).map(ScriptValue::from).collect()
                };
                ScriptValue::array(parts)
            }
        },
        "slice" | "substring" => {
            let (start, end) = if name == "substring" {
                let clamp = |v: Option<&ScriptValue>, d: usize| {
                    v.map(|v| v.to_number())
                        .filter(|n| !n.is_nan())
                        .map_or(d, |n| n.max(0.0).min(chars.len() as f64) as usize)
                };
                let (a, b) = (clamp(args.first(), 0), clamp(args.get(1), chars.len()));
                (a.min(b), a.max(b))
            } else {
                slice_bounds(chars.len(), args)
            };
            ScriptValue::str(chars[start..end].iter().collect::<String>())
        }
        "charAt" => {
            let index = args.first().map_or(0.0, |v| v.to_number());
            let c = (index >= 0.0)
                .then(|| chars.get(index as usize))
                .flatten()
                .map(|c| c.to_string())
                .unwrap_or_default();
            ScriptValue::str(c)
        }
        "padStart" | "padEnd" => {
            let target = args.first().map_or(0.0, |v| v.to_number()).max(0.0);
            if target > MAX_STRING_LENGTH as f64 {
                return Some(Err(ScriptError::Type("invalid string length".to_string())));
            }
            let target = target as usize;
            let fill = match args.get(1) {
                Some(v) if !v.is_nullish() => v.to_display(),
                _ => " ".to_string(),
            };
            if target <= chars.len() || fill.is_empty() {
                ScriptValue::str(s)
            } else {
                let padding: String = fill.chars().cycle().take(target - chars.len()).collect();
                if name == "padStart" {
                    ScriptValue::str(format!("{}{}", padding, s))
                } else {
                    ScriptValue::str(format!("{}{}", s, padding))
                }
            }
        }
        "replace" => ScriptValue::str(s.replacen(text_arg(0).as_str(), &text_arg(1), 1)),
        "replaceAll" => ScriptValue::str(s.replace(text_arg(0).as_str(), &text_arg(1))),
        "repeat" => {
            let count = args.first().map_or(0.0, |v| v.to_number());
            if !count.is_finite() || count < 0.0 {
                return Some(Err(ScriptError::Type("invalid repeat count".to_string())));
            }
            if count * chars.len() as f64 > MAX_STRING_LENGTH as f64 {
                return Some(Err(ScriptError::Type("invalid string length".to_string())));
            }
            ScriptValue::str(s.repeat(count as usize))
        }
        _ => return None,
    };
    Some(Ok(value))
}

fn number_method(n: f64, name: &str, args: &[ScriptValue]) -> Option<SResult<ScriptValue>> {
    let value = match name {
        "toFixed" => {
            let digits = args.first().map_or(0.0, |v| v.to_number());
            if !(0.0..=100.0).contains(&digits) {
                return Some(Err(ScriptError::Type("toFixed() digits out of range".to_string())));
            }
            ScriptValue::str(to_fixed(n, digits as usize))
        }
        "toString" => ScriptValue::str(number_to_string(n)),
        _ => return None,
    };
    Some(Ok(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::parser::{parse_expression, parse_program};
    use serde_json::json;

    async fn run(src: &str) -> SResult<ScriptValue> {
        let program = parse_program(src)?;
        let interp = Interpreter::new(Arc::new(NoHost), ScriptLimits::default());
        let scope = interp.root_scope();
        let result = interp.run_program(&program, &scope).await;
        interp.release();
        result
    }

    async fn json(src: &str) -> serde_json::Value {
        run(src).await.unwrap().to_json()
    }

    #[tokio::test]
    async fn arithmetic_and_strings() {
        assert_eq!(json("return 1 + 2 * 3").await, json!(7));
        assert_eq!(json("return 'a' + 1 + 2").await, json!("a12"));
        assert_eq!(json("return 7 % 4 - -1").await, json!(4));
        assert_eq!(json("return `v=${1 + 1}`").await, json!("v=2"));
    }

    #[tokio::test]
    async fn logical_operators_short_circuit() {
        assert_eq!(json("return null ?? 'd'").await, json!("d"));
        assert_eq!(json("return 0 ?? 'd'").await, json!(0));
        assert_eq!(json("return 0 || 'd'").await, json!("d"));
        assert_eq!(json("return 1 && 2").await, json!(2));
        // right side never evaluated
        assert_eq!(json("return true || missing()").await, json!(true));
    }

    #[tokio::test]
    async fn closures_capture_scope() {
        let src = "
            function counter() { let n = 0; return () => { n += 1; return n; }; }
            const next = counter();
            next(); next();
            return next();
        ";
        assert_eq!(json(src).await, json!(3));
    }

    #[tokio::test]
    async fn hoisted_function_declarations() {
        assert_eq!(json("return twice(4); function twice(x) { return x * 2; }").await, json!(8));
    }

    #[tokio::test]
    async fn objects_have_reference_semantics() {
        let src = "const a = { n: 1 }; const b = a; b.n = 5; return a.n;";
        assert_eq!(json(src).await, json!(5));
    }

    #[tokio::test]
    async fn destructuring_and_defaults() {
        let src = "
            const { a, b: renamed, c = 3 } = { a: 1, b: 2 };
            const [x, , z] = [10, 20, 30];
            const f = (p, q = 7) => p + q;
            return [a, renamed, c, x, z, f(1)];
        ";
        assert_eq!(json(src).await, json!([1, 2, 3, 10, 30, 8]));
    }

    #[tokio::test]
    async fn array_methods() {
        let src = "
            const xs = [3, 1, 2];
            return {
                mapped: xs.map(x => x * 2),
                filtered: xs.filter(x => x > 1),
                sum: xs.reduce((a, b) => a + b, 0),
                found: xs.find(x => x < 3),
                sorted: [...xs].sort((a, b) => a - b),
                joined: xs.join('-'),
                some: xs.some(x => x === 2),
                len: xs.length,
            };
        ";
        assert_eq!(
            json(src).await,
            json!({
                "mapped": [6, 2, 4],
                "filtered": [3, 2],
                "sum": 6,
                "found": 1,
                "sorted": [1, 2, 3],
                "joined": "3-1-2",
                "some": true,
                "len": 3,
            })
        );
    }

    #[tokio::test]
    async fn string_and_number_methods() {
        assert_eq!(json("return 'abc'.toUpperCase()").await, json!("ABC"));
        assert_eq!(json("return (3.14159).toFixed(2)").await, json!("3.14"));
        assert_eq!(json("return '5'.padStart(3, '0')").await, json!("005"));
        assert_eq!(json("return 'a,b'.split(',')").await, json!(["a", "b"]));
        assert_eq!(json("return 'hello'.slice(-3)").await, json!("llo"));
        assert_eq!(json("return 'ab'.repeat(3)").await, json!("ababab"));
    }

    #[tokio::test]
    async fn chained_repeat_is_capped_by_length() {
        assert_eq!(json("return 'x'.repeat(10000).length").await, json!(10000));
        let err = run("return 'x'.repeat(10000).repeat(10000)").await.unwrap_err();
        assert_eq!(err, ScriptError::Type("invalid string length".to_string()));
        assert!(run("return 'x'.padStart(1e12)").await.is_err());
    }

    #[tokio::test]
    async fn globals_are_available() {
        assert_eq!(json("return Math.max(1, 5, 3)").await, json!(5));
        assert_eq!(json("return Math.round(2.5)").await, json!(3));
        assert_eq!(json("return Object.keys({ b: 1, a: 2 })").await, json!(["a", "b"]));
        assert_eq!(json("return parseFloat('12.5 degC')").await, json!(12.5));
        assert_eq!(json("return typeof undefinedThing").await, json!("undefined"));
    }

    #[tokio::test]
    async fn undefined_identifier_is_an_error() {
        let err = run("return nope + 1").await.unwrap_err();
        assert_eq!(err, ScriptError::Undefined("nope".to_string()));
    }

    #[tokio::test]
    async fn null_access_is_an_error() {
        let err = run("const v = null; return v.x").await.unwrap_err();
        assert_eq!(err, ScriptError::NullAccess("x".to_string()));
        assert_eq!(json("const v = null; return v?.x").await, json!(null));
    }

    #[tokio::test]
    async fn const_cannot_be_reassigned() {
        let err = run("const a = 1; a = 2;").await.unwrap_err();
        assert_eq!(err, ScriptError::ConstAssignment("a".to_string()));
    }

    #[tokio::test]
    async fn throw_carries_message() {
        let err = run("throw new Error('bad value')").await.unwrap_err();
        assert_eq!(err, ScriptError::Thrown("bad value".to_string()));
    }

    #[tokio::test]
    async fn runaway_recursion_hits_call_depth() {
        let err = run("function f(n) { return f(n + 1); } return f(0);")
            .await
            .unwrap_err();
        assert_eq!(err, ScriptError::CallDepth(ScriptLimits::default().max_call_depth));
    }

    #[tokio::test]
    async fn step_budget_is_enforced() {
        let program = parse_program("const xs = [1,2,3,4,5,6,7,8,9,10]; return xs.map(x => x * 2);").unwrap();
        let limits = ScriptLimits {
            max_steps: 20,
            ..ScriptLimits::default()
        };
        let interp = Interpreter::new(Arc::new(NoHost), limits);
        let scope = interp.root_scope();
        let err = interp.run_program(&program, &scope).await.unwrap_err();
        assert_eq!(err, ScriptError::StepBudget(20));
    }

    #[tokio::test]
    async fn host_calls_route_to_host() {
        struct Echo;
        #[async_trait]
        impl ScriptHost for Echo {
            async fn call(&self, function: HostFn, args: Vec<ScriptValue>) -> SResult<ScriptValue> {
                Ok(ScriptValue::str(format!("{:?}:{}", function, args.len())))
            }
        }
        let interp = Interpreter::new(Arc::new(Echo), ScriptLimits::default());
        let scope = interp.root_scope();
        scope.declare(
            "context",
            ScriptValue::object([("get", ScriptValue::host(HostFn::Get))]),
            true,
        );
        let expr = parse_expression("context.get('Level')").unwrap();
        let value = interp.eval(&expr, &scope).await.unwrap();
        assert_eq!(value.to_display(), "Get:1");
    }

    #[tokio::test]
    async fn no_host_rejects_host_calls() {
        let interp = Interpreter::new(Arc::new(NoHost), ScriptLimits::default());
        let result = interp.call(&ScriptValue::host(HostFn::Get), vec![]).await;
        assert!(matches!(result, Err(ScriptError::Host(_))));
    }

    #[test]
    fn comparison_semantics() {
        let n = |x: f64| ScriptValue::Number(x);
        assert!(binary(BinaryOp::Lt, &n(1.0), &n(2.0)).truthy());
        assert!(!binary(BinaryOp::Lt, &n(f64::NAN), &n(2.0)).truthy());
        assert!(binary(BinaryOp::Lt, &ScriptValue::str("a"), &ScriptValue::str("b")).truthy());
        assert!(binary(BinaryOp::Ge, &ScriptValue::str("10"), &n(9.0)).truthy());
    }
}
