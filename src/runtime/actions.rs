//! Event/action executor
//!
//! Interaction events are queued and drained by a single worker task, so two
//! handlers never run at the same time and they complete in enqueue order.
//! A failing handler is recorded and the queue moves on.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::ast::{Action, EventHandler, ValueSource};
use crate::error::{FaceplateError, Result};
use crate::event::EventKind;
use crate::script::{run_body, HostFn, ScriptError, ScriptHost, ScriptValue};
use crate::store::FieldValue;

use super::diagnostics::RuntimeErrorKind;
use super::engine::{module_call, string_arg, Engine};

/// One interaction event from the renderer
#[derive(Debug, Clone, PartialEq)]
pub struct EventPayload {
    pub component: String,
    pub handler: EventHandler,
    /// Value supplied by the component (toggle state, slider position, ...)
    pub value: Option<Value>,
    /// Native event details, passed to scripts as `event`
    pub event: Option<Value>,
}

impl EventPayload {
    pub fn new(component: impl Into<String>, handler: EventHandler) -> Self {
        Self {
            component: component.into(),
            handler,
            value: None,
            event: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_event(mut self, event: Value) -> Self {
        self.event = Some(event);
        self
    }
}

enum QueueItem {
    Event(Box<EventPayload>),
    Flush(oneshot::Sender<()>),
}

/// FIFO queue with a lazily started worker
pub struct ActionQueue {
    engine: Arc<Engine>,
    sender: mpsc::UnboundedSender<QueueItem>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueueItem>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl ActionQueue {
    pub fn new(engine: Arc<Engine>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            engine,
            sender,
            receiver: Mutex::new(Some(receiver)),
            worker: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Queue an event; must be called from within a Tokio runtime
    pub fn enqueue(&self, payload: EventPayload) -> Result<()> {
        self.ensure_worker();
        self.sender
            .send(QueueItem::Event(Box::new(payload)))
            .map_err(|_| FaceplateError::ActionFailed {
                handler: "queue".to_string(),
                reason: "action queue is shut down".to_string(),
            })
    }

    /// Wait until every event queued before this call has been handled
    pub async fn flush(&self) {
        self.ensure_worker();
        let (tx, rx) = oneshot::channel();
        if self.sender.send(QueueItem::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop the worker; queued events that have not started are dropped
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Action worker ended abnormally");
            }
        }
    }

    fn ensure_worker(&self) {
        let Some(receiver) = self.receiver.lock().take() else {
            return;
        };
        let engine = Arc::clone(&self.engine);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(drain(engine, receiver, cancel));
        *self.worker.lock() = Some(handle);
    }
}

async fn drain(engine: Arc<Engine>, mut receiver: mpsc::UnboundedReceiver<QueueItem>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = receiver.recv() => match item {
                None => break,
                Some(QueueItem::Flush(done)) => {
                    let _ = done.send(());
                }
                Some(QueueItem::Event(payload)) => execute(&engine, *payload).await,
            },
        }
    }
    debug!("Action worker stopped");
}

#[instrument(skip_all, fields(handler = %payload.handler.id, action = payload.handler.action.kind()))]
async fn execute(engine: &Arc<Engine>, payload: EventPayload) {
    if !payload.handler.enabled {
        debug!("Handler disabled, skipping");
        return;
    }

    let result = match &payload.handler.action {
        Action::WriteField { field, source } => write_field(engine, field, source, &payload).await,
        Action::Script { code } => run_script(engine, code, &payload).await,
        Action::Navigate {
            faceplate,
            entity,
            entity_type,
        } => navigate(engine, faceplate, entity.as_deref(), entity_type.as_deref()).await,
    };

    let handler: Arc<str> = Arc::from(payload.handler.id.as_str());
    let component: Arc<str> = Arc::from(payload.component.as_str());
    match result {
        Ok(()) => engine.emit(EventKind::ActionExecuted {
            component,
            handler,
            action: payload.handler.action.kind().to_string(),
        }),
        Err(e) => {
            warn!(error = %e, "Action failed");
            engine
                .diagnostics()
                .record_runtime(RuntimeErrorKind::Action, &*handler, e.to_string());
            engine.emit(EventKind::ActionFailed {
                component,
                handler,
                error: e.to_string(),
            });
        }
    }
}

async fn write_field(engine: &Arc<Engine>, field: &str, source: &ValueSource, payload: &EventPayload) -> Result<()> {
    let value = match source {
        ValueSource::Component => payload.value.clone().unwrap_or(Value::Null),
        ValueSource::Literal { value } => value.clone(),
        ValueSource::Expression { expression } => engine.evaluate_text(expression, &[]).await,
    };
    write_path(engine, field, &value).await
}

/// Write `value` to a field path of the bound entity (indirect for `A->B`)
async fn write_path(engine: &Engine, field: &str, value: &Value) -> Result<()> {
    let entity_id = engine.entity_id().ok_or(FaceplateError::NoEntity)?;
    let path = engine.resolver().resolve(field).await;
    let Some(last) = path.last() else {
        return Err(FaceplateError::UnresolvablePath {
            expression: field.to_string(),
        });
    };
    let value = FieldValue::from_json(value);
    if path.len() > 1 {
        engine.store().write_indirect(&entity_id, &path, value).await
    } else {
        engine.store().write(&entity_id, last, value).await
    }
}

async fn run_script(engine: &Arc<Engine>, code: &str, payload: &EventPayload) -> Result<()> {
    let label = format!("action:{}", payload.handler.id);
    let program = engine.scripts().body(code).map_err(|e| FaceplateError::ScriptCompile {
        label: label.clone(),
        message: e.to_string(),
    })?;

    let context = ScriptValue::object([
        (
            "entityId",
            engine.entity_id().map_or(ScriptValue::Null, ScriptValue::Str),
        ),
        (
            "faceplateId",
            engine.faceplate_id().map_or(ScriptValue::Null, ScriptValue::Str),
        ),
        ("component", ScriptValue::str(payload.component.as_str())),
        ("get", ScriptValue::host(HostFn::Get)),
        ("set", ScriptValue::host(HostFn::Set)),
        ("getState", ScriptValue::host(HostFn::GetState)),
        ("setState", ScriptValue::host(HostFn::SetState)),
        ("module", ScriptValue::host(HostFn::Module)),
        ("modules", ScriptValue::host(HostFn::Modules)),
    ]);
    let globals = vec![
        ("context", context),
        ("value", payload.value.as_ref().map(ScriptValue::from_json).unwrap_or_default()),
        ("event", payload.event.as_ref().map(ScriptValue::from_json).unwrap_or_default()),
    ];
    let host = Arc::new(ActionHost {
        engine: Arc::clone(engine),
        bucket: label.clone(),
    });

    run_body(&program, host, engine.config().script, globals)
        .await
        .map(|_| ())
        .map_err(|e| FaceplateError::ScriptRuntime {
            label,
            message: e.to_string(),
        })
}

async fn navigate(
    engine: &Arc<Engine>,
    faceplate: &str,
    entity: Option<&str>,
    entity_type: Option<&str>,
) -> Result<()> {
    let faceplate = faceplate.trim();
    if faceplate.is_empty() {
        return Err(FaceplateError::NavigationTarget {
            reason: "no target faceplate".to_string(),
        });
    }

    let entity_id = match (entity.filter(|e| !e.trim().is_empty()), entity_type) {
        (Some(expression), _) => match engine.evaluate_text(expression, &[]).await {
            Value::Null => {
                return Err(FaceplateError::NavigationTarget {
                    reason: format!("entity expression '{}' resolved to null", expression),
                })
            }
            Value::String(id) => Some(id),
            other => Some(other.to_string()),
        },
        (None, Some(entity_type)) => {
            let entities = engine.store().find_entities(entity_type).await?;
            let first = entities.into_iter().next().ok_or_else(|| FaceplateError::NavigationTarget {
                reason: format!("no entity of type '{}'", entity_type),
            })?;
            Some(first)
        }
        (None, None) => None,
    };

    debug!(faceplate, entity = ?entity_id, "Navigation requested");
    engine.emit(EventKind::NavigationRequested {
        faceplate_id: faceplate.to_string(),
        entity_id,
    });
    Ok(())
}

/// Host functions of an action script: `get`, `set`, state, modules
struct ActionHost {
    engine: Arc<Engine>,
    bucket: String,
}

#[async_trait]
impl ScriptHost for ActionHost {
    async fn call(&self, function: HostFn, args: Vec<ScriptValue>) -> std::result::Result<ScriptValue, ScriptError> {
        let engine = &self.engine;
        match function {
            HostFn::Get => {
                let path = string_arg(&args, 0, "get")?;
                Ok(ScriptValue::from_json(&engine.get_path(&path, &[]).await))
            }
            HostFn::Set => {
                let path = string_arg(&args, 0, "set")?;
                let value = args.get(1).map(ScriptValue::to_json).unwrap_or(Value::Null);
                write_path(engine, &path, &value)
                    .await
                    .map(|_| ScriptValue::Null)
                    .map_err(|e| ScriptError::Host(e.to_string()))
            }
            HostFn::SetState => {
                let name = string_arg(&args, 0, "setState")?;
                let value = args.get(1).map(ScriptValue::to_json).unwrap_or(Value::Null);
                engine.set_state(&self.bucket, &name, value);
                Ok(ScriptValue::Null)
            }
            HostFn::GetState => {
                let name = string_arg(&args, 0, "getState")?;
                Ok(match engine.get_state(&self.bucket, &name) {
                    Some(value) => ScriptValue::from_json(&value),
                    None => args.get(1).cloned().unwrap_or_default(),
                })
            }
            other => module_call(&engine.modules(), other, &args).unwrap_or_else(|| {
                Err(ScriptError::Host(format!(
                    "{:?} is not available in action scripts",
                    other
                )))
            }),
        }
    }
}
