//! Runtime event log
//!
//! Append-only audit trail of a faceplate session.
//! - Event: envelope with id + timestamp + kind
//! - EventKind: session, evaluation and action level variants
//! - EventLog: thread-safe, cheap to clone

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single event in the session log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    // ═══════════════════════════════════════════
    // SESSION LEVEL
    // ═══════════════════════════════════════════
    FaceplateLoaded {
        faceplate_id: Arc<str>,
        entity_id: Option<Arc<str>>,
        component_count: usize,
    },
    BindingsRebuilt {
        expression_count: usize,
        target_count: usize,
    },
    ModulesCompiled {
        compiled: usize,
        failed: usize,
    },
    NotificationsRegistered {
        direct: usize,
        indirect: usize,
    },
    RuntimeTornDown,

    // ═══════════════════════════════════════════
    // EVALUATION LEVEL
    // ═══════════════════════════════════════════
    ExpressionEvaluated {
        key: Arc<str>,
        value: Value,
    },
    ExpressionFailed {
        key: Arc<str>,
        error: String,
    },

    // ═══════════════════════════════════════════
    // ACTION LEVEL
    // ═══════════════════════════════════════════
    ActionExecuted {
        component: Arc<str>,
        handler: Arc<str>,
        action: String,
    },
    ActionFailed {
        component: Arc<str>,
        handler: Arc<str>,
        error: String,
    },
    /// Host should open `faceplate_id` for `entity_id`
    NavigationRequested {
        faceplate_id: String,
        entity_id: Option<String>,
    },
}

impl EventKind {
    /// Expression key if the event is evaluation-related
    pub fn expression_key(&self) -> Option<&str> {
        match self {
            Self::ExpressionEvaluated { key, .. } | Self::ExpressionFailed { key, .. } => Some(key),
            _ => None,
        }
    }

    pub fn is_action_event(&self) -> bool {
        matches!(
            self,
            Self::ActionExecuted { .. } | Self::ActionFailed { .. } | Self::NavigationRequested { .. }
        )
    }
}

/// Thread-safe, append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an event, returning its ID
    pub fn emit(&self, kind: EventKind) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };
        self.events.write().push(event);
        id
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Events touching one expression key
    pub fn filter_expression(&self, key: &str) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.expression_key() == Some(key))
            .cloned()
            .collect()
    }

    pub fn action_events(&self) -> Vec<Event> {
        self.events
            .read()
            .iter()
            .filter(|e| e.kind.is_action_event())
            .cloned()
            .collect()
    }

    /// Navigation requests in emission order
    pub fn navigation_requests(&self) -> Vec<(String, Option<String>)> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match &e.kind {
                EventKind::NavigationRequested {
                    faceplate_id,
                    entity_id,
                } => Some((faceplate_id.clone(), entity_id.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}
