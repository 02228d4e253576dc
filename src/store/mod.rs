//! Store Module - the external entity/field store seen by the runtime
//!
//! - `FieldStore`: async trait the runtime reads, writes and subscribes through
//! - `MemoryStore`: complete in-memory implementation (tests, CLI `eval`)
//! - `IndirectNotifier`: multi-hop (`A->B->C`) change notifications
//!
//! Field paths are resolved to `FieldType`s before they reach the store; a
//! multi-element path follows entity references for every hop but the last.

mod indirect;
mod memory;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{FaceplateError, Result};
use crate::util::number_value;

pub use indirect::IndirectNotifier;
pub use memory::{MemoryStore, WriteRecord};

/// A field known to the store schema
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldType {
    pub id: u64,
    pub name: Arc<str>,
}

impl FieldType {
    pub fn new(id: u64, name: &str) -> Self {
        Self {
            id,
            name: Arc::from(name),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Tagged value as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Timestamp(DateTime<Utc>),
    EntityReference(Option<String>),
    EntityList(Vec<String>),
}

impl FieldValue {
    /// Unwrap to the JSON value bindings see
    ///
    /// Timestamps become RFC 3339 strings, references the referenced id.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null | Self::EntityReference(None) => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => number_value(*f),
            Self::String(s) => Value::String(s.clone()),
            Self::Timestamp(ts) => Value::String(ts.to_rfc3339()),
            Self::EntityReference(Some(id)) => Value::String(id.clone()),
            Self::EntityList(ids) => Value::Array(ids.iter().cloned().map(Value::String).collect()),
        }
    }

    /// Wrap a JSON value for writing
    ///
    /// `{ref: id}` is an entity reference, `{timestamp: rfc3339}` a timestamp,
    /// an array a list of entity ids. Other objects are stored as JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Self::String(s.clone()),
            Value::Array(items) => Self::EntityList(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            Value::Object(map) => {
                if let Some(reference) = map.get("ref") {
                    return Self::EntityReference(reference.as_str().map(str::to_string));
                }
                if let Some(ts) = map
                    .get("timestamp")
                    .and_then(Value::as_str)
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                {
                    return Self::Timestamp(ts.with_timezone(&Utc));
                }
                Self::String(value.to_string())
            }
        }
    }

    /// Referenced entity when this is a non-empty reference
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            Self::EntityReference(Some(id)) => Some(id),
            _ => None,
        }
    }
}

/// Opaque handle returned by `register_notification`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NotificationToken(pub u64);

/// What to watch
#[derive(Debug, Clone, PartialEq)]
pub struct NotifyConfig {
    pub entity_id: String,
    pub field: FieldType,
    /// Only fire when the value actually changed
    pub trigger_on_change: bool,
    /// Extra fields read and attached to each notification
    pub context_fields: Vec<FieldType>,
}

impl NotifyConfig {
    pub fn on_change(entity_id: impl Into<String>, field: FieldType) -> Self {
        Self {
            entity_id: entity_id.into(),
            field,
            trigger_on_change: true,
            context_fields: Vec::new(),
        }
    }
}

/// Delivered to a callback after a watched field is written
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub config: NotifyConfig,
    pub current: FieldValue,
    pub previous: Option<FieldValue>,
    pub context: Vec<(FieldType, FieldValue)>,
}

pub type NotifyCallback = Arc<dyn Fn(Notification) -> BoxFuture<'static, ()> + Send + Sync>;

/// Entity/field store the runtime is bound to
#[async_trait]
pub trait FieldStore: Send + Sync {
    /// Read the value at the end of `path`, following references between hops
    async fn read(&self, entity_id: &str, path: &[FieldType]) -> Result<FieldValue>;

    async fn write(&self, entity_id: &str, field: &FieldType, value: FieldValue) -> Result<()>;

    /// Write through a multi-hop path: follow references, write the last hop
    async fn write_indirect(
        &self,
        entity_id: &str,
        path: &[FieldType],
        value: FieldValue,
    ) -> Result<()> {
        let Some((last, hops)) = path.split_last() else {
            return Err(FaceplateError::WriteFailed {
                entity_id: entity_id.to_string(),
                path: String::new(),
                reason: "empty field path".to_string(),
            });
        };
        let mut current = entity_id.to_string();
        for hop in hops {
            let link = self.read(&current, std::slice::from_ref(hop)).await?;
            match link.as_reference() {
                Some(next) => current = next.to_string(),
                None => {
                    return Err(FaceplateError::BrokenReference {
                        entity_id: current,
                        field: hop.name.to_string(),
                    })
                }
            }
        }
        self.write(&current, last, value).await
    }

    async fn register_notification(
        &self,
        config: NotifyConfig,
        callback: NotifyCallback,
    ) -> Result<NotificationToken>;

    async fn unregister_notification(&self, token: NotificationToken) -> Result<()>;

    /// Schema lookup by field name
    async fn field_type(&self, name: &str) -> Option<FieldType>;

    async fn entity_type(&self, entity_id: &str) -> Result<String>;

    /// Ids of every entity of a type, in a stable order
    async fn find_entities(&self, entity_type: &str) -> Result<Vec<String>>;
}

/// Render a resolved path back to `A->B` form
pub fn path_display(path: &[FieldType]) -> String {
    path.iter()
        .map(|f| f.name.as_ref())
        .collect::<Vec<_>>()
        .join("->")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unwraps_to_json() {
        assert_eq!(FieldValue::Float(100.0).to_json(), json!(100));
        assert_eq!(FieldValue::Float(1.5).to_json(), json!(1.5));
        assert_eq!(FieldValue::EntityReference(Some("T-1".into())).to_json(), json!("T-1"));
        assert_eq!(FieldValue::EntityReference(None).to_json(), Value::Null);
        assert_eq!(
            FieldValue::EntityList(vec!["a".into(), "b".into()]).to_json(),
            json!(["a", "b"])
        );
    }

    #[test]
    fn timestamps_become_rfc3339() {
        let ts = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            FieldValue::Timestamp(ts).to_json(),
            json!("2024-05-01T12:00:00+00:00")
        );
    }

    #[test]
    fn wraps_from_json() {
        assert_eq!(FieldValue::from_json(&json!(3)), FieldValue::Int(3));
        assert_eq!(FieldValue::from_json(&json!(2.5)), FieldValue::Float(2.5));
        assert_eq!(FieldValue::from_json(&json!(null)), FieldValue::Null);
        assert_eq!(
            FieldValue::from_json(&json!({"ref": "Site-1"})),
            FieldValue::EntityReference(Some("Site-1".into()))
        );
        assert!(matches!(
            FieldValue::from_json(&json!({"timestamp": "2024-05-01T12:00:00Z"})),
            FieldValue::Timestamp(_)
        ));
    }

    #[test]
    fn path_display_joins_hops() {
        let path = vec![FieldType::new(1, "Parent"), FieldType::new(2, "Level")];
        assert_eq!(path_display(&path), "Parent->Level");
    }
}
