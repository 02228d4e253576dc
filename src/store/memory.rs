//! In-memory field store
//!
//! DashMap-backed implementation of `FieldStore`. Writes await the callbacks
//! of matching subscriptions before returning, so a test that writes and then
//! inspects the runtime sees the propagated values.
//!
//! Seed from YAML:
//! ```yaml
//! entities:
//!   - id: T-1
//!     type: Tank
//!     fields:
//!       Level: 42
//!       Parent: { ref: Site-1 }
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{FaceplateError, Result};

use super::{
    FieldStore, FieldType, FieldValue, Notification, NotificationToken, NotifyCallback,
    NotifyConfig,
};

#[derive(Debug, Clone, Default)]
struct StoredEntity {
    entity_type: String,
    /// field id → value
    fields: FxHashMap<u64, FieldValue>,
}

struct Subscription {
    config: NotifyConfig,
    callback: NotifyCallback,
}

/// One applied write, in order
#[derive(Debug, Clone, PartialEq)]
pub struct WriteRecord {
    pub entity_id: String,
    pub field: String,
    pub value: FieldValue,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    #[serde(default)]
    schema: Vec<String>,
    #[serde(default)]
    entities: Vec<EntitySeed>,
}

#[derive(Debug, Deserialize)]
struct EntitySeed {
    id: String,
    #[serde(rename = "type", default)]
    entity_type: String,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

#[derive(Default)]
pub struct MemoryStore {
    schema: DashMap<Arc<str>, FieldType>,
    next_field_id: AtomicU64,
    entities: DashMap<String, StoredEntity>,
    subscriptions: DashMap<u64, Subscription>,
    next_token: AtomicU64,
    reads: AtomicUsize,
    read_delay: RwLock<Option<Duration>>,
    /// field name → artificial write latency
    write_delays: DashMap<String, Duration>,
    write_log: RwLock<Vec<WriteRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a YAML snapshot
    pub fn from_yaml(content: &str) -> Result<Self> {
        let snapshot: Snapshot = serde_yaml::from_str(content)?;
        let store = Self::new();
        for name in &snapshot.schema {
            store.define_field(name);
        }
        for seed in snapshot.entities {
            store.insert_entity(&seed.id, &seed.entity_type);
            for (field, value) in &seed.fields {
                store.set(&seed.id, field, FieldValue::from_json(value));
            }
        }
        Ok(store)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Define a field (idempotent)
    pub fn define_field(&self, name: &str) -> FieldType {
        let name = name.trim();
        if let Some(existing) = self.schema.get(name) {
            return existing.clone();
        }
        self.schema
            .entry(Arc::from(name))
            .or_insert_with(|| {
                let id = self.next_field_id.fetch_add(1, Ordering::SeqCst) + 1;
                FieldType::new(id, name)
            })
            .clone()
    }

    pub fn insert_entity(&self, entity_id: &str, entity_type: &str) {
        self.entities
            .entry(entity_id.to_string())
            .or_default()
            .entity_type = entity_type.to_string();
    }

    /// Seed a value without notifying (defines the field when missing)
    pub fn set(&self, entity_id: &str, field: &str, value: FieldValue) {
        let field = self.define_field(field);
        self.entities
            .entry(entity_id.to_string())
            .or_default()
            .fields
            .insert(field.id, value);
    }

    /// Current value of a single field, bypassing the read counter
    pub fn peek(&self, entity_id: &str, field: &str) -> Option<FieldValue> {
        let field = self.schema.get(field)?.clone();
        self.entities.get(entity_id)?.fields.get(&field.id).cloned()
    }

    /// Number of `read` calls served so far
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn set_read_delay(&self, delay: Option<Duration>) {
        *self.read_delay.write() = delay;
    }

    pub fn set_write_delay(&self, field: &str, delay: Duration) {
        self.write_delays.insert(field.to_string(), delay);
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        self.write_log.read().clone()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    fn read_hop(&self, entity_id: &str, field: &FieldType) -> Result<FieldValue> {
        let entity = self
            .entities
            .get(entity_id)
            .ok_or_else(|| FaceplateError::EntityNotFound {
                entity_id: entity_id.to_string(),
            })?;
        entity
            .fields
            .get(&field.id)
            .cloned()
            .ok_or_else(|| FaceplateError::FieldNotFound {
                entity_id: entity_id.to_string(),
                field: field.name.to_string(),
            })
    }

    fn context_values(&self, config: &NotifyConfig) -> Vec<(FieldType, FieldValue)> {
        config
            .context_fields
            .iter()
            .map(|field| {
                let value = self
                    .read_hop(&config.entity_id, field)
                    .unwrap_or(FieldValue::Null);
                (field.clone(), value)
            })
            .collect()
    }
}

#[async_trait]
impl FieldStore for MemoryStore {
    async fn read(&self, entity_id: &str, path: &[FieldType]) -> Result<FieldValue> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let delay = *self.read_delay.read();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let Some((last, hops)) = path.split_last() else {
            return Err(FaceplateError::UnresolvablePath {
                expression: String::new(),
            });
        };
        let mut current = entity_id.to_string();
        for hop in hops {
            let link = self.read_hop(&current, hop)?;
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
        self.read_hop(&current, last)
    }

    async fn write(&self, entity_id: &str, field: &FieldType, value: FieldValue) -> Result<()> {
        let delay = self.write_delays.get(&*field.name).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let previous = {
            let mut entity =
                self.entities
                    .get_mut(entity_id)
                    .ok_or_else(|| FaceplateError::EntityNotFound {
                        entity_id: entity_id.to_string(),
                    })?;
            entity.fields.insert(field.id, value.clone())
        };
        self.write_log.write().push(WriteRecord {
            entity_id: entity_id.to_string(),
            field: field.name.to_string(),
            value: value.clone(),
        });

        let changed = previous.as_ref() != Some(&value);
        let pending: Vec<(NotifyCallback, Notification)> = self
            .subscriptions
            .iter()
            .filter(|sub| sub.config.entity_id == entity_id && sub.config.field.id == field.id)
            .filter(|sub| changed || !sub.config.trigger_on_change)
            .map(|sub| {
                let notification = Notification {
                    config: sub.config.clone(),
                    current: value.clone(),
                    previous: previous.clone(),
                    context: self.context_values(&sub.config),
                };
                (Arc::clone(&sub.callback), notification)
            })
            .collect();

        for (callback, notification) in pending {
            callback(notification).await;
        }
        Ok(())
    }

    async fn register_notification(
        &self,
        config: NotifyConfig,
        callback: NotifyCallback,
    ) -> Result<NotificationToken> {
        if !self.entities.contains_key(&config.entity_id) {
            return Err(FaceplateError::NotificationFailed {
                operation: "register".to_string(),
                reason: format!("entity '{}' not found", config.entity_id),
            });
        }
        let token = self.next_token.fetch_add(1, Ordering::SeqCst) + 1;
        self.subscriptions
            .insert(token, Subscription { config, callback });
        Ok(NotificationToken(token))
    }

    async fn unregister_notification(&self, token: NotificationToken) -> Result<()> {
        self.subscriptions
            .remove(&token.0)
            .map(|_| ())
            .ok_or_else(|| FaceplateError::NotificationFailed {
                operation: "unregister".to_string(),
                reason: format!("unknown token {}", token.0),
            })
    }

    async fn field_type(&self, name: &str) -> Option<FieldType> {
        self.schema.get(name.trim()).map(|f| f.clone())
    }

    async fn entity_type(&self, entity_id: &str) -> Result<String> {
        self.entities
            .get(entity_id)
            .map(|e| e.entity_type.clone())
            .ok_or_else(|| FaceplateError::EntityNotFound {
                entity_id: entity_id.to_string(),
            })
    }

    async fn find_entities(&self, entity_type: &str) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .entities
            .iter()
            .filter(|e| e.entity_type == entity_type)
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("fields", &self.schema.len())
            .field("entities", &self.entities.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use parking_lot::Mutex;

    const SNAPSHOT: &str = r#"
entities:
  - id: Site-1
    type: Site
    fields:
      Name: North
  - id: T-1
    type: Tank
    fields:
      Level: 42
      Parent: { ref: Site-1 }
  - id: T-2
    type: Tank
"#;

    fn recorder() -> (NotifyCallback, Arc<Mutex<Vec<FieldValue>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: NotifyCallback = Arc::new(move |n: Notification| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().push(n.current);
            }
            .boxed()
        });
        (callback, seen)
    }

    #[tokio::test]
    async fn reads_follow_references() {
        let store = MemoryStore::from_yaml(SNAPSHOT).unwrap();
        let parent = store.field_type("Parent").await.unwrap();
        let name = store.field_type("Name").await.unwrap();
        let value = store.read("T-1", &[parent, name]).await.unwrap();
        assert_eq!(value, FieldValue::String("North".to_string()));
        assert_eq!(store.read_count(), 1);
    }

    #[tokio::test]
    async fn broken_reference_is_an_error() {
        let store = MemoryStore::from_yaml(SNAPSHOT).unwrap();
        let level = store.field_type("Level").await.unwrap();
        let name = store.field_type("Name").await.unwrap();
        let err = store.read("T-1", &[level, name]).await.unwrap_err();
        assert_eq!(err.code(), "FPL-013");
    }

    #[tokio::test]
    async fn missing_field_and_entity() {
        let store = MemoryStore::from_yaml(SNAPSHOT).unwrap();
        let level = store.field_type("Level").await.unwrap();
        assert_eq!(store.read("T-2", &[level.clone()]).await.unwrap_err().code(), "FPL-012");
        assert_eq!(store.read("nope", &[level]).await.unwrap_err().code(), "FPL-011");
        assert!(store.field_type("Unknown").await.is_none());
    }

    #[tokio::test]
    async fn write_notifies_on_change_only() {
        let store = MemoryStore::from_yaml(SNAPSHOT).unwrap();
        let level = store.field_type("Level").await.unwrap();
        let (callback, seen) = recorder();
        store
            .register_notification(NotifyConfig::on_change("T-1", level.clone()), callback)
            .await
            .unwrap();

        store.write("T-1", &level, FieldValue::Int(42)).await.unwrap();
        store.write("T-1", &level, FieldValue::Int(50)).await.unwrap();

        assert_eq!(*seen.lock(), vec![FieldValue::Int(50)]);
        assert_eq!(store.writes().len(), 2);
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let store = MemoryStore::from_yaml(SNAPSHOT).unwrap();
        let level = store.field_type("Level").await.unwrap();
        let (callback, seen) = recorder();
        let token = store
            .register_notification(NotifyConfig::on_change("T-1", level.clone()), callback)
            .await
            .unwrap();
        store.unregister_notification(token).await.unwrap();
        store.write("T-1", &level, FieldValue::Int(1)).await.unwrap();

        assert!(seen.lock().is_empty());
        assert!(store.unregister_notification(token).await.is_err());
    }

    #[tokio::test]
    async fn write_indirect_follows_hops() {
        let store = MemoryStore::from_yaml(SNAPSHOT).unwrap();
        let parent = store.field_type("Parent").await.unwrap();
        let name = store.field_type("Name").await.unwrap();
        store
            .write_indirect("T-1", &[parent, name], FieldValue::String("South".into()))
            .await
            .unwrap();
        assert_eq!(
            store.peek("Site-1", "Name"),
            Some(FieldValue::String("South".into()))
        );
    }

    #[tokio::test]
    async fn find_entities_by_type() {
        let store = MemoryStore::from_yaml(SNAPSHOT).unwrap();
        assert_eq!(store.find_entities("Tank").await.unwrap(), vec!["T-1", "T-2"]);
        assert_eq!(store.entity_type("Site-1").await.unwrap(), "Site");
    }
}
