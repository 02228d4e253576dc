//! Live field-change subscriptions
//!
//! Subscriptions are never diffed: every refresh tears down all previous
//! registrations, then registers one per distinct dependency of the current
//! binding map. Registration and teardown failures are logged only.

use std::sync::{Arc, Weak};

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use rustc_hash::FxHashSet;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::ast::BindingMode;
use crate::binding::is_literal;
use crate::error::Result;
use crate::event::EventKind;
use crate::store::{IndirectNotifier, Notification, NotificationToken, NotifyCallback, NotifyConfig};

use super::engine::Engine;

#[derive(Default)]
struct Subscriptions {
    direct: Vec<NotificationToken>,
    indirect: Vec<Arc<IndirectNotifier>>,
}

/// Owns the store registrations of one runtime session
pub struct NotificationManager {
    engine: Arc<Engine>,
    subscriptions: Mutex<Subscriptions>,
}

impl NotificationManager {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            subscriptions: Mutex::new(Subscriptions::default()),
        }
    }

    /// Replace all subscriptions for the current map and entity
    ///
    /// Returns `(direct, indirect)` registration counts. Nothing is registered
    /// when live mode is off or no entity is bound.
    #[instrument(skip(self, extra_fields), fields(generation = self.engine.generation()))]
    pub async fn refresh(&self, live: bool, extra_fields: &[String]) -> (usize, usize) {
        let mut subscriptions = self.subscriptions.lock().await;
        self.teardown_locked(&mut subscriptions).await;

        let Some(entity_id) = self.engine.entity_id().filter(|_| live) else {
            return (0, 0);
        };
        let generation = self.engine.generation();
        let store = Arc::clone(self.engine.store());

        for dependency in self.dependencies(extra_fields) {
            if is_literal(&dependency) {
                continue;
            }
            let path = self.engine.resolver().resolve(&dependency).await;
            if path.is_empty() {
                debug!(dependency = %dependency, "Skipping unresolvable dependency");
                continue;
            }
            let callback = dependency_callback(Arc::downgrade(&self.engine), dependency.clone(), generation);

            if path.len() > 1 {
                match IndirectNotifier::register(Arc::clone(&store), entity_id.to_string(), path.to_vec(), callback).await {
                    Ok(notifier) => subscriptions.indirect.push(notifier),
                    Err(e) => warn!(dependency = %dependency, error = %e, "Indirect registration failed"),
                }
            } else {
                let config = NotifyConfig::on_change(entity_id.to_string(), path[0].clone());
                match store.register_notification(config, callback).await {
                    Ok(token) => subscriptions.direct.push(token),
                    Err(e) => warn!(dependency = %dependency, error = %e, "Registration failed"),
                }
            }
        }

        let counts = (subscriptions.direct.len(), subscriptions.indirect.len());
        info!(direct = counts.0, indirect = counts.1, "Notifications registered");
        self.engine.emit(EventKind::NotificationsRegistered {
            direct: counts.0,
            indirect: counts.1,
        });
        counts
    }

    /// Drop every subscription
    pub async fn teardown(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        self.teardown_locked(&mut subscriptions).await;
    }

    pub async fn counts(&self) -> (usize, usize) {
        let subscriptions = self.subscriptions.lock().await;
        (subscriptions.direct.len(), subscriptions.indirect.len())
    }

    async fn teardown_locked(&self, subscriptions: &mut Subscriptions) {
        let store = Arc::clone(self.engine.store());
        let mut pending: Vec<BoxFuture<'_, Result<()>>> = Vec::new();
        for token in std::mem::take(&mut subscriptions.direct) {
            let store = Arc::clone(&store);
            pending.push(async move { store.unregister_notification(token).await }.boxed());
        }
        for notifier in std::mem::take(&mut subscriptions.indirect) {
            pending.push(async move { notifier.unregister().await }.boxed());
        }
        for result in join_all(pending).await {
            if let Err(e) = result {
                warn!(error = %e, "Notification teardown failed");
            }
        }
    }

    /// Distinct dependencies: field expressions, declared script dependencies, channel fields
    fn dependencies(&self, extra_fields: &[String]) -> Vec<String> {
        let map = self.engine.binding_map();
        let mut seen = FxHashSet::default();
        let mut dependencies = Vec::new();

        let declared = map.keys().iter().filter_map(|key| map.meta(key)).filter(|meta| {
            matches!(meta.mode, BindingMode::Field | BindingMode::Script)
        });
        for dependency in declared
            .flat_map(|meta| meta.dependencies.iter().cloned())
            .chain(extra_fields.iter().cloned())
        {
            if seen.insert(dependency.clone()) {
                dependencies.push(dependency);
            }
        }
        dependencies
    }
}

fn dependency_callback(engine: Weak<Engine>, dependency: String, generation: u64) -> NotifyCallback {
    Arc::new(move |notification: Notification| {
        let engine = engine.clone();
        let dependency = dependency.clone();
        async move {
            let Some(engine) = engine.upgrade() else {
                return;
            };
            let value = notification.current.to_json();
            engine
                .on_dependency_changed(&dependency, value, generation)
                .await;
        }
        .boxed()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Binding;
    use crate::config::RuntimeConfig;
    use crate::event::NoopEmitter;
    use crate::store::{FieldStore, FieldValue, MemoryStore};
    use serde_json::json;

    fn store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        for field in ["Level", "Parent", "Status", "Alarm"] {
            store.define_field(field);
        }
        store.insert_entity("tank-1", "Tank");
        store.insert_entity("site-1", "Site");
        store.set("tank-1", "Level", FieldValue::Float(1.0));
        store.set("tank-1", "Parent", FieldValue::EntityReference(Some("site-1".into())));
        store.set("site-1", "Status", FieldValue::String("ok".into()));
        Arc::new(store)
    }

    fn engine(store: &Arc<MemoryStore>, bindings: &[Binding]) -> Arc<Engine> {
        let engine = Engine::new(store.clone(), RuntimeConfig::default(), Arc::new(NoopEmitter::new()));
        engine.set_entity_id(Some("tank-1"));
        engine.rebuild(bindings);
        engine
    }

    #[tokio::test]
    async fn registers_direct_and_indirect() {
        let store = store();
        let engine = engine(
            &store,
            &[
                Binding::new("g", "value", "Level"),
                Binding::new("t", "text", "Parent->Status"),
                Binding::new("l", "text", "'literal'"),
                Binding::new("u", "text", "Unknown"),
            ],
        );
        let manager = NotificationManager::new(engine);
        let (direct, indirect) = manager.refresh(true, &["Alarm".to_string()]).await;
        assert_eq!((direct, indirect), (2, 1));
        // Level, Alarm, plus the two hops of Parent->Status
        assert_eq!(store.subscription_count(), 4);
    }

    #[tokio::test]
    async fn refresh_replaces_previous_subscriptions() {
        let store = store();
        let engine = engine(&store, &[Binding::new("g", "value", "Level")]);
        let manager = NotificationManager::new(engine);
        manager.refresh(true, &[]).await;
        manager.refresh(true, &[]).await;
        assert_eq!(store.subscription_count(), 1);
        manager.teardown().await;
        assert_eq!(store.subscription_count(), 0);
    }

    #[tokio::test]
    async fn live_off_registers_nothing() {
        let store = store();
        let engine = engine(&store, &[Binding::new("g", "value", "Level")]);
        let manager = NotificationManager::new(engine);
        assert_eq!(manager.refresh(false, &[]).await, (0, 0));
        assert_eq!(store.subscription_count(), 0);
    }

    #[tokio::test]
    async fn change_updates_bound_value() {
        let store = store();
        let engine = engine(
            &store,
            &[
                Binding::new("g", "value", "Level"),
                Binding::new("x", "value", "script: context.get('Level') * 10").with_dependencies(["Level"]),
            ],
        );
        engine.evaluate_all().await;
        let manager = NotificationManager::new(Arc::clone(&engine));
        manager.refresh(true, &[]).await;

        let level = store.field_type("Level").await.unwrap();
        store.write("tank-1", &level, FieldValue::Float(7.0)).await.unwrap();

        assert_eq!(engine.binding_value("g", "value"), Some(json!(7)));
        assert_eq!(engine.binding_value("x", "value"), Some(json!(70)));
    }

    #[tokio::test]
    async fn indirect_change_reaches_binding() {
        let store = store();
        let engine = engine(&store, &[Binding::new("t", "text", "Parent->Status")]);
        let manager = NotificationManager::new(Arc::clone(&engine));
        manager.refresh(true, &[]).await;

        let status = store.field_type("Status").await.unwrap();
        store
            .write("site-1", &status, FieldValue::String("alarm".into()))
            .await
            .unwrap();
        assert_eq!(engine.binding_value("t", "text"), Some(json!("alarm")));
    }
}
