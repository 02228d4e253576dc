//! Multi-hop change notifications
//!
//! Watching `Parent->Status` means watching `Parent` on the bound entity and
//! `Status` on whatever `Parent` currently points to. When a link hop
//! changes, every downstream subscription is torn down and rebuilt against
//! the new chain, then the callback receives the value at the end of the new
//! chain.

use std::sync::{Arc, Weak};

use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{FaceplateError, Result};

use super::{
    path_display, FieldStore, FieldType, FieldValue, Notification, NotificationToken,
    NotifyCallback, NotifyConfig,
};

pub struct IndirectNotifier {
    store: Arc<dyn FieldStore>,
    entity_id: String,
    path: Vec<FieldType>,
    callback: NotifyCallback,
    tokens: Mutex<Vec<NotificationToken>>,
    this: Weak<IndirectNotifier>,
}

impl IndirectNotifier {
    /// Subscribe along `path` starting at `entity_id`
    pub async fn register(
        store: Arc<dyn FieldStore>,
        entity_id: impl Into<String>,
        path: Vec<FieldType>,
        callback: NotifyCallback,
    ) -> Result<Arc<Self>> {
        if path.len() < 2 {
            return Err(FaceplateError::NotificationFailed {
                operation: "register".to_string(),
                reason: format!("'{}' is not a multi-hop path", path_display(&path)),
            });
        }
        let notifier = Arc::new_cyclic(|this| Self {
            store,
            entity_id: entity_id.into(),
            path,
            callback,
            tokens: Mutex::new(Vec::new()),
            this: this.clone(),
        });
        notifier.rewire().await?;
        Ok(notifier)
    }

    pub fn path(&self) -> &[FieldType] {
        &self.path
    }

    /// Number of live hop subscriptions
    pub async fn hop_count(&self) -> usize {
        self.tokens.lock().await.len()
    }

    /// Drop every hop subscription
    pub async fn unregister(&self) -> Result<()> {
        let mut tokens = self.tokens.lock().await;
        let mut first_error = None;
        for token in tokens.drain(..) {
            if let Err(e) = self.store.unregister_notification(token).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Rebuild subscriptions along the current reference chain
    ///
    /// A hop that does not currently hold a reference ends the chain; its own
    /// subscription stays so that setting the link later rewires.
    async fn rewire(&self) -> Result<()> {
        let mut tokens = self.tokens.lock().await;
        for token in tokens.drain(..) {
            if let Err(e) = self.store.unregister_notification(token).await {
                debug!(error = %e, "stale hop subscription");
            }
        }

        let mut current = self.entity_id.clone();
        let last = self.path.len() - 1;
        for (index, hop) in self.path.iter().enumerate() {
            let callback = if index == last {
                Arc::clone(&self.callback)
            } else {
                self.link_callback()
            };
            let token = self
                .store
                .register_notification(NotifyConfig::on_change(current.clone(), hop.clone()), callback)
                .await?;
            tokens.push(token);

            if index == last {
                break;
            }
            match self.store.read(&current, std::slice::from_ref(hop)).await {
                Ok(FieldValue::EntityReference(Some(next))) => current = next,
                _ => {
                    debug!(entity = %current, hop = %hop, "reference chain ends early");
                    break;
                }
            }
        }
        Ok(())
    }

    fn link_callback(&self) -> NotifyCallback {
        let this = self.this.clone();
        Arc::new(move |notification: Notification| {
            let this = this.clone();
            async move {
                if let Some(notifier) = this.upgrade() {
                    notifier.on_link_changed(notification).await;
                }
            }
            .boxed()
        })
    }

    async fn on_link_changed(&self, link: Notification) {
        if let Err(e) = self.rewire().await {
            warn!(path = %path_display(&self.path), error = %e, "failed to rewire indirect notification");
        }
        let current = match self.store.read(&self.entity_id, &self.path).await {
            Ok(value) => value,
            Err(e) => {
                debug!(path = %path_display(&self.path), error = %e, "indirect target unreadable");
                FieldValue::Null
            }
        };
        let notification = Notification {
            config: NotifyConfig::on_change(self.entity_id.clone(), self.path[self.path.len() - 1].clone()),
            current,
            previous: None,
            context: link.context,
        };
        (self.callback)(notification).await;
    }
}

impl std::fmt::Debug for IndirectNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndirectNotifier")
            .field("entity_id", &self.entity_id)
            .field("path", &path_display(&self.path))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use parking_lot::Mutex as SyncMutex;

    const SNAPSHOT: &str = r#"
entities:
  - id: Site-1
    type: Site
    fields: { Status: ok }
  - id: Site-2
    type: Site
    fields: { Status: alarm }
  - id: T-1
    type: Tank
    fields:
      Parent: { ref: Site-1 }
"#;

    async fn setup() -> (Arc<MemoryStore>, Arc<IndirectNotifier>, Arc<SyncMutex<Vec<FieldValue>>>) {
        let store = Arc::new(MemoryStore::from_yaml(SNAPSHOT).unwrap());
        let seen = Arc::new(SyncMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: NotifyCallback = Arc::new(move |n: Notification| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().push(n.current) }.boxed()
        });
        let path = vec![
            store.field_type("Parent").await.unwrap(),
            store.field_type("Status").await.unwrap(),
        ];
        let dyn_store: Arc<dyn FieldStore> = store.clone();
        let notifier = IndirectNotifier::register(dyn_store, "T-1", path, callback)
            .await
            .unwrap();
        (store, notifier, seen)
    }

    #[tokio::test]
    async fn final_hop_change_is_delivered() {
        let (store, notifier, seen) = setup().await;
        assert_eq!(notifier.hop_count().await, 2);

        let status = store.field_type("Status").await.unwrap();
        store
            .write("Site-1", &status, FieldValue::String("trip".into()))
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![FieldValue::String("trip".into())]);
    }

    #[tokio::test]
    async fn link_change_rewires_and_delivers_new_target() {
        let (store, _notifier, seen) = setup().await;
        let parent = store.field_type("Parent").await.unwrap();
        let status = store.field_type("Status").await.unwrap();

        store
            .write("T-1", &parent, FieldValue::EntityReference(Some("Site-2".into())))
            .await
            .unwrap();
        assert_eq!(*seen.lock(), vec![FieldValue::String("alarm".into())]);

        // old target no longer watched
        store
            .write("Site-1", &status, FieldValue::String("ignored".into()))
            .await
            .unwrap();
        assert_eq!(seen.lock().len(), 1);

        store
            .write("Site-2", &status, FieldValue::String("cleared".into()))
            .await
            .unwrap();
        assert_eq!(seen.lock().last(), Some(&FieldValue::String("cleared".into())));
    }

    #[tokio::test]
    async fn unregister_releases_all_hops() {
        let (store, notifier, _seen) = setup().await;
        assert_eq!(store.subscription_count(), 2);
        notifier.unregister().await.unwrap();
        assert_eq!(store.subscription_count(), 0);
    }

    #[tokio::test]
    async fn single_hop_path_is_rejected() {
        let store: Arc<dyn FieldStore> = Arc::new(MemoryStore::from_yaml(SNAPSHOT).unwrap());
        let status = store.field_type("Status").await.unwrap();
        let callback: NotifyCallback = Arc::new(|_n: Notification| async {}.boxed());
        let err = IndirectNotifier::register(store, "T-1", vec![status], callback)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FPL-015");
    }
}
