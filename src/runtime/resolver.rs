//! Field path resolution
//!
//! `Parent->Status` becomes `[FieldType(Parent), FieldType(Status)]` through
//! the store's schema. A path with any unknown segment resolves to the empty
//! path, and that miss is cached like a hit.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::binding::PATH_SEPARATOR;
use crate::store::{FieldStore, FieldType};

pub struct PathResolver {
    store: Arc<dyn FieldStore>,
    cache: DashMap<String, Arc<[FieldType]>>,
}

impl PathResolver {
    pub fn new(store: Arc<dyn FieldStore>) -> Self {
        Self {
            store,
            cache: DashMap::new(),
        }
    }

    /// Resolve a raw expression; empty when unresolvable
    pub async fn resolve(&self, expression: &str) -> Arc<[FieldType]> {
        if let Some(hit) = self.cache.get(expression) {
            return Arc::clone(hit.value());
        }

        let mut path = Vec::new();
        for segment in expression.split(PATH_SEPARATOR).map(str::trim) {
            if segment.is_empty() {
                debug!(expression, "Empty path segment");
                path.clear();
                break;
            }
            match self.store.field_type(segment).await {
                Some(field) => path.push(field),
                None => {
                    debug!(expression, segment, "Unknown field in path");
                    path.clear();
                    break;
                }
            }
        }

        let path: Arc<[FieldType]> = path.into();
        self.cache
            .insert(expression.to_string(), Arc::clone(&path));
        path
    }

    /// Forget every cached path (binding map rebuilt)
    pub fn clear(&self) {
        self.cache.clear();
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn resolver() -> PathResolver {
        let store = MemoryStore::new();
        store.define_field("Parent");
        store.define_field("Status");
        PathResolver::new(Arc::new(store))
    }

    #[tokio::test]
    async fn resolves_multi_hop_path() {
        let resolver = resolver();
        let path = resolver.resolve(" Parent -> Status ").await;
        let names: Vec<&str> = path.iter().map(|f| f.name.as_ref()).collect();
        assert_eq!(names, ["Parent", "Status"]);
    }

    #[tokio::test]
    async fn unknown_segment_yields_empty_path() {
        let resolver = resolver();
        assert!(resolver.resolve("Parent->Missing").await.is_empty());
        assert!(resolver.resolve("Parent->").await.is_empty());
    }

    #[tokio::test]
    async fn misses_are_cached_until_cleared() {
        let resolver = resolver();
        resolver.resolve("Missing").await;
        resolver.resolve("Status").await;
        assert_eq!(resolver.len(), 2);
        resolver.clear();
        assert!(resolver.is_empty());
    }
}
