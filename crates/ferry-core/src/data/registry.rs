//! Registry of data stores by identifier.

use std::any::{type_name, Any};
use std::sync::Arc;

use dashmap::DashMap;

use super::DataStore;
use crate::error::PlanError;

/// Typed store handles keyed by store identifier.
///
/// Definitions refer to stores by name; the registry resolves and type-checks
/// them once when a migration is registered.
#[derive(Default)]
pub struct DataStoreRegistry {
    stores: DashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl DataStoreRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store under its own identifier, replacing any previous one.
    pub fn register<S: DataStore>(&self, store: Arc<S>) {
        let id = store.store_id().to_string();
        tracing::debug!(store = %id, kind = type_name::<S>(), "Registered data store");
        self.stores.insert(id, store);
    }

    /// Look up a store and check its type.
    pub fn get<S: DataStore>(&self, id: &str) -> Result<Arc<S>, PlanError> {
        let store = self
            .stores
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| PlanError::UnknownStore {
                migration: String::new(),
                store: id.to_string(),
            })?;

        store.downcast::<S>().map_err(|_| PlanError::StoreTypeMismatch {
            store: id.to_string(),
            expected: type_name::<S>(),
        })
    }

    /// Whether a store is registered under `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.stores.contains_key(id)
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Number of registered stores.
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether no store is registered.
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{MemoryStore, MigratableEntity, RecordId};

    #[derive(Debug, Clone)]
    struct Row(i64);

    impl MigratableEntity for Row {
        fn migratable_id(&self) -> RecordId {
            RecordId::Int(self.0)
        }
    }

    #[derive(Debug, Clone)]
    struct Other(i64);

    impl MigratableEntity for Other {
        fn migratable_id(&self) -> RecordId {
            RecordId::Int(self.0)
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = DataStoreRegistry::new();
        registry.register(Arc::new(MemoryStore::<Row>::new("rows")));

        assert!(registry.contains("rows"));
        assert_eq!(registry.ids(), vec!["rows".to_string()]);
        let store = registry.get::<MemoryStore<Row>>("rows").unwrap();
        assert_eq!(store.store_id(), "rows");
    }

    #[test]
    fn test_unknown_store() {
        let registry = DataStoreRegistry::new();
        let err = registry.get::<MemoryStore<Row>>("missing").err().unwrap();
        assert!(matches!(err, PlanError::UnknownStore { store, .. } if store == "missing"));
    }

    #[test]
    fn test_type_mismatch() {
        let registry = DataStoreRegistry::new();
        registry.register(Arc::new(MemoryStore::<Row>::new("rows")));

        let err = registry.get::<MemoryStore<Other>>("rows").err().unwrap();
        assert!(matches!(err, PlanError::StoreTypeMismatch { .. }));
    }
}
