//! In-memory data store.
//!
//! Keeps records ordered by id and pages by offset. Unique ids are enforced
//! on save, and a few fault-injection switches make it usable as a stand-in
//! for flaky backends.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use super::{DataStore, MigratableEntity, RecordId, StorePage};
use crate::error::StoreError;

/// Extracts a named attribute used by [`MemoryFilter::FieldEq`].
pub type FieldExtractor<E> = Arc<dyn Fn(&E) -> String + Send + Sync>;

/// Filter-set understood by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemoryFilter {
    /// Every record.
    All,
    /// Records whose id is in the set.
    IdIn(BTreeSet<RecordId>),
    /// Records whose registered field equals the value.
    FieldEq {
        /// Field name given to [`MemoryStore::with_field`].
        field: String,
        /// Expected value.
        value: String,
    },
}

/// A thread-safe in-memory store.
pub struct MemoryStore<E> {
    id: String,
    records: RwLock<BTreeMap<RecordId, E>>,
    fields: HashMap<String, FieldExtractor<E>>,
    failing_page_reads: AtomicUsize,
    failing_filters: RwLock<HashSet<MemoryFilter>>,
    failing_saves: RwLock<BTreeSet<RecordId>>,
    page_reads: AtomicUsize,
}

impl<E: MigratableEntity> MemoryStore<E> {
    /// Create an empty store.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            records: RwLock::new(BTreeMap::new()),
            fields: HashMap::new(),
            failing_page_reads: AtomicUsize::new(0),
            failing_filters: RwLock::new(HashSet::new()),
            failing_saves: RwLock::new(BTreeSet::new()),
            page_reads: AtomicUsize::new(0),
        }
    }

    /// Register a field that [`MemoryFilter::FieldEq`] can filter on.
    pub fn with_field(
        mut self,
        name: impl Into<String>,
        extractor: impl Fn(&E) -> String + Send + Sync + 'static,
    ) -> Self {
        self.fields.insert(name.into(), Arc::new(extractor));
        self
    }

    /// Seed the store, replacing records with the same id.
    pub fn with_records(self, records: impl IntoIterator<Item = E>) -> Self {
        {
            let mut map = self.records.write();
            for record in records {
                map.insert(record.migratable_id(), record);
            }
        }
        self
    }

    /// Insert or replace a record without duplicate checks.
    pub fn insert(&self, record: E) {
        self.records.write().insert(record.migratable_id(), record);
    }

    /// Filter on a registered field.
    pub fn filter_eq(&self, field: impl Into<String>, value: impl Into<String>) -> MemoryFilter {
        MemoryFilter::FieldEq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Fetch one record.
    pub fn get(&self, id: &RecordId) -> Option<E> {
        self.records.read().get(id).cloned()
    }

    /// All records in id order.
    pub fn records(&self) -> Vec<E> {
        self.records.read().values().cloned().collect()
    }

    /// All ids in order.
    pub fn ids(&self) -> BTreeSet<RecordId> {
        self.records.read().keys().cloned().collect()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Make the next `count` page reads fail with a backend error.
    pub fn fail_next_page_reads(&self, count: usize) {
        self.failing_page_reads.store(count, Ordering::SeqCst);
    }

    /// Make every page read for `filter` fail.
    pub fn fail_page_reads_for(&self, filter: MemoryFilter) {
        self.failing_filters.write().insert(filter);
    }

    /// Make saves fail for records with these ids.
    pub fn fail_saves_for(&self, ids: impl IntoIterator<Item = RecordId>) {
        self.failing_saves.write().extend(ids);
    }

    /// Clear all injected faults.
    pub fn heal(&self) {
        self.failing_page_reads.store(0, Ordering::SeqCst);
        self.failing_filters.write().clear();
        self.failing_saves.write().clear();
    }

    /// Number of page reads served or failed so far.
    pub fn page_read_count(&self) -> usize {
        self.page_reads.load(Ordering::SeqCst)
    }

    fn matches(&self, filter: &MemoryFilter, record: &E) -> bool {
        match filter {
            MemoryFilter::All => true,
            MemoryFilter::IdIn(ids) => ids.contains(&record.migratable_id()),
            MemoryFilter::FieldEq { field, value } => self
                .fields
                .get(field)
                .map(|extract| extract(record) == *value)
                .unwrap_or(false),
        }
    }

    fn read_page(
        &self,
        filter: &MemoryFilter,
        page_number: usize,
        page_size: usize,
    ) -> Result<StorePage<Self>, StoreError> {
        self.page_reads.fetch_add(1, Ordering::SeqCst);

        let injected = self
            .failing_page_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected || self.failing_filters.read().contains(filter) {
            return Err(StoreError::backend(
                &self.id,
                format!("page {} unavailable for {:?}", page_number, filter),
            ));
        }

        let page_size = page_size.max(1);
        let records: Vec<E> = self
            .records
            .read()
            .values()
            .filter(|record| self.matches(filter, record))
            .skip(page_number * page_size)
            .take(page_size)
            .cloned()
            .collect();

        Ok(StorePage::<Self>::new(
            self.id.clone(),
            page_number,
            page_size,
            filter.clone(),
            records,
        ))
    }
}

impl<E: MigratableEntity> DataStore for MemoryStore<E> {
    type Entity = E;
    type Filter = MemoryFilter;

    fn store_id(&self) -> &str {
        &self.id
    }

    fn match_all(&self) -> MemoryFilter {
        MemoryFilter::All
    }

    fn match_by_id_in(&self, ids: &BTreeSet<RecordId>) -> MemoryFilter {
        MemoryFilter::IdIn(ids.clone())
    }

    fn first_page(
        &self,
        filter: &MemoryFilter,
        page_size: usize,
    ) -> Result<StorePage<Self>, StoreError> {
        self.read_page(filter, 0, page_size)
    }

    fn next_page(&self, previous: &StorePage<Self>) -> Result<StorePage<Self>, StoreError> {
        self.read_page(
            previous.filter(),
            previous.page_number() + 1,
            previous.page_size(),
        )
    }

    fn save(&self, entity: &E) -> Result<(), StoreError> {
        self.save_all(std::slice::from_ref(entity))
    }

    /// Saves all records or none of them.
    fn save_all(&self, entities: &[E]) -> Result<(), StoreError> {
        {
            let failing = self.failing_saves.read();
            if let Some(bad) = entities
                .iter()
                .map(MigratableEntity::migratable_id)
                .find(|id| failing.contains(id))
            {
                return Err(StoreError::backend(&self.id, format!("cannot write record {}", bad)));
            }
        }

        let mut records = self.records.write();
        let mut batch = BTreeSet::new();
        for entity in entities {
            let id = entity.migratable_id();
            if records.contains_key(&id) || !batch.insert(id.clone()) {
                return Err(StoreError::duplicate(&self.id, format!("record {} already exists", id)));
            }
        }
        for entity in entities {
            records.insert(entity.migratable_id(), entity.clone());
        }
        Ok(())
    }
}
