//! The data store contract.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::hash::Hash;

use super::{MigratableEntity, RecordId, StorePage};
use crate::error::StoreError;

/// A paginated, filterable backing store.
///
/// Implementations must be safe for concurrent reads and must report
/// uniqueness violations as [`StoreError::Duplicate`].
pub trait DataStore: Send + Sync + 'static {
    /// Records held by the store.
    type Entity: MigratableEntity;
    /// Filter-set accepted by the paging calls. Records are grouped by equal
    /// filters during matching.
    type Filter: Clone + Eq + Hash + Debug + Send + Sync + 'static;

    /// Identifier under which the store is registered.
    fn store_id(&self) -> &str;

    /// Filter selecting every record.
    fn match_all(&self) -> Self::Filter;

    /// Filter selecting the records with the given ids.
    fn match_by_id_in(&self, ids: &BTreeSet<RecordId>) -> Self::Filter;

    /// Read the first page for a filter.
    fn first_page(
        &self,
        filter: &Self::Filter,
        page_size: usize,
    ) -> Result<StorePage<Self>, StoreError>;

    /// Read the page following `previous`.
    fn next_page(&self, previous: &StorePage<Self>) -> Result<StorePage<Self>, StoreError>;

    /// Persist one record.
    fn save(&self, entity: &Self::Entity) -> Result<(), StoreError>;

    /// Persist several records.
    fn save_all(&self, entities: &[Self::Entity]) -> Result<(), StoreError> {
        for entity in entities {
            self.save(entity)?;
        }
        Ok(())
    }
}
