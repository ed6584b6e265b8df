//! One page of records read from a store.

use super::DataStore;

/// Page type produced by store `S`.
pub type StorePage<S> = DataPage<<S as DataStore>::Entity, <S as DataStore>::Filter>;

/// An immutable page of records.
///
/// Carries everything `next_page` needs: the owning store, the zero-based page
/// number, the page size and the filter that produced it. Callers stop paging
/// once a page comes back empty.
#[derive(Debug, Clone)]
pub struct DataPage<E, F> {
    store_id: String,
    page_number: usize,
    page_size: usize,
    filter: F,
    records: Vec<E>,
}

impl<E, F> DataPage<E, F> {
    /// Create a page.
    pub fn new(
        store_id: impl Into<String>,
        page_number: usize,
        page_size: usize,
        filter: F,
        records: Vec<E>,
    ) -> Self {
        Self {
            store_id: store_id.into(),
            page_number,
            page_size,
            filter,
            records,
        }
    }

    /// Identifier of the store that produced the page.
    pub fn store_id(&self) -> &str {
        &self.store_id
    }

    /// Zero-based page number.
    pub fn page_number(&self) -> usize {
        self.page_number
    }

    /// Requested page size.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Filter the page was read with.
    pub fn filter(&self) -> &F {
        &self.filter
    }

    /// Records in store order.
    pub fn records(&self) -> &[E] {
        &self.records
    }

    /// Number of records on the page.
    pub fn size(&self) -> usize {
        self.records.len()
    }

    /// Whether the page holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Take the records out of the page.
    pub fn into_records(self) -> Vec<E> {
        self.records
    }
}
