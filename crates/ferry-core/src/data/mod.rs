//! Record and data store contracts.
//!
//! Stores are external collaborators: the engine only needs paginated,
//! filterable reads and saves that can tell a duplicate key apart from any
//! other failure.

pub mod memory;
mod page;
mod registry;
mod store;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use memory::{MemoryFilter, MemoryStore};
pub use page::{DataPage, StorePage};
pub use registry::DataStoreRegistry;
pub use store::DataStore;

/// Store-assigned record identifier.
///
/// Serialized untagged, so progress files carry plain JSON numbers or strings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    /// Numeric key.
    Int(i64),
    /// Textual key.
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(id) => write!(f, "{}", id),
            RecordId::Text(id) => write!(f, "{}", id),
        }
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        RecordId::Int(id)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        RecordId::Text(id.to_string())
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        RecordId::Text(id)
    }
}

/// A record that can flow through a migration.
///
/// Entities are treated as immutable values once read; transforms build new
/// instances.
pub trait MigratableEntity: Clone + Send + Sync + 'static {
    /// The record's identifier in its store.
    fn migratable_id(&self) -> RecordId;

    /// Human-readable text used in failure reports.
    fn migratable_description(&self) -> String {
        self.migratable_id().to_string()
    }
}
