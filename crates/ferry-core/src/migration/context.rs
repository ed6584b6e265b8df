//! Per-record scratch state.

use std::any::Any;
use std::collections::HashMap;

/// Open, string-keyed bag of values accumulated while matching.
///
/// Seeded by `start_reduction`, folded into by `reduce_from` and read by
/// `transform`. Lives only as long as one record's trip through the pipeline.
#[derive(Default)]
pub struct Aggregates {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl Aggregates {
    /// An empty bag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a value, replacing whatever was under `key`.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// Borrow a value if present and of type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    /// Mutably borrow a value if present and of type `T`.
    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key)?.downcast_mut::<T>()
    }

    /// Remove a value, returning it if it was of type `T`.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        self.values
            .remove(key)?
            .downcast::<T>()
            .ok()
            .map(|value| *value)
    }

    /// Append to a `Vec<T>` under `key`, creating it if needed.
    ///
    /// A value of another type under `key` is replaced.
    pub fn push<T: Any + Send + Sync>(&mut self, key: &str, item: T) {
        match self.get_mut::<Vec<T>>(key) {
            Some(items) => items.push(item),
            None => self.insert(key, vec![item]),
        }
    }

    /// Whether `key` holds a value.
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the bag is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Aggregates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Aggregates").field("keys", &keys).finish()
    }
}

/// A source record together with its aggregates.
#[derive(Debug)]
pub struct RecordProcessingContext<E> {
    pub(crate) record: E,
    pub(crate) aggregates: Aggregates,
}

impl<E> RecordProcessingContext<E> {
    /// Start processing `record` with empty aggregates.
    pub fn new(record: E) -> Self {
        Self {
            record,
            aggregates: Aggregates::new(),
        }
    }

    /// The source record.
    pub fn record(&self) -> &E {
        &self.record
    }

    /// Aggregates collected so far.
    pub fn aggregates(&self) -> &Aggregates {
        &self.aggregates
    }
}
