//! Engine error types.

use thiserror::Error;

use crate::algorithms::cardinality::Cardinality;
use crate::data::RecordId;

/// Failures raised by a data store adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A uniqueness constraint was violated while saving.
    #[error("duplicate data in store {store}: {message}")]
    Duplicate {
        /// The store that rejected the write.
        store: String,
        /// Adapter-specific detail.
        message: String,
    },

    /// Any other backend failure (connectivity, query, encoding).
    #[error("store {store} failed: {message}")]
    Backend {
        /// The store that failed.
        store: String,
        /// Adapter-specific detail.
        message: String,
    },
}

impl StoreError {
    /// Build a duplicate-key failure.
    pub fn duplicate(store: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Duplicate {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Build a generic backend failure.
    pub fn backend(store: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Backend {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Whether this is the duplicate-key signal.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate { .. })
    }
}

/// Errors raised while building the execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A super-edge lists a node among both its sources and its targets.
    #[error("a source node must not be a target node: {edge}")]
    SelfLoop {
        /// The offending edge.
        edge: String,
    },

    /// An edge would resolve a node that another edge already resolved.
    #[error(
        "cycle detected, or two super-edges share target nodes: {edge}; \
         resolved nodes: {resolved}; sorted edges: {sorted}; all edges: {all}"
    )]
    Conflict {
        /// The edge being resolved.
        edge: String,
        /// Nodes resolved so far.
        resolved: String,
        /// Edges resolved so far, in order.
        sorted: String,
        /// Every edge of the input.
        all: String,
    },

    /// A full pass resolved nothing new.
    #[error("resolution does not converge, there is a loop; unresolved edges: {unresolved}")]
    NoConvergence {
        /// Edges left unresolved.
        unresolved: String,
    },

    /// A migration references a store nobody registered.
    #[error("migration {migration} references unknown store {store}")]
    UnknownStore {
        /// The migration definition.
        migration: String,
        /// The missing store identifier.
        store: String,
    },

    /// A store is registered under the identifier but with another type.
    #[error("store {store} is not a {expected}")]
    StoreTypeMismatch {
        /// The store identifier.
        store: String,
        /// The Rust type the definition asked for.
        expected: &'static str,
    },

    /// Two migrations were registered with the same identifier.
    #[error("migration {migration} is already registered")]
    DuplicateMigration {
        /// The repeated identifier.
        migration: String,
    },

    /// No registered migration has this identifier.
    #[error("unknown migration {migration}")]
    UnknownMigration {
        /// The requested identifier.
        migration: String,
    },
}

impl PlanError {
    /// Attribute a store lookup failure to the migration that asked for it.
    pub(crate) fn in_migration(self, migration: &str) -> Self {
        match self {
            PlanError::UnknownStore { store, .. } => PlanError::UnknownStore {
                migration: migration.to_string(),
                store,
            },
            other => other,
        }
    }
}

/// Failure while parsing a persisted failed-record action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid failed record action {input:?}, expected RETRY, IGNORE, TAKE(k) or TAKE(N-k)")]
pub struct ParseActionError {
    /// The rejected input.
    pub input: String,
}

/// Engine errors.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A data store operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A match or transform step produced the wrong number of records.
    #[error("cardinality violation in {migration} ({step}): required {required}, found {found}")]
    CardinalityViolation {
        /// The migration being run.
        migration: String,
        /// The step that counted the records.
        step: String,
        /// The declared constraint.
        required: Cardinality,
        /// The number of records observed.
        found: usize,
    },

    /// An operation kept failing after every allowed retry.
    #[error("retries exhausted {context}: {cause}")]
    RetriesExhausted {
        /// Where the retry logic was configured.
        context: String,
        /// The last failure.
        cause: Box<MigrationError>,
    },

    /// A duplicate-key failure that the migration did not resolve.
    #[error("unresolved duplicate in {migration} for record {record}: {cause}")]
    UnresolvedDuplicate {
        /// The migration being run.
        migration: String,
        /// The input record whose outputs collided.
        record: RecordId,
        /// The store failure.
        cause: StoreError,
    },

    /// A migration callback failed.
    #[error("{message}")]
    Callback {
        /// Message supplied by the callback.
        message: String,
    },

    /// The execution plan could not be built.
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    /// Forward progress for a whole migration is impossible.
    #[error("fatal error in {migration}: {message}")]
    Fatal {
        /// The migration that was halted.
        migration: String,
        /// What went wrong.
        message: String,
    },

    /// The migration was stopped before this operation could run.
    #[error("migration stopped")]
    Stopped,

    /// Progress persistence failed on disk.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Progress persistence failed in the state store.
    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    /// Progress could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl MigrationError {
    /// Build a callback failure from any displayable message.
    pub fn callback(message: impl std::fmt::Display) -> Self {
        MigrationError::Callback {
            message: message.to_string(),
        }
    }

    /// Whether retrying the failed operation could succeed.
    ///
    /// Domain failures (cardinality, duplicates) and structural failures
    /// escalate on the first attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MigrationError::Store(StoreError::Backend { .. }) | MigrationError::Callback { .. }
        )
    }

    /// The innermost failure behind any retry wrapping.
    pub fn root_cause(&self) -> &MigrationError {
        let mut current = self;
        while let MigrationError::RetriesExhausted { cause, .. } = current {
            current = cause;
        }
        current
    }

    /// The store failure behind this error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self.root_cause() {
            MigrationError::Store(e) => Some(e),
            _ => None,
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, MigrationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(MigrationError::from(StoreError::backend("s", "down")).is_transient());
        assert!(MigrationError::callback("boom").is_transient());
        assert!(!MigrationError::from(StoreError::duplicate("s", "id 1")).is_transient());
        assert!(!MigrationError::Stopped.is_transient());
        assert!(!MigrationError::CardinalityViolation {
            migration: "m".into(),
            step: "transform".into(),
            required: Cardinality::ExactlyOne,
            found: 2,
        }
        .is_transient());
    }

    #[test]
    fn test_root_cause_unwraps_nested_retries() {
        let inner = MigrationError::callback("bad record");
        let wrapped = MigrationError::RetriesExhausted {
            context: "outer".into(),
            cause: Box::new(MigrationError::RetriesExhausted {
                context: "inner".into(),
                cause: Box::new(inner),
            }),
        };

        assert_eq!(wrapped.root_cause().to_string(), "bad record");
    }

    #[test]
    fn test_store_error_through_retries() {
        let wrapped = MigrationError::RetriesExhausted {
            context: "save".into(),
            cause: Box::new(StoreError::duplicate("dest", "id 7").into()),
        };

        assert!(wrapped.store_error().is_some_and(StoreError::is_duplicate));
    }
}
