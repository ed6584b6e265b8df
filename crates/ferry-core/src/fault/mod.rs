//! Fault isolation for failed record groups.

mod group;
mod investigator;

pub use group::{FailedRecordGroup, RecordRef};
pub use investigator::{InvestigationSummary, MigrationErrorInvestigator, RecordRerun};
