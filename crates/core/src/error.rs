//! Error types for the Warden domain.
//!
//! Uses `thiserror` for ergonomic error definitions. Core only owns the
//! store error; the budget, scheduler and curation crates define their own
//! enums and wrap this one with `#[from]` where they touch the store.

use thiserror::Error;

/// Failures raised by the backing store collaborator.
///
/// Curation passes and the cycle log treat every variant as a
/// persistence failure: logged and swallowed, never fatal.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Malformed record {id}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("Migration failed: {0}")]
    MigrationFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_record_names_the_entry() {
        let err = StoreError::Malformed {
            id: "mem_42".into(),
            reason: "unknown tier 'LUKEWARM'".into(),
        };
        assert!(err.to_string().contains("mem_42"));
        assert!(err.to_string().contains("LUKEWARM"));
    }

    #[test]
    fn migration_error_displays_message() {
        let err = StoreError::MigrationFailed("tier index: disk full".into());
        assert_eq!(err.to_string(), "Migration failed: tier index: disk full");
    }
}
