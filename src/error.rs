//! # Error Handling for LedgerDB
//!
//! A single error enum ([`Error`]) covers every failure mode, with a crate-wide
//! [`Result`] alias. Failures here are logical or schema errors, never transient
//! I/O, so nothing is retried anywhere in the crate: errors propagate to the
//! caller immediately.
//!
//! ## Error Categories
//!
//! | Category | Variants | Meaning |
//! |----------|----------|---------|
//! | Setup | [`Error::NoPrimaryKey`], [`Error::NoSuchTable`] | tracking cannot be enabled |
//! | Lookup | [`Error::NotTracked`] | operation requires an audit table that does not exist |
//! | Integrity | [`Error::ReplayConsistency`], [`Error::Decode`], [`Error::Json`] | the audit log contradicts itself |
//! | Usage | [`Error::Config`], [`Error::GroupActive`] | the call itself is invalid |
//! | Storage | [`Error::Sqlite`] | anything SQLite reports |

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in LedgerDB operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The table has no explicit PRIMARY KEY declaration.
    ///
    /// Audit entries address rows by their key columns, so a table without an
    /// explicit primary key cannot be tracked. Raised before any schema change
    /// is made.
    #[error("table '{table}' has no explicit primary key; history tracking requires one")]
    NoPrimaryKey {
        /// The table that was asked to be tracked.
        table: String,
    },

    /// The named table does not exist in this database.
    #[error("no such table: '{table}'")]
    NoSuchTable {
        /// The table that was looked up.
        table: String,
    },

    /// An operation that reads history was called for a table whose audit
    /// table does not exist.
    ///
    /// Enable tracking (or check the database) before calling history,
    /// reconstruction, or restore operations.
    #[error("table '{table}' is not tracked: expected audit table '{audit_table}' to exist")]
    NotTracked {
        /// The tracked table that was requested.
        table: String,
        /// The audit table that was expected to exist.
        audit_table: String,
    },

    /// Replay encountered an update for a row that does not exist.
    ///
    /// A well-formed audit log always inserts a row before updating it. This
    /// error indicates corruption or manual tampering with the audit table;
    /// replay aborts and the enclosing savepoint rolls back.
    #[error("replay halted at audit entry {entry_id} for table '{table}': {detail}")]
    ReplayConsistency {
        /// The tracked table being restored.
        table: String,
        /// The audit entry id at which replay stopped.
        entry_id: i64,
        /// What was inconsistent.
        detail: String,
    },

    /// A stored JSON token could not be decoded back into a column value.
    ///
    /// Covers unrecognized marker objects, malformed hex payloads, and JSON
    /// shapes the codec never produces. Never silently coerced.
    #[error("cannot decode audit value: {0}")]
    Decode(String),

    /// The requested combination of options is invalid.
    ///
    /// For example, requesting an atomic swap together with a cross-database
    /// destination. Rejected before any work starts.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A change group was started while another one is still active.
    ///
    /// At most one group may be active per database at a time; finish the
    /// current group first. Nesting is deliberately not supported.
    #[error("a change group is already active (group {id})")]
    GroupActive {
        /// Id of the currently active group.
        id: i64,
    },

    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A stored `updated_values` payload was not valid JSON.
    #[error("malformed audit payload: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Error messages appear in logs and caller output; keep them descriptive.
    #[test]
    fn test_error_display() {
        let no_pk = Error::NoPrimaryKey {
            table: "notes".to_string(),
        };
        assert_eq!(
            no_pk.to_string(),
            "table 'notes' has no explicit primary key; history tracking requires one"
        );

        let not_tracked = Error::NotTracked {
            table: "items".to_string(),
            audit_table: "_ledgerdb_items".to_string(),
        };
        assert_eq!(
            not_tracked.to_string(),
            "table 'items' is not tracked: expected audit table '_ledgerdb_items' to exist"
        );

        let replay = Error::ReplayConsistency {
            table: "items".to_string(),
            entry_id: 17,
            detail: "update matched no row".to_string(),
        };
        assert_eq!(
            replay.to_string(),
            "replay halted at audit entry 17 for table 'items': update matched no row"
        );

        let group = Error::GroupActive { id: 3 };
        assert_eq!(group.to_string(), "a change group is already active (group 3)");
    }

    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();
        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let our_err: Error = json_err.into();
        assert!(matches!(our_err, Error::Json(_)));
    }
}
