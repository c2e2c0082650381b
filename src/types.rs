//! # Domain Types for LedgerDB
//!
//! Core types used throughout the crate: versions, operations, the tracked
//! table description, row keys, audit entries, and the option structs for
//! enable/restore.
//!
//! Newtypes wrap the raw integers ([`Version`], [`GroupId`]) so a version
//! number cannot be confused with a group id in a signature. Column values are
//! represented as [`rusqlite::types::Value`], the native dynamic value type of
//! the storage engine, aliased here as [`SqlValue`].
//!
//! ## Invariants
//!
//! - [`Version`] is the audit entry id: strictly increasing, never reused,
//!   the sole authoritative ordering for replay.
//! - [`TrackedTable`] is immutable once derived; re-deriving it from the same
//!   schema yields an identical description.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use serde_json::Map as JsonMap;

use crate::value;

/// Alias for the storage engine's dynamic column value.
pub type SqlValue = rusqlite::types::Value;

// =============================================================================
// Version and Group Id
// =============================================================================

/// An audit entry id, used as the version number of the tracked table.
///
/// Assigned by SQLite (`INTEGER PRIMARY KEY`), strictly increasing in
/// insertion order, never reused. Timestamps on entries are advisory only;
/// `Version` is the total order for reconstruction and replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Version(i64);

impl Version {
    /// Creates a Version from a raw audit entry id.
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw id for queries and display.
    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Id of a change group row in the shared group table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GroupId(i64);

impl GroupId {
    /// Creates a GroupId from a raw group table id.
    pub fn from_raw(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw id.
    pub fn as_raw(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Operations
// =============================================================================

/// The kind of mutation an audit entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Row created; `updated_values` holds every non-key column.
    Insert,
    /// Row modified; `updated_values` holds only the changed columns.
    Update,
    /// Row removed; `updated_values` is absent.
    Delete,
}

impl Operation {
    /// The literal stored in the audit table's `operation` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }

    /// Parses the stored literal back. `None` for anything else.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(Operation::Insert),
            "update" => Some(Operation::Update),
            "delete" => Some(Operation::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tracked Table Description
// =============================================================================

/// One column of a tracked table, as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared type, verbatim (may be empty for untyped columns).
    pub decl_type: String,
    /// NOT NULL constraint present.
    pub notnull: bool,
    /// Default value expression, verbatim, if declared.
    pub default: Option<String>,
    /// 1-based position within the primary key, 0 for non-key columns.
    pub pk_ordinal: i64,
}

impl ColumnInfo {
    /// True if this column is part of the primary key.
    pub fn is_pk(&self) -> bool {
        self.pk_ordinal > 0
    }

    /// True if the declared type is BLOB.
    ///
    /// Capture branches on the declared type: BLOB columns are hex-encoded,
    /// everything else is passed to `json_object` directly. A blob value
    /// stored in a non-BLOB column is outside what capture supports.
    pub fn is_blob(&self) -> bool {
        self.decl_type.eq_ignore_ascii_case("BLOB")
    }
}

/// Schema description of a table under history tracking.
///
/// Derived once from the live schema by [`crate::schema::TrackedTable::resolve`]
/// and then treated as immutable: the capture, reconstruction, and replay
/// algorithms are all generic over this description, so no per-table code
/// exists anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTable {
    /// Source table name.
    pub name: String,
    /// All columns in schema (cid) order.
    pub columns: Vec<ColumnInfo>,
}

impl TrackedTable {
    /// Primary key columns, ordered by their position within the key.
    pub fn pk_columns(&self) -> Vec<&ColumnInfo> {
        let mut pks: Vec<&ColumnInfo> = self.columns.iter().filter(|c| c.is_pk()).collect();
        pks.sort_by_key(|c| c.pk_ordinal);
        pks
    }

    /// Non-key columns in schema order.
    pub fn non_pk_columns(&self) -> Vec<&ColumnInfo> {
        self.columns.iter().filter(|c| !c.is_pk()).collect()
    }
}

// =============================================================================
// Row Keys
// =============================================================================

/// The primary key values identifying one row of a tracked table.
///
/// Maps source column name to value. Single-column and compound keys are
/// handled uniformly; key matching is a conjunction over all key columns.
///
/// ```
/// use ledgerdb::types::RowKey;
///
/// let key = RowKey::new().with("user_id", 1i64).with("role_id", 2i64);
/// assert_eq!(key.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RowKey(BTreeMap<String, SqlValue>);

impl RowKey {
    /// Creates an empty key. Add columns with [`RowKey::with`].
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Adds a key column (builder style).
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.0.insert(column.into(), value.into());
        self
    }

    /// Returns the value for a key column, if present.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.0.get(column)
    }

    /// Number of key columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if no key columns have been set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over (column, value) pairs in column-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &SqlValue)> {
        self.0.iter()
    }
}

impl FromIterator<(String, SqlValue)> for RowKey {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Serialize for RowKey {
    /// Serializes through the value codec, so NULL and blob key parts use the
    /// same marker convention as `updated_values`.
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, val) in &self.0 {
            map.serialize_entry(name, &value::encode(val))?;
        }
        map.end()
    }
}

// =============================================================================
// Audit Entries
// =============================================================================

/// One row of an audit table, as returned by the history listings.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// Entry id; doubles as the table version after this entry.
    pub id: Version,
    /// Capture time, millisecond resolution. Advisory; `id` is authoritative.
    pub timestamp: String,
    /// Which mutation this entry records.
    pub operation: Operation,
    /// Primary key values of the affected row, by source column name.
    pub key: RowKey,
    /// Encoded diff. `None` for delete entries.
    pub updated_values: Option<JsonMap<String, serde_json::Value>>,
    /// Change group this entry was written under, if any.
    pub group: Option<GroupId>,
    /// Note of that group at read time (looked up by id, not copied).
    pub group_note: Option<String>,
}

// =============================================================================
// Reconstruction Results
// =============================================================================

/// Result of reconstructing a row at a historical version.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconstructed {
    /// The row existed; decoded non-key column values by name.
    Row(BTreeMap<String, SqlValue>),
    /// The most recent operation at or before the version was a delete.
    Deleted,
    /// The key has no insert entry at or before the version.
    NoHistory,
}

impl Reconstructed {
    /// Returns the column map if the row existed at that version.
    pub fn as_row(&self) -> Option<&BTreeMap<String, SqlValue>> {
        match self {
            Reconstructed::Row(cols) => Some(cols),
            _ => None,
        }
    }
}

// =============================================================================
// Restore Options
// =============================================================================

/// Upper bound for replay.
///
/// `AtVersion` is exact. `AtTimestamp` compares the stored millisecond text
/// inclusively and is best-effort: entries sharing a millisecond are all
/// included. Callers needing determinism must cut by version.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cutoff {
    /// Replay the entire audit log.
    #[default]
    Latest,
    /// Replay entries with `id <= version`.
    AtVersion(Version),
    /// Replay entries with `timestamp <=` the given ISO-8601 text.
    AtTimestamp(String),
}

/// Where the materialized table is written.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Destination {
    /// A generated name (`{table}_restored`) in the same database.
    #[default]
    Generated,
    /// An explicit table name in the same database.
    Table(String),
    /// The source table's name inside a separate database file.
    Database(PathBuf),
}

/// Options for [`crate::restore`].
///
/// `swap` atomically replaces the original table with the materialized one
/// and is mutually exclusive with any explicit destination.
#[derive(Debug, Clone, Default)]
pub struct RestoreOptions {
    /// Replay upper bound.
    pub cutoff: Cutoff,
    /// Output location.
    pub destination: Destination,
    /// Replace the original table under its own name.
    pub swap: bool,
}

// =============================================================================
// Enable Options
// =============================================================================

/// Options for [`crate::schema::enable_tracking_with`].
#[derive(Debug, Clone, Copy)]
pub struct EnableOptions {
    /// Snapshot existing rows into the audit log when it is empty.
    pub populate: bool,
    /// Wrap setup in a savepoint so it applies all-or-nothing. Safe whether
    /// or not the caller already holds a transaction; disable only when the
    /// caller manages atomicity itself.
    pub atomic: bool,
}

impl Default for EnableOptions {
    fn default() -> Self {
        Self {
            populate: true,
            atomic: true,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
