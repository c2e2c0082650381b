//! # Schema Resolution and Tracking Setup
//!
//! Derives the [`TrackedTable`] description from the live schema, computes
//! the deterministic audit-table/trigger/index naming, and installs or
//! removes the tracking apparatus.
//!
//! ## Persisted Layout
//!
//! For a tracked table `T`:
//!
//! ```text
//! _ledgerdb_{T}                     <- audit table (append-only)
//!     id INTEGER PRIMARY KEY        <- version number, strictly increasing
//!     timestamp TEXT                <- millisecond resolution, advisory
//!     operation TEXT                <- 'insert' | 'update' | 'delete'
//!     pk_{col} ...                  <- one per key part of T
//!     updated_values TEXT           <- JSON diff, NULL for delete
//!     "group" INTEGER               <- nullable reference into _ledgerdb
//!
//! _ledgerdb                         <- group table, one per database
//!     id INTEGER PRIMARY KEY
//!     note TEXT
//!     current INTEGER               <- 1 for the active group, else NULL
//! ```
//!
//! The audit prefix is injective over table names, so two source tables can
//! never share an audit table, and the bare prefix used for the group table
//! can never collide with an audit table. All identifiers are double-quote
//! escaped, so table names containing spaces, dots, hyphens, or quotes work.
//!
//! ## Idempotency
//!
//! Everything here is `CREATE ... IF NOT EXISTS` / `DROP ... IF EXISTS`:
//! enabling twice leaves the audit table, its rows, and its indexes
//! untouched, and disabling twice is a no-op. Setup and teardown run inside
//! a savepoint by default so a failure leaves no partial apparatus behind.

use rusqlite::Connection;
use tracing::debug;

use crate::capture;
use crate::error::{Error, Result};
use crate::types::{ColumnInfo, EnableOptions, Operation, TrackedTable};

// =============================================================================
// Naming
// =============================================================================

/// Prefix of every audit table.
pub(crate) const AUDIT_PREFIX: &str = "_ledgerdb_";

/// Name of the shared group table.
pub(crate) const GROUP_TABLE: &str = "_ledgerdb";

/// Prefix for key columns inside the audit table. Applied uniformly to every
/// key column, single-column keys included: one rule, no special case.
pub(crate) const PK_COLUMN_PREFIX: &str = "pk_";

/// Bumped when the generated trigger bodies change shape, so a future release
/// can recognize and retire triggers installed by an older one.
pub(crate) const TRIGGER_VERSION: u32 = 1;

/// Returns the audit table name for a tracked table.
pub fn audit_table_name(table: &str) -> String {
    format!("{AUDIT_PREFIX}{table}")
}

/// Returns the audit column name for a source key column.
pub(crate) fn audit_pk_column(source_column: &str) -> String {
    format!("{PK_COLUMN_PREFIX}{source_column}")
}

/// Returns the versioned trigger name for one operation on a table.
pub(crate) fn trigger_name(op: Operation, table: &str) -> String {
    format!("ledgerdb_v{TRIGGER_VERSION}_{}_{table}", op.as_str())
}

/// Quotes an identifier for embedding in generated SQL.
///
/// Double-quote style with embedded quotes doubled; handles every name
/// SQLite itself accepts, including brackets and quotes.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes a string literal for embedding in generated SQL.
pub(crate) fn quote_literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

// =============================================================================
// Schema Resolution
// =============================================================================

impl TrackedTable {
    /// Reads a table's column list, types, and primary key from the live
    /// schema via `PRAGMA table_info`.
    ///
    /// Re-resolving the same unchanged table yields an identical description.
    ///
    /// # Errors
    ///
    /// - [`Error::NoSuchTable`] if the table does not exist.
    /// - [`Error::NoPrimaryKey`] if no explicit PRIMARY KEY is declared.
    pub fn resolve(conn: &Connection, name: &str) -> Result<Self> {
        let sql = format!("PRAGMA table_info({})", quote_ident(name));
        let mut stmt = conn.prepare(&sql)?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnInfo {
                    name: row.get(1)?,
                    decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                    notnull: row.get::<_, i64>(3)? != 0,
                    default: row.get(4)?,
                    pk_ordinal: row.get(5)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if columns.is_empty() {
            return Err(Error::NoSuchTable {
                table: name.to_string(),
            });
        }

        let tracked = TrackedTable {
            name: name.to_string(),
            columns,
        };
        if tracked.pk_columns().is_empty() {
            return Err(Error::NoPrimaryKey {
                table: name.to_string(),
            });
        }
        Ok(tracked)
    }
}

// =============================================================================
// Existence Checks
// =============================================================================

/// True if a table with this exact name exists.
pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// True if history tracking apparatus exists for the table (the audit table
/// is present; triggers may have been dropped by `disable_tracking`).
pub fn is_tracked(conn: &Connection, table: &str) -> Result<bool> {
    table_exists(conn, &audit_table_name(table))
}

/// Fails fast with [`Error::NotTracked`] when the audit table is missing.
pub(crate) fn require_tracked(conn: &Connection, table: &str) -> Result<()> {
    let audit_table = audit_table_name(table);
    if table_exists(conn, &audit_table)? {
        Ok(())
    } else {
        Err(Error::NotTracked {
            table: table.to_string(),
            audit_table,
        })
    }
}

// =============================================================================
// DDL Generation
// =============================================================================

/// DDL for the shared group table. The partial unique index is the storage
/// level guarantee that at most one group is active at a time.
const GROUP_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS "_ledgerdb" (
    id      INTEGER PRIMARY KEY,
    note    TEXT,
    current INTEGER
);
CREATE UNIQUE INDEX IF NOT EXISTS "_ledgerdb_current"
ON "_ledgerdb" (current) WHERE current IS NOT NULL;
"#;

/// Creates the group table and its active-flag index if not already present.
pub(crate) fn create_group_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(GROUP_TABLE_DDL)?;
    Ok(())
}

/// Builds the CREATE TABLE statement for a table's audit log.
fn audit_table_ddl(tracked: &TrackedTable) -> String {
    let mut pk_defs = String::new();
    for col in tracked.pk_columns() {
        pk_defs.push_str("    ");
        pk_defs.push_str(&quote_ident(&audit_pk_column(&col.name)));
        if !col.decl_type.is_empty() {
            pk_defs.push(' ');
            pk_defs.push_str(&col.decl_type);
        }
        pk_defs.push_str(",\n");
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {audit} (\n\
         \x20   id             INTEGER PRIMARY KEY,\n\
         \x20   timestamp      TEXT NOT NULL,\n\
         \x20   operation      TEXT NOT NULL,\n\
         {pk_defs}\
         \x20   updated_values TEXT,\n\
         \x20   \"group\"        INTEGER REFERENCES {group} (id)\n\
         )",
        audit = quote_ident(&audit_table_name(&tracked.name)),
        group = quote_ident(GROUP_TABLE),
    )
}

/// Builds the two per-audit-table indexes: one on timestamp, one on the key
/// column(s).
fn audit_index_ddl(tracked: &TrackedTable) -> String {
    let audit = audit_table_name(&tracked.name);
    let pk_cols = tracked
        .pk_columns()
        .iter()
        .map(|c| quote_ident(&audit_pk_column(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "CREATE INDEX IF NOT EXISTS {ts_idx} ON {audit} (timestamp);\n\
         CREATE INDEX IF NOT EXISTS {pk_idx} ON {audit} ({pk_cols});",
        ts_idx = quote_ident(&format!("{audit}_timestamp")),
        pk_idx = quote_ident(&format!("{audit}_pk")),
        audit = quote_ident(&audit),
    )
}

// =============================================================================
// Savepoint Wrapper
// =============================================================================

/// Runs `f` inside a named savepoint: released on success, rolled back and
/// released on failure. Savepoints nest, so this is safe whether or not the
/// caller already holds an open transaction.
pub(crate) fn with_savepoint<T>(
    conn: &Connection,
    name: &str,
    f: impl FnOnce(&Connection) -> Result<T>,
) -> Result<T> {
    conn.execute_batch(&format!("SAVEPOINT {name}"))?;
    match f(conn) {
        Ok(value) => {
            conn.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
            Ok(value)
        }
        Err(err) => {
            // Roll back our changes, then release so the caller's savepoint
            // stack is left exactly as we found it. The original error wins
            // over any failure during cleanup.
            let _ = conn.execute_batch(&format!(
                "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}"
            ));
            Err(err)
        }
    }
}

// =============================================================================
// Enable / Disable
// =============================================================================

/// Enables history tracking for a table with default options: atomic setup
/// plus a baseline snapshot of existing rows when the audit log is empty.
///
/// Idempotent: a second call performs no destructive change, duplicates no
/// indexes, and writes no additional entries.
///
/// # Errors
///
/// [`Error::NoSuchTable`] / [`Error::NoPrimaryKey`] before any schema change.
pub fn enable_tracking(conn: &Connection, table: &str) -> Result<()> {
    enable_tracking_with(conn, table, EnableOptions::default())
}

/// [`enable_tracking`] with explicit [`EnableOptions`].
pub fn enable_tracking_with(conn: &Connection, table: &str, options: EnableOptions) -> Result<()> {
    let tracked = TrackedTable::resolve(conn, table)?;
    if options.atomic {
        with_savepoint(conn, "ledgerdb_enable", |conn| {
            install_tracking(conn, &tracked, options.populate)
        })
    } else {
        install_tracking(conn, &tracked, options.populate)
    }
}

fn install_tracking(conn: &Connection, tracked: &TrackedTable, populate: bool) -> Result<()> {
    create_group_table(conn)?;
    conn.execute_batch(&audit_table_ddl(tracked))?;
    conn.execute_batch(&capture::insert_trigger_sql(tracked))?;
    conn.execute_batch(&capture::update_trigger_sql(tracked))?;
    conn.execute_batch(&capture::delete_trigger_sql(tracked))?;
    conn.execute_batch(&audit_index_ddl(tracked))?;

    if populate {
        // Snapshot only into an empty audit log; a re-enable must not write
        // duplicate synthetic history.
        let count: i64 = conn.query_row(
            &format!(
                "SELECT count(*) FROM {}",
                quote_ident(&audit_table_name(&tracked.name))
            ),
            [],
            |row| row.get(0),
        )?;
        if count == 0 {
            capture::populate_tracked(conn, tracked)?;
        }
    }

    debug!(table = %tracked.name, "history tracking enabled");
    Ok(())
}

/// Disables tracking: drops the three capture triggers, atomically.
///
/// The audit table and its entries are preserved; only capture stops.
/// Idempotent.
pub fn disable_tracking(conn: &Connection, table: &str) -> Result<()> {
    disable_tracking_with(conn, table, true)
}

/// [`disable_tracking`] with control over the savepoint wrapper.
pub fn disable_tracking_with(conn: &Connection, table: &str, atomic: bool) -> Result<()> {
    let drop_triggers = |conn: &Connection| -> Result<()> {
        for op in [Operation::Insert, Operation::Update, Operation::Delete] {
            conn.execute_batch(&format!(
                "DROP TRIGGER IF EXISTS {}",
                quote_ident(&trigger_name(op, table))
            ))?;
        }
        debug!(table, "history tracking disabled");
        Ok(())
    };
    if atomic {
        with_savepoint(conn, "ledgerdb_disable", drop_triggers)
    } else {
        drop_triggers(conn)
    }
}

// =============================================================================
// Tests
// =============================================================================
