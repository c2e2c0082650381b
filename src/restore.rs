//! # Replay / Restore Engine
//!
//! Materializes a full table snapshot by replaying its entire audit log, in
//! ascending entry-id order, up to a cutoff — across all rows, not just one
//! key. The materialized table can land under a generated name, an explicit
//! name, a separate database file, or (via swap) atomically replace the
//! original.
//!
//! ## Replay Rules
//!
//! - insert: create the row at that key with the decoded column values;
//!   columns absent from the diff become NULL.
//! - update: merge the diff into the existing row. An update that matches
//!   no row is a [`crate::Error::ReplayConsistency`] — a well-formed log
//!   inserts before it updates, so this means corruption or tampering, and
//!   replay aborts.
//! - delete: remove the row. Deleting an already-absent row is tolerated,
//!   to stay robust against manual audit-log edits.
//!
//! The whole replay runs inside a savepoint: a failed restore leaves the
//! database exactly as it was.
//!
//! ## Swap
//!
//! With `swap`, the materialized table replaces the original under its own
//! name through a rename dance inside the same savepoint. SQLite rewrites
//! triggers to follow a renamed table, which would drag the capture triggers
//! onto the discarded original; they are recreated on the restored table
//! afterwards so tracking continues uninterrupted.

use rusqlite::{params_from_iter, Connection};
use tracing::info;

use crate::capture;
use crate::error::{Error, Result};
use crate::history::parse_diff;
use crate::schema::{
    audit_pk_column, audit_table_name, quote_ident, require_tracked, with_savepoint,
};
use crate::types::{
    Cutoff, Destination, Operation, RestoreOptions, SqlValue, TrackedTable,
};

/// Alias under which a cross-database destination is attached.
const ATTACH_ALIAS: &str = "ledgerdb_restore";

/// Materializes the tracked table's state as of `options.cutoff`.
///
/// Returns the name of the materialized table: the original name when
/// swapping (or when writing into a destination database), the target name
/// otherwise.
///
/// # Errors
///
/// - [`Error::Config`] when `swap` is combined with an explicit destination
///   (rejected before any work starts).
/// - [`Error::NotTracked`] when the table has no audit table.
/// - [`Error::ReplayConsistency`] when the log updates a row that does not
///   exist; the savepoint rolls everything back.
pub fn restore(conn: &Connection, table: &str, options: &RestoreOptions) -> Result<String> {
    if options.swap && options.destination != Destination::Generated {
        return Err(Error::Config(
            "atomic swap rebuilds the table in place and cannot be combined with an explicit \
             destination"
                .to_string(),
        ));
    }

    let tracked = TrackedTable::resolve(conn, table)?;
    require_tracked(conn, table)?;

    match &options.destination {
        Destination::Database(path) => {
            // ATTACH cannot run inside a transaction, so it brackets the
            // savepoint instead of living inside it.
            let path_text = path.to_string_lossy().into_owned();
            conn.execute(
                &format!("ATTACH DATABASE ?1 AS {ATTACH_ALIAS}"),
                [path_text],
            )?;
            let replayed = with_savepoint(conn, "ledgerdb_restore", |conn| {
                replay_into(conn, &tracked, &options.cutoff, Some(ATTACH_ALIAS), table)
            });
            let _ = conn.execute_batch(&format!("DETACH DATABASE {ATTACH_ALIAS}"));
            let replayed = replayed?;
            info!(table, entries = replayed, destination = %path.display(), "restore complete");
            Ok(table.to_string())
        }
        destination => {
            let target = if options.swap {
                format!("_ledgerdb_restore_{table}")
            } else {
                match destination {
                    Destination::Generated => format!("{table}_restored"),
                    Destination::Table(name) => name.clone(),
                    Destination::Database(_) => unreachable!("handled above"),
                }
            };

            let replayed = with_savepoint(conn, "ledgerdb_restore", |conn| {
                let replayed = replay_into(conn, &tracked, &options.cutoff, None, &target)?;
                if options.swap {
                    swap_tables(conn, &tracked, &target)?;
                }
                Ok(replayed)
            })?;

            let result = if options.swap {
                table.to_string()
            } else {
                target
            };
            info!(table, entries = replayed, materialized = %result, "restore complete");
            Ok(result)
        }
    }
}

// =============================================================================
// Target Table
// =============================================================================

/// Builds the target's CREATE TABLE from the tracked description: column
/// types, NOT NULL, defaults, and the PRIMARY KEY clause. Table-level
/// constraints outside `PRAGMA table_info` (CHECK, UNIQUE, foreign keys) are
/// not carried.
fn target_table_ddl(tracked: &TrackedTable, qualified_target: &str) -> String {
    let mut defs = Vec::new();
    for col in &tracked.columns {
        let mut def = quote_ident(&col.name);
        if !col.decl_type.is_empty() {
            def.push(' ');
            def.push_str(&col.decl_type);
        }
        if col.notnull {
            def.push_str(" NOT NULL");
        }
        if let Some(default) = &col.default {
            def.push_str(" DEFAULT ");
            def.push_str(default);
        }
        defs.push(def);
    }
    let pk = tracked
        .pk_columns()
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    defs.push(format!("PRIMARY KEY ({pk})"));
    format!("CREATE TABLE {qualified_target} ({})", defs.join(", "))
}

// =============================================================================
// Replay
// =============================================================================

/// Replays the audit log into a freshly created target table. Returns the
/// number of entries applied.
fn replay_into(
    conn: &Connection,
    tracked: &TrackedTable,
    cutoff: &Cutoff,
    schema_alias: Option<&str>,
    target: &str,
) -> Result<usize> {
    let qualified = match schema_alias {
        Some(alias) => format!("{}.{}", quote_ident(alias), quote_ident(target)),
        None => quote_ident(target),
    };

    conn.execute_batch(&format!("DROP TABLE IF EXISTS {qualified}"))?;
    conn.execute_batch(&target_table_ddl(tracked, &qualified))?;

    let pk_cols = tracked.pk_columns();
    let non_pk = tracked.non_pk_columns();

    // Audit scan, oldest first; the id is the sole replay order.
    let pk_select = pk_cols
        .iter()
        .map(|c| quote_ident(&audit_pk_column(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");
    let (condition, cutoff_params): (&str, Vec<SqlValue>) = match cutoff {
        Cutoff::Latest => ("", Vec::new()),
        Cutoff::AtVersion(version) => {
            (" WHERE id <= ?", vec![SqlValue::Integer(version.as_raw())])
        }
        Cutoff::AtTimestamp(ts) => {
            (" WHERE timestamp <= ?", vec![SqlValue::Text(ts.clone())])
        }
    };
    let scan_sql = format!(
        "SELECT id, operation, {pk_select}, updated_values FROM {audit}{condition} ORDER BY id ASC",
        audit = quote_ident(&audit_table_name(&tracked.name)),
    );

    // The insert statement covers every column and is reused for all insert
    // entries; update statements vary with each diff's column set.
    let all_col_names = pk_cols
        .iter()
        .chain(non_pk.iter())
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let placeholders = std::iter::repeat("?")
        .take(tracked.columns.len())
        .collect::<Vec<_>>()
        .join(", ");
    let mut insert_stmt = conn.prepare(&format!(
        "INSERT INTO {qualified} ({all_col_names}) VALUES ({placeholders})"
    ))?;

    let pk_predicate = pk_cols
        .iter()
        .map(|c| format!("{} = ?", quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let mut delete_stmt = conn.prepare(&format!(
        "DELETE FROM {qualified} WHERE {pk_predicate}"
    ))?;

    let mut scan = conn.prepare(&scan_sql)?;
    let mut rows = scan.query(params_from_iter(cutoff_params))?;

    let mut replayed = 0usize;
    while let Some(row) = rows.next()? {
        let entry_id: i64 = row.get(0)?;
        let op_text: String = row.get(1)?;
        let operation = Operation::parse(&op_text)
            .ok_or_else(|| Error::Decode(format!("unknown operation literal '{op_text}'")))?;

        let mut pk_values: Vec<SqlValue> = Vec::with_capacity(pk_cols.len());
        for i in 0..pk_cols.len() {
            pk_values.push(row.get(2 + i)?);
        }
        let diff = parse_diff(row.get(2 + pk_cols.len())?)?;

        match operation {
            Operation::Insert => {
                let diff = diff.unwrap_or_default();
                let mut params = pk_values;
                for col in &non_pk {
                    let value = match diff.get(&col.name) {
                        Some(token) => crate::value::decode(token)?,
                        None => SqlValue::Null,
                    };
                    params.push(value);
                }
                insert_stmt.execute(params_from_iter(params))?;
            }
            Operation::Update => {
                let diff = diff.unwrap_or_default();
                if diff.is_empty() {
                    replayed += 1;
                    continue;
                }
                let mut set_clauses = Vec::with_capacity(diff.len());
                let mut params = Vec::with_capacity(diff.len() + pk_values.len());
                for (column, token) in &diff {
                    set_clauses.push(format!("{} = ?", quote_ident(column)));
                    params.push(crate::value::decode(token)?);
                }
                params.extend(pk_values);
                let changed = conn.execute(
                    &format!(
                        "UPDATE {qualified} SET {} WHERE {pk_predicate}",
                        set_clauses.join(", ")
                    ),
                    params_from_iter(params),
                )?;
                if changed == 0 {
                    return Err(Error::ReplayConsistency {
                        table: tracked.name.clone(),
                        entry_id,
                        detail: "update matched no existing row".to_string(),
                    });
                }
            }
            Operation::Delete => {
                delete_stmt.execute(params_from_iter(pk_values))?;
            }
        }
        replayed += 1;
    }
    Ok(replayed)
}

// =============================================================================
// Swap
// =============================================================================

/// Replaces the original table with the materialized one under the original
/// name, then reinstates the capture triggers on it.
fn swap_tables(conn: &Connection, tracked: &TrackedTable, target: &str) -> Result<()> {
    let backup = format!("_ledgerdb_old_{}", tracked.name);
    conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", quote_ident(&backup)))?;
    conn.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(&tracked.name),
        quote_ident(&backup)
    ))?;
    conn.execute_batch(&format!(
        "ALTER TABLE {} RENAME TO {}",
        quote_ident(target),
        quote_ident(&tracked.name)
    ))?;
    // The capture triggers followed the rename onto the backup; dropping it
    // discards them, so they are recreated on the restored table.
    conn.execute_batch(&format!("DROP TABLE {}", quote_ident(&backup)))?;
    conn.execute_batch(&capture::insert_trigger_sql(tracked))?;
    conn.execute_batch(&capture::update_trigger_sql(tracked))?;
    conn.execute_batch(&capture::delete_trigger_sql(tracked))?;
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::enable_tracking;
    use crate::types::Version;

    fn items_db() -> Connection {
        let conn = Connection::open_in_memory().expect("open in-memory db");
        conn.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price FLOAT)",
        )
        .expect("create table");
        conn
    }

    fn rows_of(conn: &Connection, table: &str) -> Vec<(i64, Option<String>, Option<f64>)> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, name, price FROM {} ORDER BY id",
                quote_ident(table)
            ))
            .unwrap();
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
            .unwrap()
            .collect::<std::result::Result<Vec<_>, _>>()
            .unwrap();
        rows
    }

    #[test]
    fn test_swap_with_explicit_destination_rejected_before_work() {
        let conn = items_db();
        // Rejected even before the NotTracked check would fire.
        let options = RestoreOptions {
            swap: true,
            destination: Destination::Table("elsewhere".to_string()),
            ..Default::default()
        };
        let err = restore(&conn, "items", &options).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_full_restore_matches_live_table() {
        let conn = items_db();
        enable_tracking(&conn, "items").unwrap();
        conn.execute("INSERT INTO items VALUES (1, 'Widget', 9.99)", []).unwrap();
        conn.execute("INSERT INTO items VALUES (2, 'Gadget', 24.99)", []).unwrap();
        conn.execute("UPDATE items SET price = 19.99 WHERE id = 2", []).unwrap();
        conn.execute("DELETE FROM items WHERE id = 1", []).unwrap();
        conn.execute("INSERT INTO items VALUES (3, 'Doohickey', NULL)", []).unwrap();

        let name = restore(&conn, "items", &RestoreOptions::default()).unwrap();
        assert_eq!(name, "items_restored");
        assert_eq!(rows_of(&conn, "items_restored"), rows_of(&conn, "items"));
    }

    #[test]
    fn test_restore_at_version_cutoff() {
        let conn = items_db();
        enable_tracking(&conn, "items").unwrap();
        conn.execute("INSERT INTO items VALUES (1, 'Widget', 9.99)", []).unwrap();
        conn.execute("UPDATE items SET name = 'Gizmo' WHERE id = 1", []).unwrap();
        conn.execute("DELETE FROM items WHERE id = 1", []).unwrap();

        let options = RestoreOptions {
            cutoff: Cutoff::AtVersion(Version::from_raw(2)),
            ..Default::default()
        };
        restore(&conn, "items", &options).unwrap();
        let rows = rows_of(&conn, "items_restored");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.as_deref(), Some("Gizmo"));
    }

    #[test]
    fn test_restore_swap_replaces_original_and_keeps_tracking() {
        let conn = items_db();
        enable_tracking(&conn, "items").unwrap();
        conn.execute("INSERT INTO items VALUES (1, 'Widget', 9.99)", []).unwrap();
        conn.execute("DELETE FROM items WHERE id = 1", []).unwrap();

        let options = RestoreOptions {
            cutoff: Cutoff::AtVersion(Version::from_raw(1)),
            swap: true,
            ..Default::default()
        };
        let name = restore(&conn, "items", &options).unwrap();
        assert_eq!(name, "items");

        // The deleted row is back in the live table.
        let rows = rows_of(&conn, "items");
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].1.as_deref(), Some("Widget"));

        // Capture still works after the swap.
        conn.execute("UPDATE items SET price = 1.0 WHERE id = 1", []).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM _ledgerdb_items", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_tampered_log_aborts_and_rolls_back() {
        let conn = items_db();
        enable_tracking(&conn, "items").unwrap();
        conn.execute("INSERT INTO items VALUES (1, 'Widget', 9.99)", []).unwrap();
        // Forge an update for a row that was never inserted.
        conn.execute(
            "INSERT INTO _ledgerdb_items (timestamp, operation, pk_id, updated_values)
             VALUES ('2026-01-01 00:00:00.000', 'update', 99, '{\"name\":\"ghost\"}')",
            [],
        )
        .unwrap();

        let err = restore(&conn, "items", &RestoreOptions::default()).unwrap_err();
        match err {
            Error::ReplayConsistency { entry_id, .. } => assert_eq!(entry_id, 2),
            other => panic!("expected ReplayConsistency, got {other}"),
        }
        // The savepoint rolled the half-built target back.
        let exists: i64 = conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = 'items_restored'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert_eq!(exists, 0);
    }

    #[test]
    fn test_delete_of_absent_row_is_tolerated() {
        let conn = items_db();
        enable_tracking(&conn, "items").unwrap();
        conn.execute("INSERT INTO items VALUES (1, 'Widget', 9.99)", []).unwrap();
        // Forge a delete for a row that never existed.
        conn.execute(
            "INSERT INTO _ledgerdb_items (timestamp, operation, pk_id, updated_values)
             VALUES ('2026-01-01 00:00:00.000', 'delete', 99, NULL)",
            [],
        )
        .unwrap();

        restore(&conn, "items", &RestoreOptions::default()).unwrap();
        assert_eq!(rows_of(&conn, "items_restored").len(), 1);
    }
}
