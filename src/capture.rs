//! # Change Capture Engine
//!
//! Computes, for each mutation against a tracked table, the minimal JSON diff
//! to record, and appends it to the audit table. Capture is compiled into
//! three `AFTER` triggers generated from the [`TrackedTable`] description;
//! SQLite fires them synchronously inside the mutating transaction, so the
//! audit entry and the mutation share fate: both commit or neither does.
//! That coupling is a correctness requirement, not an optimization.
//!
//! ## Diff Rules
//!
//! - insert: every non-key column of the new row, encoded per the value
//!   codec's marker scheme.
//! - update: only columns whose value changed, compared with `IS NOT` so the
//!   comparison is NULL-aware (NULL to NULL is unchanged, any other NULL
//!   transition is a change). An update that changes nothing still appends
//!   an entry with an empty `{}` diff: the operation happened, and the
//!   version history stays complete.
//! - delete: no diff; the key columns alone identify the vanished row.
//!
//! Key columns are taken from `NEW` for insert/update and from `OLD` for
//! delete. Per-column contributions in the update trigger are folded with
//! nested `json_patch`, which is why encoded NULLs must be marker objects:
//! a bare JSON `null` would be patched away as "remove key".
//!
//! Every entry is stamped with the currently active change group via a
//! subselect on the group table; the subselect yields NULL when no group is
//! active.
//!
//! ## Declared-Type Constraint
//!
//! Value encoding branches on the declared column type: BLOB columns go
//! through `hex()`, everything else is handed to `json_object` directly.
//! A blob value stored in a column not declared BLOB fails the trigger at
//! mutation time (and with it the mutation), because `json_object` rejects
//! blob arguments.

use rusqlite::{params_from_iter, Connection};
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::debug;

use crate::error::Result;
use crate::schema::{
    audit_pk_column, audit_table_name, quote_ident, quote_literal, require_tracked, trigger_name,
    GROUP_TABLE,
};
use crate::types::{ColumnInfo, Operation, SqlValue, TrackedTable};
use crate::value;

/// SQL expression for the capture timestamp: ISO-8601 text with milliseconds.
/// Millisecond resolution still cannot order same-transaction entries, so the
/// entry id stays the authoritative order; this column is advisory.
const TIMESTAMP_EXPR: &str = "strftime('%Y-%m-%d %H:%M:%f', 'now')";

/// SQL expression resolving the active change group id, or NULL.
fn group_expr() -> String {
    format!(
        "(SELECT id FROM {} WHERE current IS NOT NULL)",
        quote_ident(GROUP_TABLE)
    )
}

// =============================================================================
// Encoding Expressions
// =============================================================================

/// SQL expression encoding `{prefix}."{col}"` per the value codec scheme:
/// NULL marker for NULL, hex marker for declared BLOB columns, the raw value
/// otherwise.
fn encode_expr(prefix: &str, col: &ColumnInfo) -> String {
    let col_ref = format!("{prefix}.{}", quote_ident(&col.name));
    if col.is_blob() {
        format!(
            "CASE WHEN {col_ref} IS NULL THEN json_object('null', 1) \
             ELSE json_object('hex', hex({col_ref})) END"
        )
    } else {
        format!("CASE WHEN {col_ref} IS NULL THEN json_object('null', 1) ELSE {col_ref} END")
    }
}

/// Full-row diff expression for the insert trigger: one `json_object` with an
/// entry per non-key column.
fn insert_diff_expr(tracked: &TrackedTable) -> String {
    let non_pk = tracked.non_pk_columns();
    if non_pk.is_empty() {
        return "'{}'".to_string();
    }
    let args = non_pk
        .iter()
        .map(|col| format!("{}, {}", quote_literal(&col.name), encode_expr("NEW", col)))
        .collect::<Vec<_>>()
        .join(", ");
    format!("json_object({args})")
}

/// Changed-columns diff expression for the update trigger: per-column CASE
/// contributions folded with nested `json_patch`, starting from `'{}'`.
fn update_diff_expr(tracked: &TrackedTable) -> String {
    let mut expr = "'{}'".to_string();
    for col in tracked.non_pk_columns() {
        let col_ref = quote_ident(&col.name);
        let name_lit = quote_literal(&col.name);
        let changed_value = if col.is_blob() {
            format!(
                "CASE WHEN NEW.{col_ref} IS NULL THEN json_object({name_lit}, json_object('null', 1)) \
                 ELSE json_object({name_lit}, json_object('hex', hex(NEW.{col_ref}))) END"
            )
        } else {
            format!(
                "CASE WHEN NEW.{col_ref} IS NULL THEN json_object({name_lit}, json_object('null', 1)) \
                 ELSE json_object({name_lit}, NEW.{col_ref}) END"
            )
        };
        let contribution = format!(
            "CASE WHEN OLD.{col_ref} IS NOT NEW.{col_ref} THEN {changed_value} ELSE '{{}}' END"
        );
        expr = format!("json_patch({expr}, {contribution})");
    }
    expr
}

// =============================================================================
// Trigger SQL
// =============================================================================

/// Column list and `NEW.`/`OLD.` references for the audit key columns.
fn pk_parts(tracked: &TrackedTable, row_ref: &str) -> (String, String) {
    let pk_cols = tracked.pk_columns();
    let names = pk_cols
        .iter()
        .map(|c| quote_ident(&audit_pk_column(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");
    let refs = pk_cols
        .iter()
        .map(|c| format!("{row_ref}.{}", quote_ident(&c.name)))
        .collect::<Vec<_>>()
        .join(", ");
    (names, refs)
}

fn trigger_sql(
    tracked: &TrackedTable,
    op: Operation,
    row_ref: &str,
    diff_expr: &str,
) -> String {
    let (pk_names, pk_refs) = pk_parts(tracked, row_ref);
    format!(
        "CREATE TRIGGER IF NOT EXISTS {trigger}\n\
         AFTER {event} ON {table}\n\
         BEGIN\n\
         \x20   INSERT INTO {audit} (timestamp, operation, {pk_names}, updated_values, \"group\")\n\
         \x20   VALUES ({ts}, {op_lit}, {pk_refs}, {diff_expr}, {group});\n\
         END",
        trigger = quote_ident(&trigger_name(op, &tracked.name)),
        event = match op {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        },
        table = quote_ident(&tracked.name),
        audit = quote_ident(&audit_table_name(&tracked.name)),
        ts = TIMESTAMP_EXPR,
        op_lit = quote_literal(op.as_str()),
        group = group_expr(),
    )
}

/// SQL creating the AFTER INSERT capture trigger.
pub(crate) fn insert_trigger_sql(tracked: &TrackedTable) -> String {
    trigger_sql(
        tracked,
        Operation::Insert,
        "NEW",
        &insert_diff_expr(tracked),
    )
}

/// SQL creating the AFTER UPDATE capture trigger.
pub(crate) fn update_trigger_sql(tracked: &TrackedTable) -> String {
    trigger_sql(
        tracked,
        Operation::Update,
        "NEW",
        &update_diff_expr(tracked),
    )
}

/// SQL creating the AFTER DELETE capture trigger.
pub(crate) fn delete_trigger_sql(tracked: &TrackedTable) -> String {
    trigger_sql(tracked, Operation::Delete, "OLD", "NULL")
}

// =============================================================================
// Baseline Populate
// =============================================================================

/// Snapshots every current row of a tracked table into its audit log as a
/// synthetic `insert` entry, as if the row had just been created.
///
/// Used when enabling tracking on a table that already holds data, so the
/// audit log is self-sufficient from that point on. Safe on an empty table.
/// Running it twice writes duplicate synthetic history; avoiding that is the
/// caller's responsibility (the default enable path guards by populating
/// only an empty audit log). Entries are stamped with the active change
/// group, if any.
///
/// Returns the number of rows snapshotted.
///
/// # Errors
///
/// [`crate::Error::NotTracked`] when the audit table does not exist.
pub fn populate(conn: &Connection, table: &str) -> Result<usize> {
    let tracked = TrackedTable::resolve(conn, table)?;
    require_tracked(conn, table)?;
    populate_tracked(conn, &tracked)
}

/// [`populate`] against an already-resolved description.
pub(crate) fn populate_tracked(conn: &Connection, tracked: &TrackedTable) -> Result<usize> {
    let pk_cols = tracked.pk_columns();
    let non_pk = tracked.non_pk_columns();

    let select_cols = pk_cols
        .iter()
        .chain(non_pk.iter())
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let select_sql = format!(
        "SELECT {select_cols} FROM {}",
        quote_ident(&tracked.name)
    );

    let (pk_names, _) = pk_parts(tracked, "NEW");
    let placeholders = pk_cols.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    let insert_sql = format!(
        "INSERT INTO {audit} (timestamp, operation, {pk_names}, updated_values, \"group\")\n\
         VALUES ({ts}, 'insert', {placeholders}, ?, {group})",
        audit = quote_ident(&audit_table_name(&tracked.name)),
        ts = TIMESTAMP_EXPR,
        group = group_expr(),
    );

    let mut select = conn.prepare(&select_sql)?;
    let mut insert = conn.prepare(&insert_sql)?;

    let mut rows = select.query([])?;
    let mut count = 0usize;
    while let Some(row) = rows.next()? {
        let mut params: Vec<SqlValue> = Vec::with_capacity(pk_cols.len() + 1);
        for i in 0..pk_cols.len() {
            params.push(row.get(i)?);
        }

        let mut diff = JsonMap::new();
        for (i, col) in non_pk.iter().enumerate() {
            let val: SqlValue = row.get(pk_cols.len() + i)?;
            diff.insert(col.name.clone(), value::encode(&val));
        }
        params.push(SqlValue::Text(serde_json::to_string(&JsonValue::Object(
            diff,
        ))?));

        insert.execute(params_from_iter(params))?;
        count += 1;
    }

    debug!(table = %tracked.name, rows = count, "baseline populate complete");
    Ok(count)
}

// =============================================================================
// Tests
// =============================================================================
