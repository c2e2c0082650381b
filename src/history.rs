//! # Audit Log Retrieval
//!
//! Ordered access to a table's audit entries: newest-first listings for the
//! whole table ([`history`]) or one row ([`row_history`]), and the ascending
//! key-scoped scan the reconstruction engine folds over.
//!
//! Listings join the group table so each entry carries the group's current
//! note; entries reference groups by id, never by a copied note. Every read
//! here re-queries the audit log — there is no cache, so results always
//! reflect the latest committed entries.

use rusqlite::{params_from_iter, Connection};
use serde_json::{Map as JsonMap, Value as JsonValue};

use crate::error::{Error, Result};
use crate::schema::{
    audit_pk_column, audit_table_name, quote_ident, require_tracked, GROUP_TABLE,
};
use crate::types::{AuditEntry, GroupId, Operation, RowKey, SqlValue, TrackedTable, Version};

// =============================================================================
// Row Mapping Helpers
// =============================================================================

/// Parses the stored `operation` literal, rejecting anything unexpected.
fn parse_operation(text: &str) -> Result<Operation> {
    Operation::parse(text)
        .ok_or_else(|| Error::Decode(format!("unknown operation literal '{text}'")))
}

/// Parses a stored `updated_values` payload into its JSON object.
pub(crate) fn parse_diff(raw: Option<String>) -> Result<Option<JsonMap<String, JsonValue>>> {
    match raw {
        None => Ok(None),
        Some(text) => match serde_json::from_str::<JsonValue>(&text)? {
            JsonValue::Object(map) => Ok(Some(map)),
            other => Err(Error::Decode(format!(
                "updated_values is not a JSON object: {other}"
            ))),
        },
    }
}

/// Builds the `WHERE` conjunction over all key columns, with bind values in
/// key order.
///
/// # Errors
///
/// [`Error::Config`] when the supplied key is missing one of the table's key
/// columns.
fn pk_predicate(tracked: &TrackedTable, key: &RowKey) -> Result<(String, Vec<SqlValue>)> {
    let mut clauses = Vec::new();
    let mut params = Vec::new();
    for col in tracked.pk_columns() {
        let value = key.get(&col.name).ok_or_else(|| {
            Error::Config(format!(
                "row key for table '{}' is missing key column '{}'",
                tracked.name, col.name
            ))
        })?;
        clauses.push(format!(
            "a.{} = ?",
            quote_ident(&audit_pk_column(&col.name))
        ));
        params.push(value.clone());
    }
    Ok((clauses.join(" AND "), params))
}

// =============================================================================
// Newest-First Listings
// =============================================================================

/// Lists a table's audit entries, newest first.
///
/// # Errors
///
/// [`Error::NotTracked`] when the table has no audit table.
pub fn history(conn: &Connection, table: &str, limit: Option<usize>) -> Result<Vec<AuditEntry>> {
    let tracked = TrackedTable::resolve(conn, table)?;
    require_tracked(conn, table)?;
    list_entries(conn, &tracked, None, limit)
}

/// Lists the audit entries for one row, newest first. The key comparison is
/// a conjunction over all key columns, so compound keys filter exactly.
///
/// # Errors
///
/// [`Error::NotTracked`] when the table has no audit table; [`Error::Config`]
/// when `key` does not cover every key column.
pub fn row_history(
    conn: &Connection,
    table: &str,
    key: &RowKey,
    limit: Option<usize>,
) -> Result<Vec<AuditEntry>> {
    let tracked = TrackedTable::resolve(conn, table)?;
    require_tracked(conn, table)?;
    list_entries(conn, &tracked, Some(key), limit)
}

fn list_entries(
    conn: &Connection,
    tracked: &TrackedTable,
    key: Option<&RowKey>,
    limit: Option<usize>,
) -> Result<Vec<AuditEntry>> {
    let pk_cols = tracked.pk_columns();
    let pk_select = pk_cols
        .iter()
        .map(|c| format!("a.{}", quote_ident(&audit_pk_column(&c.name))))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "SELECT a.id, a.timestamp, a.operation, {pk_select}, a.updated_values, a.\"group\", g.note\n\
         FROM {audit} a\n\
         LEFT JOIN {group} g ON g.id = a.\"group\"",
        audit = quote_ident(&audit_table_name(&tracked.name)),
        group = quote_ident(GROUP_TABLE),
    );

    let mut params: Vec<SqlValue> = Vec::new();
    if let Some(key) = key {
        let (predicate, key_params) = pk_predicate(tracked, key)?;
        sql.push_str("\nWHERE ");
        sql.push_str(&predicate);
        params.extend(key_params);
    }
    sql.push_str("\nORDER BY a.id DESC");
    if let Some(limit) = limit {
        sql.push_str("\nLIMIT ?");
        params.push(SqlValue::Integer(limit as i64));
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        let timestamp: String = row.get(1)?;
        let operation = parse_operation(&row.get::<_, String>(2)?)?;

        let mut key = RowKey::new();
        for (i, col) in pk_cols.iter().enumerate() {
            let value: SqlValue = row.get(3 + i)?;
            key = key.with(col.name.clone(), value);
        }

        let diff_idx = 3 + pk_cols.len();
        let updated_values = parse_diff(row.get(diff_idx)?)?;
        let group: Option<i64> = row.get(diff_idx + 1)?;
        let group_note: Option<String> = row.get(diff_idx + 2)?;

        entries.push(AuditEntry {
            id: Version::from_raw(id),
            timestamp,
            operation,
            key,
            updated_values,
            group: group.map(GroupId::from_raw),
            group_note,
        });
    }
    Ok(entries)
}

// =============================================================================
// Ascending Key Scan (reconstruction input)
// =============================================================================

/// A minimal audit entry as consumed by the reconstruction fold.
#[derive(Debug)]
pub(crate) struct RawEntry {
    pub id: i64,
    pub operation: Operation,
    pub diff: Option<JsonMap<String, JsonValue>>,
}

/// All entries for one key with `id <= version`, ascending by id.
pub(crate) fn key_entries_up_to(
    conn: &Connection,
    tracked: &TrackedTable,
    key: &RowKey,
    version: Version,
) -> Result<Vec<RawEntry>> {
    let (predicate, mut params) = pk_predicate(tracked, key)?;
    params.push(SqlValue::Integer(version.as_raw()));

    let sql = format!(
        "SELECT a.id, a.operation, a.updated_values\n\
         FROM {audit} a\n\
         WHERE {predicate} AND a.id <= ?\n\
         ORDER BY a.id ASC",
        audit = quote_ident(&audit_table_name(&tracked.name)),
    );

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params_from_iter(params))?;

    let mut entries = Vec::new();
    while let Some(row) = rows.next()? {
        entries.push(RawEntry {
            id: row.get(0)?,
            operation: parse_operation(&row.get::<_, String>(1)?)?,
            diff: parse_diff(row.get(2)?)?,
        });
    }
    Ok(entries)
}

// =============================================================================
// Tests
// =============================================================================
