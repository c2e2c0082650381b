#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

pub fn memory_db() -> Connection {
    Connection::open_in_memory().expect("open in-memory db")
}

/// Simple single-key table used by most scenarios.
pub fn items_db() -> Connection {
    let conn = memory_db();
    conn.execute_batch(
        "CREATE TABLE items (
            id INTEGER PRIMARY KEY,
            name TEXT,
            price FLOAT,
            quantity INTEGER
        )",
    )
    .expect("create items");
    conn
}

/// Compound-key table.
pub fn user_roles_db() -> Connection {
    let conn = memory_db();
    conn.execute_batch(
        "CREATE TABLE user_roles (
            user_id INTEGER,
            role_id INTEGER,
            granted_by TEXT,
            active INTEGER,
            PRIMARY KEY (user_id, role_id)
        )",
    )
    .expect("create user_roles");
    conn
}

/// Table with a BLOB column.
pub fn files_db() -> Connection {
    let conn = memory_db();
    conn.execute_batch(
        "CREATE TABLE files (
            id INTEGER PRIMARY KEY,
            name TEXT,
            content BLOB
        )",
    )
    .expect("create files");
    conn
}

/// Table with a TEXT primary key.
pub fn config_db() -> Connection {
    let conn = memory_db();
    conn.execute_batch(
        "CREATE TABLE config (
            key TEXT PRIMARY KEY,
            value TEXT
        )",
    )
    .expect("create config");
    conn
}

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}

pub fn open_read_only(path: &Path) -> Connection {
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .expect("open read-only connection")
}

pub fn table_exists(conn: &Connection, name: &str) -> bool {
    let count: i64 = conn
        .query_row(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |row| row.get(0),
        )
        .expect("query sqlite_master");
    count > 0
}

pub fn trigger_names(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare("SELECT name FROM sqlite_master WHERE type = 'trigger' AND tbl_name = ?1 ORDER BY name")
        .expect("prepare");
    stmt.query_map([table], |row| row.get(0))
        .expect("query triggers")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect triggers")
}

pub fn index_names(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = conn
        .prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'index' AND tbl_name = ?1 AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )
        .expect("prepare");
    stmt.query_map([table], |row| row.get(0))
        .expect("query indexes")
        .collect::<Result<Vec<_>, _>>()
        .expect("collect indexes")
}

pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Raw audit rows for a tracked table, oldest first:
/// (id, operation, updated_values, group).
pub fn audit_rows(
    conn: &Connection,
    table: &str,
) -> Vec<(i64, String, Option<String>, Option<i64>)> {
    let audit = quote(&ledgerdb::audit_table_name(table));
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, operation, updated_values, \"group\" FROM {audit} ORDER BY id"
        ))
        .expect("prepare audit scan");
    stmt.query_map([], |row| {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
    })
    .expect("query audit rows")
    .collect::<Result<Vec<_>, _>>()
    .expect("collect audit rows")
}

pub fn audit_count(conn: &Connection, table: &str) -> i64 {
    let audit = quote(&ledgerdb::audit_table_name(table));
    conn.query_row(&format!("SELECT count(*) FROM {audit}"), [], |row| {
        row.get(0)
    })
    .expect("count audit rows")
}
