mod common;

use ledgerdb::types::SqlValue;
use ledgerdb::{enable_tracking, history, row_history, row_state_at, Reconstructed, RowKey, Version};

fn key(id: i64) -> RowKey {
    RowKey::new().with("id", id)
}

/// The canonical insert/update/delete/reinsert scenario: audit ids 1-4.
fn cycle_db() -> rusqlite::Connection {
    let conn = common::items_db();
    enable_tracking(&conn, "items").unwrap();
    conn.execute("INSERT INTO items (id, name, price) VALUES (1, 'A', 10.0)", [])
        .unwrap();
    conn.execute("UPDATE items SET price = 20.0 WHERE id = 1", []).unwrap();
    conn.execute("DELETE FROM items WHERE id = 1", []).unwrap();
    conn.execute("INSERT INTO items (id, name, price) VALUES (1, 'B', 5.0)", [])
        .unwrap();
    conn
}

#[test]
fn state_at_each_version_of_the_cycle() {
    let conn = cycle_db();

    let at2 = row_state_at(&conn, "items", &key(1), Version::from_raw(2)).unwrap();
    let row = at2.as_row().expect("existed at version 2");
    assert_eq!(row.get("name"), Some(&SqlValue::Text("A".into())));
    assert_eq!(row.get("price"), Some(&SqlValue::Real(20.0)));

    let at3 = row_state_at(&conn, "items", &key(1), Version::from_raw(3)).unwrap();
    assert_eq!(at3, Reconstructed::Deleted);

    let at4 = row_state_at(&conn, "items", &key(1), Version::from_raw(4)).unwrap();
    let row = at4.as_row().expect("reinserted at version 4");
    assert_eq!(row.get("name"), Some(&SqlValue::Text("B".into())));
    assert_eq!(row.get("price"), Some(&SqlValue::Real(5.0)));
    // No residue from the pre-delete update.
    assert_eq!(row.get("quantity"), Some(&SqlValue::Null));
}

#[test]
fn reconstruction_at_latest_version_matches_live_row() {
    let conn = common::items_db();
    enable_tracking(&conn, "items").unwrap();
    conn.execute("INSERT INTO items VALUES (1, 'Widget', 9.99, 100)", [])
        .unwrap();
    conn.execute("UPDATE items SET name = 'Gizmo', quantity = 90 WHERE id = 1", [])
        .unwrap();
    conn.execute("UPDATE items SET price = NULL WHERE id = 1", [])
        .unwrap();

    let latest = history(&conn, "items", Some(1)).unwrap()[0].id;
    let state = row_state_at(&conn, "items", &key(1), latest).unwrap();
    let row = state.as_row().unwrap();

    let (name, price, quantity): (String, Option<f64>, i64) = conn
        .query_row("SELECT name, price, quantity FROM items WHERE id = 1", [], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .unwrap();
    assert_eq!(row.get("name"), Some(&SqlValue::Text(name)));
    assert_eq!(price, None);
    assert_eq!(row.get("price"), Some(&SqlValue::Null));
    assert_eq!(row.get("quantity"), Some(&SqlValue::Integer(quantity)));
}

#[test]
fn no_op_update_versions_still_resolve() {
    let conn = common::items_db();
    enable_tracking(&conn, "items").unwrap();
    conn.execute("INSERT INTO items VALUES (1, 'Widget', 9.99, 100)", [])
        .unwrap();
    conn.execute("UPDATE items SET name = 'Widget' WHERE id = 1", [])
        .unwrap();

    // Version 2 is the empty-diff update; state is unchanged but resolvable.
    let state = row_state_at(&conn, "items", &key(1), Version::from_raw(2)).unwrap();
    let row = state.as_row().unwrap();
    assert_eq!(row.get("name"), Some(&SqlValue::Text("Widget".into())));
}

#[test]
fn blob_state_decodes_back_to_bytes() {
    let conn = common::files_db();
    enable_tracking(&conn, "files").unwrap();
    conn.execute("INSERT INTO files VALUES (1, 'a.bin', x'DEADBEEF')", [])
        .unwrap();
    conn.execute("UPDATE files SET content = x'0102' WHERE id = 1", [])
        .unwrap();

    let at1 = row_state_at(&conn, "files", &key(1), Version::from_raw(1)).unwrap();
    assert_eq!(
        at1.as_row().unwrap().get("content"),
        Some(&SqlValue::Blob(vec![0xde, 0xad, 0xbe, 0xef]))
    );
    let at2 = row_state_at(&conn, "files", &key(1), Version::from_raw(2)).unwrap();
    assert_eq!(
        at2.as_row().unwrap().get("content"),
        Some(&SqlValue::Blob(vec![0x01, 0x02]))
    );
}

#[test]
fn compound_key_histories_stay_separate() {
    let conn = common::user_roles_db();
    enable_tracking(&conn, "user_roles").unwrap();
    conn.execute("INSERT INTO user_roles VALUES (1, 2, 'admin', 1)", []).unwrap();
    conn.execute("INSERT INTO user_roles VALUES (1, 3, 'system', 1)", []).unwrap();
    conn.execute(
        "UPDATE user_roles SET active = 0 WHERE user_id = 1 AND role_id = 2",
        [],
    )
    .unwrap();

    let key_12 = RowKey::new().with("user_id", 1i64).with("role_id", 2i64);
    let key_13 = RowKey::new().with("user_id", 1i64).with("role_id", 3i64);

    let state_12 = row_state_at(&conn, "user_roles", &key_12, Version::from_raw(3)).unwrap();
    assert_eq!(
        state_12.as_row().unwrap().get("active"),
        Some(&SqlValue::Integer(0))
    );

    // (1, 3) is untouched by the update of (1, 2).
    let state_13 = row_state_at(&conn, "user_roles", &key_13, Version::from_raw(3)).unwrap();
    assert_eq!(
        state_13.as_row().unwrap().get("active"),
        Some(&SqlValue::Integer(1))
    );

    // And (1, 3) has no history before its own insert.
    let early = row_state_at(&conn, "user_roles", &key_13, Version::from_raw(1)).unwrap();
    assert_eq!(early, Reconstructed::NoHistory);
}

#[test]
fn row_history_and_reconstruction_agree_on_versions() {
    let conn = cycle_db();

    let entries = row_history(&conn, "items", &key(1), None).unwrap();
    assert_eq!(entries.len(), 4);
    // Newest first.
    let ids: Vec<i64> = entries.iter().map(|e| e.id.as_raw()).collect();
    assert_eq!(ids, vec![4, 3, 2, 1]);

    // Reconstructing at each listed version never errors.
    for entry in &entries {
        row_state_at(&conn, "items", &key(1), entry.id).unwrap();
    }
}
