//! # LedgerDB - Table History for SQLite
//!
//! LedgerDB captures every mutation (insert/update/delete) applied to a
//! tracked SQLite table into an append-only audit log of JSON diffs, and can
//! reconstruct the table's state — in full or for a single row — at any
//! historical version.
//!
//! ## Architecture Overview
//!
//! ```text
//! mutation ──► capture triggers ──► audit table (append-only)
//!                   │                    │
//!            change group stamp          ├──► history listings (newest first)
//!                                        ├──► row reconstruction (fold to version)
//!                                        └──► full-table replay / restore
//! ```
//!
//! Capture is compiled into `AFTER` triggers generated from a schema
//! description, so the audit entry is written inside the same transaction as
//! the mutation: both commit or neither does. Historical reads fold the
//! audit log back into row or table state; nothing is cached, so reads
//! always reflect the latest committed entries.
//!
//! ## Core Invariants
//!
//! 1. **Append-only**: audit entries are never mutated or deleted; an audit
//!    table fully determines its tracked table's history.
//! 2. **Total order**: the entry id strictly increases and is the sole
//!    authoritative ordering; timestamps are advisory.
//! 3. **Shared fate**: an aborted transaction persists neither the mutation
//!    nor its audit entry.
//! 4. **Minimal diffs**: inserts record every non-key column, updates record
//!    only NULL-aware changes, deletes record nothing but the key.
//! 5. **Unambiguous encoding**: NULL and blob values are tagged marker
//!    objects, bijectively decodable.
//!
//! ## Module Organization
//!
//! - [`error`]: the crate-wide error enum and `Result` alias
//! - [`types`]: domain types (versions, operations, keys, options)
//! - [`value`]: the value codec (native value <-> JSON token)
//! - [`schema`]: schema resolution, naming, enable/disable tracking
//! - [`capture`]: generated capture triggers and baseline populate
//! - [`group`]: change groups (shared id/note for a batch of writes)
//! - [`history`]: newest-first audit listings
//! - [`reconstruct`]: single-row point-in-time reconstruction
//! - [`restore`]: full-table replay, optionally swapped in for the original
//!
//! ## Example
//!
//! ```no_run
//! use ledgerdb::{enable_tracking, row_state_at, types::{RowKey, Version}};
//!
//! # fn main() -> ledgerdb::Result<()> {
//! let conn = rusqlite::Connection::open("app.db")?;
//! conn.execute_batch("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT, price FLOAT)")?;
//!
//! enable_tracking(&conn, "items")?;
//! conn.execute("INSERT INTO items VALUES (1, 'Widget', 9.99)", [])?;
//! conn.execute("UPDATE items SET price = 12.99 WHERE id = 1", [])?;
//!
//! let key = RowKey::new().with("id", 1i64);
//! let before_raise = row_state_at(&conn, "items", &key, Version::from_raw(1))?;
//! # let _ = before_raise;
//! # Ok(())
//! # }
//! ```

/// Error types for LedgerDB operations.
pub mod error;

/// Domain types: versions, operations, keys, entries, options.
pub mod types;

/// The value codec: native column values to and from JSON tokens.
pub mod value;

/// Schema resolution and tracking setup/teardown.
pub mod schema;

/// Generated capture triggers and baseline populate.
pub mod capture;

/// Change groups: a shared id and note for a batch of mutations.
pub mod group;

/// Newest-first audit log listings.
pub mod history;

/// Single-row point-in-time reconstruction.
pub mod reconstruct;

/// Full-table replay and restore.
pub mod restore;

pub use capture::populate;
pub use error::{Error, Result};
pub use group::{with_change_group, ChangeGroup};
pub use history::{history, row_history};
pub use reconstruct::row_state_at;
pub use restore::restore;
pub use schema::{
    audit_table_name, disable_tracking, disable_tracking_with, enable_tracking,
    enable_tracking_with, is_tracked,
};
pub use types::{
    AuditEntry, Cutoff, Destination, EnableOptions, GroupId, Operation, Reconstructed,
    RestoreOptions, RowKey, TrackedTable, Version,
};
