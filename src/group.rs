//! # Change Group Manager
//!
//! Batches of mutations performed within one logical unit of work can share
//! a group id and a free-text note. While a group is active, every audit
//! entry written on the connection's database — across all tracked tables —
//! is stamped with the group's id; entries written outside any group carry
//! none.
//!
//! ## State Machine
//!
//! Idle -> Active on [`ChangeGroup::begin`] (allocates a group row, sets its
//! `current` flag). Active -> Idle on [`ChangeGroup::finish`] — and
//! unconditionally on drop, so a batch that fails or panics never leaves the
//! database permanently "grouped". Starting a group while one is active is
//! rejected with [`Error::GroupActive`]; nesting is deliberately not
//! supported. The group table's partial unique index enforces the same
//! single-active-group rule at the storage level.
//!
//! The active marker is database state, not a process global: independent
//! connections to different databases stay independent, and aborting the
//! enclosing transaction rolls the marker back along with the mutations.
//!
//! ## Example
//!
//! ```no_run
//! use ledgerdb::{enable_tracking, with_change_group};
//!
//! # fn main() -> ledgerdb::Result<()> {
//! let conn = rusqlite::Connection::open("app.db")?;
//! enable_tracking(&conn, "items")?;
//!
//! with_change_group(&conn, Some("bulk import"), |_group| {
//!     conn.execute("INSERT INTO items (id, name) VALUES (1, 'Widget')", [])?;
//!     conn.execute("INSERT INTO items (id, name) VALUES (2, 'Gadget')", [])?;
//!     Ok(())
//! })?;
//! # Ok(())
//! # }
//! ```

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Error, Result};
use crate::schema::{create_group_table, quote_ident, GROUP_TABLE};
use crate::types::GroupId;

// =============================================================================
// Change Group Guard
// =============================================================================

/// An active change group. Clears the active flag when finished or dropped.
#[derive(Debug)]
pub struct ChangeGroup<'conn> {
    conn: &'conn Connection,
    id: GroupId,
    active: bool,
}

impl<'conn> ChangeGroup<'conn> {
    /// Starts a new change group, optionally with a note.
    ///
    /// Creates the group table if this database has never tracked anything.
    ///
    /// # Errors
    ///
    /// [`Error::GroupActive`] if a group is already active.
    pub fn begin(conn: &'conn Connection, note: Option<&str>) -> Result<Self> {
        create_group_table(conn)?;

        let existing: Option<i64> = conn
            .query_row(
                &format!(
                    "SELECT id FROM {} WHERE current IS NOT NULL",
                    quote_ident(GROUP_TABLE)
                ),
                [],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Err(Error::GroupActive { id });
        }

        conn.execute(
            &format!(
                "INSERT INTO {} (note, current) VALUES (?1, 1)",
                quote_ident(GROUP_TABLE)
            ),
            [note],
        )?;
        let id = GroupId::from_raw(conn.last_insert_rowid());
        debug!(group = %id, "change group started");
        Ok(Self {
            conn,
            id,
            active: true,
        })
    }

    /// The id stamped onto entries written while this group is active.
    pub fn id(&self) -> GroupId {
        self.id
    }

    /// Updates the group's note.
    ///
    /// Entries reference the group by id, so already-written entries pick up
    /// the new note on their next read; nothing is rewritten.
    pub fn set_note(&self, note: &str) -> Result<()> {
        self.conn.execute(
            &format!(
                "UPDATE {} SET note = ?1 WHERE id = ?2",
                quote_ident(GROUP_TABLE)
            ),
            rusqlite::params![note, self.id.as_raw()],
        )?;
        Ok(())
    }

    /// Ends the group, returning its id. Subsequent writes are ungrouped.
    pub fn finish(mut self) -> Result<GroupId> {
        self.clear()?;
        self.active = false;
        Ok(self.id)
    }

    fn clear(&self) -> Result<()> {
        self.conn.execute(
            &format!(
                "UPDATE {} SET current = NULL WHERE id = ?1",
                quote_ident(GROUP_TABLE)
            ),
            [self.id.as_raw()],
        )?;
        debug!(group = %self.id, "change group ended");
        Ok(())
    }
}

impl Drop for ChangeGroup<'_> {
    /// Clears the active flag if [`ChangeGroup::finish`] was never called,
    /// including on the unwind path. Errors here cannot be surfaced and are
    /// dropped; `finish` is the fallible way to end a group.
    fn drop(&mut self) {
        if self.active {
            let _ = self.clear();
        }
    }
}

// =============================================================================
// Closure Wrapper
// =============================================================================

/// Runs `body` with a change group active, tagging every audit entry it
/// writes. The group ends when `body` returns — on the error path too, so a
/// failed batch leaves the database ungrouped.
///
/// Returns `body`'s value together with the group id.
pub fn with_change_group<T>(
    conn: &Connection,
    note: Option<&str>,
    body: impl FnOnce(&ChangeGroup<'_>) -> Result<T>,
) -> Result<(T, GroupId)> {
    let group = ChangeGroup::begin(conn, note)?;
    match body(&group) {
        Ok(value) => {
            let id = group.finish()?;
            Ok((value, id))
        }
        Err(err) => {
            // Guard drop clears the flag; propagate the body's error.
            Err(err)
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
