//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The engine and tools call store methods — they never execute SQL
//! directly.

mod record;
mod result;

use rusqlite::Connection;

use crate::error::ReconResult;

pub struct RecordStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl RecordStore {
    pub fn open(path: &str) -> ReconResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests and the demo runner).
    pub fn in_memory() -> ReconResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database
    /// (isolated). For file-based databases, this opens the same file.
    pub fn reopen(&self) -> ReconResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ReconResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Transactions ───────────────────────────────────────────

    /// Start the run transaction. IMMEDIATE grabs the write lock up
    /// front, so a run fails fast instead of deadlocking mid-batch.
    pub fn begin(&self) -> ReconResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        Ok(())
    }

    pub fn commit(&self) -> ReconResult<()> {
        self.conn.execute_batch("COMMIT;")?;
        Ok(())
    }

    /// Roll back the run transaction. Called on error paths only; a
    /// rollback failure is logged, the original error stays primary.
    pub fn rollback(&self) {
        if let Err(err) = self.conn.execute_batch("ROLLBACK;") {
            log::error!("rollback failed: {err}");
        }
    }

    /// Raw SQL escape hatch for tests that need to sabotage the schema.
    #[cfg(test)]
    pub(crate) fn execute_raw(&self, sql: &str) -> ReconResult<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}
