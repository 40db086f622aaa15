//! muster-store: SQLite persistence for the attendance daemon.
//!
//! One [`Store`] wraps one `tokio-rusqlite` connection, so every query and
//! transaction is serialized on a single worker thread. That thread is the
//! only writer the daemon has; the check-out read-modify-write relies on it.

use std::path::Path;

use thiserror::Error;

mod attendance;
mod enrollment;
mod models;
mod staff;

pub use models::{
    AttendanceRow, AttendanceStatus, ClosedSession, DaySummary, EnrollmentRecord, StaffRecord,
    StaffRole,
};

const SCHEMA_SQL: &str = "
PRAGMA foreign_keys = ON;
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS staff (
    staff_id        TEXT PRIMARY KEY,
    full_name       TEXT NOT NULL,
    email           TEXT NOT NULL COLLATE NOCASE UNIQUE,
    role            TEXT NOT NULL CHECK (role IN ('admin', 'staff')),
    job_type        TEXT NOT NULL DEFAULT '',
    check_in_time   TEXT,
    check_out_time  TEXT,
    created_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS enrollment (
    staff_id         TEXT PRIMARY KEY REFERENCES staff(staff_id) ON DELETE CASCADE,
    embedding        TEXT,
    capture_filename TEXT,
    capture_image    BLOB,
    password_hash    TEXT,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS attendance (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    staff_id       TEXT NOT NULL REFERENCES staff(staff_id) ON DELETE CASCADE,
    date           TEXT NOT NULL,
    check_in       TEXT,
    check_out      TEXT,
    status         TEXT NOT NULL CHECK (status IN ('Late', 'Active', 'Inactive')),
    overtime_hours REAL
);

CREATE INDEX IF NOT EXISTS idx_attendance_staff_date ON attendance (staff_id, date);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] tokio_rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("staff not found: {0}")]
    StaffNotFound(String),
    #[error("email already registered: {0}")]
    DuplicateEmail(String),
}

/// Handle to the daemon database. Cheap to clone; all clones share the one
/// underlying connection thread.
#[derive(Clone)]
pub struct Store {
    conn: tokio_rusqlite::Connection,
}

impl Store {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = tokio_rusqlite::Connection::open(path).await?;
        let store = Self { conn };
        store.init().await?;
        tracing::info!(path = %path.display(), "database opened");
        Ok(store)
    }

    /// In-memory database, used by tests.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = tokio_rusqlite::Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init().await?;
        Ok(store)
    }

    async fn init(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA_SQL)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }
}

/// Whether an error is a SQLite constraint violation (unique or foreign key).
pub(crate) fn is_constraint_violation(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

/// Wrap a bad stored value as a rusqlite conversion error, so it surfaces
/// through the normal error path instead of panicking mid-row.
pub(crate) fn corrupt_column(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_twice() {
        let store = Store::open_in_memory().await.unwrap();
        // init is idempotent (re-running the daemon against an existing db)
        store.init().await.unwrap();
    }

    #[tokio::test]
    async fn foreign_keys_are_enforced() {
        let store = Store::open_in_memory().await.unwrap();
        let err = store
            .conn()
            .call(|conn| {
                conn.execute(
                    "INSERT INTO attendance (staff_id, date, status) VALUES ('S999', '2026-01-01', 'Active')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(is_constraint_violation(&err));
    }
}
