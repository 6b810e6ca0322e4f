//! SQLite store for image dedup records and the audit log.
//!
//! Article metadata lives in per-article `meta.json` files, not here.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::{info, warn};

use crate::errors::DatabaseError;

/// Shared handle; `Send + Sync` so the engine can hold it in an `Arc`.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the workspace database, creating its directory and applying any
    /// pending migrations.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        Self::migrated(conn)
    }

    /// A migrated in-memory database.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::migrated(Connection::open_in_memory()?)
    }

    fn migrated(conn: Connection) -> Result<Self, DatabaseError> {
        // image_urls references images.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A panic while holding the lock leaves the connection usable; take it
    /// back instead of propagating the poison.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("database mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema_version(db: &Database) -> u32 {
        db.conn()
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_in_memory_database_is_migrated() {
        let db = Database::in_memory().unwrap();
        assert_eq!(schema_version(&db), 2);
        assert_eq!(db.count_images().unwrap(), 0);
    }

    #[test]
    fn test_open_creates_parent_dir_and_reopens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".notesync").join("notesync.db");
        drop(Database::open(&path).unwrap());
        assert!(path.exists());

        // Migrations are not reapplied on an up-to-date file.
        let db = Database::open(&path).unwrap();
        assert_eq!(schema_version(&db), 2);
    }

    #[test]
    fn test_foreign_keys_enforced() {
        let db = Database::in_memory().unwrap();
        let result = db.conn().execute(
            "INSERT INTO image_urls (url, fingerprint, recorded_at) VALUES (?1, ?2, ?3)",
            rusqlite::params!["https://cdn.example/a.png", "missing", "2025-01-01T00:00:00Z"],
        );
        assert!(result.is_err());
    }
}
