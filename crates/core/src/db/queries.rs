//! Typed query helpers for every table.

use chrono::Utc;
use rusqlite::params;
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::hasher::Fingerprint;
use crate::models::{AuditEntry, ImageRecord};

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub slug: String,
    pub actor: Option<String>,
    pub details: String,
    pub success: bool,
    pub created_at: String,
}

fn image_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        fingerprint: Fingerprint::from_hex(row.get::<_, String>(0)?),
        canonical_location: row.get(1)?,
        remote_url: row.get(2)?,
    })
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- images -------------------------------------------------------------

    /// Insert an image record unless one with the same fingerprint exists.
    ///
    /// Returns `true` when a new row was written. Existing records are never
    /// updated.
    pub fn insert_image(&self, record: &ImageRecord) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        let changed = conn.execute(
            "INSERT OR IGNORE INTO images (fingerprint, location, remote_url, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.fingerprint.as_str(),
                record.canonical_location,
                record.remote_url,
                now
            ],
        )?;
        debug!(
            fingerprint = record.fingerprint.short(),
            inserted = changed > 0,
            "insert_image"
        );
        Ok(changed > 0)
    }

    /// Look up an image record by fingerprint.
    pub fn get_image(&self, fingerprint: &Fingerprint) -> Result<Option<ImageRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT fingerprint, location, remote_url FROM images WHERE fingerprint = ?1",
        )?;
        let mut rows = stmt.query_map(params![fingerprint.as_str()], image_from_row)?;
        match rows.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Look up the image previously recorded for a URL.
    pub fn get_image_by_url(&self, url: &str) -> Result<Option<ImageRecord>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT i.fingerprint, i.location, i.remote_url
             FROM image_urls u JOIN images i ON i.fingerprint = u.fingerprint
             WHERE u.url = ?1",
        )?;
        let mut rows = stmt.query_map(params![url], image_from_row)?;
        match rows.next() {
            Some(Ok(record)) => Ok(Some(record)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Record that `url` serves the image with `fingerprint`.
    pub fn record_image_url(&self, url: &str, fingerprint: &Fingerprint) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO image_urls (url, fingerprint, recorded_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(url) DO UPDATE SET fingerprint = excluded.fingerprint,
                                            recorded_at = excluded.recorded_at",
            params![url, fingerprint.as_str(), now],
        )?;
        debug!(url, fingerprint = fingerprint.short(), "recorded image url");
        Ok(())
    }

    /// Any URL already known to serve `fingerprint`, most recent first.
    pub fn get_url_for_image(&self, fingerprint: &Fingerprint) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT url FROM image_urls WHERE fingerprint = ?1
             ORDER BY recorded_at DESC LIMIT 1",
        )?;
        let mut rows = stmt.query_map(params![fingerprint.as_str()], |row| row.get(0))?;
        match rows.next() {
            Some(Ok(url)) => Ok(Some(url)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Number of distinct stored images.
    pub fn count_images(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }

    // -- audit_log ----------------------------------------------------------

    /// Insert an audit-log entry.
    pub fn insert_audit_entry(&self, entry: &AuditEntry) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO audit_log (action, slug, actor, details, success, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                entry.action,
                entry.slug,
                entry.actor,
                entry.details,
                entry.success,
                entry.timestamp.to_rfc3339()
            ],
        )?;
        let id = conn.last_insert_rowid();
        debug!(id, action = %entry.action, slug = %entry.slug, "inserted audit_log entry");
        Ok(id)
    }

    /// List recent audit-log entries, optionally for one article.
    pub fn list_audit_log(
        &self,
        slug: Option<&str>,
        limit: u32,
    ) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, slug, actor, details, success, created_at
             FROM audit_log
             WHERE ?1 IS NULL OR slug = ?1
             ORDER BY id DESC LIMIT ?2",
        )?;
        let entries = stmt
            .query_map(params![slug, limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    slug: row.get(2)?,
                    actor: row.get(3)?,
                    details: row.get(4)?,
                    success: row.get(5)?,
                    created_at: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
