//! Article metadata persistence.
//!
//! [`MetaStore`] is the seam the sync engine loads and saves [`ArticleMeta`]
//! through. [`JsonMetaStore`] keeps one pretty-printed `meta.json` per
//! article directory and replaces it atomically on save.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::article::{write_atomic, META_FILE};
use crate::errors::MetaError;
use crate::models::ArticleMeta;

/// Durable storage for per-article metadata.
///
/// `load` must fail with [`MetaError::NotFound`] when no record exists and
/// with [`MetaError::Malformed`] when one exists but cannot be decoded.
/// `save` followed by `load` returns an identical record.
pub trait MetaStore: Send + Sync {
    fn load(&self, slug: &str) -> Result<ArticleMeta, MetaError>;
    fn save(&self, slug: &str, meta: &ArticleMeta) -> Result<(), MetaError>;
}

/// `articles/<slug>/meta.json` on the local filesystem.
#[derive(Debug, Clone)]
pub struct JsonMetaStore {
    articles_dir: PathBuf,
}

impl JsonMetaStore {
    pub fn new(articles_dir: impl Into<PathBuf>) -> Self {
        Self {
            articles_dir: articles_dir.into(),
        }
    }

    pub fn path_for(&self, slug: &str) -> PathBuf {
        self.articles_dir.join(slug).join(META_FILE)
    }
}

impl MetaStore for JsonMetaStore {
    fn load(&self, slug: &str) -> Result<ArticleMeta, MetaError> {
        let path = self.path_for(slug);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(MetaError::NotFound(path.display().to_string()));
            }
            Err(source) => return Err(io_error(&path, source)),
        };
        let meta: ArticleMeta = serde_json::from_str(&raw).map_err(|e| MetaError::Malformed {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        debug!(slug, version = %meta.editing.version, "loaded metadata");
        Ok(meta)
    }

    fn save(&self, slug: &str, meta: &ArticleMeta) -> Result<(), MetaError> {
        let path = self.path_for(slug);
        let mut json = serde_json::to_string_pretty(meta).map_err(|e| MetaError::Malformed {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;
        json.push('\n');
        write_atomic(&path, json.as_bytes()).map_err(|source| io_error(&path, source))?;
        debug!(slug, version = %meta.editing.version, "saved metadata");
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> MetaError {
    MetaError::Io {
        path: path.display().to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hasher::fingerprint;
    use crate::models::{ConflictRecord, EditLocation, Version};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_save_then_load_roundtrips_every_field() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMetaStore::new(dir.path());

        let mut meta = ArticleMeta::new("n1234", "post", "Post");
        meta.editing.location = EditLocation::Remote;
        meta.editing.locked_by = Some("sam".into());
        meta.editing.locked_at = Some(Utc.with_ymd_and_hms(2025, 3, 1, 9, 30, 0).unwrap());
        meta.editing.version = Version::new(4);
        meta.versions.fingerprint_local = Some(fingerprint("local"));
        meta.versions.fingerprint_remote = Some(fingerprint("<p>remote</p>"));
        meta.versions.remote_revision = Some("rev-9".into());
        meta.versions.source_commit = Some("abc123".into());
        meta.sync.last_push = meta.editing.locked_at;
        meta.sync.open_conflicts.push(ConflictRecord::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            fingerprint("a"),
            fingerprint("b"),
        ));

        store.save("post", &meta).unwrap();
        let loaded = store.load("post").unwrap();
        assert_eq!(loaded, meta);

        let raw = std::fs::read_to_string(store.path_for("post")).unwrap();
        assert!(raw.contains("\"version\": \"v4\""));
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn test_missing_record_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMetaStore::new(dir.path());
        assert!(matches!(store.load("nope"), Err(MetaError::NotFound(_))));
    }

    #[test]
    fn test_malformed_record() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("bad")).unwrap();
        std::fs::write(dir.path().join("bad").join(META_FILE), "{ not json").unwrap();
        let store = JsonMetaStore::new(dir.path());
        assert!(matches!(store.load("bad"), Err(MetaError::Malformed { .. })));
    }

    #[test]
    fn test_bad_version_string_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonMetaStore::new(dir.path());
        let meta = ArticleMeta::new("n1", "post", "Post");
        store.save("post", &meta).unwrap();

        let path = store.path_for("post");
        let raw = std::fs::read_to_string(&path).unwrap().replace("\"v1\"", "\"one\"");
        std::fs::write(&path, raw).unwrap();
        assert!(matches!(store.load("post"), Err(MetaError::Malformed { .. })));
    }

    #[test]
    fn test_legacy_field_names_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("old")).unwrap();
        std::fs::write(
            dir.path().join("old").join(META_FILE),
            r#"{
              "note_id": "n9",
              "slug": "old",
              "title": "Old",
              "status": "published",
              "editing": { "location": "obsidian", "version": "v3" },
              "versions": {},
              "sync": { "conflicts": [] }
            }"#,
        )
        .unwrap();
        let meta = JsonMetaStore::new(dir.path()).load("old").unwrap();
        assert_eq!(meta.identity, "n9");
        assert_eq!(meta.editing.location, EditLocation::Local);
        assert_eq!(meta.editing.version, Version::new(3));
    }
}
