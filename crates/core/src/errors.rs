//! Error types for the notesync core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type. [`SyncError`] carries the outcome taxonomy of a single
//! push or pull: lock refusals, pending conflicts, transport failures and
//! commit inconsistencies are distinct variants so callers can react to each.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Meta(#[from] MetaError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Image(#[from] ImageError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

// ---------------------------------------------------------------------------
// Sync orchestration errors
// ---------------------------------------------------------------------------

/// How loudly a [`SyncError`] should be reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Recoverable by waiting, forcing, or resolving by hand.
    Recoverable,
    /// Something outside the engine failed; retrying may help.
    Error,
    /// Local records no longer describe the remote side.
    Critical,
}

/// Errors from a single push or pull run.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The article is locked by the other side and the lock has not expired.
    #[error(
        "article '{slug}' is being edited on {held_by} (locked {minutes_ago} min ago, \
         unlocks in {minutes_remaining} min); use --force to override"
    )]
    Locked {
        slug: String,
        held_by: String,
        minutes_ago: i64,
        minutes_remaining: i64,
    },

    /// Both sides edited overlapping regions; a conflict artifact was written.
    #[error(
        "{sections} conflicting section(s) in '{slug}'; resolve them in {} or use --force",
        artifact.display()
    )]
    ConflictsPending {
        slug: String,
        sections: usize,
        artifact: std::path::PathBuf,
    },

    /// The remote collaborator failed.
    #[error("remote transport error: {0}")]
    Transport(#[from] TransportError),

    /// The remote side accepted the change but local records could not be
    /// updated. Local and remote are now out of step.
    #[error(
        "remote update for '{slug}' succeeded but local records were not committed \
         (remote revision {remote_revision:?}): {detail}"
    )]
    CommitInconsistency {
        slug: String,
        remote_revision: Option<String>,
        detail: String,
    },

    /// The article's metadata record is unreadable.
    #[error("malformed metadata for '{slug}': {detail}")]
    MalformedMetadata { slug: String, detail: String },

    /// No metadata record exists for the article.
    #[error("article not found: {0} (meta.json missing)")]
    ArticleNotFound(String),

    /// An article with this slug already has a metadata record.
    #[error("article already exists: {0}")]
    AlreadyExists(String),

    /// No usable slug could be derived for a new article.
    #[error("cannot derive a slug from '{0}'; pass one explicitly")]
    InvalidSlug(String),

    /// Conflict bookkeeping failed.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// Image dedup store failure.
    #[error("image store error: {0}")]
    Image(#[from] ImageError),

    /// Audit / database failure.
    #[error("sync database error: {0}")]
    Database(#[from] DatabaseError),

    /// Reading or writing the article's working files failed.
    #[error("article I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SyncError {
    /// Classify the error for reporting and exit codes.
    pub fn severity(&self) -> Severity {
        match self {
            Self::Locked { .. } | Self::ConflictsPending { .. } => Severity::Recoverable,
            Self::CommitInconsistency { .. } => Severity::Critical,
            _ => Severity::Error,
        }
    }

    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn from_meta(slug: &str, err: MetaError) -> Self {
        match err {
            MetaError::NotFound(_) => Self::ArticleNotFound(slug.to_string()),
            MetaError::Malformed { detail, .. } => Self::MalformedMetadata {
                slug: slug.to_string(),
                detail,
            },
            MetaError::Io { path, source } => Self::Io { path, source },
        }
    }
}

// ---------------------------------------------------------------------------
// Metadata persistence errors
// ---------------------------------------------------------------------------

/// Errors from loading or saving an article's metadata record.
#[derive(Debug, Error)]
pub enum MetaError {
    /// The backing record does not exist.
    #[error("metadata record not found at '{0}'")]
    NotFound(String),

    /// The backing record exists but cannot be parsed.
    #[error("metadata record at '{path}' is malformed: {detail}")]
    Malformed { path: String, detail: String },

    /// Generic I/O failure reading or writing the record.
    #[error("metadata I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

// ---------------------------------------------------------------------------
// Remote transport errors
// ---------------------------------------------------------------------------

/// Errors from the remote document / image collaborators.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP-level transport error (network, TLS, etc.).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The service returned a non-success status code.
    #[error("remote API error (HTTP {status}) on {endpoint}: {body}")]
    Api {
        endpoint: String,
        status: u16,
        body: String,
    },

    /// The service response could not be decoded.
    #[error("remote response parse error: {0}")]
    Parse(String),

    /// The service is not reachable or reports itself unhealthy.
    #[error("remote service unavailable at {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Image store errors
// ---------------------------------------------------------------------------

/// Errors from the content-addressed image store.
#[derive(Debug, Error)]
pub enum ImageError {
    /// Writing or reading an image blob failed.
    #[error("image I/O error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The record table failed.
    #[error("image database error: {0}")]
    Database(#[from] DatabaseError),

    /// Fetching or uploading through the transfer collaborator failed.
    #[error("image transfer failed: {0}")]
    Transfer(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from conflict bookkeeping.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// No open conflict matches the request.
    #[error("no open conflict for '{0}'")]
    NoneOpen(String),

    /// The requested resolution is not one of local, remote, merged.
    #[error("invalid resolution '{0}' (expected local, remote or merged)")]
    InvalidResolution(String),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record was not found.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = SyncError::Locked {
            slug: "hello".into(),
            held_by: "remote".into(),
            minutes_ago: 1,
            minutes_remaining: 9,
        };
        let msg = err.to_string();
        assert!(msg.contains("hello"));
        assert!(msg.contains("--force"));

        let err = MetaError::NotFound("articles/x/meta.json".into());
        assert!(err.to_string().contains("articles/x/meta.json"));

        let err = ConfigError::InvalidValue {
            field: "sync.lock_ttl_minutes".into(),
            detail: "must be > 0".into(),
        };
        assert!(err.to_string().contains("lock_ttl_minutes"));
    }

    #[test]
    fn test_severity_ranks_commit_inconsistency_highest() {
        let commit = SyncError::CommitInconsistency {
            slug: "a".into(),
            remote_revision: Some("r1".into()),
            detail: "disk full".into(),
        };
        let locked = SyncError::Locked {
            slug: "a".into(),
            held_by: "local".into(),
            minutes_ago: 0,
            minutes_remaining: 10,
        };
        let transport = SyncError::Transport(TransportError::Unavailable("x".into()));
        assert_eq!(commit.severity(), Severity::Critical);
        assert_eq!(locked.severity(), Severity::Recoverable);
        assert_eq!(transport.severity(), Severity::Error);
        assert!(commit.severity() > transport.severity());
    }

    #[test]
    fn test_meta_errors_map_to_sync_taxonomy() {
        let err = SyncError::from_meta("post", MetaError::NotFound("p".into()));
        assert!(matches!(err, SyncError::ArticleNotFound(ref s) if s == "post"));

        let err = SyncError::from_meta(
            "post",
            MetaError::Malformed {
                path: "p".into(),
                detail: "bad json".into(),
            },
        );
        assert!(matches!(err, SyncError::MalformedMetadata { .. }));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let db_err = DatabaseError::NotFound {
            entity: "image".into(),
            id: "abc".into(),
        };
        let core_err: CoreError = db_err.into();
        assert!(matches!(core_err, CoreError::Database(_)));
    }
}
