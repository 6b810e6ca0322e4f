//! Domain model types used throughout notesync.
//!
//! [`ArticleMeta`] is the durable per-article record persisted as
//! `meta.json`. It never holds document content; divergence is judged purely
//! from the two stored fingerprints.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::hasher::Fingerprint;

// ---------------------------------------------------------------------------
// Article metadata
// ---------------------------------------------------------------------------

/// Durable metadata for one article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleMeta {
    /// Remote document id. Immutable after creation.
    #[serde(alias = "note_id")]
    pub identity: String,
    /// Local identifier (directory name). Immutable after creation.
    pub slug: String,
    pub title: String,
    pub status: ArticleStatus,
    pub editing: EditState,
    pub versions: Versions,
    pub sync: SyncInfo,
}

impl ArticleMeta {
    /// Metadata for a freshly created article that has never been synced.
    pub fn new(identity: impl Into<String>, slug: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            slug: slug.into(),
            title: title.into(),
            status: ArticleStatus::Draft,
            editing: EditState {
                location: EditLocation::Local,
                locked_by: None,
                locked_at: None,
                version: Version::initial(),
            },
            versions: Versions::default(),
            sync: SyncInfo::default(),
        }
    }

    /// Conflict records that have not been resolved yet.
    pub fn open_conflicts(&self) -> impl Iterator<Item = &ConflictRecord> {
        self.sync
            .open_conflicts
            .iter()
            .filter(|c| c.resolution.is_none())
    }

    pub fn has_open_conflicts(&self) -> bool {
        self.open_conflicts().next().is_some()
    }
}

/// Publication status. Callers move it forward; the engine does not enforce
/// ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArticleStatus {
    Draft,
    Final,
    Published,
}

impl fmt::Display for ArticleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Final => write!(f, "final"),
            Self::Published => write!(f, "published"),
        }
    }
}

/// Where the article is currently being edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditLocation {
    #[serde(alias = "obsidian")]
    Local,
    #[serde(alias = "note")]
    Remote,
    None,
}

impl fmt::Display for EditLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Edit-lock state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditState {
    pub location: EditLocation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_at: Option<DateTime<Utc>>,
    pub version: Version,
}

/// Fingerprints and remote bookkeeping from the last completed sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Versions {
    /// Fingerprint of the last body written locally.
    #[serde(default)]
    pub fingerprint_local: Option<Fingerprint>,
    /// Fingerprint of the last body accepted from (or sent to) the remote.
    #[serde(default)]
    pub fingerprint_remote: Option<Fingerprint>,
    #[serde(default)]
    pub remote_revision: Option<String>,
    #[serde(default)]
    pub source_commit: Option<String>,
}

/// Sync timestamps and conflict history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncInfo {
    #[serde(default)]
    pub last_push: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_pull: Option<DateTime<Utc>>,
    #[serde(default, alias = "conflicts")]
    pub open_conflicts: Vec<ConflictRecord>,
}

// ---------------------------------------------------------------------------
// Version counter
// ---------------------------------------------------------------------------

/// Monotonic edit counter, serialized as `"v<N>"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(u64);

impl Version {
    pub fn initial() -> Self {
        Self(1)
    }

    pub fn new(n: u64) -> Self {
        Self(n)
    }

    pub fn number(self) -> u64 {
        self.0
    }

    /// The next version. One step per completed push or pull.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.strip_prefix('v')
            .and_then(|n| n.parse::<u64>().ok())
            .map(Self)
            .ok_or_else(|| format!("invalid version '{}', expected v<N>", s))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

/// How the user settled a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    #[serde(alias = "obsidian")]
    Local,
    #[serde(alias = "note")]
    Remote,
    Merged,
}

impl FromStr for ConflictResolution {
    type Err = crate::errors::ConflictError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "merged" => Ok(Self::Merged),
            other => Err(crate::errors::ConflictError::InvalidResolution(
                other.to_string(),
            )),
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
            Self::Merged => write!(f, "merged"),
        }
    }
}

/// A divergence that could not be merged automatically.
///
/// Created by the sync engine, resolved only by explicit user action, and
/// never removed from the metadata record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictRecord {
    #[serde(default = "new_conflict_id")]
    pub id: String,
    pub detected_at: DateTime<Utc>,
    #[serde(alias = "obsidian_hash")]
    pub local_hash: Fingerprint,
    #[serde(alias = "note_hash")]
    pub remote_hash: Fingerprint,
    #[serde(default)]
    pub resolution: Option<ConflictResolution>,
}

fn new_conflict_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl ConflictRecord {
    pub fn new(detected_at: DateTime<Utc>, local_hash: Fingerprint, remote_hash: Fingerprint) -> Self {
        Self {
            id: new_conflict_id(),
            detected_at,
            local_hash,
            remote_hash,
            resolution: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

/// A content-addressed image. Created once per distinct fingerprint and
/// never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub fingerprint: Fingerprint,
    /// Path of the stored blob.
    pub canonical_location: String,
    /// URL the image was first seen at, when it arrived from the remote.
    pub remote_url: Option<String>,
}

// ---------------------------------------------------------------------------
// Sync direction
// ---------------------------------------------------------------------------

/// Direction of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    Push,
    Pull,
}

impl SyncDirection {
    /// The side whose content overwrites the other.
    pub fn writer(self) -> EditLocation {
        match self {
            Self::Push => EditLocation::Local,
            Self::Pull => EditLocation::Remote,
        }
    }

    /// Where editing continues after the run commits.
    pub fn location_after(self) -> EditLocation {
        match self {
            Self::Push => EditLocation::Remote,
            Self::Pull => EditLocation::Local,
        }
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Pull => write!(f, "pull"),
        }
    }
}

// ---------------------------------------------------------------------------
// Audit Entry
// ---------------------------------------------------------------------------

/// An audit-log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub action: String,
    pub slug: String,
    pub actor: Option<String>,
    pub details: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    /// Create a success audit entry.
    pub fn success(action: &str, slug: &str, details: &str) -> Self {
        Self {
            action: action.to_string(),
            slug: slug.to_string(),
            actor: None,
            details: details.to_string(),
            success: true,
            timestamp: Utc::now(),
        }
    }

    /// Create a failure audit entry.
    pub fn failure(action: &str, slug: &str, details: &str) -> Self {
        Self {
            success: false,
            ..Self::success(action, slug, details)
        }
    }

    pub fn by(mut self, actor: Option<&str>) -> Self {
        self.actor = actor.map(str::to_string);
        self
    }
}
