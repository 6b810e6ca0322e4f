//! Per-article push / pull orchestration.
//!
//! The [`SyncEngine`] drives one run in one direction for one article:
//!
//! 1. Load metadata and consult the edit lock.
//! 2. Fingerprint the source side; stop early when nothing changed.
//! 3. If the destination side also moved since the last sync, run
//!    three-way detection against the base snapshot.
//! 4. Call the render / transport / image collaborators.
//! 5. Commit working files and metadata in one final step.
//!
//! Metadata is written only at the end, so abandoning a run before step 5
//! leaves no trace beyond content-addressed image blobs.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::article::{self, ArticleFiles, Document};
use crate::config::AppConfig;
use crate::conflict::{diff_preview, render_conflict_file, ConflictDetector, MergeResult};
use crate::db::queries::AuditLogEntry;
use crate::db::Database;
use crate::errors::{ConflictError, CoreError, SyncError};
use crate::hasher::{fingerprint, Fingerprint};
use crate::images::{html_image_urls, local_image_refs, relative_path, rewrite_image_targets, ImageStore};
use crate::lock::{LockDecision, LockManager, LockWarning};
use crate::meta::{JsonMetaStore, MetaStore};
use crate::models::{
    ArticleMeta, ArticleStatus, AuditEntry, ConflictRecord, ConflictResolution, EditLocation,
    SyncDirection, Version,
};
use crate::remote::{HttpNoteClient, ImageTransfer, MarkdownRenderer, RemoteDocument, RemoteTransport, Renderer};

// ---------------------------------------------------------------------------
// Run state machine
// ---------------------------------------------------------------------------

/// States of a single push or pull.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    LockChecked,
    HashCompared,
    NoOp,
    Diverged,
    ConflictResolution,
    Committed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::LockChecked => write!(f, "lock_checked"),
            Self::HashCompared => write!(f, "hash_compared"),
            Self::NoOp => write!(f, "no_op"),
            Self::Diverged => write!(f, "diverged"),
            Self::ConflictResolution => write!(f, "conflict_resolution"),
            Self::Committed => write!(f, "committed"),
        }
    }
}

/// Options for a single run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Override a fresh lock and skip conflict detection; the caller's side
    /// wins. Never bypasses the no-op check.
    pub force: bool,
    /// Compute everything, write nothing.
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Nothing changed; no remote call, no writes.
    NoOp,
    Committed,
    /// `--dry-run`: nothing was written.
    DryRun,
}

/// Something a run overrode or skipped on purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncWarning {
    LockOverridden(LockWarning),
    /// `--force` replaced the other side's unsynced changes.
    ChangesOverwritten {
        side: EditLocation,
        fingerprint: Fingerprint,
    },
    ImageSkipped {
        reference: String,
        reason: String,
    },
}

impl std::fmt::Display for SyncWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LockOverridden(w) => write!(
                f,
                "overrode {} edit lock (locked {} min ago, {} min remaining)",
                w.held_by, w.minutes_ago, w.minutes_remaining
            ),
            Self::ChangesOverwritten { side, fingerprint } => write!(
                f,
                "overwrote unsynced {} changes ({})",
                side,
                fingerprint.short()
            ),
            Self::ImageSkipped { reference, reason } => {
                write!(f, "image '{}' skipped: {}", reference, reason)
            }
        }
    }
}

/// Result of a push or pull that did not fail.
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub slug: String,
    pub direction: SyncDirection,
    pub kind: OutcomeKind,
    pub state: SyncState,
    /// Version after the run.
    pub version: Version,
    pub auto_merged: bool,
    /// A pull merged local edits that the remote side does not have yet.
    pub local_edits_pending_push: bool,
    /// Conflicting sections found during a dry run.
    pub pending_conflicts: usize,
    pub warnings: Vec<SyncWarning>,
    /// Unified diff of what the run would change (dry run only).
    pub preview: Option<String>,
    pub remote_revision: Option<String>,
    pub images_uploaded: usize,
    pub images_downloaded: usize,
}

impl SyncOutcome {
    fn start(slug: &str, direction: SyncDirection, version: Version) -> Self {
        Self {
            slug: slug.to_string(),
            direction,
            kind: OutcomeKind::NoOp,
            state: SyncState::Idle,
            version,
            auto_merged: false,
            local_edits_pending_push: false,
            pending_conflicts: 0,
            warnings: Vec::new(),
            preview: None,
            remote_revision: None,
            images_uploaded: 0,
            images_downloaded: 0,
        }
    }

    fn advance(&mut self, next: SyncState) {
        debug!(slug = %self.slug, direction = %self.direction, from = %self.state, to = %next, "sync state");
        self.state = next;
    }

    pub fn is_noop(&self) -> bool {
        self.kind == OutcomeKind::NoOp
    }
}

// ---------------------------------------------------------------------------
// Status reporting
// ---------------------------------------------------------------------------

/// Offline view of one article, computed without contacting the remote.
#[derive(Debug, Clone)]
pub struct ArticleReport {
    pub slug: String,
    pub title: String,
    pub status: ArticleStatus,
    pub version: Version,
    pub location: EditLocation,
    pub locked_by: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    /// Minutes until the current lock expires; `None` when unlocked or expired.
    pub lock_remaining_minutes: Option<i64>,
    pub stored_local: Option<Fingerprint>,
    pub stored_remote: Option<Fingerprint>,
    pub current_local: Option<Fingerprint>,
    /// Local file changed since the last sync.
    pub local_changed: bool,
    pub open_conflicts: usize,
    pub last_push: Option<DateTime<Utc>>,
    pub last_pull: Option<DateTime<Utc>>,
}

/// One row of `check-all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArticleHealth {
    Synced,
    Diverged,
    Locked {
        held_by: EditLocation,
        minutes_remaining: i64,
    },
    ConflictsPending(usize),
    NotInitialized,
    Error(String),
}

impl std::fmt::Display for ArticleHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Synced => write!(f, "synced"),
            Self::Diverged => write!(f, "diverged"),
            Self::Locked {
                held_by,
                minutes_remaining,
            } => write!(f, "locked by {held_by} ({minutes_remaining} min)"),
            Self::ConflictsPending(n) => write!(f, "{n} conflict(s) pending"),
            Self::NotInitialized => write!(f, "not initialized"),
            Self::Error(e) => write!(f, "error: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Collaborator handles the engine is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub meta: Arc<dyn MetaStore>,
    pub transport: Arc<dyn RemoteTransport>,
    pub images: Arc<dyn ImageTransfer>,
    pub renderer: Arc<dyn Renderer>,
}

/// The per-article sync engine.
pub struct SyncEngine {
    config: AppConfig,
    db: Arc<Database>,
    meta: Arc<dyn MetaStore>,
    transport: Arc<dyn RemoteTransport>,
    images: Arc<dyn ImageTransfer>,
    renderer: Arc<dyn Renderer>,
    image_store: ImageStore,
    lock: LockManager,
}

impl SyncEngine {
    pub fn new(config: AppConfig, db: Arc<Database>, collaborators: Collaborators) -> Self {
        let image_store = ImageStore::new(config.workspace.images_dir.clone(), db.clone());
        let lock = LockManager::new(config.sync.lock_ttl());
        info!(
            articles_dir = %config.workspace.articles_dir.display(),
            lock_ttl_minutes = config.sync.lock_ttl_minutes,
            "initializing sync engine"
        );
        Self {
            config,
            db,
            meta: collaborators.meta,
            transport: collaborators.transport,
            images: collaborators.images,
            renderer: collaborators.renderer,
            image_store,
            lock,
        }
    }

    /// Wire up the default collaborators: `meta.json` files, the HTTP
    /// client, and the markdown renderer.
    pub fn from_config(config: AppConfig) -> Result<Self, CoreError> {
        let db = Arc::new(Database::open(config.workspace.database_path())?);
        let client = Arc::new(HttpNoteClient::new(&config.remote)?);
        let collaborators = Collaborators {
            meta: Arc::new(JsonMetaStore::new(config.workspace.articles_dir.clone())),
            transport: client.clone(),
            images: client,
            renderer: Arc::new(MarkdownRenderer),
        };
        Ok(Self::new(config, db, collaborators))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn files(&self, slug: &str) -> ArticleFiles {
        ArticleFiles::new(self.config.workspace.article_dir(slug))
    }

    fn load_meta(&self, slug: &str) -> Result<ArticleMeta, SyncError> {
        self.meta.load(slug).map_err(|e| SyncError::from_meta(slug, e))
    }

    fn save_meta(&self, slug: &str, meta: &ArticleMeta) -> Result<(), SyncError> {
        self.meta.save(slug, meta).map_err(|e| SyncError::from_meta(slug, e))
    }

    fn audit(&self, entry: AuditEntry) {
        let entry = entry.by(Some(&self.config.sync.editor_name()));
        if let Err(e) = self.db.insert_audit_entry(&entry) {
            warn!(action = %entry.action, slug = %entry.slug, error = %e, "failed to write audit entry");
        }
    }

    /// Consult the lock for `direction`. Refusal without force is an error;
    /// a forced override becomes a warning and an audit entry.
    fn check_lock(
        &self,
        meta: &ArticleMeta,
        direction: SyncDirection,
        now: DateTime<Utc>,
        opts: SyncOptions,
        outcome: &mut SyncOutcome,
    ) -> Result<(), SyncError> {
        match self.lock.check(meta, direction.writer(), now, opts.force) {
            LockDecision::Allow => {}
            LockDecision::Refuse(w) => {
                return Err(SyncError::Locked {
                    slug: meta.slug.clone(),
                    held_by: w.held_by.to_string(),
                    minutes_ago: w.minutes_ago,
                    minutes_remaining: w.minutes_remaining,
                });
            }
            LockDecision::AllowForced(w) => {
                if !opts.dry_run {
                    self.audit(AuditEntry::success(
                        "force_lock",
                        &meta.slug,
                        &format!(
                            "{direction} overrode {} lock held by {} since {} ({} min ago)",
                            w.held_by,
                            w.locked_by.as_deref().unwrap_or("unknown"),
                            meta.editing
                                .locked_at
                                .map(|t| t.to_rfc3339())
                                .unwrap_or_default(),
                            w.minutes_ago
                        ),
                    ));
                }
                outcome.warnings.push(SyncWarning::LockOverridden(w));
            }
        }
        outcome.advance(SyncState::LockChecked);
        Ok(())
    }

    /// Record an unresolvable divergence: artifact, conflict record, meta.
    /// Fingerprints are left untouched.
    fn record_conflict(
        &self,
        files: &ArticleFiles,
        meta: &mut ArticleMeta,
        result: &MergeResult,
        local_hash: Fingerprint,
        remote_hash: Fingerprint,
    ) -> Result<SyncError, SyncError> {
        let artifact = files.conflict_path();
        files
            .write_conflict(&render_conflict_file(&meta.slug, result))
            .map_err(|e| SyncError::io(&artifact, e))?;

        let duplicate = meta
            .open_conflicts()
            .any(|c| c.local_hash == local_hash && c.remote_hash == remote_hash);
        if !duplicate {
            meta.sync
                .open_conflicts
                .push(ConflictRecord::new(Utc::now(), local_hash.clone(), remote_hash.clone()));
        }
        self.save_meta(&meta.slug, meta)?;
        self.audit(AuditEntry::failure(
            "conflict",
            &meta.slug,
            &format!(
                "{} section(s); local {} remote {}",
                result.conflicts.len(),
                local_hash.short(),
                remote_hash.short()
            ),
        ));
        warn!(slug = %meta.slug, sections = result.conflicts.len(), "conflicts pending");
        Ok(SyncError::ConflictsPending {
            slug: meta.slug.clone(),
            sections: result.conflicts.len(),
            artifact,
        })
    }

    // -----------------------------------------------------------------------
    // Push
    // -----------------------------------------------------------------------

    /// Publish the local body to the remote side.
    pub async fn push(&self, slug: &str, opts: SyncOptions) -> Result<SyncOutcome, SyncError> {
        let files = self.files(slug);
        let mut meta = self.load_meta(slug)?;
        let mut outcome = SyncOutcome::start(slug, SyncDirection::Push, meta.editing.version);
        let now = Utc::now();

        self.check_lock(&meta, SyncDirection::Push, now, opts, &mut outcome)?;

        let index_path = files.index_path();
        let text = files
            .read_index()
            .map_err(|e| SyncError::io(&index_path, e))?
            .ok_or_else(|| {
                SyncError::io(
                    &index_path,
                    std::io::Error::new(std::io::ErrorKind::NotFound, "index.md missing"),
                )
            })?;
        let doc = Document::parse(&text);
        let local_fp = fingerprint(&text);
        outcome.advance(SyncState::HashCompared);

        if meta.versions.fingerprint_local.as_ref() == Some(&local_fp) {
            info!(slug, fingerprint = local_fp.short(), "push is a no-op");
            outcome.advance(SyncState::NoOp);
            return Ok(outcome);
        }
        outcome.advance(SyncState::Diverged);

        let remote = self.transport.fetch(&meta.identity).await?;
        let remote_fp = fingerprint(&remote.body);
        let remote_moved = !remote.body.trim().is_empty()
            && meta.versions.fingerprint_remote.as_ref() != Some(&remote_fp)
            && !self.already_resolved(&meta, ConflictSide::Remote, &remote_fp);

        let mut body = doc.body.clone();
        if remote_moved && opts.force {
            warn!(slug, remote = remote_fp.short(), "forced push overwrites remote changes");
            if !opts.dry_run {
                self.audit(AuditEntry::success(
                    "force_overwrite",
                    slug,
                    &format!("push replaced remote {} with local {}", remote_fp.short(), local_fp.short()),
                ));
            }
            outcome.warnings.push(SyncWarning::ChangesOverwritten {
                side: EditLocation::Remote,
                fingerprint: remote_fp.clone(),
            });
        } else if remote_moved {
            outcome.advance(SyncState::ConflictResolution);
            let base = files.read_base().map_err(|e| SyncError::io(&files.base_path(), e))?;
            let remote_md = self
                .localize_images(&files, &remote.body, self.renderer.to_local(&remote.body), false, &mut outcome)
                .await?;
            let result = ConflictDetector::detect(&base, &body, &remote_md);
            match result.merged_content.as_deref() {
                Some(merged) if result.success => {
                    info!(slug, "auto-merged remote changes into push");
                    body = merged.to_string();
                    outcome.auto_merged = true;
                }
                _ if opts.dry_run => {
                    outcome.pending_conflicts = result.conflicts.len();
                }
                _ => {
                    return Err(self.record_conflict(&files, &mut meta, &result, local_fp, remote_fp)?);
                }
            }
        }

        if opts.dry_run {
            let current_remote = self.renderer.to_local(&remote.body);
            outcome.preview = Some(diff_preview(&current_remote, &body));
            outcome.kind = OutcomeKind::DryRun;
            return Ok(outcome);
        }

        let publishable = self.publish_images(&files, &body, &mut outcome).await?;
        let html = self.renderer.to_remote(&publishable);
        let title = doc.title().unwrap_or(&meta.title).to_string();
        let receipt = self.transport.update(&meta.identity, &title, &html).await?;
        info!(slug, revision = %receipt.revision, "remote updated");

        // Remote side has changed; every failure from here on leaves the
        // two sides out of step.
        let committed = self.commit_push(&files, &mut meta, &doc, &body, &html, &title, &receipt.revision, now);
        if let Err(detail) = committed {
            self.audit(AuditEntry::failure("push", slug, &detail));
            return Err(SyncError::CommitInconsistency {
                slug: slug.to_string(),
                remote_revision: Some(receipt.revision),
                detail,
            });
        }

        self.audit(AuditEntry::success(
            "push",
            slug,
            &format!("{} local {} remote {}", meta.editing.version, local_fp.short(), fingerprint(&html).short()),
        ));
        outcome.kind = OutcomeKind::Committed;
        outcome.version = meta.editing.version;
        outcome.remote_revision = Some(receipt.revision);
        outcome.advance(SyncState::Committed);
        Ok(outcome)
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_push(
        &self,
        files: &ArticleFiles,
        meta: &mut ArticleMeta,
        doc: &Document,
        body: &str,
        html: &str,
        title: &str,
        revision: &str,
        now: DateTime<Utc>,
    ) -> Result<(), String> {
        let local_text = if body != doc.body {
            let merged = Document {
                front_matter: doc.front_matter.clone(),
                body: body.to_string(),
            }
            .compose();
            files.write_index(&merged).map_err(|e| format!("writing index.md: {e}"))?;
            merged
        } else {
            doc.compose()
        };
        files.write_base(body).map_err(|e| format!("writing base snapshot: {e}"))?;
        files
            .write_remote_html(html)
            .map_err(|e| format!("writing remote.html: {e}"))?;

        meta.title = title.to_string();
        meta.versions.fingerprint_local = Some(fingerprint(&local_text));
        meta.versions.fingerprint_remote = Some(fingerprint(html));
        if !revision.is_empty() {
            meta.versions.remote_revision = Some(revision.to_string());
        }
        if let Some(commit) = self.source_commit() {
            meta.versions.source_commit = Some(commit);
        }
        self.stamp(meta, SyncDirection::Push, now);
        meta.sync.last_push = Some(now);

        self.meta
            .save(&meta.slug, meta)
            .map_err(|e| format!("saving metadata: {e}"))
    }

    // -----------------------------------------------------------------------
    // Pull
    // -----------------------------------------------------------------------

    /// Bring the remote body into the local working file.
    pub async fn pull(&self, slug: &str, opts: SyncOptions) -> Result<SyncOutcome, SyncError> {
        let files = self.files(slug);
        let mut meta = self.load_meta(slug)?;
        let mut outcome = SyncOutcome::start(slug, SyncDirection::Pull, meta.editing.version);
        let now = Utc::now();

        self.check_lock(&meta, SyncDirection::Pull, now, opts, &mut outcome)?;

        let remote = self.fetch_for(&meta).await?;
        let remote_fp = fingerprint(&remote.body);
        outcome.advance(SyncState::HashCompared);

        if meta.versions.fingerprint_remote.as_ref() == Some(&remote_fp) {
            info!(slug, fingerprint = remote_fp.short(), "pull is a no-op");
            outcome.advance(SyncState::NoOp);
            return Ok(outcome);
        }
        outcome.advance(SyncState::Diverged);

        let incoming = self
            .localize_images(&files, &remote.body, self.renderer.to_local(&remote.body), !opts.dry_run, &mut outcome)
            .await?;

        let index_path = files.index_path();
        let current_text = files.read_index().map_err(|e| SyncError::io(&index_path, e))?;
        let current = current_text.as_deref().map(Document::parse);
        let current_body = current.as_ref().map(|d| d.body.as_str()).unwrap_or("");
        let current_fp = current_text.as_deref().map(fingerprint);

        let local_moved = !current_body.is_empty()
            && meta.versions.fingerprint_local.as_ref() != current_fp.as_ref()
            && current_fp
                .as_ref()
                .map_or(true, |fp| !self.already_resolved(&meta, ConflictSide::Local, fp));

        let mut body = incoming.clone();
        if local_moved && opts.force {
            let overwritten = current_fp.clone().unwrap_or_else(|| fingerprint(""));
            warn!(slug, local = overwritten.short(), "forced pull overwrites local changes");
            if !opts.dry_run {
                self.audit(AuditEntry::success(
                    "force_overwrite",
                    slug,
                    &format!("pull replaced local {} with remote {}", overwritten.short(), remote_fp.short()),
                ));
            }
            outcome.warnings.push(SyncWarning::ChangesOverwritten {
                side: EditLocation::Local,
                fingerprint: overwritten,
            });
        } else if local_moved {
            outcome.advance(SyncState::ConflictResolution);
            let base = files.read_base().map_err(|e| SyncError::io(&files.base_path(), e))?;
            let result = ConflictDetector::detect(&base, current_body, &incoming);
            match result.merged_content.as_deref() {
                Some(merged) if result.success => {
                    info!(slug, "auto-merged local changes into pull");
                    outcome.auto_merged = true;
                    outcome.local_edits_pending_push = merged != incoming;
                    body = merged.to_string();
                }
                _ if opts.dry_run => {
                    outcome.pending_conflicts = result.conflicts.len();
                }
                _ => {
                    let local_fp = current_fp.clone().unwrap_or_else(|| fingerprint(""));
                    return Err(self.record_conflict(&files, &mut meta, &result, local_fp, remote_fp)?);
                }
            }
        }

        if opts.dry_run {
            outcome.preview = Some(diff_preview(current_body, &body));
            outcome.kind = OutcomeKind::DryRun;
            return Ok(outcome);
        }

        let mut front_matter = current.map(|d| d.front_matter).unwrap_or_default();
        let title = if remote.title.is_empty() { meta.title.clone() } else { remote.title.clone() };
        front_matter.set("title", title.clone());
        front_matter.set("remote_id", meta.identity.clone());
        front_matter.set("slug", meta.slug.clone());
        front_matter.set("status", meta.status.to_string());
        front_matter.set("updated_at", remote.updated_at.clone());
        let text = Document { front_matter, body }.compose();

        files.write_index(&text).map_err(|e| SyncError::io(&index_path, e))?;
        // The base and the recorded local fingerprint describe the remote
        // content, so merged-in local edits still register as unpushed.
        files
            .write_base(&incoming)
            .map_err(|e| SyncError::io(&files.base_path(), e))?;
        files
            .write_remote_html(&remote.body)
            .map_err(|e| SyncError::io(&files.remote_html_path(), e))?;

        meta.title = title;
        meta.versions.fingerprint_local = Some(if outcome.local_edits_pending_push {
            fingerprint(&incoming)
        } else {
            fingerprint(&text)
        });
        meta.versions.fingerprint_remote = Some(remote_fp.clone());
        if !remote.updated_at.is_empty() {
            meta.versions.remote_revision = Some(remote.updated_at.clone());
        }
        self.stamp(&mut meta, SyncDirection::Pull, now);
        meta.sync.last_pull = Some(now);

        if let Err(e) = self.meta.save(slug, &meta) {
            let detail = format!("saving metadata: {e}");
            self.audit(AuditEntry::failure("pull", slug, &detail));
            return Err(SyncError::CommitInconsistency {
                slug: slug.to_string(),
                remote_revision: meta.versions.remote_revision.clone(),
                detail,
            });
        }

        self.audit(AuditEntry::success(
            "pull",
            slug,
            &format!("{} remote {}", meta.editing.version, remote_fp.short()),
        ));
        outcome.kind = OutcomeKind::Committed;
        outcome.version = meta.editing.version;
        outcome.remote_revision = meta.versions.remote_revision.clone();
        outcome.advance(SyncState::Committed);
        Ok(outcome)
    }

    async fn fetch_for(&self, meta: &ArticleMeta) -> Result<RemoteDocument, SyncError> {
        let doc = if meta.status == ArticleStatus::Published {
            self.transport.fetch_published(&meta.identity).await?
        } else {
            self.transport.fetch(&meta.identity).await?
        };
        Ok(doc)
    }

    /// Version bump and lock hand-off shared by push and pull commits.
    fn stamp(&self, meta: &mut ArticleMeta, direction: SyncDirection, now: DateTime<Utc>) {
        meta.editing.version = meta.editing.version.next();
        meta.editing.location = direction.location_after();
        meta.editing.locked_by = Some(self.config.sync.editor_name());
        meta.editing.locked_at = Some(now);
        debug!(slug = %meta.slug, version = %meta.editing.version, location = %meta.editing.location, "stamped metadata");
    }

    /// A resolved conflict already covers this exact content on `side`.
    fn already_resolved(&self, meta: &ArticleMeta, side: ConflictSide, fp: &Fingerprint) -> bool {
        meta.sync.open_conflicts.iter().any(|c| match (side, c.resolution) {
            (ConflictSide::Remote, Some(ConflictResolution::Local | ConflictResolution::Merged)) => {
                &c.remote_hash == fp
            }
            (ConflictSide::Local, Some(ConflictResolution::Remote)) => &c.local_hash == fp,
            _ => false,
        })
    }

    /// Source commit for this push: the configured env var, else the HEAD
    /// of the git repository enclosing the articles directory.
    fn source_commit(&self) -> Option<String> {
        if let Ok(sha) = std::env::var(&self.config.sync.source_commit_env) {
            if !sha.is_empty() {
                return Some(sha);
            }
        }
        let repo = git2::Repository::discover(&self.config.workspace.articles_dir).ok()?;
        let head = repo.head().ok()?.peel_to_commit().ok()?;
        Some(head.id().to_string())
    }

    // -----------------------------------------------------------------------
    // Images
    // -----------------------------------------------------------------------

    /// Rewrite remote image URLs in `markdown` to stored local copies.
    /// With `download` off only already-known URLs are rewritten.
    async fn localize_images(
        &self,
        files: &ArticleFiles,
        html: &str,
        markdown: String,
        download: bool,
        outcome: &mut SyncOutcome,
    ) -> Result<String, SyncError> {
        let mut map = HashMap::new();
        for url in html_image_urls(html) {
            let stored = if download {
                match self.image_store.resolve_or_fetch(&url, self.images.as_ref()).await {
                    Ok(stored) => Some(stored),
                    Err(e) => {
                        warn!(url = %url, error = %e, "image download failed, keeping remote url");
                        outcome.warnings.push(SyncWarning::ImageSkipped {
                            reference: url.clone(),
                            reason: e.to_string(),
                        });
                        None
                    }
                }
            } else {
                self.db.get_image_by_url(&url)?.map(|record| crate::images::StoredImage {
                    path: PathBuf::from(&record.canonical_location),
                    record,
                    is_new: false,
                })
            };
            if let Some(stored) = stored {
                if stored.is_new {
                    outcome.images_downloaded += 1;
                }
                map.insert(url, relative_path(files.dir(), &stored.path));
            }
        }
        Ok(rewrite_image_targets(&markdown, &map))
    }

    /// Upload local images referenced by `body` and return the body with
    /// their links pointing at remote URLs. Unreadable files are skipped.
    async fn publish_images(
        &self,
        files: &ArticleFiles,
        body: &str,
        outcome: &mut SyncOutcome,
    ) -> Result<String, SyncError> {
        let mut map = HashMap::new();
        for reference in local_image_refs(body) {
            let path = resolve_reference(files.dir(), &reference);
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(reference = %reference, error = %e, "local image unreadable, link left as is");
                    outcome.warnings.push(SyncWarning::ImageSkipped {
                        reference,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "image".to_string());
            let uploaded = self
                .image_store
                .ensure_uploaded(&bytes, &filename, self.images.as_ref())
                .await?;
            if uploaded.uploaded {
                outcome.images_uploaded += 1;
            }
            map.insert(reference, uploaded.url);
        }
        Ok(rewrite_image_targets(body, &map))
    }

    // -----------------------------------------------------------------------
    // Articles, status, conflicts
    // -----------------------------------------------------------------------

    /// Create a new article directory with a starter `index.md` and an
    /// initial metadata record.
    pub fn create_article(
        &self,
        identity: &str,
        title: &str,
        slug: Option<&str>,
    ) -> Result<ArticleMeta, SyncError> {
        let slug = match slug {
            Some(s) => s.to_string(),
            None => article::slugify(title),
        };
        if slug.is_empty() {
            return Err(SyncError::InvalidSlug(title.to_string()));
        }
        match self.meta.load(&slug) {
            Ok(_) => return Err(SyncError::AlreadyExists(slug)),
            Err(crate::errors::MetaError::NotFound(_)) => {}
            Err(e) => return Err(SyncError::from_meta(&slug, e)),
        }

        let files = self.files(&slug);
        let mut meta = ArticleMeta::new(identity, slug.clone(), title);
        // A starter file counts as synced content so the first pull can
        // replace it without a conflict. An existing index.md stays unsynced.
        if files.read_index().map_err(|e| SyncError::io(&files.index_path(), e))?.is_none() {
            let mut doc = Document::parse("");
            doc.front_matter.set("title", title);
            doc.front_matter.set("remote_id", identity);
            doc.front_matter.set("slug", slug.clone());
            doc.front_matter.set("status", meta.status.to_string());
            doc.body = format!("# {title}");
            let text = doc.compose();
            files
                .write_index(&text)
                .map_err(|e| SyncError::io(&files.index_path(), e))?;
            meta.versions.fingerprint_local = Some(fingerprint(&text));
        }
        self.save_meta(&slug, &meta)?;
        self.audit(AuditEntry::success("create", &slug, &format!("remote id {identity}")));
        info!(slug = %slug, identity, "created article");
        Ok(meta)
    }

    /// Offline status of one article.
    pub fn status(&self, slug: &str) -> Result<ArticleReport, SyncError> {
        let meta = self.load_meta(slug)?;
        let files = self.files(slug);
        let current_local = files
            .read_index()
            .map_err(|e| SyncError::io(&files.index_path(), e))?
            .map(|text| fingerprint(&text));

        let now = Utc::now();
        let lock_remaining_minutes = meta.editing.locked_at.and_then(|at| {
            let remaining = self.lock.ttl() - (now - at);
            (remaining > chrono::Duration::zero() && meta.editing.location != EditLocation::None)
                .then(|| (remaining.num_seconds() + 59) / 60)
        });

        Ok(ArticleReport {
            slug: meta.slug.clone(),
            title: meta.title.clone(),
            status: meta.status,
            version: meta.editing.version,
            location: meta.editing.location,
            locked_by: meta.editing.locked_by.clone(),
            locked_at: meta.editing.locked_at,
            lock_remaining_minutes,
            local_changed: current_local.is_some()
                && current_local != meta.versions.fingerprint_local,
            stored_local: meta.versions.fingerprint_local.clone(),
            stored_remote: meta.versions.fingerprint_remote.clone(),
            current_local,
            open_conflicts: meta.open_conflicts().count(),
            last_push: meta.sync.last_push,
            last_pull: meta.sync.last_pull,
        })
    }

    /// Health of every article whose slug matches `pattern` (a glob).
    /// Per-article failures become error rows; the scan never aborts on one.
    pub fn check_all(&self, pattern: Option<&str>) -> Result<Vec<(String, ArticleHealth)>, SyncError> {
        let articles_dir = &self.config.workspace.articles_dir;
        let slugs = article::list_slugs(articles_dir).map_err(|e| SyncError::io(articles_dir, e))?;
        let mut rows = Vec::new();
        for slug in slugs {
            if let Some(p) = pattern {
                if !glob_match::glob_match(p, &slug) {
                    continue;
                }
            }
            let health = match self.status(&slug) {
                Ok(report) => health_of(&report),
                Err(SyncError::ArticleNotFound(_)) => ArticleHealth::NotInitialized,
                Err(e) => {
                    warn!(slug = %slug, error = %e, "check-all: article unreadable");
                    ArticleHealth::Error(e.to_string())
                }
            };
            rows.push((slug, health));
        }
        Ok(rows)
    }

    /// Conflict records of one article, oldest first.
    pub fn conflicts(&self, slug: &str) -> Result<Vec<ConflictRecord>, SyncError> {
        Ok(self.load_meta(slug)?.sync.open_conflicts)
    }

    /// Mark every open conflict of `slug` as resolved. Records are kept.
    pub fn resolve(&self, slug: &str, resolution: ConflictResolution) -> Result<usize, SyncError> {
        let mut meta = self.load_meta(slug)?;
        let mut resolved = 0;
        for record in meta.sync.open_conflicts.iter_mut().filter(|c| c.resolution.is_none()) {
            record.resolution = Some(resolution);
            resolved += 1;
        }
        if resolved == 0 {
            return Err(ConflictError::NoneOpen(slug.to_string()).into());
        }
        self.save_meta(slug, &meta)?;
        self.audit(AuditEntry::success(
            "resolve",
            slug,
            &format!("{resolved} conflict(s) resolved as {resolution}"),
        ));
        info!(slug, resolved, %resolution, "conflicts resolved");
        Ok(resolved)
    }

    /// Recent audit entries, optionally for one article.
    pub fn history(&self, slug: Option<&str>, limit: u32) -> Result<Vec<AuditLogEntry>, SyncError> {
        Ok(self.db.list_audit_log(slug, limit)?)
    }
}

#[derive(Debug, Clone, Copy)]
enum ConflictSide {
    Local,
    Remote,
}

fn health_of(report: &ArticleReport) -> ArticleHealth {
    if report.open_conflicts > 0 {
        return ArticleHealth::ConflictsPending(report.open_conflicts);
    }
    if let Some(minutes_remaining) = report.lock_remaining_minutes {
        if report.location == EditLocation::Remote && report.local_changed {
            return ArticleHealth::Locked {
                held_by: report.location,
                minutes_remaining,
            };
        }
    }
    if report.local_changed {
        ArticleHealth::Diverged
    } else {
        ArticleHealth::Synced
    }
}

/// Resolve a markdown image reference against the article directory.
fn resolve_reference(article_dir: &Path, reference: &str) -> PathBuf {
    let path = Path::new(reference);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        article_dir.join(path)
    }
}
