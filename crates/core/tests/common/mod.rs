//! Shared fixtures: an in-memory remote service, a metadata store whose
//! saves can be made to fail, and a workspace rooted in a temp dir.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use regex_lite::Regex;
use tempfile::TempDir;

use notesync_core::config::AppConfig;
use notesync_core::db::Database;
use notesync_core::errors::{MetaError, TransportError};
use notesync_core::meta::{JsonMetaStore, MetaStore};
use notesync_core::models::ArticleMeta;
use notesync_core::remote::{ImageTransfer, RemoteDocument, RemoteTransport, Renderer, UpdateReceipt};
use notesync_core::sync_engine::{Collaborators, SyncEngine};

pub const REMOTE_ID: &str = "n0001";
pub const SLUG: &str = "hello";

// ---------------------------------------------------------------------------
// Remote service double
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RemoteState {
    pub title: String,
    pub body: String,
    pub revision: u64,
    pub fetches: usize,
    pub updates: usize,
    pub uploads: Vec<String>,
    pub downloads: usize,
    /// Title and body of the published view, when it differs from the draft.
    pub published: Option<(String, String)>,
    pub published_fetches: usize,
    /// Bytes served for image URLs.
    pub blobs: HashMap<String, Vec<u8>>,
}

/// In-process stand-in for the remote note service.
#[derive(Debug, Default)]
pub struct FakeRemote {
    pub state: Mutex<RemoteState>,
}

impl FakeRemote {
    pub fn with_body(title: &str, body: &str) -> Self {
        let remote = Self::default();
        remote.edit(title, body);
        remote
    }

    /// Simulate an edit made in the remote editor.
    pub fn edit(&self, title: &str, body: &str) {
        let mut state = self.state.lock().unwrap();
        state.title = title.to_string();
        state.body = body.to_string();
        state.revision += 1;
    }

    /// Publish a version that stays fixed while the draft moves on.
    pub fn publish(&self, title: &str, body: &str) {
        self.state.lock().unwrap().published = Some((title.to_string(), body.to_string()));
    }

    pub fn published_fetches(&self) -> usize {
        self.state.lock().unwrap().published_fetches
    }

    pub fn body(&self) -> String {
        self.state.lock().unwrap().body.clone()
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().unwrap().fetches
    }

    pub fn updates(&self) -> usize {
        self.state.lock().unwrap().updates
    }

    pub fn serve_image(&self, url: &str, bytes: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .blobs
            .insert(url.to_string(), bytes.to_vec());
    }
}

#[async_trait]
impl RemoteTransport for FakeRemote {
    async fn fetch(&self, _id: &str) -> Result<RemoteDocument, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.fetches += 1;
        Ok(RemoteDocument {
            title: state.title.clone(),
            body: state.body.clone(),
            updated_at: format!("rev-{}", state.revision),
        })
    }

    async fn fetch_published(&self, id: &str) -> Result<RemoteDocument, TransportError> {
        let published = {
            let mut state = self.state.lock().unwrap();
            state.published.clone().map(|(title, body)| {
                state.published_fetches += 1;
                RemoteDocument {
                    title,
                    body,
                    updated_at: format!("published-{}", state.revision),
                }
            })
        };
        match published {
            Some(doc) => Ok(doc),
            None => self.fetch(id).await,
        }
    }

    async fn update(&self, _id: &str, title: &str, body: &str) -> Result<UpdateReceipt, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.updates += 1;
        state.title = title.to_string();
        state.body = body.to_string();
        state.revision += 1;
        Ok(UpdateReceipt {
            revision: format!("rev-{}", state.revision),
        })
    }
}

#[async_trait]
impl ImageTransfer for FakeRemote {
    async fn upload(&self, bytes: &[u8], _content_type: &str, filename: &str) -> Result<String, TransportError> {
        let mut state = self.state.lock().unwrap();
        let url = format!("https://cdn.example/up/{}/{filename}", state.uploads.len());
        state.uploads.push(url.clone());
        state.blobs.insert(url.clone(), bytes.to_vec());
        Ok(url)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.downloads += 1;
        state.blobs.get(url).cloned().ok_or_else(|| TransportError::Api {
            endpoint: url.to_string(),
            status: 404,
            body: "not found".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Renderer double
// ---------------------------------------------------------------------------

/// Text passes through unchanged; only image syntax is translated, so
/// tests can reason about exact bodies.
pub struct PassthroughRenderer;

fn md_img() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)\)").unwrap())
}

fn html_img() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<img alt="([^"]*)" src="([^"]+)">"#).unwrap())
}

impl Renderer for PassthroughRenderer {
    fn to_remote(&self, markdown: &str) -> String {
        md_img()
            .replace_all(markdown, r#"<img alt="$1" src="$2">"#)
            .into_owned()
    }

    fn to_local(&self, html: &str) -> String {
        html_img().replace_all(html, "![$1]($2)").trim().to_string()
    }
}

// ---------------------------------------------------------------------------
// Metadata store with injectable save failure
// ---------------------------------------------------------------------------

pub struct FlakyMetaStore {
    inner: JsonMetaStore,
    pub fail_saves: AtomicBool,
}

impl MetaStore for FlakyMetaStore {
    fn load(&self, slug: &str) -> Result<ArticleMeta, MetaError> {
        self.inner.load(slug)
    }

    fn save(&self, slug: &str, meta: &ArticleMeta) -> Result<(), MetaError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(MetaError::Io {
                path: self.inner.path_for(slug).display().to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.save(slug, meta)
    }
}

// ---------------------------------------------------------------------------
// Workspace harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dir: TempDir,
    pub engine: SyncEngine,
    pub remote: Arc<FakeRemote>,
    pub meta: Arc<FlakyMetaStore>,
    pub config: AppConfig,
}

impl Harness {
    pub fn new(remote: FakeRemote) -> Self {
        Self::with_config(remote, |_| {})
    }

    /// Like [`Harness::new`], with a chance to adjust the config first.
    pub fn with_config(remote: FakeRemote, adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.workspace = config.workspace.rooted_at(dir.path());
        config.sync.editor = Some("tester".into());
        // Keep the host's CI commit out of recorded metadata.
        config.sync.source_commit_env = "NOTESYNC_TEST_UNSET_COMMIT".into();
        adjust(&mut config);

        let db = Arc::new(Database::in_memory().unwrap());

        let remote = Arc::new(remote);
        let meta = Arc::new(FlakyMetaStore {
            inner: JsonMetaStore::new(config.workspace.articles_dir.clone()),
            fail_saves: AtomicBool::new(false),
        });
        let engine = SyncEngine::new(
            config.clone(),
            db,
            Collaborators {
                meta: meta.clone(),
                transport: remote.clone(),
                images: remote.clone(),
                renderer: Arc::new(PassthroughRenderer),
            },
        );
        Self {
            dir,
            engine,
            remote,
            meta,
            config,
        }
    }

    /// A workspace with one freshly created article bound to `REMOTE_ID`.
    pub fn with_article(remote: FakeRemote) -> Self {
        let h = Self::new(remote);
        h.engine.create_article(REMOTE_ID, "Hello", Some(SLUG)).unwrap();
        h
    }

    /// Mark the article published so pulls read the published view.
    pub fn mark_published(&self) {
        let mut meta = self.load_meta();
        meta.status = notesync_core::models::ArticleStatus::Published;
        self.meta.save(SLUG, &meta).unwrap();
    }

    pub fn index_path(&self) -> PathBuf {
        self.engine.files(SLUG).index_path()
    }

    pub fn read_index(&self) -> String {
        std::fs::read_to_string(self.index_path()).unwrap()
    }

    /// Replace the body of `index.md`, keeping its front matter.
    pub fn write_body(&self, body: &str) {
        let text = self.read_index();
        let mut doc = notesync_core::article::Document::parse(&text);
        doc.body = body.to_string();
        std::fs::write(self.index_path(), doc.compose()).unwrap();
    }

    pub fn body(&self) -> String {
        notesync_core::article::document_body(&self.read_index())
    }

    pub fn meta_bytes(&self) -> Vec<u8> {
        std::fs::read(self.engine.files(SLUG).meta_path()).unwrap()
    }

    pub fn load_meta(&self) -> ArticleMeta {
        self.meta.load(SLUG).unwrap()
    }

    /// Backdate the edit lock so the other side may write without force.
    pub fn age_lock(&self, minutes: i64) {
        let mut meta = self.load_meta();
        meta.editing.locked_at = Some(Utc::now() - Duration::minutes(minutes));
        self.meta.save(SLUG, &meta).unwrap();
    }

    pub fn fail_meta_saves(&self, fail: bool) {
        self.meta.fail_saves.store(fail, Ordering::SeqCst);
    }
}
