//! Content-addressed image store.
//!
//! Blobs live at `<root>/<first two hex chars>/<fingerprint><ext>` and each
//! distinct fingerprint has exactly one row in the `images` table. URLs are
//! mapped to fingerprints in `image_urls`, so pulls skip re-downloading a
//! known URL and pushes skip re-uploading known bytes.

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, OnceLock};

use regex_lite::Regex;
use tracing::{debug, info};

use crate::article::write_atomic;
use crate::db::Database;
use crate::errors::ImageError;
use crate::hasher::{hash_bytes, Fingerprint};
use crate::models::ImageRecord;
use crate::remote::ImageTransfer;

/// Result of storing or resolving an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    pub record: ImageRecord,
    pub path: PathBuf,
    /// `false` when the fingerprint was already known.
    pub is_new: bool,
}

impl StoredImage {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.record.fingerprint
    }
}

/// A remote URL for an image, and whether it had to be uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    pub url: String,
    pub uploaded: bool,
}

pub struct ImageStore {
    root: PathBuf,
    db: Arc<Database>,
}

impl ImageStore {
    pub fn new(root: impl Into<PathBuf>, db: Arc<Database>) -> Self {
        Self {
            root: root.into(),
            db,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Store `bytes`, keyed by their fingerprint.
    ///
    /// A known fingerprint returns the existing record with `is_new = false`
    /// and nothing is rewritten. `ext_hint` (e.g. `".png"`) picks the file
    /// extension for new blobs; without one the bytes are sniffed.
    pub fn store(&self, bytes: &[u8], ext_hint: Option<&str>) -> Result<StoredImage, ImageError> {
        self.store_with_origin(bytes, ext_hint, None)
    }

    fn store_with_origin(
        &self,
        bytes: &[u8],
        ext_hint: Option<&str>,
        origin_url: Option<&str>,
    ) -> Result<StoredImage, ImageError> {
        let fingerprint = hash_bytes(bytes);

        if let Some(record) = self.db.get_image(&fingerprint)? {
            let path = PathBuf::from(&record.canonical_location);
            if !path.exists() {
                // Row survived but the blob was removed by hand; restore it.
                write_blob(&path, bytes)?;
            }
            debug!(fingerprint = fingerprint.short(), "image already stored");
            return Ok(StoredImage {
                record,
                path,
                is_new: false,
            });
        }

        let ext = ext_hint
            .and_then(normalize_ext)
            .unwrap_or_else(|| sniff_ext(bytes).to_string());
        let path = self.blob_path(&fingerprint, &ext);
        write_blob(&path, bytes)?;

        let record = ImageRecord {
            fingerprint: fingerprint.clone(),
            canonical_location: path.display().to_string(),
            remote_url: origin_url.map(str::to_string),
        };
        let is_new = self.db.insert_image(&record)?;
        info!(fingerprint = fingerprint.short(), path = %path.display(), "stored new image");
        Ok(StoredImage { record, path, is_new })
    }

    /// Return the image previously recorded for `url`, or download it with
    /// `fetcher`, store it, and record the mapping.
    pub async fn resolve_or_fetch(
        &self,
        url: &str,
        fetcher: &dyn ImageTransfer,
    ) -> Result<StoredImage, ImageError> {
        if let Some(record) = self.db.get_image_by_url(url)? {
            debug!(url, fingerprint = record.fingerprint.short(), "image url already known");
            let path = PathBuf::from(&record.canonical_location);
            return Ok(StoredImage {
                record,
                path,
                is_new: false,
            });
        }

        let bytes = fetcher.download(url).await?;
        let stored = self.store_with_origin(&bytes, ext_from_url(url).as_deref(), Some(url))?;
        self.db.record_image_url(url, stored.fingerprint())?;
        Ok(stored)
    }

    /// Store a local image and make sure the remote side has it, uploading
    /// only when no URL is recorded for its fingerprint yet.
    pub async fn ensure_uploaded(
        &self,
        bytes: &[u8],
        filename: &str,
        transfer: &dyn ImageTransfer,
    ) -> Result<UploadedImage, ImageError> {
        let stored = self.store(bytes, ext_from_path(filename).as_deref())?;
        if let Some(url) = self.db.get_url_for_image(stored.fingerprint())? {
            debug!(filename, url = %url, "reusing uploaded image");
            return Ok(UploadedImage { url, uploaded: false });
        }

        let content_type = content_type_for(&stored.path);
        let url = transfer.upload(bytes, content_type, filename).await?;
        self.db.record_image_url(&url, stored.fingerprint())?;
        info!(filename, url = %url, "uploaded image");
        Ok(UploadedImage { url, uploaded: true })
    }

    fn blob_path(&self, fingerprint: &Fingerprint, ext: &str) -> PathBuf {
        let hex = fingerprint.as_str();
        let shard = hex.get(..2).unwrap_or("00");
        self.root.join(shard).join(format!("{hex}{ext}"))
    }
}

fn write_blob(path: &Path, bytes: &[u8]) -> Result<(), ImageError> {
    write_atomic(path, bytes).map_err(|source| ImageError::Io {
        path: path.display().to_string(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Extensions & content types
// ---------------------------------------------------------------------------

/// `".png"` style extension, lowercased, or `None` if `raw` does not look
/// like an extension.
fn normalize_ext(raw: &str) -> Option<String> {
    let bare = raw.trim_start_matches('.');
    if bare.is_empty() || bare.len() > 5 || !bare.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", bare.to_ascii_lowercase()))
}

fn ext_from_path(path: &str) -> Option<String> {
    let name = path.rsplit('/').next()?;
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    normalize_ext(ext)
}

/// Extension from a URL's path, ignoring query and fragment.
pub fn ext_from_url(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let path = without_query
        .split_once("://")
        .map(|(_, rest)| rest.split_once('/').map(|(_, p)| p).unwrap_or(""))
        .unwrap_or(without_query);
    ext_from_path(path)
}

/// Extension guessed from magic bytes, `.jpg` when unknown.
fn sniff_ext(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(b"\x89PNG") {
        ".png"
    } else if bytes.starts_with(b"GIF8") {
        ".gif"
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        ".webp"
    } else if bytes.starts_with(b"<svg") || bytes.starts_with(b"<?xml") {
        ".svg"
    } else {
        ".jpg"
    }
}

/// MIME type from a file's extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "jpg" | "jpeg" => "image/jpeg",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Link extraction & rewriting
// ---------------------------------------------------------------------------

fn markdown_image_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"!\[(?P<alt>[^\]]*)\]\((?P<target>[^)\s]+)(?P<title>\s+"[^"]*")?\)"#)
            .expect("valid regex")
    })
}

fn html_img_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"<img[^>]+src="([^"]+)""#).expect("valid regex"))
}

fn is_remote(target: &str) -> bool {
    target.starts_with("http://") || target.starts_with("https://") || target.starts_with("data:")
}

/// Local (non-URL) image targets referenced by a markdown body, in order of
/// first appearance.
pub fn local_image_refs(markdown: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for cap in markdown_image_re().captures_iter(markdown) {
        if let Some(target) = cap.name("target").map(|m| m.as_str()) {
            if !is_remote(target) && !seen.iter().any(|s| s == target) {
                seen.push(target.to_string());
            }
        }
    }
    seen
}

/// `src` URLs of every `<img>` in an HTML body, deduplicated, in order.
pub fn html_image_urls(html: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for cap in html_img_re().captures_iter(html) {
        if let Some(src) = cap.get(1).map(|m| m.as_str()) {
            if is_remote(src) && !src.starts_with("data:") && !urls.iter().any(|u| u == src) {
                urls.push(src.to_string());
            }
        }
    }
    urls
}

/// Replace markdown image targets found in `map`, keeping alt text and
/// titles. Targets not in `map` are left untouched.
pub fn rewrite_image_targets(markdown: &str, map: &HashMap<String, String>) -> String {
    markdown_image_re()
        .replace_all(markdown, |cap: &regex_lite::Captures<'_>| {
            let alt = cap.name("alt").map_or("", |m| m.as_str());
            let target = cap.name("target").map_or("", |m| m.as_str());
            let title = cap.name("title").map_or("", |m| m.as_str());
            let target = map.get(target).map(String::as_str).unwrap_or(target);
            format!("![{alt}]({target}{title})")
        })
        .into_owned()
}

/// Path of `target` relative to `from_dir`, using `/` separators.
///
/// Both paths must be absolute or both relative to the same directory.
pub fn relative_path(from_dir: &Path, target: &Path) -> String {
    let from: Vec<Component<'_>> = from_dir
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let to: Vec<Component<'_>> = target
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect();
    let common = from.iter().zip(to.iter()).take_while(|(a, b)| a == b).count();

    let mut parts: Vec<String> = std::iter::repeat("..".to_string())
        .take(from.len() - common)
        .collect();
    parts.extend(
        to[common..]
            .iter()
            .map(|c| c.as_os_str().to_string_lossy().into_owned()),
    );
    parts.join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::errors::TransportError;

    fn setup() -> (tempfile::TempDir, ImageStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(Database::in_memory().unwrap());
        let store = ImageStore::new(dir.path().join("images"), db);
        (dir, store)
    }

    #[derive(Default)]
    struct CountingTransfer {
        downloads: AtomicUsize,
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl ImageTransfer for CountingTransfer {
        async fn upload(&self, _: &[u8], _: &str, filename: &str) -> Result<String, TransportError> {
            let n = self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("https://cdn.example/{n}/{filename}"))
        }

        async fn download(&self, url: &str) -> Result<Vec<u8>, TransportError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("bytes of {}", url.rsplit('/').next().unwrap_or("")).into_bytes())
        }
    }

    #[test]
    fn test_store_dedups_identical_bytes() {
        let (_dir, store) = setup();
        let first = store.store(b"\x89PNG...", None).unwrap();
        let second = store.store(b"\x89PNG...", Some(".jpg")).unwrap();
        assert!(first.is_new);
        assert!(!second.is_new);
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(second.path, first.path);
        assert!(first.path.to_string_lossy().ends_with(".png"));

        let other = store.store(b"different", None).unwrap();
        assert!(other.is_new);
        assert_ne!(other.fingerprint(), first.fingerprint());
        assert_ne!(other.path, first.path);
        assert_eq!(store.db.count_images().unwrap(), 2);
    }

    #[test]
    fn test_blob_layout_is_sharded() {
        let (_dir, store) = setup();
        let stored = store.store(b"abc", Some("gif")).unwrap();
        let hex = stored.fingerprint().as_str().to_string();
        let expected = store.root().join(&hex[..2]).join(format!("{hex}.gif"));
        assert_eq!(stored.path, expected);
        assert_eq!(std::fs::read(&expected).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_resolve_or_fetch_downloads_once_per_url() {
        let (_dir, store) = setup();
        let transfer = CountingTransfer::default();

        let a = store.resolve_or_fetch("https://x/a.png?w=1", &transfer).await.unwrap();
        let again = store.resolve_or_fetch("https://x/a.png?w=1", &transfer).await.unwrap();
        assert!(a.is_new);
        assert!(!again.is_new);
        assert_eq!(transfer.downloads.load(Ordering::SeqCst), 1);
        assert_eq!(a.record.remote_url.as_deref(), Some("https://x/a.png?w=1"));
        assert!(a.path.to_string_lossy().ends_with(".png"));
    }

    #[tokio::test]
    async fn test_different_urls_same_bytes_share_one_record() {
        let (_dir, store) = setup();
        let transfer = CountingTransfer::default();
        let a = store.resolve_or_fetch("https://x/1/pic.jpg", &transfer).await.unwrap();
        let b = store.resolve_or_fetch("https://y/2/pic.jpg", &transfer).await.unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert!(!b.is_new);
        assert_eq!(store.db.count_images().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ensure_uploaded_reuses_url() {
        let (_dir, store) = setup();
        let transfer = CountingTransfer::default();
        let first = store.ensure_uploaded(b"img", "a.png", &transfer).await.unwrap();
        let second = store.ensure_uploaded(b"img", "copy.png", &transfer).await.unwrap();
        assert!(first.uploaded);
        assert!(!second.uploaded);
        assert_eq!(first.url, second.url);
        assert_eq!(transfer.uploads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_local_refs_and_rewrite() {
        let md = "![a](img/one.png) text ![b](https://cdn/x.png) ![c](img/one.png \"t\")";
        assert_eq!(local_image_refs(md), vec!["img/one.png"]);

        let map: HashMap<String, String> =
            [("img/one.png".to_string(), "https://cdn/1.png".to_string())].into();
        assert_eq!(
            rewrite_image_targets(md, &map),
            "![a](https://cdn/1.png) text ![b](https://cdn/x.png) ![c](https://cdn/1.png \"t\")"
        );
    }

    #[test]
    fn test_html_image_urls() {
        let html = r#"<p><img alt="x" src="https://a/1.png"><img src="https://a/1.png"/><img src="data:abc"></p>"#;
        assert_eq!(html_image_urls(html), vec!["https://a/1.png"]);
    }

    #[test]
    fn test_ext_helpers() {
        assert_eq!(ext_from_url("https://a.b/c/d.JPEG?x=1").as_deref(), Some(".jpeg"));
        assert_eq!(ext_from_url("https://a.b/c/noext"), None);
        assert_eq!(ext_from_url("https://example.com"), None);
        assert_eq!(content_type_for(Path::new("x/y.png")), "image/png");
        assert_eq!(sniff_ext(b"\xff\xd8\xff"), ".jpg");
    }

    #[test]
    fn test_relative_path() {
        assert_eq!(
            relative_path(Path::new("/w/articles/post"), Path::new("/w/assets/images/ab/ab12.png")),
            "../../assets/images/ab/ab12.png"
        );
        assert_eq!(relative_path(Path::new("a"), Path::new("a/b.png")), "b.png");
    }
}
