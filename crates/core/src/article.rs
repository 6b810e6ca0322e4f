//! Per-article working files and front matter.
//!
//! Each article lives in its own directory:
//!
//! ```text
//! articles/<slug>/
//!   index.md            front matter + markdown body
//!   meta.json           ArticleMeta
//!   .base.md            body at the last completed sync (merge ancestor)
//!   index.CONFLICT.md   conflict artifact, overwritten per detection
//!   remote.html         last HTML pushed or pulled
//! ```

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::hasher::{normalize_line_endings, split_front_matter};

pub const INDEX_FILE: &str = "index.md";
pub const META_FILE: &str = "meta.json";
pub const BASE_FILE: &str = ".base.md";
pub const CONFLICT_FILE: &str = "index.CONFLICT.md";
pub const REMOTE_HTML_FILE: &str = "remote.html";

// ---------------------------------------------------------------------------
// Working files
// ---------------------------------------------------------------------------

/// Paths and I/O helpers for one article directory.
#[derive(Debug, Clone)]
pub struct ArticleFiles {
    dir: PathBuf,
}

impl ArticleFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The directory name, which is the article's slug.
    pub fn slug(&self) -> String {
        self.dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    pub fn base_path(&self) -> PathBuf {
        self.dir.join(BASE_FILE)
    }

    pub fn conflict_path(&self) -> PathBuf {
        self.dir.join(CONFLICT_FILE)
    }

    pub fn remote_html_path(&self) -> PathBuf {
        self.dir.join(REMOTE_HTML_FILE)
    }

    /// Read `index.md`, or `None` when it does not exist yet.
    pub fn read_index(&self) -> io::Result<Option<String>> {
        read_optional(&self.index_path())
    }

    /// Read the base snapshot. A missing snapshot reads as empty, which makes
    /// the first sync of an article merge against an empty ancestor.
    pub fn read_base(&self) -> io::Result<String> {
        Ok(read_optional(&self.base_path())?.unwrap_or_default())
    }

    pub fn write_index(&self, text: &str) -> io::Result<()> {
        write_atomic(&self.index_path(), text.as_bytes())
    }

    pub fn write_base(&self, body: &str) -> io::Result<()> {
        write_atomic(&self.base_path(), body.as_bytes())
    }

    pub fn write_conflict(&self, rendered: &str) -> io::Result<()> {
        write_atomic(&self.conflict_path(), rendered.as_bytes())
    }

    pub fn write_remote_html(&self, html: &str) -> io::Result<()> {
        write_atomic(&self.remote_html_path(), html.as_bytes())
    }
}

fn read_optional(path: &Path) -> io::Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write `contents` to `path` through a temp file in the same directory and
/// an atomic rename. Readers see either the old file or the new one.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Slugs of every article directory under `articles_dir`, sorted. Hidden
/// directories are skipped. A missing `articles_dir` yields no slugs.
pub fn list_slugs(articles_dir: &Path) -> io::Result<Vec<String>> {
    let entries = match std::fs::read_dir(articles_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut slugs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            slugs.push(name);
        }
    }
    slugs.sort();
    Ok(slugs)
}

// ---------------------------------------------------------------------------
// Front matter
// ---------------------------------------------------------------------------

/// Ordered `key: value` pairs from a `---` delimited block.
///
/// Values written by notesync are JSON-quoted strings; bare values written
/// by hand are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrontMatter {
    entries: Vec<(String, String)>,
}

impl FrontMatter {
    pub fn parse(inner: &str) -> Self {
        let entries = inner
            .lines()
            .filter_map(|line| {
                let (key, value) = line.split_once(':')?;
                let key = key.trim();
                if key.is_empty() || key.starts_with('#') {
                    return None;
                }
                Some((key.to_string(), unquote(value.trim())))
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Set `key`, replacing an existing entry in place.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key.to_string(), value)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as a complete block, delimiters included.
    pub fn render(&self) -> String {
        let mut out = String::from("---\n");
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push_str(": ");
            out.push_str(&serde_json::Value::String(value.clone()).to_string());
            out.push('\n');
        }
        out.push_str("---\n");
        out
    }
}

fn unquote(raw: &str) -> String {
    if raw.starts_with('"') {
        if let Ok(s) = serde_json::from_str::<String>(raw) {
            return s;
        }
    }
    if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
        return raw[1..raw.len() - 1].to_string();
    }
    raw.to_string()
}

/// A parsed `index.md`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub front_matter: FrontMatter,
    /// Body with normalized line endings and outer whitespace trimmed.
    pub body: String,
}

impl Document {
    pub fn parse(text: &str) -> Self {
        let unified = normalize_line_endings(text);
        let (inner, body) = split_front_matter(&unified);
        Self {
            front_matter: inner.map(FrontMatter::parse).unwrap_or_default(),
            body: body.trim().to_string(),
        }
    }

    /// Serialize back to file form: front matter, blank line, body.
    pub fn compose(&self) -> String {
        let mut out = String::new();
        if !self.front_matter.is_empty() {
            out.push_str(&self.front_matter.render());
            out.push('\n');
        }
        out.push_str(&self.body);
        out.push('\n');
        out
    }

    pub fn title(&self) -> Option<&str> {
        self.front_matter.get("title").filter(|t| !t.is_empty())
    }
}

/// Body of a document file: front matter dropped, line endings normalized,
/// outer whitespace trimmed.
pub fn document_body(text: &str) -> String {
    Document::parse(text).body
}

/// Derive a slug from a title: lowercase ASCII alphanumerics, every other
/// run of characters collapsed to a single `-`.
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_parse_and_compose() {
        let text = "---\ntitle: \"Hello, \\\"world\\\"\"\nslug: hello\n---\n\n# Heading\r\n\r\nBody\n";
        let doc = Document::parse(text);
        assert_eq!(doc.title(), Some("Hello, \"world\""));
        assert_eq!(doc.front_matter.get("slug"), Some("hello"));
        assert_eq!(doc.body, "# Heading\n\nBody");

        let again = Document::parse(&doc.compose());
        assert_eq!(again, doc);
    }

    #[test]
    fn test_document_without_front_matter() {
        let doc = Document::parse("\n\nJust text\n");
        assert!(doc.front_matter.is_empty());
        assert_eq!(doc.body, "Just text");
        assert_eq!(doc.compose(), "Just text\n");
    }

    #[test]
    fn test_front_matter_set_replaces_in_place() {
        let mut fm = FrontMatter::parse("title: a\nstatus: draft");
        fm.set("title", "b");
        fm.set("updated_at", "2025-01-01");
        assert_eq!(
            fm.render(),
            "---\ntitle: \"b\"\nstatus: \"draft\"\nupdated_at: \"2025-01-01\"\n---\n"
        );
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World!"), "hello-world");
        assert_eq!(slugify("  Rust & SQLite 101 "), "rust-sqlite-101");
        assert_eq!(slugify("日本語"), "");
    }

    #[test]
    fn test_working_files_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let files = ArticleFiles::new(dir.path().join("post"));
        assert_eq!(files.slug(), "post");
        assert_eq!(files.read_index().unwrap(), None);
        assert_eq!(files.read_base().unwrap(), "");

        files.write_index("hello\n").unwrap();
        files.write_base("hello").unwrap();
        assert_eq!(files.read_index().unwrap().as_deref(), Some("hello\n"));
        assert_eq!(files.read_base().unwrap(), "hello");

        files.write_index("replaced\n").unwrap();
        assert_eq!(files.read_index().unwrap().as_deref(), Some("replaced\n"));
    }

    #[test]
    fn test_list_slugs_skips_files_and_hidden_dirs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("b-post")).unwrap();
        std::fs::create_dir(dir.path().join("a-post")).unwrap();
        std::fs::create_dir(dir.path().join(".trash")).unwrap();
        std::fs::write(dir.path().join("README.md"), "x").unwrap();

        assert_eq!(list_slugs(dir.path()).unwrap(), vec!["a-post", "b-post"]);
        assert!(list_slugs(&dir.path().join("missing")).unwrap().is_empty());
    }
}
