//! Content fingerprinting.
//!
//! A fingerprint is the SHA-256 of a document body after canonicalization,
//! so that two bodies differing only in front matter, line-ending style,
//! runs of blank lines, or trailing whitespace hash identically. Image
//! fingerprints hash raw bytes with no canonicalization.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A hex-encoded SHA-256 content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an already-computed hex digest.
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters, for display.
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a document body (markdown or HTML) after canonicalization.
pub fn fingerprint(body: &str) -> Fingerprint {
    hash_bytes(canonicalize(body).as_bytes())
}

/// Fingerprint raw bytes. Used for images, where the bytes are the identity.
pub fn hash_bytes(bytes: &[u8]) -> Fingerprint {
    let digest = Sha256::digest(bytes);
    Fingerprint(hex::encode(digest))
}

/// Canonical form used for fingerprinting.
///
/// 1. Normalize `\r\n` and lone `\r` to `\n`.
/// 2. Drop a leading `---` front-matter block.
/// 3. Strip trailing spaces and tabs from every line.
/// 4. Collapse runs of two or more blank lines into a single blank line.
/// 5. Trim the whole body.
pub fn canonicalize(body: &str) -> String {
    let unified = normalize_line_endings(body);
    let without_front_matter = strip_front_matter(&unified);

    let mut out = String::with_capacity(without_front_matter.len());
    let mut newline_run = 0usize;
    for (i, line) in without_front_matter.split('\n').enumerate() {
        let line = line.trim_end_matches([' ', '\t']);
        if i > 0 {
            newline_run += 1;
        }
        if line.is_empty() {
            continue;
        }
        for _ in 0..newline_run.min(2) {
            out.push('\n');
        }
        newline_run = 0;
        out.push_str(line);
    }

    out.trim().to_string()
}

/// Replace every `\r\n` and lone `\r` with `\n`.
pub fn normalize_line_endings(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// Return `text` without a leading front-matter block.
///
/// The block must start on the first line with `---` and end at the next
/// line consisting of exactly `---`. Text without a closed block is returned
/// unchanged.
pub fn strip_front_matter(text: &str) -> &str {
    split_front_matter(text).1
}

/// Split `text` into `(front_matter_inner, body)`.
///
/// `front_matter_inner` excludes the `---` delimiters and is `None` when the
/// text has no closed front-matter block.
pub fn split_front_matter(text: &str) -> (Option<&str>, &str) {
    let Some(rest) = text.strip_prefix("---\n") else {
        return (None, text);
    };

    // The closing delimiter may immediately follow the opening one.
    if let Some(body) = rest.strip_prefix("---\n") {
        return (Some(""), body);
    }
    if rest == "---" {
        return (Some(""), "");
    }

    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if offset > 0 && line.trim_end_matches('\n') == "---" {
            let inner = &rest[..offset - 1];
            let body = &rest[offset + line.len()..];
            return (Some(inner), body);
        }
        offset += line.len();
    }

    (None, text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let body = "# Title\n\nSome text.\n";
        assert_eq!(fingerprint(body), fingerprint(body));
        assert_eq!(fingerprint(body).as_str().len(), 64);
    }

    #[test]
    fn test_line_endings_do_not_matter() {
        let lf = "a\nb\nc";
        let crlf = "a\r\nb\r\nc";
        let cr = "a\rb\rc";
        assert_eq!(fingerprint(lf), fingerprint(crlf));
        assert_eq!(fingerprint(lf), fingerprint(cr));
    }

    #[test]
    fn test_trailing_whitespace_and_outer_blank_lines_ignored() {
        assert_eq!(
            fingerprint("\n\n  a  \t\nb\t\n\n"),
            fingerprint("  a\nb")
        );
    }

    #[test]
    fn test_blank_line_runs_collapse() {
        let one_blank = "para one\n\npara two";
        assert_eq!(fingerprint(one_blank), fingerprint("para one\n\n\n\npara two"));
        assert_eq!(fingerprint(one_blank), fingerprint("para one\n  \n\t\n\npara two"));
        assert_ne!(fingerprint(one_blank), fingerprint("para one\npara two"));
    }

    #[test]
    fn test_front_matter_is_ignored() {
        let with = "---\ntitle: \"Hello\"\nslug: \"hello\"\n---\n\nBody text\n";
        let other = "---\ntitle: \"Changed\"\n---\nBody text";
        assert_eq!(fingerprint(with), fingerprint("Body text"));
        assert_eq!(fingerprint(with), fingerprint(other));
    }

    #[test]
    fn test_canonicalize_idempotent() {
        let body = "---\na: 1\n---\r\n\r\nx  \r\n\r\n\r\n\r\ny\r\n";
        let once = canonicalize(body);
        assert_eq!(canonicalize(&once), once);
        assert_eq!(fingerprint(&once), fingerprint(body));
    }

    #[test]
    fn test_content_changes_change_fingerprint() {
        assert_ne!(fingerprint("a\nb"), fingerprint("a\nc"));
        assert_ne!(fingerprint("a b"), fingerprint("a  b"));
    }

    #[test]
    fn test_split_front_matter() {
        let (fm, body) = split_front_matter("---\ntitle: x\n---\nbody");
        assert_eq!(fm, Some("title: x"));
        assert_eq!(body, "body");

        let (fm, body) = split_front_matter("no front matter");
        assert_eq!(fm, None);
        assert_eq!(body, "no front matter");

        // Unclosed blocks are left alone.
        let (fm, body) = split_front_matter("---\ntitle: x\nbody");
        assert_eq!(fm, None);
        assert_eq!(body, "---\ntitle: x\nbody");

        let (fm, body) = split_front_matter("---\n---\nbody");
        assert_eq!(fm, Some(""));
        assert_eq!(body, "body");
    }

    #[test]
    fn test_hash_bytes_distinguishes_payloads() {
        assert_eq!(hash_bytes(b"abc"), hash_bytes(b"abc"));
        assert_ne!(hash_bytes(b"abc"), hash_bytes(b"abd"));
        assert_eq!(
            hash_bytes(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
