//! Three-way conflict detection and selective auto-merge.
//!
//! Both variants are diffed against the common ancestor independently and
//! each diff is mapped to the set of ancestor lines it touches. Disjoint sets
//! merge automatically; intersecting sets become [`ConflictSection`]s.

use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use super::diff::{apply_edits, edits_between, rebase_edits, split_lines, touched_lines, Edit};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A line range edited by both sides.
///
/// `start..end` are 0-based, end-exclusive offsets into the ancestor's line
/// array. Each text is sliced from its own document by that same range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictSection {
    pub start: usize,
    pub end: usize,
    pub local_text: String,
    pub remote_text: String,
    pub base_text: String,
}

/// Outcome of [`ConflictDetector::detect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    pub success: bool,
    pub merged_content: Option<String>,
    /// Ordered by ascending `start`. Empty on success.
    pub conflicts: Vec<ConflictSection>,
}

impl MergeResult {
    fn merged(content: impl Into<String>) -> Self {
        Self {
            success: true,
            merged_content: Some(content.into()),
            conflicts: Vec::new(),
        }
    }

    fn conflicted(conflicts: Vec<ConflictSection>) -> Self {
        Self {
            success: false,
            merged_content: None,
            conflicts,
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Stateless three-way detector.
pub struct ConflictDetector;

impl ConflictDetector {
    /// Reconcile `local` and `remote`, both derived from `base`.
    ///
    /// Disjoint edits are applied local first, then remote, and the result is
    /// cross-checked against the remote-first order and against the ancestor
    /// lines neither side touched. A failed check reports the whole document
    /// as one conflict.
    pub fn detect(base: &str, local: &str, remote: &str) -> MergeResult {
        if local == remote {
            debug!("local == remote, nothing to reconcile");
            return MergeResult::merged(local);
        }
        if local == base {
            debug!("local unchanged since base, remote wins cleanly");
            return MergeResult::merged(remote);
        }
        if remote == base {
            debug!("remote unchanged since base, local wins cleanly");
            return MergeResult::merged(local);
        }

        let base_lines = split_lines(base);
        let local_lines = split_lines(local);
        let remote_lines = split_lines(remote);

        let local_edits = edits_between(&base_lines, &local_lines);
        let remote_edits = edits_between(&base_lines, &remote_lines);
        let local_touched = touched_lines(&local_edits);
        let remote_touched = touched_lines(&remote_edits);

        let overlap: BTreeSet<usize> = local_touched
            .intersection(&remote_touched)
            .copied()
            .collect();

        if overlap.is_empty() {
            let merged = merge_disjoint(&base_lines, &local_edits, &remote_edits);
            let untouched = |line: &usize| {
                !local_touched.contains(line) && !remote_touched.contains(line)
            };
            if verify(&base_lines, &merged, &local_edits, &remote_edits, untouched) {
                info!(
                    local_edits = local_edits.len(),
                    remote_edits = remote_edits.len(),
                    "auto-merged disjoint edits"
                );
                return MergeResult::merged(merged.join("\n"));
            }
            warn!("merge verification failed, escalating whole document");
            return MergeResult::conflicted(vec![ConflictSection {
                start: 0,
                end: base_lines.len(),
                local_text: local.to_string(),
                remote_text: remote.to_string(),
                base_text: base.to_string(),
            }]);
        }

        let sections: Vec<ConflictSection> = contiguous_runs(&overlap)
            .into_iter()
            .map(|(first, last)| {
                let (start, end) = (first - 1, last);
                ConflictSection {
                    start,
                    end,
                    local_text: slice(&local_lines, start, end),
                    remote_text: slice(&remote_lines, start, end),
                    base_text: slice(&base_lines, start, end),
                }
            })
            .collect();

        info!(sections = sections.len(), "overlapping edits detected");
        MergeResult::conflicted(sections)
    }

    /// Quick check: would `detect` merge without conflicts?
    pub fn can_auto_merge(base: &str, local: &str, remote: &str) -> bool {
        Self::detect(base, local, remote).success
    }
}

/// Single pass over the ancestor applying both edit sets in position order.
/// Ties go to the local edit, matching local-then-remote application.
fn merge_disjoint(base: &[&str], local: &[Edit], remote: &[Edit]) -> Vec<String> {
    let mut all: Vec<(usize, u8, &Edit)> = local
        .iter()
        .map(|e| (e.start, 0u8, e))
        .chain(remote.iter().map(|e| (e.start, 1u8, e)))
        .collect();
    all.sort_by_key(|(start, side, _)| (*start, *side));
    let ordered: Vec<Edit> = all.into_iter().map(|(_, _, e)| e.clone()).collect();
    apply_edits(base, &ordered)
}

/// Post-merge verification.
///
/// 1. Applying remote first then local must give the same document.
/// 2. Every ancestor line untouched by both sides must survive, in order.
fn verify(
    base: &[&str],
    merged: &[String],
    local: &[Edit],
    remote: &[Edit],
    untouched: impl Fn(&usize) -> bool,
) -> bool {
    let after_remote = apply_edits(base, remote);
    let after_remote_refs: Vec<&str> = after_remote.iter().map(String::as_str).collect();
    let remote_first = apply_edits(&after_remote_refs, &rebase_edits(local, remote));
    if remote_first != merged {
        debug!("remote-first application disagrees with merged output");
        return false;
    }

    let mut merged_iter = merged.iter();
    base.iter()
        .enumerate()
        .filter(|(i, _)| untouched(&(i + 1)))
        .all(|(_, line)| merged_iter.any(|m| m == line))
}

/// Group sorted 1-based line numbers into maximal `(first, last)` runs.
fn contiguous_runs(lines: &BTreeSet<usize>) -> Vec<(usize, usize)> {
    let mut runs: Vec<(usize, usize)> = Vec::new();
    for &line in lines {
        match runs.last_mut() {
            Some((_, last)) if *last + 1 == line => *last = line,
            _ => runs.push((line, line)),
        }
    }
    runs
}

/// `lines[start..end]` joined, clamped to the document's length.
fn slice(lines: &[&str], start: usize, end: usize) -> String {
    let end = end.min(lines.len());
    let start = start.min(end);
    lines[start..end].join("\n")
}
