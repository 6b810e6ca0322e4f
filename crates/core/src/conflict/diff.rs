//! Line-level diff.
//!
//! Common prefix and suffix are trimmed first; the remaining middle is
//! aligned with a longest-common-subsequence table. Inputs whose middle
//! would need more than [`MAX_TABLE_CELLS`] cells are treated as one
//! whole-block replacement instead.

use std::collections::BTreeSet;

/// Upper bound on LCS table size (cells of `u32`).
pub const MAX_TABLE_CELLS: usize = 4_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffOp {
    Unchanged,
    Inserted,
    Deleted,
}

/// One line of a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffLine<'a> {
    pub op: DiffOp,
    pub text: &'a str,
}

impl<'a> DiffLine<'a> {
    fn new(op: DiffOp, text: &'a str) -> Self {
        Self { op, text }
    }
}

/// Split on `\n`. The empty string is a single empty line, and a trailing
/// newline yields a trailing empty line, so `join("\n")` restores the input.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}

/// Diff `old` against `new`, line by line.
pub fn diff_lines<'a>(old: &[&'a str], new: &[&'a str]) -> Vec<DiffLine<'a>> {
    let prefix = old
        .iter()
        .zip(new.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &old[prefix..old.len() - suffix];
    let new_mid = &new[prefix..new.len() - suffix];

    let mut out = Vec::with_capacity(old.len().max(new.len()));
    out.extend(old[..prefix].iter().map(|t| DiffLine::new(DiffOp::Unchanged, t)));
    diff_middle(old_mid, new_mid, &mut out);
    out.extend(
        old[old.len() - suffix..]
            .iter()
            .map(|t| DiffLine::new(DiffOp::Unchanged, t)),
    );
    out
}

fn diff_middle<'a>(old: &[&'a str], new: &[&'a str], out: &mut Vec<DiffLine<'a>>) {
    let (m, n) = (old.len(), new.len());
    if m == 0 || n == 0 || (m + 1).saturating_mul(n + 1) > MAX_TABLE_CELLS {
        out.extend(old.iter().map(|t| DiffLine::new(DiffOp::Deleted, t)));
        out.extend(new.iter().map(|t| DiffLine::new(DiffOp::Inserted, t)));
        return;
    }

    // lcs[i * w + j] = LCS length of old[i..] and new[j..]
    let w = n + 1;
    let mut lcs = vec![0u32; (m + 1) * w];
    for i in (0..m).rev() {
        for j in (0..n).rev() {
            lcs[i * w + j] = if old[i] == new[j] {
                lcs[(i + 1) * w + j + 1] + 1
            } else {
                lcs[(i + 1) * w + j].max(lcs[i * w + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if old[i] == new[j] {
            out.push(DiffLine::new(DiffOp::Unchanged, old[i]));
            i += 1;
            j += 1;
        } else if lcs[(i + 1) * w + j] >= lcs[i * w + j + 1] {
            out.push(DiffLine::new(DiffOp::Deleted, old[i]));
            i += 1;
        } else {
            out.push(DiffLine::new(DiffOp::Inserted, new[j]));
            j += 1;
        }
    }
    out.extend(old[i..].iter().map(|t| DiffLine::new(DiffOp::Deleted, t)));
    out.extend(new[j..].iter().map(|t| DiffLine::new(DiffOp::Inserted, t)));
}

// ---------------------------------------------------------------------------
// Edits
// ---------------------------------------------------------------------------

/// A contiguous change against the old document: `old[start..end]` is
/// replaced by `replacement`. `start == end` is a pure insertion before
/// `old[start]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub replacement: Vec<String>,
}

impl Edit {
    /// Line count change this edit causes.
    fn delta(&self) -> isize {
        self.replacement.len() as isize - (self.end - self.start) as isize
    }

    /// 1-based old-document lines this edit touches. A replacement touches
    /// every line it removes; a pure insertion touches the line it is
    /// inserted before (which is one past the end for an append).
    pub fn touched_lines(&self) -> impl Iterator<Item = usize> {
        let last = if self.end > self.start { self.end } else { self.start + 1 };
        self.start + 1..=last
    }
}

/// Collapse a diff into edits, grouping every run of inserted and deleted
/// lines between two unchanged lines into one edit.
pub fn edits(diff: &[DiffLine<'_>]) -> Vec<Edit> {
    let mut out = Vec::new();
    let mut old_idx = 0;
    let mut current: Option<Edit> = None;

    for line in diff {
        match line.op {
            DiffOp::Unchanged => {
                if let Some(edit) = current.take() {
                    out.push(edit);
                }
                old_idx += 1;
            }
            DiffOp::Deleted => {
                let edit = current.get_or_insert_with(|| Edit {
                    start: old_idx,
                    end: old_idx,
                    replacement: Vec::new(),
                });
                old_idx += 1;
                edit.end = old_idx;
            }
            DiffOp::Inserted => {
                current
                    .get_or_insert_with(|| Edit {
                        start: old_idx,
                        end: old_idx,
                        replacement: Vec::new(),
                    })
                    .replacement
                    .push(line.text.to_string());
            }
        }
    }
    if let Some(edit) = current {
        out.push(edit);
    }
    out
}

/// Edits turning `old` into `new`.
pub fn edits_between(old: &[&str], new: &[&str]) -> Vec<Edit> {
    edits(&diff_lines(old, new))
}

/// Union of [`Edit::touched_lines`] over `edits`.
pub fn touched_lines(edits: &[Edit]) -> BTreeSet<usize> {
    edits.iter().flat_map(Edit::touched_lines).collect()
}

/// Apply non-overlapping edits, sorted by `start`, to `old`.
pub fn apply_edits(old: &[&str], edits: &[Edit]) -> Vec<String> {
    let mut out = Vec::with_capacity(old.len());
    let mut pos = 0;
    for edit in edits {
        let start = edit.start.clamp(pos, old.len());
        out.extend(old[pos..start].iter().map(|s| s.to_string()));
        out.extend(edit.replacement.iter().cloned());
        pos = edit.end.clamp(start, old.len());
    }
    out.extend(old[pos..].iter().map(|s| s.to_string()));
    out
}

/// Re-express `later` (edits against the original document) against the
/// document produced by applying `earlier` first. On a position tie the
/// earlier edit's lines come first.
pub fn rebase_edits(later: &[Edit], earlier: &[Edit]) -> Vec<Edit> {
    later
        .iter()
        .map(|edit| {
            let shift: isize = earlier
                .iter()
                .filter(|e| e.end <= edit.start)
                .map(Edit::delta)
                .sum();
            let move_by = |idx: usize| (idx as isize + shift).max(0) as usize;
            Edit {
                start: move_by(edit.start),
                end: move_by(edit.end),
                replacement: edit.replacement.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops(old: &str, new: &str) -> Vec<(DiffOp, String)> {
        let (a, b) = (split_lines(old), split_lines(new));
        diff_lines(&a, &b)
            .into_iter()
            .map(|l| (l.op, l.text.to_string()))
            .collect()
    }

    #[test]
    fn test_split_lines_keeps_trailing_newline() {
        assert_eq!(split_lines(""), vec![""]);
        assert_eq!(split_lines("a\n"), vec!["a", ""]);
        assert_eq!(split_lines("a\nb").join("\n"), "a\nb");
    }

    #[test]
    fn test_diff_single_replacement() {
        assert_eq!(
            ops("A\nB\nC", "A2\nB\nC"),
            vec![
                (DiffOp::Deleted, "A".into()),
                (DiffOp::Inserted, "A2".into()),
                (DiffOp::Unchanged, "B".into()),
                (DiffOp::Unchanged, "C".into()),
            ]
        );
    }

    #[test]
    fn test_diff_finds_common_middle() {
        let result = ops("x\na\nb\ny", "a\nq\nb");
        let unchanged: Vec<_> = result
            .iter()
            .filter(|(op, _)| *op == DiffOp::Unchanged)
            .map(|(_, t)| t.as_str())
            .collect();
        assert_eq!(unchanged, vec!["a", "b"]);
    }

    #[test]
    fn test_edits_group_runs() {
        let old = split_lines("A\nB\nC\nD");
        let new = split_lines("A\nX\nY\nD\nE");
        let e = edits_between(&old, &new);
        assert_eq!(
            e,
            vec![
                Edit { start: 1, end: 3, replacement: vec!["X".into(), "Y".into()] },
                Edit { start: 4, end: 4, replacement: vec!["E".into()] },
            ]
        );
        assert_eq!(touched_lines(&e).into_iter().collect::<Vec<_>>(), vec![2, 3, 5]);
        assert_eq!(apply_edits(&old, &e).join("\n"), "A\nX\nY\nD\nE");
    }

    #[test]
    fn test_pure_insertion_touches_following_line() {
        let old = split_lines("A\nB");
        let new = split_lines("A\nnew\nB");
        let e = edits_between(&old, &new);
        assert_eq!(e.len(), 1);
        assert_eq!(e[0].touched_lines().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn test_rebase_shifts_by_earlier_delta() {
        let base = split_lines("A\nB\nC\nD");
        let first = edits_between(&base, &split_lines("A0\nA1\nB\nC\nD"));
        let second = edits_between(&base, &split_lines("A\nB\nC\nD2"));

        let intermediate = apply_edits(&base, &first);
        let inter_refs: Vec<&str> = intermediate.iter().map(String::as_str).collect();
        let merged = apply_edits(&inter_refs, &rebase_edits(&second, &first));
        assert_eq!(merged.join("\n"), "A0\nA1\nB\nC\nD2");
    }

    #[test]
    fn test_oversized_middle_falls_back_to_block_replace() {
        let old: Vec<String> = (0..3000).map(|i| format!("o{i}")).collect();
        let new: Vec<String> = (0..3000).map(|i| format!("n{i}")).collect();
        let a: Vec<&str> = old.iter().map(String::as_str).collect();
        let b: Vec<&str> = new.iter().map(String::as_str).collect();
        let e = edits_between(&a, &b);
        assert_eq!(e.len(), 1);
        assert_eq!((e[0].start, e[0].end), (0, 3000));
    }
}
