//! Human-readable renderings of detection results.

use super::detector::{ConflictSection, MergeResult};

/// Render the conflict artifact (`index.CONFLICT.md`) for an unresolved
/// merge. Sections appear in the order given, each labelled with its
/// 1-based ancestor line range.
pub fn render_conflict_file(slug: &str, result: &MergeResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Conflicts in `{slug}`\n\n"));
    out.push_str(&format!(
        "{} section(s) were edited on both sides since the last sync. \
         Reconcile them in index.md, then run \
         `notesync resolve {slug} --accept local|remote|merged`.\n\n",
        result.conflicts.len()
    ));
    out.push_str("---\n\n");

    for (n, section) in result.conflicts.iter().enumerate() {
        out.push_str(&format!("## Section {} ({})\n\n", n + 1, line_label(section)));
        push_block(&mut out, "Local", &section.local_text);
        push_block(&mut out, "Remote", &section.remote_text);
        push_block(&mut out, "Base", &section.base_text);
        out.push_str("---\n\n");
    }
    out
}

/// `"line N"` or `"lines N-M"` for a section.
pub fn line_label(section: &ConflictSection) -> String {
    let first = section.start + 1;
    let last = section.end.max(first);
    if first == last {
        format!("line {first}")
    } else {
        format!("lines {first}-{last}")
    }
}

fn push_block(out: &mut String, heading: &str, text: &str) {
    let fence = fence_for(text);
    out.push_str(&format!("### {heading}\n\n{fence}\n"));
    out.push_str(text);
    if !text.is_empty() && !text.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&format!("{fence}\n\n"));
}

/// A backtick fence longer than any backtick run inside `text`.
fn fence_for(text: &str) -> String {
    let mut longest = 0;
    let mut run = 0;
    for c in text.chars() {
        if c == '`' {
            run += 1;
            longest = longest.max(run);
        } else {
            run = 0;
        }
    }
    "`".repeat(longest.max(2) + 1)
}

/// Unified diff of `old` against `new`, used for dry-run previews.
pub fn diff_preview(old: &str, new: &str) -> String {
    diffy::create_patch(old, new).to_string()
}
