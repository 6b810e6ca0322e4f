//! Conflict detection, auto-merge, and conflict rendering.
//!
//! 1. **Diffing** -- line-level diffs and the edits they imply.
//! 2. **Detection** -- deciding whether two variants of a document can be
//!    merged against their common ancestor.
//! 3. **Rendering** -- the conflict artifact written for manual resolution.

pub mod detector;
pub mod diff;
pub mod render;

pub use detector::{ConflictDetector, ConflictSection, MergeResult};
pub use render::{diff_preview, render_conflict_file};
