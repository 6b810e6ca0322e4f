//! Conflict listing and resolution.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use notesync_core::models::ConflictResolution;
use notesync_core::sync_engine::SyncEngine;

use crate::style;

/// List conflict records for one article.
pub fn run_list(engine: &SyncEngine, slug: &str) -> Result<()> {
    let conflicts = engine
        .conflicts(slug)
        .with_context(|| format!("failed to read conflicts of '{slug}'"))?;

    if conflicts.is_empty() {
        println!();
        println!("{}", style::success("No conflicts recorded"));
        println!();
        return Ok(());
    }

    let open = conflicts.iter().filter(|c| c.resolution.is_none()).count();
    println!();
    println!(
        "{}",
        style::header(&format!("Conflicts in {slug} ({open} open, {} total)", conflicts.len()))
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["ID", "Detected", "Local", "Remote", "Resolution"]);

    for c in &conflicts {
        let id_short = c.id.get(..8).unwrap_or(&c.id);
        table.add_row(vec![
            Cell::new(id_short),
            Cell::new(c.detected_at.format("%Y-%m-%d %H:%M").to_string()),
            Cell::new(c.local_hash.short()),
            Cell::new(c.remote_hash.short()),
            Cell::new(
                c.resolution
                    .map(|r| r.to_string())
                    .unwrap_or_else(|| "open".into()),
            ),
        ]);
    }

    println!("{table}");
    if open > 0 {
        let artifact = engine.files(slug).conflict_path();
        println!();
        println!("  Details: {}", artifact.display());
    }
    println!();
    Ok(())
}

/// Resolve every open conflict of an article.
pub fn run_resolve(engine: &SyncEngine, slug: &str, accept: &str) -> Result<()> {
    let resolution: ConflictResolution = accept.parse()?;
    let count = engine
        .resolve(slug, resolution)
        .with_context(|| format!("failed to resolve conflicts of '{slug}'"))?;

    println!(
        "{}",
        style::success(&format!("{count} conflict(s) in {slug} resolved (accepted {resolution})"))
    );
    let hint = match resolution {
        ConflictResolution::Remote => format!("Next: notesync pull {slug}"),
        ConflictResolution::Local | ConflictResolution::Merged => format!("Next: notesync push {slug}"),
    };
    println!("{}", style::dim(&hint));
    Ok(())
}
