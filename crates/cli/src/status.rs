//! `status` and `check-all` output.

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use notesync_core::sync_engine::{ArticleHealth, SyncEngine};

use crate::style;

/// Print the offline status of one article.
pub fn run_status(engine: &SyncEngine, slug: &str) -> Result<()> {
    let report = engine
        .status(slug)
        .with_context(|| format!("failed to read status of '{slug}'"))?;

    println!();
    println!("{}", style::header(&format!("{} ({})", report.title, report.slug)));
    println!("{}", "═".repeat(report.title.len() + report.slug.len() + 3));
    println!();
    println!("  Status        : {}", report.status);
    println!("  Version       : {}", report.version);
    println!("  Editing on    : {}", report.location);
    println!(
        "  Locked by     : {}",
        report.locked_by.as_deref().unwrap_or("—")
    );
    match report.lock_remaining_minutes {
        Some(min) => println!("  Lock expires  : in {min} min"),
        None => println!("  Lock expires  : {}", style::dim("expired or unlocked")),
    }
    println!(
        "  Local hash    : {}",
        report
            .current_local
            .as_ref()
            .map(|f| f.short().to_string())
            .unwrap_or_else(|| "—".into())
    );
    println!(
        "  Synced hashes : local {} / remote {}",
        report.stored_local.as_ref().map(|f| f.short()).unwrap_or("—"),
        report.stored_remote.as_ref().map(|f| f.short()).unwrap_or("—"),
    );
    println!(
        "  Last push     : {}",
        report
            .last_push
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".into())
    );
    println!(
        "  Last pull     : {}",
        report
            .last_pull
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".into())
    );
    println!();

    if report.open_conflicts > 0 {
        println!(
            "{}",
            style::error(&format!(
                "{} open conflict(s); see 'notesync conflicts {}'",
                report.open_conflicts, report.slug
            ))
        );
    } else if report.local_changed {
        println!("{}", style::warn("Local changes not yet pushed"));
    } else {
        println!("{}", style::success("In sync with last recorded state"));
    }
    println!();
    Ok(())
}

/// Print a health table for every article matching `pattern`.
/// Returns `true` when any article needs attention.
pub fn run_check_all(engine: &SyncEngine, pattern: Option<&str>) -> Result<bool> {
    let rows = engine.check_all(pattern).context("failed to scan articles")?;

    if rows.is_empty() {
        println!("No articles found.");
        return Ok(false);
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Article", "State"]);

    let mut attention = 0;
    for (slug, health) in &rows {
        if matches!(
            health,
            ArticleHealth::ConflictsPending(_) | ArticleHealth::Error(_)
        ) {
            attention += 1;
        }
        table.add_row(vec![Cell::new(slug), Cell::new(style::health(health))]);
    }

    println!();
    println!("{table}");
    println!();
    if attention > 0 {
        println!(
            "{}",
            style::warn(&format!("{attention} of {} article(s) need attention", rows.len()))
        );
    } else {
        println!("{}", style::success(&format!("{} article(s) checked", rows.len())));
    }
    Ok(attention > 0)
}
