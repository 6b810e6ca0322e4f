//! Shared styling helpers for CLI output.

use console::Style;

use notesync_core::models::SyncDirection;
use notesync_core::sync_engine::ArticleHealth;

/// Success line (green check).
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Error line (red cross).
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

/// Warning line (yellow).
pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// Direction label: push in blue, pull in green.
pub fn direction(direction: SyncDirection) -> String {
    match direction {
        SyncDirection::Push => Style::new().blue().bold().apply_to("local → remote").to_string(),
        SyncDirection::Pull => Style::new().green().bold().apply_to("remote → local").to_string(),
    }
}

/// Colored health cell for `check-all`.
pub fn health(health: &ArticleHealth) -> String {
    let style = match health {
        ArticleHealth::Synced => Style::new().green(),
        ArticleHealth::Diverged => Style::new().cyan(),
        ArticleHealth::Locked { .. } => Style::new().yellow(),
        ArticleHealth::ConflictsPending(_) | ArticleHealth::Error(_) => Style::new().red(),
        ArticleHealth::NotInitialized => Style::new().dim(),
    };
    style.apply_to(health.to_string()).to_string()
}
