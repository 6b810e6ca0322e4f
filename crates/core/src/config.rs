//! TOML-based configuration for notesync.
//!
//! Sensitive values (the remote session cookie) are stored as `_env` fields
//! that reference environment variable names. The actual secrets are
//! resolved at runtime via [`AppConfig::resolve_env_vars`].

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level application configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Workspace layout and logging.
    #[serde(default)]
    pub workspace: WorkspaceConfig,

    /// Remote content service settings.
    #[serde(default)]
    pub remote: RemoteConfig,

    /// Sync behaviour settings.
    #[serde(default)]
    pub sync: SyncConfig,
}

// ---------------------------------------------------------------------------
// Workspace
// ---------------------------------------------------------------------------

/// Where articles, images and the database live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Directory containing one sub-directory per article.
    #[serde(default = "default_articles_dir")]
    pub articles_dir: PathBuf,

    /// Directory for the SQLite database.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Content-addressed image storage root.
    #[serde(default = "default_images_dir")]
    pub images_dir: PathBuf,

    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional log file; stderr only when unset.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

fn default_articles_dir() -> PathBuf {
    PathBuf::from("articles")
}
fn default_data_dir() -> PathBuf {
    PathBuf::from(".notesync")
}
fn default_images_dir() -> PathBuf {
    PathBuf::from("assets/images")
}
fn default_log_level() -> String {
    "warn".into()
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            articles_dir: default_articles_dir(),
            data_dir: default_data_dir(),
            images_dir: default_images_dir(),
            log_level: default_log_level(),
            log_file: None,
        }
    }
}

impl WorkspaceConfig {
    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("notesync.db")
    }

    /// Directory of a single article.
    pub fn article_dir(&self, slug: &str) -> PathBuf {
        self.articles_dir.join(slug)
    }

    /// Re-root every relative path under `root`.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        for path in [
            &mut self.articles_dir,
            &mut self.data_dir,
            &mut self.images_dir,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
        if let Some(log_file) = self.log_file.as_mut() {
            if log_file.is_relative() {
                *log_file = root.join(&*log_file);
            }
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Remote service
// ---------------------------------------------------------------------------

/// Remote content service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Base URL of the HTTP wrapper around the content service.
    #[serde(default = "default_remote_url")]
    pub base_url: String,

    /// Environment variable holding the session cookie, if the service
    /// needs one for image downloads.
    #[serde(default = "default_cookie_env")]
    pub session_cookie_env: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Resolved session cookie (populated by `resolve_env_vars`).
    #[serde(skip)]
    pub session_cookie: Option<String>,
}

fn default_remote_url() -> String {
    "http://127.0.0.1:3000".into()
}
fn default_cookie_env() -> String {
    "NOTE_SESSION_COOKIE".into()
}
fn default_timeout() -> u64 {
    30
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_remote_url(),
            session_cookie_env: default_cookie_env(),
            timeout_secs: default_timeout(),
            session_cookie: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Sync behaviour
// ---------------------------------------------------------------------------

/// Sync behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Minutes after which an edit lock is treated as abandoned.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_minutes: i64,

    /// Name recorded as `locked_by` and in the audit log. Defaults to `$USER`.
    #[serde(default)]
    pub editor: Option<String>,

    /// Environment variable consulted for the source commit before falling
    /// back to the enclosing git repository's HEAD.
    #[serde(default = "default_source_commit_env")]
    pub source_commit_env: String,
}

fn default_lock_ttl() -> i64 {
    10
}
fn default_source_commit_env() -> String {
    "GITHUB_SHA".into()
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            lock_ttl_minutes: default_lock_ttl(),
            editor: None,
            source_commit_env: default_source_commit_env(),
        }
    }
}

impl SyncConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::minutes(self.lock_ttl_minutes)
    }

    /// The configured editor name, or `$USER`, or `"system"`.
    pub fn editor_name(&self) -> String {
        self.editor
            .clone()
            .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
            .unwrap_or_else(|| "system".to_string())
    }
}

// ---------------------------------------------------------------------------
// Loading & resolving
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Load an [`AppConfig`] from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Resolve all `*_env` fields from environment variables.
    pub fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        self.remote.session_cookie =
            resolve_optional_env(&self.remote.session_cookie_env, "remote.session_cookie_env");
        Ok(())
    }

    /// Validate that all fields are sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.base_url.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "remote.base_url".into(),
                detail: "remote base URL must not be empty".into(),
            });
        }
        if !self.remote.base_url.starts_with("http://")
            && !self.remote.base_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                field: "remote.base_url".into(),
                detail: "remote base URL must start with http:// or https://".into(),
            });
        }
        if self.remote.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "remote.timeout_secs".into(),
                detail: "timeout must be > 0".into(),
            });
        }
        if self.sync.lock_ttl_minutes <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "sync.lock_ttl_minutes".into(),
                detail: "lock TTL must be > 0".into(),
            });
        }
        if self.workspace.articles_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "workspace.articles_dir".into(),
                detail: "articles directory must not be empty".into(),
            });
        }
        Ok(())
    }

    /// Load, resolve, and validate in one call. Without a file the
    /// built-in defaults go through the same resolution and checks.
    pub fn load_and_resolve(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.resolve_env_vars()?;
        config.validate()?;
        Ok(config)
    }

    /// Generate a default TOML config template string.
    pub fn default_template() -> &'static str {
        r#"# notesync configuration

[workspace]
articles_dir = "articles"
data_dir = ".notesync"
images_dir = "assets/images"
log_level = "warn"
# log_file = ".notesync/notesync.log"

[remote]
base_url = "http://127.0.0.1:3000"
session_cookie_env = "NOTE_SESSION_COOKIE"
timeout_secs = 30

[sync]
lock_ttl_minutes = 10
# editor = "your-name"         # defaults to $USER
source_commit_env = "GITHUB_SHA"
"#
    }
}

/// Try to read an environment variable by name.
fn resolve_optional_env(env_name: &str, field: &str) -> Option<String> {
    match std::env::var(env_name) {
        Ok(val) if !val.is_empty() => {
            debug!(field, env_name, "resolved env var");
            Some(val)
        }
        Ok(_) => {
            warn!(field, env_name, "env var is set but empty");
            None
        }
        Err(_) => {
            debug!(field, env_name, "env var not set");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_is_valid() {
        let config = AppConfig::parse(AppConfig::default_template()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.sync.lock_ttl_minutes, 10);
        assert_eq!(config.remote.base_url, "http://127.0.0.1:3000");
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.workspace.articles_dir, PathBuf::from("articles"));
        assert_eq!(config.sync.lock_ttl(), Duration::minutes(10));
        assert_eq!(config.sync.source_commit_env, "GITHUB_SHA");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notesync.toml");
        std::fs::write(&path, "[sync]\nlock_ttl_minutes = 3\neditor = \"alex\"\n").unwrap();
        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.sync.lock_ttl_minutes, 3);
        assert_eq!(config.sync.editor_name(), "alex");
    }

    #[test]
    fn test_load_and_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notesync.toml");
        std::fs::write(&path, "[sync]\nlock_ttl_minutes = 0\n").unwrap();
        let result = AppConfig::load_and_resolve(Some(&path));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let config = AppConfig::load_and_resolve(None).unwrap();
        assert_eq!(config.sync.lock_ttl_minutes, 10);
    }

    #[test]
    fn test_file_not_found() {
        let result = AppConfig::load_from_file("/nonexistent/notesync.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_parse_error() {
        let result = AppConfig::parse("[sync\nlock_ttl_minutes = ");
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_validate_rejects_zero_ttl() {
        let mut config = AppConfig::default();
        config.sync.lock_ttl_minutes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut config = AppConfig::default();
        config.remote.base_url = "ftp://x".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rooted_at_keeps_absolute_paths() {
        let ws = WorkspaceConfig {
            images_dir: PathBuf::from("/srv/images"),
            ..Default::default()
        }
        .rooted_at(Path::new("/home/me/blog"));
        assert_eq!(ws.articles_dir, PathBuf::from("/home/me/blog/articles"));
        assert_eq!(ws.images_dir, PathBuf::from("/srv/images"));
        assert_eq!(ws.database_path(), PathBuf::from("/home/me/blog/.notesync/notesync.db"));
    }
}
