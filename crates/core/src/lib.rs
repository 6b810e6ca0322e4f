//! notesync core library.
//!
//! Keeps a local markdown article and its remote HTML counterpart in step:
//! content fingerprints, an advisory edit lock, line-level three-way conflict
//! detection, a content-addressed image store, and the per-article sync
//! engine that ties them together.

pub mod article;
pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod hasher;
pub mod images;
pub mod lock;
pub mod meta;
pub mod models;
pub mod remote;
pub mod sync_engine;

// Re-exports for convenience.
pub use config::AppConfig;
pub use db::Database;
pub use errors::{CoreError, Severity, SyncError};
pub use hasher::{fingerprint, Fingerprint};
pub use meta::{JsonMetaStore, MetaStore};
pub use sync_engine::{SyncEngine, SyncOptions, SyncOutcome};
