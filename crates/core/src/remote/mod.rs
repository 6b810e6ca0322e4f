//! Collaborators the sync engine talks to.
//!
//! The engine never reaches for a global client: every collaborator is a
//! trait object handed to [`crate::sync_engine::SyncEngine`], so tests can
//! substitute in-process doubles.

pub mod http;
pub mod render;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::TransportError;

pub use http::HttpNoteClient;
pub use render::MarkdownRenderer;

/// A document as held by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDocument {
    pub title: String,
    /// HTML body.
    pub body: String,
    /// Opaque last-modified marker reported by the service.
    pub updated_at: String,
}

/// Acknowledgement of a remote update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReceipt {
    pub revision: String,
}

/// Remote document fetch / update.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Fetch the current draft.
    async fn fetch(&self, id: &str) -> Result<RemoteDocument, TransportError>;

    /// Fetch the published version. Services without a separate published
    /// view return the draft.
    async fn fetch_published(&self, id: &str) -> Result<RemoteDocument, TransportError> {
        self.fetch(id).await
    }

    /// Replace the draft's title and HTML body.
    async fn update(&self, id: &str, title: &str, body: &str) -> Result<UpdateReceipt, TransportError>;
}

/// Image upload / download.
#[async_trait]
pub trait ImageTransfer: Send + Sync {
    /// Upload image bytes, returning the URL the service serves them at.
    async fn upload(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, TransportError>;

    async fn download(&self, url: &str) -> Result<Vec<u8>, TransportError>;
}

/// Markdown <-> HTML conversion. Pure, no side effects.
pub trait Renderer: Send + Sync {
    fn to_remote(&self, markdown: &str) -> String;
    fn to_local(&self, html: &str) -> String;
}
