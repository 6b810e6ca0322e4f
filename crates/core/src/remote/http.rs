//! HTTP client for the remote content service wrapper.

use async_trait::async_trait;
use base64::Engine as _;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, USER_AGENT};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::{ImageTransfer, RemoteDocument, RemoteTransport, UpdateReceipt};
use crate::config::RemoteConfig;
use crate::errors::TransportError;

#[derive(Debug, Serialize)]
struct DocumentRequest<'a> {
    note_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct DocumentResponse {
    #[serde(default)]
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    updated_at: String,
}

#[derive(Debug, Serialize)]
struct UpdateRequest<'a> {
    note_id: &'a str,
    title: &'a str,
    html: &'a str,
    images: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct UpdateResponse {
    #[serde(default = "default_true")]
    success: bool,
    #[serde(default)]
    revision: String,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize)]
struct UploadRequest<'a> {
    filename: &'a str,
    content_type: &'a str,
    /// Base64-encoded bytes.
    data: String,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    url: String,
}

/// Asynchronous client for the service's JSON wrapper API.
#[derive(Clone)]
pub struct HttpNoteClient {
    http: reqwest::Client,
    base_url: String,
    session_cookie: Option<String>,
}

impl HttpNoteClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, TransportError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("notesync/0.1"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()?;
        info!(base_url = %base_url, "created HttpNoteClient");
        Ok(Self {
            http,
            base_url,
            session_cookie: config.session_cookie.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, endpoint);
        let resp = self.http.post(&url).json(body).send().await.map_err(|e| {
            if e.is_connect() {
                TransportError::Unavailable(self.base_url.clone())
            } else {
                TransportError::Http(e)
            }
        })?;
        let resp = check_response(endpoint, resp).await?;
        let text = resp.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| TransportError::Parse(format!("{endpoint}: {e}")))
    }

    async fn get_document(&self, endpoint: &str, id: &str) -> Result<RemoteDocument, TransportError> {
        let doc: DocumentResponse = self.post_json(endpoint, &DocumentRequest { note_id: id }).await?;
        debug!(id, endpoint, bytes = doc.body.len(), "fetched document");
        Ok(RemoteDocument {
            title: doc.title,
            body: doc.body,
            updated_at: doc.updated_at,
        })
    }
}

async fn check_response(
    endpoint: &str,
    resp: reqwest::Response,
) -> Result<reqwest::Response, TransportError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(TransportError::Api {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl RemoteTransport for HttpNoteClient {
    #[instrument(skip(self))]
    async fn fetch(&self, id: &str) -> Result<RemoteDocument, TransportError> {
        self.get_document("/api/draft/get", id).await
    }

    #[instrument(skip(self))]
    async fn fetch_published(&self, id: &str) -> Result<RemoteDocument, TransportError> {
        self.get_document("/api/published/get", id).await
    }

    #[instrument(skip(self, body))]
    async fn update(&self, id: &str, title: &str, body: &str) -> Result<UpdateReceipt, TransportError> {
        let endpoint = "/api/draft/update";
        let request = UpdateRequest {
            note_id: id,
            title,
            html: body,
            images: Vec::new(),
        };
        let resp: UpdateResponse = self.post_json(endpoint, &request).await?;
        if !resp.success {
            return Err(TransportError::Api {
                endpoint: endpoint.to_string(),
                status: 200,
                body: "service reported success=false".into(),
            });
        }
        info!(id, revision = %resp.revision, "updated remote draft");
        Ok(UpdateReceipt {
            revision: resp.revision,
        })
    }
}

#[async_trait]
impl ImageTransfer for HttpNoteClient {
    #[instrument(skip(self, bytes))]
    async fn upload(
        &self,
        bytes: &[u8],
        content_type: &str,
        filename: &str,
    ) -> Result<String, TransportError> {
        let request = UploadRequest {
            filename,
            content_type,
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        };
        let resp: UploadResponse = self.post_json("/api/image/upload", &request).await?;
        debug!(filename, url = %resp.url, "uploaded image");
        Ok(resp.url)
    }

    #[instrument(skip(self))]
    async fn download(&self, url: &str) -> Result<Vec<u8>, TransportError> {
        let mut req = self.http.get(url);
        if let Some(cookie) = &self.session_cookie {
            req = req.header(COOKIE, cookie);
        }
        let resp = check_response(url, req.send().await?).await?;
        let bytes = resp.bytes().await?;
        debug!(url, bytes = bytes.len(), "downloaded image");
        Ok(bytes.to_vec())
    }
}
