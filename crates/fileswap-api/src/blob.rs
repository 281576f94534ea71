use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use fileswap_types::SwapRecord;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tokio_util::io::ReaderStream;
use tracing::{info, warn};

/// Public path prefix of locally stored blobs.
pub const LOCAL_PREFIX: &str = "/uploads/";

const MAX_NAME_LEN: usize = 200;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Invalid blob locator: {0}")]
    InvalidLocator(String),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Blob service rejected request: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// An opened blob, ready to be streamed back to a client.
pub struct BlobDownload {
    pub stream: ByteStream,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
}

/// Where uploaded bytes live. Records only ever hold the locator returned by
/// [`BlobSink::store`].
#[async_trait]
pub trait BlobSink: Send + Sync {
    /// Store `data` under a fresh `key` and return its locator.
    async fn store(&self, key: &str, filename: &str, data: Bytes) -> BlobResult<String>;

    async fn open(&self, locator: &str) -> BlobResult<BlobDownload>;

    /// Remove a blob. Removing a missing blob succeeds.
    async fn delete(&self, locator: &str) -> BlobResult<()>;

    /// Directory to expose read-only under `/uploads`, if any.
    fn public_dir(&self) -> Option<&Path> {
        None
    }

    fn backend(&self) -> &'static str;
}

/// Reduce a client-supplied file name to something safe to embed in a path
/// or URL segment.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_NAME_LEN)
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "file".to_string()
    } else {
        cleaned.to_string()
    }
}

/// Best-effort blob removal; failures only log.
pub async fn discard_blob(blobs: &dyn BlobSink, locator: &str) {
    if let Err(e) = blobs.delete(locator).await {
        warn!("Failed to delete blob {}: {}", locator, e);
    }
}

/// Best-effort removal of every blob a swap references.
pub async fn discard_record_blobs(blobs: &dyn BlobSink, record: &SwapRecord) {
    for file in [&record.file1, &record.file2].into_iter().flatten() {
        discard_blob(blobs, &file.locator).await;
    }
}

// ── Local directory ────────────────────────────────────────────────────

/// Blobs as flat files `{dir}/{key}_{name}`, addressed as `/uploads/{key}_{name}`.
pub struct LocalBlobSink {
    dir: PathBuf,
}

impl LocalBlobSink {
    pub async fn new(dir: PathBuf) -> BlobResult<Self> {
        fs::create_dir_all(&dir).await?;
        info!("Blob directory: {}", dir.display());
        Ok(Self { dir })
    }

    /// Resolve a locator to a path inside the blob directory.
    fn file_path(&self, locator: &str) -> BlobResult<PathBuf> {
        let name = locator
            .strip_prefix(LOCAL_PREFIX)
            .ok_or_else(|| BlobError::InvalidLocator(locator.to_string()))?;
        if name.is_empty()
            || name.starts_with('.')
            || name.contains(['/', '\\'])
            || name.contains('\0')
        {
            return Err(BlobError::InvalidLocator(locator.to_string()));
        }
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl BlobSink for LocalBlobSink {
    async fn store(&self, key: &str, filename: &str, data: Bytes) -> BlobResult<String> {
        let name = format!("{}_{}", key, sanitize_filename(filename));
        fs::write(self.dir.join(&name), &data).await?;
        info!("Stored blob {} ({} bytes)", name, data.len());
        Ok(format!("{}{}", LOCAL_PREFIX, name))
    }

    async fn open(&self, locator: &str) -> BlobResult<BlobDownload> {
        let path = self.file_path(locator)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(BlobError::NotFound(locator.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        let len = file.metadata().await?.len();

        Ok(BlobDownload {
            stream: Box::pin(ReaderStream::new(file)),
            content_type: None,
            content_length: Some(len),
        })
    }

    async fn delete(&self, locator: &str) -> BlobResult<()> {
        let path = self.file_path(locator)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted blob {}", locator);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("Blob {} already gone", locator);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn public_dir(&self) -> Option<&Path> {
        Some(&self.dir)
    }

    fn backend(&self) -> &'static str {
        "local"
    }
}

// ── Hosted blob service ────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct PutBlobResponse {
    url: String,
}

/// Blobs on an HTTP blob service. Uploads are `PUT {endpoint}/{key}/{name}`
/// with a bearer token; the service answers with the public URL, which is the
/// locator.
///
/// Locators are only fetched or deleted when their host is the public host or
/// one of its subdomains. It defaults to the endpoint's own host.
pub struct HostedBlobSink {
    client: reqwest::Client,
    endpoint: String,
    token: String,
    public_host: String,
}

impl HostedBlobSink {
    pub fn new(endpoint: &str, token: impl Into<String>) -> BlobResult<Self> {
        let public_host = reqwest::Url::parse(endpoint)
            .ok()
            .and_then(|url| url.host_str().map(str::to_ascii_lowercase))
            .ok_or_else(|| BlobError::InvalidLocator(endpoint.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            token: token.into(),
            public_host,
        })
    }

    /// Serve locators from `host` (and its subdomains) instead of the
    /// endpoint's host.
    pub fn with_public_host(mut self, host: &str) -> Self {
        self.public_host = host.trim().trim_end_matches('.').to_ascii_lowercase();
        self
    }

    fn is_public_host(&self, host: &str) -> bool {
        host == self.public_host
            || host
                .strip_suffix(self.public_host.as_str())
                .is_some_and(|sub| sub.ends_with('.'))
    }

    fn parse_locator(&self, locator: &str) -> BlobResult<reqwest::Url> {
        let url = reqwest::Url::parse(locator)
            .map_err(|_| BlobError::InvalidLocator(locator.to_string()))?;
        let host_ok = url.host_str().is_some_and(|host| self.is_public_host(host));
        match url.scheme() {
            "http" | "https" if host_ok => Ok(url),
            _ => Err(BlobError::InvalidLocator(locator.to_string())),
        }
    }
}

#[async_trait]
impl BlobSink for HostedBlobSink {
    async fn store(&self, key: &str, filename: &str, data: Bytes) -> BlobResult<String> {
        let name = sanitize_filename(filename);
        let size = data.len();
        let resp = self
            .client
            .put(format!("{}/{}/{}", self.endpoint, key, name))
            .bearer_auth(&self.token)
            .header("x-api-version", "7")
            .body(data)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!("Blob upload of {} failed ({}): {}", name, status, body);
            return Err(BlobError::Rejected(format!("upload returned {}", status)));
        }

        let put: PutBlobResponse = resp.json().await?;
        if self.parse_locator(&put.url).is_err() {
            warn!("Blob service returned {} outside {}", put.url, self.public_host);
            return Err(BlobError::Rejected(format!("unexpected blob url {}", put.url)));
        }
        info!("Stored blob {} ({} bytes)", put.url, size);
        Ok(put.url)
    }

    async fn open(&self, locator: &str) -> BlobResult<BlobDownload> {
        let url = self.parse_locator(locator)?;
        let resp = self.client.get(url).send().await?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::NotFound(locator.to_string()));
        }
        if !status.is_success() {
            return Err(BlobError::Rejected(format!("fetch returned {}", status)));
        }

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = resp.content_length();
        let stream = resp.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other));

        Ok(BlobDownload {
            stream: Box::pin(stream),
            content_type,
            content_length,
        })
    }

    async fn delete(&self, locator: &str) -> BlobResult<()> {
        self.parse_locator(locator)?;
        let resp = self
            .client
            .post(format!("{}/delete", self.endpoint))
            .bearer_auth(&self.token)
            .header("x-api-version", "7")
            .json(&serde_json::json!({ "urls": [locator] }))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() && status != reqwest::StatusCode::NOT_FOUND {
            return Err(BlobError::Rejected(format!("delete returned {}", status)));
        }
        info!("Deleted blob {}", locator);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "hosted"
    }
}
