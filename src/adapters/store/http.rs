use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Body, StatusCode};
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::{debug, warn};

use super::{ObjectStore, UploadProgress, ensure_keys};

/// Bytes between progress reports on streamed uploads.
const PROGRESS_STEP: u64 = 5 * 1024 * 1024;

/// Turns streamed chunk sizes into stepped `(uploaded, total)` reports.
struct ProgressCounter {
    sent: u64,
    reported: u64,
    total: u64,
    step: u64,
    progress: UploadProgress,
}

impl ProgressCounter {
    fn new(total: u64, step: u64, progress: UploadProgress) -> Self {
        Self {
            sent: 0,
            reported: 0,
            total,
            step,
            progress,
        }
    }

    fn advance(&mut self, bytes: u64) {
        self.sent += bytes;
        let finished = self.sent >= self.total && self.sent > self.reported;
        if finished || self.sent - self.reported >= self.step {
            self.reported = self.sent;
            (self.progress)(self.sent, self.total);
        }
    }
}

/// Object store reached over plain HTTP verbs at `{endpoint}/{bucket}/{key}`.
///
/// Works against S3-compatible gateways that accept unsigned requests
/// (MinIO with an anonymous policy, pre-authorised proxies).
pub struct HttpObjectStore {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpObjectStore {
    pub fn new(endpoint: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: Option<UploadProgress>,
    ) -> Result<()> {
        let url = self.url(bucket, key);
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let len = file.metadata().await?.len();

        let mut counter = progress.map(|p| ProgressCounter::new(len, PROGRESS_STEP, p));
        let stream = ReaderStream::new(file).map(move |chunk| {
            if let (Ok(bytes), Some(counter)) = (&chunk, counter.as_mut()) {
                counter.advance(bytes.len() as u64);
            }
            chunk
        });

        self.client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(Body::wrap_stream(stream))
            .send()
            .await
            .with_context(|| format!("PUT {} failed", url))?
            .error_for_status()
            .with_context(|| format!("PUT {} rejected", url))?;

        debug!(url = %url, bytes = len, "Uploaded file");
        Ok(())
    }

    fn url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            bucket,
            key.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let url = self.url(bucket, key);
        let bytes = body.len();

        self.client
            .put(&url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .with_context(|| format!("PUT {} failed", url))?
            .error_for_status()
            .with_context(|| format!("PUT {} rejected", url))?;

        debug!(url = %url, bytes, "Uploaded object");
        Ok(())
    }

    async fn put_file(&self, bucket: &str, key: &str, path: &Path) -> Result<()> {
        self.upload_file(bucket, key, path, None).await
    }

    async fn put_file_with_progress(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        progress: UploadProgress,
    ) -> Result<()> {
        self.upload_file(bucket, key, path, Some(progress)).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let url = self.url(bucket, key);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response
            .error_for_status()
            .with_context(|| format!("GET {} rejected", url))?
            .bytes()
            .await?;
        Ok(Some(body.to_vec()))
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<bool> {
        let url = self.url(bucket, key);
        let response = self
            .client
            .head(&url)
            .send()
            .await
            .with_context(|| format!("HEAD {} failed", url))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => bail!("HEAD {} returned {}", url, status),
        }
    }

    async fn delete_many(&self, bucket: &str, keys: &[String]) -> Result<()> {
        ensure_keys(keys)?;

        let mut failed = Vec::new();
        for key in keys {
            let url = self.url(bucket, key);
            let result = self
                .client
                .delete(&url)
                .send()
                .await
                .and_then(|r| r.error_for_status());

            match result {
                Ok(_) => debug!(url = %url, "Deleted object"),
                Err(e) if e.status() == Some(StatusCode::NOT_FOUND) => {}
                Err(e) => {
                    warn!(url = %url, error = %e, "Error deleting object");
                    failed.push(key.clone());
                }
            }
        }

        if !failed.is_empty() {
            bail!("Failed to delete {} of {} keys: {}", failed.len(), keys.len(), failed.join(", "));
        }
        Ok(())
    }
}
