use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::redirect::Policy;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const MAX_REDIRECTS: usize = 10;

/// Download `url` to `output_path`, following redirects.
///
/// Self-signed certificates are only accepted for `https://localhost:` URLs.
/// A partially written file is removed if the transfer fails.
pub async fn download_file(url: &str, output_path: &Path) -> Result<u64> {
    let client = reqwest::Client::builder()
        .redirect(Policy::limited(MAX_REDIRECTS))
        .danger_accept_invalid_certs(accepts_self_signed(url))
        .build()
        .context("Failed to build HTTP client")?;

    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to request {}", url))?;

    if response.url().as_str() != url {
        debug!(from = %url, to = %response.url(), "Followed redirect");
    }

    if response.status() != StatusCode::OK {
        bail!("Failed to download file: Status code {}", response.status().as_u16());
    }

    match write_body(response, output_path).await {
        Ok(bytes) => {
            info!(url = %url, path = %output_path.display(), bytes, "File downloaded");
            Ok(bytes)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(output_path).await;
            Err(e)
        }
    }
}

async fn write_body(mut response: reqwest::Response, output_path: &Path) -> Result<u64> {
    if let Some(parent) = output_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = tokio::fs::File::create(output_path)
        .await
        .with_context(|| format!("Failed to create {}", output_path.display()))?;

    let mut written = 0u64;
    while let Some(chunk) = response.chunk().await? {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}

fn accepts_self_signed(url: &str) -> bool {
    url.starts_with("https://localhost:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_signed_only_for_localhost() {
        assert!(accepts_self_signed("https://localhost:8443/file.bin"));
        assert!(!accepts_self_signed("https://example.com/file.bin"));
        assert!(!accepts_self_signed("https://localhost.evil.com:443/x"));
    }

    #[tokio::test]
    async fn test_download_from_unreachable_host_fails_without_leaving_file() {
        let temp = tempfile::tempdir().unwrap();
        let out = temp.path().join("file.bin");

        let result = download_file("http://127.0.0.1:9/file.bin", &out).await;

        assert!(result.is_err());
        assert!(!out.exists());
    }
}
