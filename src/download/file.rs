use std::path::Path;

use futures_util::StreamExt;
use reqwest::Client;
use sha2::{Digest, Sha256};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::error::DownloadError;
use crate::retry::{self, RetryAction, RetryConfig};

/// What landed on disk after a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedFile {
    pub bytes: u64,
    /// Lowercase hex SHA-256 of the content.
    pub sha256: String,
}

pub(crate) fn hex_digest(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Download `url` into `part_path`, retrying transient failures.
///
/// Every attempt truncates the temp file and starts over so the digest
/// always covers exactly one complete transfer. The caller owns the rename
/// into place.
pub async fn download_file(
    client: &Client,
    url: &str,
    part_path: &Path,
    retry_config: &RetryConfig,
) -> Result<DownloadedFile, DownloadError> {
    retry::retry_with_backoff(
        retry_config,
        |e: &DownloadError| {
            if e.is_retryable() {
                RetryAction::Retry
            } else {
                RetryAction::Abort
            }
        },
        || attempt_download(client, url, part_path),
    )
    .await
    .map_err(|exhausted| {
        let _ = std::fs::remove_file(part_path);
        if exhausted.retryable {
            DownloadError::RetriesExhausted {
                attempts: exhausted.attempts,
                path: part_path.display().to_string(),
                last_error: exhausted.error.to_string(),
            }
        } else {
            exhausted.error
        }
    })
}

/// Single download attempt, hashing while streaming.
async fn attempt_download(
    client: &Client,
    url: &str,
    part_path: &Path,
) -> Result<DownloadedFile, DownloadError> {
    let path_str = part_path.display().to_string();
    let response = client.get(url).send().await.map_err(|e| DownloadError::Http {
        source: e,
        path: path_str.clone(),
        bytes_written: 0,
    })?;

    if !response.status().is_success() {
        return Err(DownloadError::HttpStatus {
            status: response.status().as_u16(),
            path: path_str,
        });
    }

    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(part_path)
        .await?;

    // Incremental SHA-256 avoids buffering whole videos in memory.
    let mut hasher = Sha256::new();
    let mut bytes_written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| DownloadError::Http {
            source: e,
            path: path_str.clone(),
            bytes_written,
        })?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        bytes_written += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    drop(file);

    tracing::debug!(path = %path_str, bytes = bytes_written, "transfer complete");
    Ok(DownloadedFile {
        bytes: bytes_written,
        sha256: hex_digest(&hasher.finalize()),
    })
}

/// Remove a leftover temp file, ignoring "not found".
pub async fn discard_part(part_path: &Path) {
    match fs::remove_file(part_path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Could not remove {}: {}", part_path.display(), e),
    }
}
