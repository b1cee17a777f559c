//! Asset transfer: fetching one rendition into a temp file and the small
//! filesystem helpers the executor needs around it.

pub mod error;
pub mod file;
pub mod paths;

use std::fs::FileTimes;
use std::io::IsTerminal;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::Client;

use crate::retry::RetryConfig;

pub use error::DownloadError;
pub use file::DownloadedFile;

/// Something that can fetch a URL into a local temp file.
///
/// The executor only talks to this trait, so tests swap in an in-memory
/// fake instead of a CDN.
#[async_trait]
pub trait AssetDownloader: Send + Sync {
    async fn download(&self, url: &str, part_path: &Path) -> Result<DownloadedFile, DownloadError>;
}

/// Production downloader streaming over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    retry: RetryConfig,
}

impl HttpDownloader {
    pub fn new(client: Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }
}

#[async_trait]
impl AssetDownloader for HttpDownloader {
    async fn download(&self, url: &str, part_path: &Path) -> Result<DownloadedFile, DownloadError> {
        file::download_file(&self.client, url, part_path, &self.retry).await
    }
}

/// Build the client used for media transfers.
///
/// `timeout` bounds connecting and each read, not the whole body, so a
/// large video keeps going for as long as bytes keep arriving.
pub fn build_client(timeout: Duration) -> anyhow::Result<Client> {
    let client = Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .user_agent(concat!("icloud-album-sync/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}

/// Create a progress bar with a consistent template.
///
/// Hidden when the user passed `--no-progress-bar` or stdout is not a TTY.
pub(crate) fn create_progress_bar(no_progress_bar: bool, total: u64) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }
    pb
}

pub(crate) fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

/// Stamp both atime and mtime with a Unix timestamp (seconds).
pub(crate) fn set_file_mtime(path: &Path, timestamp: i64) -> std::io::Result<()> {
    let time = if timestamp >= 0 {
        UNIX_EPOCH + Duration::from_secs(timestamp as u64)
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(timestamp.unsigned_abs()))
            .unwrap_or(SystemTime::UNIX_EPOCH)
    };
    let times = FileTimes::new().set_modified(time).set_accessed(time);
    let file = std::fs::File::options().write(true).open(path)?;
    file.set_times(times)?;
    Ok(())
}
