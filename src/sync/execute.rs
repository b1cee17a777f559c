use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio::fs;
use tokio_util::sync::CancellationToken;

use super::index::{self, IndexEntry};
use super::inventory::LocalFile;
use super::plan::SyncPlan;
use crate::download::{self, file, paths, AssetDownloader, DownloadError};
use crate::icloud::shared_album::RemoteAsset;
use crate::types::DryRun;

/// Knobs the executor needs from the album and process configuration.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    pub dry_run: DryRun,
    pub download_concurrency: usize,
    /// Downloads smaller than this are rejected as thumbnails.
    pub min_file_size: u64,
    pub index_filename: Option<String>,
    pub no_progress_bar: bool,
}

/// Per-asset outcome counts for one album. Under a dry run the counts are
/// what would have happened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub fetched: usize,
    pub pruned: usize,
    pub mirrored: usize,
    pub errors: Vec<String>,
    /// Shutdown was requested before every fetch was started.
    pub cancelled: bool,
}

impl ExecutionReport {
    pub fn failed(&self) -> usize {
        self.errors.len()
    }
}

struct Fetched {
    filename: String,
    id: String,
    url: String,
    sha256: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DeleteReason {
    Pruned,
    Mirrored,
}

impl DeleteReason {
    fn as_str(self) -> &'static str {
        match self {
            DeleteReason::Pruned => "pruned",
            DeleteReason::Mirrored => "mirrored",
        }
    }
}

/// Carry out `plan` inside `dir`.
///
/// Per-asset failures are collected in the report. The only error returned
/// is failing to create `dir` itself, which makes the whole album unusable.
pub async fn execute(
    dir: &Path,
    plan: &SyncPlan,
    downloader: &dyn AssetDownloader,
    options: &ExecuteOptions,
    shutdown_token: &CancellationToken,
) -> std::io::Result<ExecutionReport> {
    let mut report = ExecutionReport::default();
    let mut added: Vec<IndexEntry> = Vec::new();

    let fetches: Vec<&RemoteAsset> = plan
        .to_fetch
        .iter()
        .filter(|a| a.download.is_some())
        .collect();

    if options.dry_run.skips_fetches() {
        for asset in &fetches {
            if let Some(path) = destination_for(dir, asset) {
                tracing::info!("[DRY RUN] Would download {}", path.display());
            }
        }
        report.fetched = fetches.len();
    } else if !fetches.is_empty() {
        fs::create_dir_all(dir).await?;
        fetch_all(dir, &fetches, downloader, options, shutdown_token, &mut report, &mut added)
            .await;
    }

    let mut removed: HashSet<String> = HashSet::new();
    if report.cancelled {
        tracing::info!("Shutdown requested, skipping deletions in {}", dir.display());
    } else {
        for (files, reason) in [
            (&plan.to_delete_pruned, DeleteReason::Pruned),
            (&plan.to_delete_mirrored, DeleteReason::Mirrored),
        ] {
            for local in files {
                match delete_one(dir, local, reason, options.dry_run).await {
                    Ok(()) => {
                        match reason {
                            DeleteReason::Pruned => report.pruned += 1,
                            DeleteReason::Mirrored => report.mirrored += 1,
                        }
                        if !options.dry_run.skips_deletions() {
                            if let Some(name) = local.path.file_name() {
                                removed.insert(name.to_string_lossy().into_owned());
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to delete {}: {}", local.path.display(), e);
                        report
                            .errors
                            .push(format!("delete {}: {}", local.path.display(), e));
                    }
                }
            }
        }
    }

    if let Some(index_name) = options.index_filename.as_deref() {
        if !options.dry_run.skips_fetches() && (!added.is_empty() || !removed.is_empty()) {
            if let Err(e) = index::update(&dir.join(index_name), added, &removed).await {
                tracing::warn!("Could not update album index in {}: {:#}", dir.display(), e);
            }
        }
    }

    Ok(report)
}

async fn fetch_all(
    dir: &Path,
    fetches: &[&RemoteAsset],
    downloader: &dyn AssetDownloader,
    options: &ExecuteOptions,
    shutdown_token: &CancellationToken,
    report: &mut ExecutionReport,
    added: &mut Vec<IndexEntry>,
) {
    let pb = download::create_progress_bar(options.no_progress_bar, fetches.len() as u64);
    let min_file_size = options.min_file_size;

    let results = stream::iter(fetches.iter().copied())
        .take_while(|_| std::future::ready(!shutdown_token.is_cancelled()))
        .map(|asset| async move {
            let result = fetch_one(dir, asset, downloader, min_file_size).await;
            (asset, result)
        })
        .buffer_unordered(options.download_concurrency.max(1));
    tokio::pin!(results);

    let mut settled = 0usize;
    while let Some((asset, result)) = results.next().await {
        settled += 1;
        match result {
            Ok(fetched) => {
                pb.set_message(fetched.filename.clone());
                tracing::debug!(id = %fetched.id, sha256 = %fetched.sha256, "downloaded {}", fetched.filename);
                report.fetched += 1;
                added.push(IndexEntry {
                    filename: fetched.filename,
                    id: fetched.id,
                    downloaded_at: Utc::now(),
                    url: fetched.url,
                    sha256: Some(fetched.sha256),
                });
            }
            Err(e) => {
                pb.suspend(|| tracing::error!("Download failed: {}: {}", asset, e));
                report.errors.push(format!("fetch {}: {}", asset.id, e));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if settled < fetches.len() {
        report.cancelled = true;
        tracing::info!(
            "Shutdown requested, {} downloads not started",
            fetches.len() - settled
        );
    }
}

/// Download one asset to its temp path, check it, stamp it, move it into place.
async fn fetch_one(
    dir: &Path,
    asset: &RemoteAsset,
    downloader: &dyn AssetDownloader,
    min_file_size: u64,
) -> Result<Fetched, DownloadError> {
    let download = asset
        .download
        .as_ref()
        .ok_or_else(|| std::io::Error::other(format!("{asset} has no download location")))?;
    let filename = paths::asset_filename(&asset.id, &asset.created, &download.extension);
    let final_path = dir.join(&filename);
    let part_path = paths::part_path(&final_path);

    let downloaded = match downloader.download(&download.url, &part_path).await {
        Ok(d) => d,
        Err(e) => {
            file::discard_part(&part_path).await;
            return Err(e);
        }
    };

    if downloaded.bytes < min_file_size {
        file::discard_part(&part_path).await;
        return Err(DownloadError::TooSmall {
            path: final_path.display().to_string(),
            bytes: downloaded.bytes,
            min: min_file_size,
        });
    }

    if let Some(expected) = download.size.filter(|&n| n != downloaded.bytes) {
        tracing::warn!(
            id = %asset.id,
            checksum = asset.checksum.as_deref().unwrap_or("-"),
            "{} is {} bytes, stream listed {}",
            filename,
            downloaded.bytes,
            expected
        );
    }

    let ts = asset.created.timestamp();
    let mtime_path = part_path.clone();
    match tokio::task::spawn_blocking(move || download::set_file_mtime(&mtime_path, ts)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("Could not set mtime on {}: {}", part_path.display(), e),
        Err(e) => tracing::warn!("Could not set mtime on {}: {}", part_path.display(), e),
    }

    if let Err(e) = fs::rename(&part_path, &final_path).await {
        file::discard_part(&part_path).await;
        return Err(e.into());
    }

    Ok(Fetched {
        filename,
        id: asset.id.clone(),
        url: download.url.clone(),
        sha256: downloaded.sha256,
    })
}

async fn delete_one(
    dir: &Path,
    local: &LocalFile,
    reason: DeleteReason,
    dry_run: DryRun,
) -> std::io::Result<()> {
    if !paths::is_direct_child(dir, &local.path) {
        return Err(std::io::Error::other(format!(
            "refusing to delete {} outside {}",
            local.path.display(),
            dir.display()
        )));
    }
    if dry_run.skips_deletions() {
        tracing::info!(
            "[DRY RUN] Would delete {} ({})",
            local.path.display(),
            reason.as_str()
        );
        return Ok(());
    }
    match fs::remove_file(&local.path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("{} already gone", local.path.display());
        }
        Err(e) => return Err(e),
    }
    tracing::info!(
        "Deleted {} ({}, {} bytes)",
        local.path.display(),
        reason.as_str(),
        local.size
    );
    Ok(())
}

/// Where a fetched asset lands inside `dir`.
pub fn destination_for(dir: &Path, asset: &RemoteAsset) -> Option<PathBuf> {
    let d = asset.download.as_ref()?;
    Some(dir.join(paths::asset_filename(&asset.id, &asset.created, &d.extension)))
}
