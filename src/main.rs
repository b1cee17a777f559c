//! icloud-album-sync: mirror public iCloud Shared Albums into local folders.
//!
//! Each run resolves every configured album through Apple's public
//! shared-streams web API, diffs it against the destination directory and
//! applies the album's retention policy. Downloads land atomically via
//! temp-file rename; a failing album never stops the others.

#![warn(clippy::all)]

mod cli;
mod config;
mod download;
mod icloud;
pub mod retry;
mod shutdown;
mod sync;
mod systemd;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use download::HttpDownloader;
use icloud::shared_album::{self, SharedAlbumClient};
use sync::{SyncOptions, Syncer};
use systemd::SystemdNotifier;

/// Writes the process id on creation and removes the file on drop.
struct PidFile {
    path: PathBuf,
}

impl PidFile {
    fn create(path: &Path) -> anyhow::Result<Self> {
        std::fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("Failed to write pid file {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!("Could not remove pid file {}: {}", self.path.display(), e);
        }
    }
}

fn init_logging(cli: &cli::Cli) {
    let level = if cli.debug {
        "debug"
    } else {
        cli.log_level.as_filter()
    };
    // RUST_LOG wins over the flags when set.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();
    init_logging(&cli);

    let config = config::Config::from_cli(cli)?;
    tracing::info!(
        albums = config.albums.len(),
        album_concurrency = config.album_concurrency,
        download_concurrency = config.download_concurrency,
        dry_run = ?config.dry_run,
        "Starting icloud-album-sync"
    );
    for album in &config.albums {
        tracing::debug!(
            album = %album.name,
            dest_mode = album.dest_mode.as_str(),
            keep_days = album.keep_days,
            max_files = album.max_files,
            mirror_missing = album.mirror_missing,
            "-> {}",
            album.dest_dir.display()
        );
    }

    let _pid_file = config.pid_file.as_deref().map(PidFile::create).transpose()?;

    let api_client = shared_album::build_client(config.timeout())?;
    let source = SharedAlbumClient::new(
        Box::new(api_client),
        config.retry_config(),
        config.selection_policy(),
    );
    let media_client = download::build_client(config.timeout())?;
    let downloader = HttpDownloader::new(media_client, config.retry_config());

    let shutdown_token = shutdown::install_signal_handler()
        .context("Failed to install signal handlers")?;
    let notifier = SystemdNotifier::new(config.notify_systemd);

    let syncer = Syncer::new(
        Arc::new(source),
        Arc::new(downloader),
        SyncOptions {
            dry_run: config.dry_run,
            album_concurrency: usize::from(config.album_concurrency),
            download_concurrency: usize::from(config.download_concurrency),
            min_file_size: config.min_file_size,
            no_progress_bar: config.no_progress_bar,
        },
        shutdown_token.clone(),
    );

    notifier.notify_ready();

    loop {
        let summary = syncer.run_once(&config.albums).await?;
        summary.log(config.dry_run);
        notifier.notify_run(&summary);

        let Some(interval) = config.watch_with_interval else {
            break;
        };
        if shutdown_token.is_cancelled() {
            tracing::info!("Shutdown requested, exiting...");
            break;
        }
        tracing::info!("Waiting {} seconds...", interval);
        notifier.notify_status(&format!(
            "Idle, next run in {}s ({})",
            interval,
            summary.status_line()
        ));
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            _ = shutdown_token.cancelled() => {
                tracing::info!("Shutdown during wait, exiting...");
                break;
            }
        }
    }

    notifier.notify_stopping();
    Ok(())
}
