//! Album synchronization: one run fetches each album's remote listing,
//! scans the destination, plans against the retention policy and executes
//! the plan. Albums are isolated from each other; a failing album is
//! reported and the run moves on.

pub mod execute;
pub mod index;
pub mod inventory;
pub mod plan;

use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::config::{AlbumConfig, ConfigError};
use crate::download::{format_duration, AssetDownloader};
use crate::icloud::shared_album::AlbumSource;
use crate::types::DryRun;
use execute::ExecuteOptions;

/// How one album's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlbumOutcome {
    Success,
    /// The plan ran but some assets failed.
    PartialFailure { errors: Vec<String> },
    /// Shutdown stopped the fetches midway; deletions were skipped.
    Interrupted { errors: Vec<String> },
    /// The remote listing could not be obtained; nothing was touched.
    FetchFailed { error: String },
    /// The destination could not be read or created.
    LocalFailed { error: String },
    /// Another worker is already syncing this destination.
    AlreadyRunning,
}

impl AlbumOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlbumOutcome::Success => "success",
            AlbumOutcome::PartialFailure { .. } => "partial_failure",
            AlbumOutcome::Interrupted { .. } => "interrupted",
            AlbumOutcome::FetchFailed { .. } => "fetch_failed",
            AlbumOutcome::LocalFailed { .. } => "local_failed",
            AlbumOutcome::AlreadyRunning => "already_running",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AlbumOutcome::Success)
    }
}

/// Counts and outcome for one album.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumReport {
    pub name: String,
    pub dest_dir: PathBuf,
    pub outcome: AlbumOutcome,
    pub fetched: usize,
    pub pruned: usize,
    pub mirrored: usize,
    pub skipped: usize,
    pub failed: usize,
    pub unavailable: usize,
}

impl AlbumReport {
    fn new(album: &AlbumConfig, outcome: AlbumOutcome) -> Self {
        Self {
            name: album.name.clone(),
            dest_dir: album.dest_dir.clone(),
            outcome,
            fetched: 0,
            pruned: 0,
            mirrored: 0,
            skipped: 0,
            failed: 0,
            unavailable: 0,
        }
    }
}

impl fmt::Display for AlbumReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} (fetched {}, pruned {}, mirrored {}, skipped {}, failed {})",
            self.name,
            self.outcome.as_str(),
            self.fetched,
            self.pruned,
            self.mirrored,
            self.skipped,
            self.failed
        )
    }
}

/// Result of one pass over every configured album, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub albums: Vec<AlbumReport>,
    pub elapsed: Duration,
    pub cancelled: bool,
}

impl RunSummary {
    pub fn failed_albums(&self) -> usize {
        self.albums
            .iter()
            .filter(|a| !a.outcome.is_success())
            .count()
    }

    /// One-line status for the service manager.
    pub fn status_line(&self) -> String {
        let fetched: usize = self.albums.iter().map(|a| a.fetched).sum();
        let deleted: usize = self.albums.iter().map(|a| a.pruned + a.mirrored).sum();
        format!(
            "{} albums, {} failed, {} fetched, {} deleted",
            self.albums.len(),
            self.failed_albums(),
            fetched,
            deleted
        )
    }

    pub fn log(&self, dry_run: DryRun) {
        if dry_run == DryRun::Off {
            tracing::info!("── Summary ──");
        } else {
            tracing::info!("── Dry Run Summary ──");
        }
        for album in &self.albums {
            match &album.outcome {
                AlbumOutcome::Success => tracing::info!("  {}", album),
                AlbumOutcome::PartialFailure { errors } | AlbumOutcome::Interrupted { errors } => {
                    tracing::warn!("  {}", album);
                    for e in errors {
                        tracing::warn!("    {}", e);
                    }
                }
                AlbumOutcome::FetchFailed { error } | AlbumOutcome::LocalFailed { error } => {
                    tracing::error!("  {}: {}", album, error);
                }
                AlbumOutcome::AlreadyRunning => tracing::warn!("  {}", album),
            }
        }
        if self.cancelled {
            tracing::info!("  interrupted by shutdown");
        }
        tracing::info!("  elapsed: {}", format_duration(self.elapsed));
    }
}

/// Marks a destination directory busy until dropped.
struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<PathBuf>>,
    dir: PathBuf,
}

impl<'a> RunningGuard<'a> {
    fn acquire(running: &'a Mutex<HashSet<PathBuf>>, dir: &std::path::Path) -> Option<Self> {
        let mut set = running.lock().unwrap_or_else(|e| e.into_inner());
        if !set.insert(dir.to_path_buf()) {
            return None;
        }
        Some(Self {
            running,
            dir: dir.to_path_buf(),
        })
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.running.lock().unwrap_or_else(|e| e.into_inner());
        set.remove(&self.dir);
    }
}

/// Process-wide settings for [`Syncer`].
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub dry_run: DryRun,
    pub album_concurrency: usize,
    pub download_concurrency: usize,
    pub min_file_size: u64,
    pub no_progress_bar: bool,
}

/// Runs album syncs against a remote source and a downloader.
pub struct Syncer {
    source: Arc<dyn AlbumSource>,
    downloader: Arc<dyn AssetDownloader>,
    options: SyncOptions,
    running: Mutex<HashSet<PathBuf>>,
    shutdown_token: CancellationToken,
}

impl Syncer {
    pub fn new(
        source: Arc<dyn AlbumSource>,
        downloader: Arc<dyn AssetDownloader>,
        options: SyncOptions,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            source,
            downloader,
            options,
            running: Mutex::new(HashSet::new()),
            shutdown_token,
        }
    }

    /// Sync every album once.
    ///
    /// Album failures are reported in the summary, never returned. The only
    /// error is an empty album list.
    pub async fn run_once(&self, albums: &[AlbumConfig]) -> Result<RunSummary, ConfigError> {
        if albums.is_empty() {
            return Err(ConfigError::NoAlbums);
        }
        let started = Instant::now();

        let mut reports: Vec<(usize, AlbumReport)> = stream::iter(albums.iter().enumerate())
            .take_while(|_| std::future::ready(!self.shutdown_token.is_cancelled()))
            .map(|(i, album)| async move { (i, self.sync_album(album).await) })
            .buffer_unordered(self.options.album_concurrency.max(1))
            .collect()
            .await;
        reports.sort_by_key(|(i, _)| *i);

        let cancelled = self.shutdown_token.is_cancelled();
        if cancelled && reports.len() < albums.len() {
            tracing::info!(
                "Shutdown requested, {} albums not started",
                albums.len() - reports.len()
            );
        }

        Ok(RunSummary {
            albums: reports.into_iter().map(|(_, r)| r).collect(),
            elapsed: started.elapsed(),
            cancelled,
        })
    }

    async fn sync_album(&self, album: &AlbumConfig) -> AlbumReport {
        let dir = &album.dest_dir;
        let Some(_guard) = RunningGuard::acquire(&self.running, dir) else {
            tracing::warn!(album = %album.name, "Sync already running for {}", dir.display());
            return AlbumReport::new(album, AlbumOutcome::AlreadyRunning);
        };
        tracing::info!(album = %album.name, "Syncing to {}", dir.display());

        let remote = match self.source.fetch_album(&album.shared_url).await {
            Ok(remote) => remote,
            Err(e) => {
                if e.is_invalid_album() {
                    tracing::error!(album = %album.name, "Album is not reachable, check the link: {}", e);
                } else {
                    tracing::error!(album = %album.name, "Failed to fetch album: {}", e);
                }
                return AlbumReport::new(album, AlbumOutcome::FetchFailed { error: e.to_string() });
            }
        };

        let local = match inventory::scan(dir).await {
            Ok(local) => local,
            Err(e) => {
                tracing::error!(album = %album.name, "Failed to read {}: {}", dir.display(), e);
                return AlbumReport::new(album, AlbumOutcome::LocalFailed { error: e.to_string() });
            }
        };

        let plan = plan::plan(&remote, &local, &album.policy(), Utc::now());
        tracing::info!(
            album = %album.name,
            remote = remote.len(),
            local = local.len(),
            fetch = plan.to_fetch.len(),
            prune = plan.to_delete_pruned.len(),
            mirror = plan.to_delete_mirrored.len(),
            skip = plan.skipped.len(),
            unavailable = plan.unavailable,
            "planned"
        );
        if !plan.has_mutations() {
            tracing::info!(album = %album.name, "Already in sync");
        }

        let exec_options = ExecuteOptions {
            dry_run: self.options.dry_run,
            download_concurrency: self.options.download_concurrency,
            min_file_size: self.options.min_file_size,
            index_filename: album.index_filename.clone(),
            no_progress_bar: self.options.no_progress_bar,
        };
        let report = match execute::execute(
            dir,
            &plan,
            self.downloader.as_ref(),
            &exec_options,
            &self.shutdown_token,
        )
        .await
        {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(album = %album.name, "Failed to prepare {}: {}", dir.display(), e);
                return AlbumReport::new(album, AlbumOutcome::LocalFailed { error: e.to_string() });
            }
        };

        let failed = report.failed();
        let outcome = if report.cancelled {
            AlbumOutcome::Interrupted {
                errors: report.errors,
            }
        } else if report.errors.is_empty() {
            AlbumOutcome::Success
        } else {
            AlbumOutcome::PartialFailure {
                errors: report.errors,
            }
        };
        AlbumReport {
            fetched: report.fetched,
            pruned: report.pruned,
            mirrored: report.mirrored,
            skipped: plan.skipped.len(),
            failed,
            unavailable: plan.unavailable,
            ..AlbumReport::new(album, outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::execute::tests::FakeDownloader;
    use super::*;
    use crate::icloud::error::RemoteError;
    use crate::icloud::shared_album::{DownloadRef, RemoteAsset};
    use crate::types::DestMode;
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::HashMap;
    use std::path::Path;

    /// Album listings by shared URL; unknown URLs fail as if the remote
    /// kept erroring until retries ran out.
    struct FakeSource {
        albums: HashMap<String, Vec<RemoteAsset>>,
    }

    #[async_trait]
    impl AlbumSource for FakeSource {
        async fn fetch_album(&self, shared_url: &str) -> Result<Vec<RemoteAsset>, RemoteError> {
            self.albums
                .get(shared_url)
                .cloned()
                .ok_or_else(|| RemoteError::RetriesExhausted {
                    url: shared_url.to_string(),
                    attempts: 4,
                    last_error: "HTTP error 503".into(),
                })
        }
    }

    /// Requests shutdown as soon as the first download starts.
    struct CancellingDownloader {
        inner: FakeDownloader,
        token: CancellationToken,
    }

    #[async_trait]
    impl AssetDownloader for CancellingDownloader {
        async fn download(
            &self,
            url: &str,
            part_path: &Path,
        ) -> Result<crate::download::DownloadedFile, crate::download::DownloadError> {
            self.token.cancel();
            self.inner.download(url, part_path).await
        }
    }

    fn asset(id: &str, days_ago: i64) -> RemoteAsset {
        RemoteAsset {
            id: id.into(),
            created: Utc::now() - ChronoDuration::days(days_ago),
            checksum: None,
            download: Some(DownloadRef {
                url: format!("https://cdn.example/{id}.jpg"),
                extension: "jpg".into(),
                size: None,
            }),
        }
    }

    fn album(name: &str, url: &str, dir: &Path) -> AlbumConfig {
        AlbumConfig {
            name: name.into(),
            shared_url: url.into(),
            dest_mode: DestMode::Media,
            media_subfolder: String::new(),
            album_subfolder: name.into(),
            keep_days: 0,
            max_files: 0,
            mirror_missing: true,
            index_filename: None,
            dest_dir: dir.join(name),
        }
    }

    fn syncer(source: FakeSource, downloader: FakeDownloader, dry_run: DryRun) -> Syncer {
        Syncer::new(
            Arc::new(source),
            Arc::new(downloader),
            SyncOptions {
                dry_run,
                album_concurrency: 2,
                download_concurrency: 2,
                min_file_size: 1,
                no_progress_bar: true,
            },
            CancellationToken::new(),
        )
    }

    fn downloader_for(ids: &[&str]) -> FakeDownloader {
        let bodies: Vec<(String, Vec<u8>)> = ids
            .iter()
            .map(|id| (format!("https://cdn.example/{id}.jpg"), id.as_bytes().to_vec()))
            .collect();
        let refs: Vec<(&str, Vec<u8>)> = bodies
            .iter()
            .map(|(u, b)| (u.as_str(), b.clone()))
            .collect();
        FakeDownloader::with(&refs)
    }

    #[tokio::test]
    async fn test_empty_album_list_is_config_error() {
        let s = syncer(
            FakeSource {
                albums: HashMap::new(),
            },
            FakeDownloader::default(),
            DryRun::Off,
        );
        assert!(matches!(s.run_once(&[]).await, Err(ConfigError::NoAlbums)));
    }

    #[tokio::test]
    async fn test_one_failing_album_does_not_stop_the_other() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource {
            albums: HashMap::from([(
                "https://good".to_string(),
                vec![asset("A1", 1), asset("A2", 2)],
            )]),
        };
        let s = syncer(source, downloader_for(&["A1", "A2"]), DryRun::Off);
        let albums = vec![
            album("broken", "https://bad", tmp.path()),
            album("good", "https://good", tmp.path()),
        ];

        let summary = s.run_once(&albums).await.unwrap();

        assert_eq!(summary.albums.len(), 2);
        assert_eq!(summary.albums[0].name, "broken");
        match &summary.albums[0].outcome {
            AlbumOutcome::FetchFailed { error } => assert!(error.contains("after 4 attempts")),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(!tmp.path().join("broken").exists());
        assert_eq!(summary.albums[1].outcome, AlbumOutcome::Success);
        assert_eq!(summary.albums[1].fetched, 2);
        assert_eq!(summary.failed_albums(), 1);
        let files = std::fs::read_dir(tmp.path().join("good")).unwrap().count();
        assert_eq!(files, 2);
    }

    #[tokio::test]
    async fn test_partial_failure_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource {
            albums: HashMap::from([(
                "https://a".to_string(),
                vec![asset("OK", 1), asset("BROKEN", 1)],
            )]),
        };
        let s = syncer(source, downloader_for(&["OK"]), DryRun::Off);
        let summary = s
            .run_once(&[album("a", "https://a", tmp.path())])
            .await
            .unwrap();
        let report = &summary.albums[0];
        assert_eq!(report.fetched, 1);
        assert_eq!(report.failed, 1);
        match &report.outcome {
            AlbumOutcome::PartialFailure { errors } => {
                assert!(errors[0].contains("BROKEN"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource {
            albums: HashMap::from([(
                "https://a".to_string(),
                vec![asset("N1", 1), asset("N2", 3), asset("OLD", 90)],
            )]),
        };
        let s = syncer(source, downloader_for(&["N1", "N2", "OLD"]), DryRun::Off);
        let mut cfg = album("a", "https://a", tmp.path());
        cfg.keep_days = 30;
        cfg.max_files = 1;

        let first = s.run_once(std::slice::from_ref(&cfg)).await.unwrap();
        assert_eq!(first.albums[0].fetched, 1);
        assert_eq!(first.albums[0].skipped, 2);

        let second = s.run_once(&[cfg]).await.unwrap();
        let r = &second.albums[0];
        assert_eq!((r.fetched, r.pruned, r.mirrored), (0, 0, 0));
        assert_eq!(r.outcome, AlbumOutcome::Success);
    }

    #[tokio::test]
    async fn test_mirror_removes_files_gone_from_album() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a");
        std::fs::create_dir(&dir).unwrap();
        let stale = dir.join("20240101-000000_GONE.jpg");
        std::fs::write(&stale, b"old").unwrap();
        let user_file = dir.join("notes.txt");
        std::fs::write(&user_file, b"mine").unwrap();

        let source = FakeSource {
            albums: HashMap::from([("https://a".to_string(), vec![asset("KEEP", 1)])]),
        };
        let s = syncer(source, downloader_for(&["KEEP"]), DryRun::Off);
        let summary = s
            .run_once(&[album("a", "https://a", tmp.path())])
            .await
            .unwrap();

        assert_eq!(summary.albums[0].mirrored, 1);
        assert!(!stale.exists());
        assert!(user_file.exists());
    }

    #[tokio::test]
    async fn test_already_running_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource {
            albums: HashMap::from([("https://a".to_string(), vec![asset("A", 1)])]),
        };
        let s = syncer(source, downloader_for(&["A"]), DryRun::Off);
        let cfg = album("a", "https://a", tmp.path());
        let _held = RunningGuard::acquire(&s.running, &cfg.dest_dir).unwrap();

        let summary = s.run_once(std::slice::from_ref(&cfg)).await.unwrap();
        assert_eq!(summary.albums[0].outcome, AlbumOutcome::AlreadyRunning);
        assert!(!cfg.dest_dir.exists());
    }

    #[tokio::test]
    async fn test_guard_released_after_run() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource {
            albums: HashMap::from([("https://a".to_string(), Vec::new())]),
        };
        let s = syncer(source, FakeDownloader::default(), DryRun::Off);
        let cfg = album("a", "https://a", tmp.path());
        s.run_once(std::slice::from_ref(&cfg)).await.unwrap();
        assert!(s.running.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_runs_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource {
            albums: HashMap::from([("https://a".to_string(), vec![asset("A", 1)])]),
        };
        let s = syncer(source, downloader_for(&["A"]), DryRun::Off);
        s.shutdown_token.cancel();
        let summary = s
            .run_once(&[album("a", "https://a", tmp.path())])
            .await
            .unwrap();
        assert!(summary.albums.is_empty());
        assert!(summary.cancelled);
    }

    #[tokio::test]
    async fn test_shutdown_during_fetch_is_not_success() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("a");
        std::fs::create_dir(&dir).unwrap();
        let stale = dir.join("20240101-000000_GONE.jpg");
        std::fs::write(&stale, b"old").unwrap();

        let source = FakeSource {
            albums: HashMap::from([(
                "https://a".to_string(),
                vec![asset("C1", 1), asset("C2", 2), asset("C3", 3)],
            )]),
        };
        let token = CancellationToken::new();
        let downloader = CancellingDownloader {
            inner: downloader_for(&["C1", "C2", "C3"]),
            token: token.clone(),
        };
        let s = Syncer::new(
            Arc::new(source),
            Arc::new(downloader),
            SyncOptions {
                dry_run: DryRun::Off,
                album_concurrency: 1,
                download_concurrency: 1,
                min_file_size: 1,
                no_progress_bar: true,
            },
            token,
        );

        let summary = s
            .run_once(&[album("a", "https://a", tmp.path())])
            .await
            .unwrap();

        let report = &summary.albums[0];
        assert_eq!(report.fetched, 1);
        assert!(matches!(report.outcome, AlbumOutcome::Interrupted { .. }));
        assert!(!report.outcome.is_success());
        assert_eq!(report.mirrored, 0);
        assert!(stale.exists());
        assert_eq!(summary.failed_albums(), 1);
        assert!(summary.cancelled);
    }

    #[test]
    fn test_status_line() {
        let cfg = album("a", "https://a", Path::new("/tmp"));
        let summary = RunSummary {
            albums: vec![
                AlbumReport {
                    fetched: 3,
                    pruned: 1,
                    ..AlbumReport::new(&cfg, AlbumOutcome::Success)
                },
                AlbumReport::new(&cfg, AlbumOutcome::AlreadyRunning),
            ],
            ..RunSummary::default()
        };
        assert_eq!(
            summary.status_line(),
            "2 albums, 1 failed, 3 fetched, 1 deleted"
        );
    }
}
