use std::path::PathBuf;

use clap::{ArgAction, Parser};

use crate::types::LogLevel;

#[derive(Parser, Debug)]
#[command(
    name = "icloud-album-sync",
    version,
    about = "Mirror public iCloud shared albums into local folders"
)]
pub struct Cli {
    /// Albums to sync, as YAML. A list of mappings with `shared_url` and
    /// `album_subfolder`; a single flattened line is accepted too.
    #[arg(long, env = "ALBUMS", conflicts_with = "albums_file")]
    pub albums: Option<String>,

    /// Read the album YAML from a file instead
    #[arg(long, env = "ALBUMS_FILE")]
    pub albums_file: Option<PathBuf>,

    /// Delete files older than N days (0 = keep forever)
    #[arg(long, env = "KEEP_DAYS", default_value_t = 0)]
    pub keep_days: u32,

    /// Keep at most N files per album (0 = unlimited)
    #[arg(long, env = "MAX_FILES", default_value_t = 500)]
    pub max_files: u32,

    /// Delete local files that are no longer in the album
    #[arg(long, env = "MIRROR_MISSING", default_value_t = true, action = ArgAction::Set)]
    pub mirror_missing: bool,

    /// HTTP request timeout in seconds
    #[arg(long, env = "TIMEOUT", default_value_t = 40,
          value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: u64,

    /// Log pruning and mirror deletions without performing them
    #[arg(long, env = "PRUNE_DRY_RUN")]
    pub prune_dry_run: bool,

    /// Do not modify the local filesystem at all
    #[arg(long, env = "DRY_RUN")]
    pub dry_run: bool,

    /// Enable debug logging (overrides --log-level)
    #[arg(long, env = "DEBUG")]
    pub debug: bool,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    /// Run continuously, waiting N seconds between runs
    #[arg(long, env = "WATCH_WITH_INTERVAL")]
    pub watch_with_interval: Option<u64>,

    /// Root directory for `dest_mode: media`
    #[arg(long, env = "MEDIA_ROOT", default_value = "/media")]
    pub media_root: String,

    /// Root directory for `dest_mode: share`
    #[arg(long, env = "SHARE_ROOT", default_value = "/share")]
    pub share_root: String,

    /// Root directory for `dest_mode: config_www`
    #[arg(long, env = "WWW_ROOT", default_value = "/config/www")]
    pub www_root: String,

    /// Number of albums synced concurrently
    #[arg(long, default_value_t = 1,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub threads_num: u16,

    /// Concurrent downloads within one album
    #[arg(long, default_value_t = 4,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub download_concurrency: u16,

    /// Renditions whose long edge is below this are treated as thumbnails
    #[arg(long, default_value_t = 2000)]
    pub min_long_edge: u64,

    /// Downloads smaller than this many bytes are treated as thumbnails
    #[arg(long, default_value_t = 300 * 1024)]
    pub min_file_size: u64,

    /// Max retries per request (0 = no retries)
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Initial retry delay in seconds
    #[arg(long, default_value_t = 2)]
    pub retry_delay: u64,

    /// Disable progress bar
    #[arg(long)]
    pub no_progress_bar: bool,

    /// Send sd_notify messages to systemd
    #[arg(long)]
    pub notify_systemd: bool,

    /// Write the process id to this file while running
    #[arg(long)]
    pub pid_file: Option<PathBuf>,
}
