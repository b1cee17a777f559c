use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::download::paths::{self, DestinationRoots};
use crate::icloud::shared_album::SelectionPolicy;
use crate::retry::RetryConfig;
use crate::sync::plan::AlbumPolicy;
use crate::types::{DestMode, DryRun};

const DEFAULT_MEDIA_SUBFOLDER: &str = "iCloud";
const DEFAULT_INDEX_FILENAME: &str = "index.json";

/// Keys an album mapping may carry. Only these are recognised when
/// re-splitting a flattened single-line list.
const ALBUM_KEYS: &[&str] = &[
    "name",
    "shared_url",
    "dest_mode",
    "media_subfolder",
    "album_subfolder",
    "keep_days",
    "max_files",
    "mirror_missing",
    "index_filename",
];

static ALBUM_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = ALBUM_KEYS.join("|");
    Regex::new(&format!(r"\b({alternation})\s*:")).expect("valid album key pattern")
});

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("No albums configured")]
    NoAlbums,

    #[error("Failed to read album file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid albums YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Album '{album}': {reason}")]
    InvalidAlbum { album: String, reason: String },

    #[error("Albums '{first}' and '{second}' would both sync into {}", dir.display())]
    DuplicateDestination {
        first: String,
        second: String,
        dir: PathBuf,
    },
}

/// Immutable settings for one album, with defaults applied and the
/// destination directory resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumConfig {
    pub name: String,
    pub shared_url: String,
    pub dest_mode: DestMode,
    pub media_subfolder: String,
    pub album_subfolder: String,
    pub keep_days: u32,
    pub max_files: u32,
    pub mirror_missing: bool,
    /// `None` disables the index file.
    pub index_filename: Option<String>,
    pub dest_dir: PathBuf,
}

impl AlbumConfig {
    pub fn policy(&self) -> AlbumPolicy {
        AlbumPolicy {
            keep_days: self.keep_days,
            max_files: self.max_files,
            mirror_missing: self.mirror_missing,
        }
    }
}

/// Distinguishes an absent key (`None`) from an explicit `null`
/// (`Some(None)`).
fn explicit<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawAlbum {
    name: Option<String>,
    shared_url: Option<String>,
    #[serde(default)]
    dest_mode: DestMode,
    media_subfolder: Option<String>,
    album_subfolder: Option<String>,
    keep_days: Option<u32>,
    max_files: Option<u32>,
    mirror_missing: Option<bool>,
    #[serde(default, deserialize_with = "explicit")]
    index_filename: Option<Option<String>>,
}

/// Process-wide values an album inherits when it does not set its own.
#[derive(Debug, Clone, Copy)]
pub struct AlbumDefaults {
    pub keep_days: u32,
    pub max_files: u32,
    pub mirror_missing: bool,
}

/// Rewrite a flattened one-line album list into block YAML.
///
/// `name: A shared_url: https://x#T album_subfolder: a` becomes a one-item
/// list. A key repeating within the line starts the next album. Input that
/// already spans several lines is returned unchanged.
pub fn normalize_single_line_yaml(input: &str) -> String {
    let s = input.trim();
    if s.contains('\n') {
        return s.to_string();
    }
    let matches: Vec<_> = ALBUM_KEY_RE.captures_iter(s).collect();
    if matches.is_empty() {
        return s.to_string();
    }

    let mut lines = Vec::new();
    let mut seen: Vec<&str> = Vec::new();
    for (i, caps) in matches.iter().enumerate() {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value_end = matches
            .get(i + 1)
            .and_then(|next| next.get(0))
            .map_or(s.len(), |m| m.start());
        let mut value = s[whole.end()..value_end].trim();
        // A "- " item marker in front of the next key belongs to that key.
        if value == "-" {
            value = "";
        } else if let Some(stripped) = value.strip_suffix(" -") {
            value = stripped.trim_end();
        }

        let key = key.as_str();
        let new_item = seen.is_empty() || seen.contains(&key);
        if new_item {
            seen.clear();
        }
        seen.push(key);
        let prefix = if new_item { "- " } else { "  " };
        if value.is_empty() {
            lines.push(format!("{prefix}{key}:"));
        } else {
            lines.push(format!("{prefix}{key}: {value}"));
        }
    }
    lines.join("\n")
}

fn parse_raw_albums(input: &str) -> Result<Vec<RawAlbum>, ConfigError> {
    let text = if input.trim().contains('\n') {
        input.to_string()
    } else {
        tracing::info!("Detected single-line albums input; normalizing to multiline YAML");
        normalize_single_line_yaml(input)
    };
    let value: serde_yaml::Value = serde_yaml::from_str(&text)?;
    match value {
        serde_yaml::Value::Null => Ok(Vec::new()),
        serde_yaml::Value::Sequence(_) => Ok(serde_yaml::from_value(value)?),
        other => Ok(vec![serde_yaml::from_value(other)?]),
    }
}

/// Parse and validate an album list.
///
/// Every album must have a `shared_url` and `album_subfolder`, subfolders
/// must stay under their root, and no two albums may share a directory.
pub fn parse_albums(
    input: &str,
    defaults: &AlbumDefaults,
    roots: &DestinationRoots,
) -> Result<Vec<AlbumConfig>, ConfigError> {
    let raw = parse_raw_albums(input)?;
    if raw.is_empty() {
        return Err(ConfigError::NoAlbums);
    }

    let mut albums = Vec::with_capacity(raw.len());
    let mut by_dir: HashMap<PathBuf, String> = HashMap::new();
    for (i, album) in raw.into_iter().enumerate() {
        let label = album
            .name
            .clone()
            .or_else(|| album.album_subfolder.clone())
            .unwrap_or_else(|| format!("#{}", i + 1));
        let invalid = |reason: &str| ConfigError::InvalidAlbum {
            album: label.clone(),
            reason: reason.to_string(),
        };

        let shared_url = album
            .shared_url
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .ok_or_else(|| invalid("missing shared_url"))?;
        let album_subfolder = album
            .album_subfolder
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing album_subfolder"))?;
        let media_subfolder = album
            .media_subfolder
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|| DEFAULT_MEDIA_SUBFOLDER.to_string());
        if !paths::is_safe_subfolder(&media_subfolder) {
            return Err(invalid("media_subfolder must be a relative path without '..'"));
        }
        if !paths::is_safe_subfolder(&album_subfolder) {
            return Err(invalid("album_subfolder must be a relative path without '..'"));
        }

        let index_filename = match album.index_filename {
            None => Some(DEFAULT_INDEX_FILENAME.to_string()),
            Some(None) => None,
            Some(Some(name)) if name.trim().is_empty() => None,
            Some(Some(name)) => {
                let name = name.trim().to_string();
                if name.contains('/') || name == "." || name == ".." {
                    return Err(invalid("index_filename must be a plain file name"));
                }
                Some(name)
            }
        };

        let dest_dir = paths::album_directory(
            roots,
            album.dest_mode,
            &media_subfolder,
            &album_subfolder,
        );
        if let Some(first) = by_dir.get(&dest_dir) {
            return Err(ConfigError::DuplicateDestination {
                first: first.clone(),
                second: label,
                dir: dest_dir,
            });
        }
        by_dir.insert(dest_dir.clone(), label.clone());

        albums.push(AlbumConfig {
            name: label,
            shared_url,
            dest_mode: album.dest_mode,
            media_subfolder,
            album_subfolder,
            keep_days: album.keep_days.unwrap_or(defaults.keep_days),
            max_files: album.max_files.unwrap_or(defaults.max_files),
            mirror_missing: album.mirror_missing.unwrap_or(defaults.mirror_missing),
            index_filename,
            dest_dir,
        });
    }
    Ok(albums)
}

/// Application configuration.
#[derive(Debug)]
pub struct Config {
    pub albums: Vec<AlbumConfig>,
    pub pid_file: Option<PathBuf>,

    pub watch_with_interval: Option<u64>,
    pub timeout_secs: u64,
    pub retry_delay_secs: u64,
    pub min_long_edge: u64,
    pub min_file_size: u64,

    pub max_retries: u32,
    pub album_concurrency: u16,
    pub download_concurrency: u16,

    pub dry_run: DryRun,

    pub no_progress_bar: bool,
    pub notify_systemd: bool,
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

fn read_albums_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

impl Config {
    pub fn from_cli(cli: crate::cli::Cli) -> Result<Self, ConfigError> {
        let roots = DestinationRoots {
            media: expand_tilde(&cli.media_root),
            share: expand_tilde(&cli.share_root),
            www: expand_tilde(&cli.www_root),
        };
        let defaults = AlbumDefaults {
            keep_days: cli.keep_days,
            max_files: cli.max_files,
            mirror_missing: cli.mirror_missing,
        };

        let albums_yaml = match (&cli.albums, &cli.albums_file) {
            (Some(inline), _) => inline.clone(),
            (None, Some(path)) => read_albums_file(&expand_tilde(&path.to_string_lossy()))?,
            (None, None) => return Err(ConfigError::NoAlbums),
        };
        let albums = parse_albums(&albums_yaml, &defaults, &roots)?;

        Ok(Self {
            albums,
            pid_file: cli.pid_file,
            watch_with_interval: cli.watch_with_interval,
            timeout_secs: cli.timeout.max(1),
            retry_delay_secs: cli.retry_delay,
            min_long_edge: cli.min_long_edge,
            min_file_size: cli.min_file_size,
            max_retries: cli.max_retries,
            album_concurrency: cli.threads_num.max(1),
            download_concurrency: cli.download_concurrency.max(1),
            dry_run: DryRun::from_flags(cli.dry_run, cli.prune_dry_run),
            no_progress_bar: cli.no_progress_bar,
            notify_systemd: cli.notify_systemd,
        })
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            base_delay: Duration::from_secs(self.retry_delay_secs),
            ..RetryConfig::default()
        }
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            min_long_edge: self.min_long_edge,
            min_file_size: self.min_file_size,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
