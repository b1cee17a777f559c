use std::path::{Component, Path, PathBuf};

use base64::Engine;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::types::DestMode;

/// `strftime` layout of the capture-time prefix in asset filenames.
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const TIMESTAMP_LEN: usize = 15;

/// Marks an id that had to be base64-encoded to be filename safe.
const ENCODED_ID_PREFIX: char = '~';

/// Root directory for each destination mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationRoots {
    pub media: PathBuf,
    pub share: PathBuf,
    pub www: PathBuf,
}

impl Default for DestinationRoots {
    fn default() -> Self {
        Self {
            media: PathBuf::from("/media"),
            share: PathBuf::from("/share"),
            www: PathBuf::from("/config/www"),
        }
    }
}

impl DestinationRoots {
    pub fn root(&self, mode: DestMode) -> &Path {
        match mode {
            DestMode::Media => &self.media,
            DestMode::Share => &self.share,
            DestMode::ConfigWww => &self.www,
        }
    }
}

/// `<root>/<media_subfolder>/<album_subfolder>`, skipping empty parts.
pub fn album_directory(
    roots: &DestinationRoots,
    mode: DestMode,
    media_subfolder: &str,
    album_subfolder: &str,
) -> PathBuf {
    let mut path = roots.root(mode).to_path_buf();
    for part in [media_subfolder, album_subfolder] {
        if !part.is_empty() {
            path.push(part);
        }
    }
    path
}

/// A subfolder must stay below its root: relative, no `..`, no prefix.
pub fn is_safe_subfolder(subfolder: &str) -> bool {
    Path::new(subfolder)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

fn is_plain_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
}

fn encode_id(id: &str) -> String {
    if is_plain_id(id) {
        return id.to_string();
    }
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(id.as_bytes());
    format!("{ENCODED_ID_PREFIX}{encoded}")
}

fn decode_id(encoded: &str) -> Option<String> {
    if let Some(b64) = encoded.strip_prefix(ENCODED_ID_PREFIX) {
        let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(b64)
            .ok()?;
        return String::from_utf8(bytes).ok();
    }
    is_plain_id(encoded).then(|| encoded.to_string())
}

fn is_valid_extension(ext: &str) -> bool {
    (1..=5).contains(&ext.len()) && ext.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Stable filename for an asset: `<YYYYMMDD-HHMMSS>_<id>.<ext>`.
///
/// The timestamp is the capture time in UTC so directory listings sort
/// chronologically. Ids outside `[A-Za-z0-9-]` are stored as `~` followed
/// by unpadded URL-safe base64.
pub fn asset_filename(id: &str, created: &DateTime<Utc>, extension: &str) -> String {
    let ext = extension.to_ascii_lowercase();
    let ext = if is_valid_extension(&ext) { ext } else { "bin".to_string() };
    format!(
        "{}_{}.{}",
        created.format(TIMESTAMP_FORMAT),
        encode_id(id),
        ext
    )
}

/// Recover the asset id from a filename written by [`asset_filename`].
///
/// Returns `None` for anything that does not follow the convention, which
/// is how foreign files in an album directory stay untouched.
pub fn parse_asset_filename(name: &str) -> Option<String> {
    let (stem, ext) = name.rsplit_once('.')?;
    if !is_valid_extension(ext) {
        return None;
    }
    parse_timestamp(stem.get(..TIMESTAMP_LEN)?)?;
    let id = stem.get(TIMESTAMP_LEN..)?.strip_prefix('_')?;
    decode_id(id)
}

/// Parse the fixed-width `YYYYMMDD-HHMMSS` prefix.
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    let b = s.as_bytes();
    if b.len() != TIMESTAMP_LEN || b[8] != b'-' {
        return None;
    }
    let num = |range: std::ops::Range<usize>| -> Option<u32> {
        let part = s.get(range)?;
        if !part.bytes().all(|c| c.is_ascii_digit()) {
            return None;
        }
        part.parse().ok()
    };
    let date = NaiveDate::from_ymd_opt(num(0..4)? as i32, num(4..6)?, num(6..8)?)?;
    let time = NaiveTime::from_hms_opt(num(9..11)?, num(11..13)?, num(13..15)?)?;
    Some(date.and_time(time))
}

/// Hidden temp path next to `final_path`; never matches the naming
/// convention, so an interrupted download is invisible to the scanner.
pub fn part_path(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{name}.part"))
}

/// True when `path` sits directly inside `dir`.
pub fn is_direct_child(dir: &Path, path: &Path) -> bool {
    path.parent() == Some(dir)
        && path
            .file_name()
            .is_some_and(|n| n != "." && n != "..")
}
