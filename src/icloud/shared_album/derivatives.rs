//! Full-size rendition selection.
//!
//! Shared albums list several renditions per photo, most of them
//! thumbnails. Only renditions that clear a size floor are ever chosen, so
//! a mirror never silently fills up with previews.

use std::sync::LazyLock;

use regex::Regex;

use super::streams::{Derivative, StreamPhoto};

const THUMB_HINTS: &[&str] = &[
    "thumb",
    "thumbnail",
    "square",
    "poster",
    "preview",
    "small",
    "mini",
    "tile",
    "low",
    "tiny",
];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "m4v", "hevc"];

/// Keys Apple uses for the original upload, best first.
const PREFERRED_ORIGINAL_KEYS: &[&str] = &[
    "resoriginal",
    "original",
    "resjpegfull",
    "fullres",
    "master",
    "resfull",
    "publicsharegenericlarge",
];

static DIMENSIONS_IN_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)[xX](\d+)").expect("valid regex"));

/// Size floor a rendition must clear to count as full size.
#[derive(Debug, Clone, Copy)]
pub struct SelectionPolicy {
    pub min_long_edge: u64,
    pub min_file_size: u64,
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self {
            min_long_edge: 2000,
            min_file_size: 300 * 1024,
        }
    }
}

/// A rendition that passed the thumbnail filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub key: String,
    pub checksum: String,
    pub width: u64,
    pub height: u64,
    pub size: u64,
}

impl Candidate {
    fn long_edge(&self) -> u64 {
        self.width.max(self.height)
    }

    fn area(&self) -> u64 {
        self.width.saturating_mul(self.height)
    }
}

pub fn looks_like_thumbnail(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    THUMB_HINTS.iter().any(|hint| lower.contains(hint))
}

/// Videos are flagged by `mediaAssetType`; older streams only give it away
/// through a rendition's file extension.
pub fn is_video(photo: &StreamPhoto) -> bool {
    if photo
        .media_asset_type
        .as_deref()
        .is_some_and(|t| t.eq_ignore_ascii_case("video"))
    {
        return true;
    }
    photo.derivatives.values().any(|d| {
        d.file_name
            .as_deref()
            .and_then(|n| n.rsplit_once('.'))
            .is_some_and(|(_, ext)| {
                VIDEO_EXTENSIONS
                    .iter()
                    .any(|v| ext.eq_ignore_ascii_case(v))
            })
    })
}

fn dimensions_from_key(key: &str) -> Option<(u64, u64)> {
    let caps = DIMENSIONS_IN_KEY.captures(key)?;
    let w = caps.get(1)?.as_str().parse().ok()?;
    let h = caps.get(2)?.as_str().parse().ok()?;
    Some((w, h))
}

fn candidate(key: &str, derivative: &Derivative) -> Option<Candidate> {
    let checksum = derivative.checksum.as_deref().filter(|c| !c.is_empty())?;
    let names = [
        Some(key),
        derivative.file_name.as_deref(),
        derivative.derivative_type.as_deref(),
    ];
    if names.into_iter().flatten().any(looks_like_thumbnail) {
        return None;
    }

    let (width, height) = match (derivative.width, derivative.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => dimensions_from_key(key).unwrap_or((0, 0)),
    };

    Some(Candidate {
        key: key.to_string(),
        checksum: checksum.to_string(),
        width,
        height,
        size: derivative.file_size.unwrap_or(0),
    })
}

fn meets_floor(c: &Candidate, video: bool, policy: &SelectionPolicy) -> bool {
    let size_ok = c.size == 0 || c.size >= policy.min_file_size;
    if video {
        return size_ok;
    }
    c.long_edge() >= policy.min_long_edge && size_ok
}

/// Renditions of `photo` that clear the floor, best first.
///
/// Explicit originals come first in `PREFERRED_ORIGINAL_KEYS` order, the
/// rest by descending area then size. Ties fall back to the key so the
/// ranking never depends on map iteration order.
pub fn ranked_candidates(photo: &StreamPhoto, policy: &SelectionPolicy) -> Vec<Candidate> {
    let video = is_video(photo);
    let mut candidates: Vec<Candidate> = photo
        .derivatives
        .iter()
        .filter_map(|(key, d)| candidate(key, d))
        .filter(|c| meets_floor(c, video, policy))
        .collect();

    let preference = |c: &Candidate| {
        PREFERRED_ORIGINAL_KEYS
            .iter()
            .position(|k| c.key.eq_ignore_ascii_case(k))
            .unwrap_or(PREFERRED_ORIGINAL_KEYS.len())
    };
    candidates.sort_by(|a, b| {
        preference(a)
            .cmp(&preference(b))
            .then_with(|| b.area().cmp(&a.area()))
            .then_with(|| b.size.cmp(&a.size))
            .then_with(|| a.key.cmp(&b.key))
    });
    candidates
}
