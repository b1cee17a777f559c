//! Public shared album client.
//!
//! Resolving an album takes two calls: `webstream` lists the photos and
//! their renditions, `webasseturls` turns rendition checksums into CDN
//! URLs. Both are hidden behind [`AlbumSource::fetch_album`], which returns
//! the whole album or an error, never a partial list.

mod asset;
pub mod derivatives;
pub mod session;
pub mod streams;

pub use asset::{extension_from_url, DownloadRef, RemoteAsset};
pub use derivatives::SelectionPolicy;
pub use session::{build_client, JsonResponse, StreamsSession};

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::icloud::error::RemoteError;
use crate::retry::{self, RetryAction, RetryConfig};
use derivatives::{is_video, looks_like_thumbnail, ranked_candidates};
use streams::{AssetLocation, StreamPhoto, WebAssetUrlsResponse, WebStreamResponse};

/// Photo guids per `webasseturls` request.
const ASSET_URL_PAGE_SIZE: usize = 25;

/// Partition redirects followed before giving up.
const MAX_REDIRECTS: usize = 2;

const BASE62: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Anything that can list a shared album. The sync engine only sees this
/// trait so it can be driven without network access.
#[async_trait::async_trait]
pub trait AlbumSource: Send + Sync {
    async fn fetch_album(&self, shared_url: &str) -> Result<Vec<RemoteAsset>, RemoteError>;
}

/// Album token and the partition host it lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumRef {
    pub token: String,
    pub host: String,
}

fn base62_value(c: u8) -> Option<u32> {
    BASE62.iter().position(|&b| b == c).map(|p| p as u32)
}

/// Parse `https://www.icloud.com/sharedalbum/#<token>` into an [`AlbumRef`].
///
/// Anything else fails with `InvalidAlbum` without touching the network.
pub fn parse_album_ref(shared_url: &str) -> Result<AlbumRef, RemoteError> {
    let invalid = |reason: String| RemoteError::InvalidAlbum {
        url: shared_url.to_string(),
        reason,
    };

    let parsed =
        url::Url::parse(shared_url.trim()).map_err(|e| invalid(format!("not a URL: {e}")))?;
    if !matches!(parsed.scheme(), "https" | "http") {
        return Err(invalid(format!("unsupported scheme '{}'", parsed.scheme())));
    }
    let host = parsed.host_str().unwrap_or_default();
    if host != "icloud.com" && !host.ends_with(".icloud.com") {
        return Err(invalid(format!("'{host}' is not an iCloud host")));
    }
    if !parsed.path().contains("sharedalbum") {
        return Err(invalid("not a shared album link".to_string()));
    }

    // A fragment may carry `;<photo guid>` after the token when the link
    // points at a single photo.
    let token = parsed
        .fragment()
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default();
    if token.is_empty() {
        return Err(invalid("missing album token after '#'".to_string()));
    }
    if !token.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(invalid(format!("malformed album token '{token}'")));
    }

    let bytes = token.as_bytes();
    let partition = if bytes[0] == b'A' {
        bytes.get(1).copied().and_then(base62_value)
    } else {
        match (bytes.get(1), bytes.get(2)) {
            (Some(&hi), Some(&lo)) => base62_value(hi)
                .zip(base62_value(lo))
                .map(|(hi, lo)| hi * 62 + lo),
            _ => None,
        }
    };
    let partition =
        partition.ok_or_else(|| invalid(format!("album token '{token}' is too short")))?;

    Ok(AlbumRef {
        token: token.to_string(),
        host: format!("p{partition:02}-sharedstreams.icloud.com"),
    })
}

fn parse_created(photo: &StreamPhoto) -> Option<DateTime<Utc>> {
    [&photo.date_created, &photo.batch_date_created]
        .into_iter()
        .flatten()
        .find_map(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// File name portion of a URL, used for the thumbnail check.
fn url_file_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

pub struct SharedAlbumClient {
    session: Box<dyn StreamsSession>,
    retry: RetryConfig,
    selection: SelectionPolicy,
}

impl std::fmt::Debug for SharedAlbumClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedAlbumClient")
            .field("retry", &self.retry)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

impl SharedAlbumClient {
    pub fn new(
        session: Box<dyn StreamsSession>,
        retry: RetryConfig,
        selection: SelectionPolicy,
    ) -> Self {
        Self {
            session,
            retry,
            selection,
        }
    }

    async fn post(&self, url: &str, body: &Value) -> Result<JsonResponse, RemoteError> {
        retry::retry_with_backoff(
            &self.retry,
            |e: &RemoteError| {
                if e.is_retryable() {
                    RetryAction::Retry
                } else {
                    RetryAction::Abort
                }
            },
            || self.session.post_json(url, body),
        )
        .await
        .map_err(|exhausted| {
            if exhausted.retryable {
                RemoteError::RetriesExhausted {
                    url: url.to_string(),
                    attempts: exhausted.attempts,
                    last_error: exhausted.error.to_string(),
                }
            } else {
                exhausted.error
            }
        })
    }

    /// Fetch the stream listing, following partition redirects. Returns the
    /// API base URL that answered together with the parsed stream.
    async fn fetch_stream(
        &self,
        shared_url: &str,
        album: &AlbumRef,
    ) -> Result<(String, WebStreamResponse), RemoteError> {
        let mut host = album.host.clone();

        for _ in 0..=MAX_REDIRECTS {
            let base = format!("https://{host}/{}/sharedstreams", album.token);
            let url = format!("{base}/webstream");
            let resp = self
                .post(&url, &json!({ "streamCtag": null }))
                .await
                .map_err(|e| match e {
                    RemoteError::HttpStatus { status, .. } if matches!(status, 401 | 403 | 404) => {
                        RemoteError::InvalidAlbum {
                            url: shared_url.to_string(),
                            reason: format!(
                                "album is private, deleted or the link is wrong (HTTP {status})"
                            ),
                        }
                    }
                    other => other,
                })?;

            let status = resp.status;
            let stream: WebStreamResponse = decode(&url, resp.body)?;
            match stream.redirect_host.clone() {
                Some(next) if next != host => {
                    debug!("Album redirected from {} to {}", host, next);
                    host = next;
                }
                _ if status == 330 => {
                    return Err(RemoteError::Malformed {
                        url,
                        reason: "redirect without a new host".to_string(),
                    });
                }
                _ => return Ok((base, stream)),
            }
        }

        Err(RemoteError::Malformed {
            url: shared_url.to_string(),
            reason: format!("more than {MAX_REDIRECTS} partition redirects"),
        })
    }

    /// Resolve rendition checksums to download locations, one page of guids
    /// at a time.
    async fn fetch_asset_urls(
        &self,
        base: &str,
        guids: &[&str],
    ) -> Result<HashMap<String, AssetLocation>, RemoteError> {
        let url = format!("{base}/webasseturls");
        let mut locations = HashMap::new();
        for page in guids.chunks(ASSET_URL_PAGE_SIZE) {
            let resp = self.post(&url, &json!({ "photoGuids": page })).await?;
            let parsed: WebAssetUrlsResponse = decode(&url, resp.body)?;
            debug!(
                "webasseturls: {} locations for {} guids",
                parsed.items.len(),
                page.len()
            );
            locations.extend(parsed.items);
        }
        Ok(locations)
    }

    fn resolve_asset(
        &self,
        id: String,
        photo: &StreamPhoto,
        locations: &HashMap<String, AssetLocation>,
    ) -> RemoteAsset {
        let created = parse_created(photo).unwrap_or_else(|| {
            warn!("Asset {} has no creation date, treating it as oldest", id);
            DateTime::<Utc>::default()
        });
        let fallback_ext = if is_video(photo) { "mp4" } else { "jpg" };

        for candidate in ranked_candidates(photo, &self.selection) {
            let Some(url) = locations.get(&candidate.checksum).and_then(|l| l.full_url()) else {
                continue;
            };
            if looks_like_thumbnail(url_file_name(&url)) {
                continue;
            }
            debug!("Selected {} ({}) for {}", candidate.key, url, id);
            let extension = extension_from_url(&url).unwrap_or_else(|| fallback_ext.to_string());
            return RemoteAsset {
                id,
                created,
                checksum: Some(candidate.checksum),
                download: Some(DownloadRef {
                    url,
                    extension,
                    size: (candidate.size > 0).then_some(candidate.size),
                }),
            };
        }

        warn!("Skipping asset {}: no full-size rendition available", id);
        RemoteAsset {
            id,
            created,
            checksum: None,
            download: None,
        }
    }
}

fn decode<T: DeserializeOwned>(url: &str, body: Value) -> Result<T, RemoteError> {
    serde_json::from_value(body).map_err(|e| RemoteError::Malformed {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait::async_trait]
impl AlbumSource for SharedAlbumClient {
    async fn fetch_album(&self, shared_url: &str) -> Result<Vec<RemoteAsset>, RemoteError> {
        let album = parse_album_ref(shared_url)?;
        let (base, stream) = self.fetch_stream(shared_url, &album).await?;

        let mut seen = HashSet::new();
        let photos: Vec<(String, StreamPhoto)> = stream
            .photos
            .into_iter()
            .filter_map(|photo| match photo.photo_guid.clone() {
                Some(guid) if !guid.is_empty() => Some((guid, photo)),
                _ => {
                    warn!("Skipping stream entry without photoGuid");
                    None
                }
            })
            .filter(|(guid, _)| seen.insert(guid.clone()))
            .collect();

        if photos.is_empty() {
            info!("No photos listed in stream");
            return Ok(Vec::new());
        }

        let guids: Vec<&str> = photos.iter().map(|(guid, _)| guid.as_str()).collect();
        let locations = self.fetch_asset_urls(&base, &guids).await?;

        let assets: Vec<RemoteAsset> = photos
            .iter()
            .map(|(guid, photo)| self.resolve_asset(guid.clone(), photo, &locations))
            .collect();
        info!(
            "Album '{}': {} assets, {} downloadable",
            stream.stream_name.as_deref().unwrap_or(&album.token),
            assets.len(),
            assets.iter().filter(|a| a.download.is_some()).count()
        );
        Ok(assets)
    }
}
