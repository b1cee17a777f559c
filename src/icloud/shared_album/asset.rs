use chrono::{DateTime, Utc};

/// Where to fetch the selected rendition of an asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRef {
    pub url: String,
    /// Lowercase extension without the dot.
    pub extension: String,
    /// Expected size in bytes, when the stream reported one.
    pub size: Option<u64>,
}

/// One entry of a shared album as observed during a single fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAsset {
    pub id: String,
    pub created: DateTime<Utc>,
    pub checksum: Option<String>,
    /// `None` when no rendition cleared the full-size floor. The asset still
    /// exists remotely but is never downloaded.
    pub download: Option<DownloadRef>,
}

impl std::fmt::Display for RemoteAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<RemoteAsset: id={}>", self.id)
    }
}

/// Lowercase extension of the last path segment of `url`, query stripped.
pub fn extension_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').next()?;
    let (_, ext) = name.rsplit_once('.')?;
    let ext = ext.to_ascii_lowercase();
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext)
}
