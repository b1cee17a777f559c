use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;

/// One downloaded file as listed in the album index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub filename: String,
    pub id: String,
    pub downloaded_at: DateTime<Utc>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

async fn load(path: &Path) -> Vec<IndexEntry> {
    let contents = match fs::read_to_string(path).await {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            tracing::warn!("Failed to read index {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    match serde_json::from_str(&contents) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Ignoring unreadable index {}: {}", path.display(), e);
            Vec::new()
        }
    }
}

/// Merge one run's changes into the index at `path`.
///
/// New entries go first (newest first), entries for removed or re-added
/// filenames are dropped, and the result replaces the old file via a
/// temp-file rename.
pub async fn update(
    path: &Path,
    added: Vec<IndexEntry>,
    removed: &HashSet<String>,
) -> Result<()> {
    let existing = load(path).await;
    let added_names: HashSet<String> = added.iter().map(|e| e.filename.clone()).collect();

    let mut entries = added;
    entries.sort_by(|a, b| b.downloaded_at.cmp(&a.downloaded_at));
    entries.extend(
        existing
            .into_iter()
            .filter(|e| !removed.contains(&e.filename) && !added_names.contains(&e.filename)),
    );

    let json = serde_json::to_string_pretty(&entries)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{name}.tmp"));
    fs::write(&tmp, json)
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    tracing::debug!(path = %path.display(), entries = entries.len(), "index updated");
    Ok(())
}
