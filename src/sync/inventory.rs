use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;

use crate::download::paths;

/// A file in an album directory that this tool wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub path: PathBuf,
    pub id: String,
    pub size: u64,
    /// Age signal for retention. Fetched files carry the capture time here.
    pub modified: DateTime<Utc>,
}

pub type Inventory = HashMap<String, LocalFile>;

/// Read `dir` and map asset id to the file holding it.
///
/// Only regular files following the naming convention are considered, so
/// temp files, the index and anything a user dropped in are left alone. A
/// missing directory is an empty inventory.
pub async fn scan(dir: &Path) -> io::Result<Inventory> {
    let mut inventory = Inventory::new();
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(inventory),
        Err(e) => return Err(e),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(id) = paths::parse_asset_filename(name) else {
            continue;
        };
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if !metadata.is_file() {
            continue;
        }
        let modified: DateTime<Utc> = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();
        let file = LocalFile {
            path: entry.path(),
            id: id.clone(),
            size: metadata.len(),
            modified,
        };

        match inventory.get(&id) {
            Some(existing) => {
                let (keep, dup) = if file.modified > existing.modified {
                    (file, existing.path.clone())
                } else {
                    (existing.clone(), file.path)
                };
                tracing::warn!(
                    "Duplicate local copy of {} at {}, keeping {}",
                    id,
                    dup.display(),
                    keep.path.display()
                );
                inventory.insert(id, keep);
            }
            None => {
                inventory.insert(id, file);
            }
        }
    }

    tracing::debug!(dir = %dir.display(), files = inventory.len(), "scanned album directory");
    Ok(inventory)
}
