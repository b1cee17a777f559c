use thiserror::Error;

/// Typed per-asset download errors enabling retry classification.
///
/// None of these ever escalate past the executor; they are counted against
/// the asset and the album carries on.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("HTTP error {status} downloading {path}")]
    HttpStatus { status: u16, path: String },

    #[error("Disk error: {0}")]
    Disk(#[from] std::io::Error),

    #[error("HTTP error downloading {path} (bytes_so_far={bytes_written}): {source}")]
    Http {
        source: reqwest::Error,
        path: String,
        bytes_written: u64,
    },

    #[error("Rejected {path}: {bytes} bytes is below the {min} byte floor, likely a thumbnail")]
    TooSmall { path: String, bytes: u64, min: u64 },

    #[error("Download of {path} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        path: String,
        last_error: String,
    },
}

impl DownloadError {
    /// Whether this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            DownloadError::Http { .. } => true,
            DownloadError::Disk(_)
            | DownloadError::TooSmall { .. }
            | DownloadError::RetriesExhausted { .. } => false,
        }
    }
}
