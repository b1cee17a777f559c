use thiserror::Error;

/// Errors from resolving a shared album.
///
/// `InvalidAlbum` covers everything retrying cannot fix (bad link, private
/// or deleted album). `is_retryable()` separates transient transport
/// failures from the rest so the fetch loop can give up early.
#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("Invalid shared album reference '{url}': {reason}")]
    InvalidAlbum { url: String, reason: String },

    #[error("HTTP error {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Request to {url} failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Unexpected response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("Giving up on {url} after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        url: String,
        attempts: u32,
        last_error: String,
    },
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RemoteError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            RemoteError::Http { .. } => true,
            RemoteError::InvalidAlbum { .. }
            | RemoteError::Malformed { .. }
            | RemoteError::RetriesExhausted { .. } => false,
        }
    }

    pub fn is_invalid_album(&self) -> bool {
        matches!(self, RemoteError::InvalidAlbum { .. })
    }
}
