//! iCloud shared album access.

pub mod error;
pub mod shared_album;
