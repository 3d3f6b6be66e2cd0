//! Wire types and the library error taxonomy
//!
//! Shared between the filesystem core and the HTTP layer.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Metadata for one listable ROM file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEntry {
    /// Raw file name, never contains a path separator
    pub name: String,
    pub size: u64,
    /// Sent as epoch milliseconds
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_modified: DateTime<Utc>,
    /// Opaque download locator (percent-encoded name)
    #[serde(rename = "path")]
    pub access_path: String,
}

/// Snapshot of the ROM directory, most recently modified first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listing {
    pub root: PathBuf,
    pub entries: Vec<FileEntry>,
    pub total_count: usize,
}

/// A download target that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRom {
    /// Canonical path inside the ROM directory
    pub path: PathBuf,
    pub name: String,
    /// Size observed while resolving; the streamer re-stats the open handle
    pub size: u64,
}

/// How a download ended once streaming had been set up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { bytes: u64 },
    /// The consumer disconnected; no more reads were issued
    ConsumerGone { bytes_sent: u64 },
    /// An I/O failure after the body had started
    Aborted { bytes_sent: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("ROM directory is unavailable")]
    CatalogUnavailable {
        #[source]
        source: std::io::Error,
    },
    #[error("invalid file name: {reason}")]
    InvalidName { reason: &'static str },
    #[error("access denied")]
    AccessDenied { attempted: String },
    #[error("file not found: {name}")]
    NotFound { name: String },
    #[error("failed to start streaming the file")]
    StreamFailed {
        #[source]
        source: std::io::Error,
    },
}

impl LibraryError {
    /// Stable machine-readable category
    pub fn code(&self) -> &'static str {
        match self {
            LibraryError::CatalogUnavailable { .. } => "catalog_unavailable",
            LibraryError::InvalidName { .. } => "invalid_name",
            LibraryError::AccessDenied { .. } => "access_denied",
            LibraryError::NotFound { .. } => "not_found",
            LibraryError::StreamFailed { .. } => "stream_failed",
        }
    }
}

/// JSON body sent with every error response
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

impl From<&LibraryError> for ErrorBody {
    fn from(err: &LibraryError) -> Self {
        Self {
            error: err.code().to_string(),
            message: err.to_string(),
        }
    }
}
