//! Fatal loader errors.
//!
//! Per-URL failures (bad URL, blocked destination, upstream status, type
//! mismatch, transient read errors) are never errors here; they are recorded
//! in-band on each file record. This enum covers only the conditions that
//! abort a whole check or download operation.

use thiserror::Error;

/// Errors that abort a loader operation.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The outbound request could not even be constructed.
    #[error("create request failed for {url}: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The ZIP writer failed; the archive stream is no longer usable.
    #[error("zip write failed: {source}")]
    Zip {
        #[source]
        source: async_zip::error::ZipError,
    },

    /// Writing payload bytes into an open ZIP entry failed.
    #[error("zip entry write failed: {source}")]
    EntryWrite {
        #[source]
        source: std::io::Error,
    },

    /// The final status report could not be serialized.
    #[error("serialize status report failed: {source}")]
    StatusReport {
        #[source]
        source: serde_json::Error,
    },
}

impl LoaderError {
    pub fn request(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Request {
            url: url.into(),
            source,
        }
    }

    pub fn zip(source: async_zip::error::ZipError) -> Self {
        Self::Zip { source }
    }

    pub fn entry_write(source: std::io::Error) -> Self {
        Self::EntryWrite { source }
    }

    pub fn status_report(source: serde_json::Error) -> Self {
        Self::StatusReport { source }
    }
}
