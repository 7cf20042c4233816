//! Service-level error taxonomy shared by the store and the manager.
//!
//! Per-URL download failures are never represented here; they live in-band
//! in each [`crate::model::FileRecord`]'s `status`/`error_msg`. This enum
//! covers the conditions that abort a whole operation and must map to an
//! HTTP response status at the API boundary.

use thiserror::Error;

use crate::loader::LoaderError;

/// Errors returned by store and manager operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The referenced task does not exist (or has expired).
    #[error("task not found")]
    TaskNotFound,

    /// The per-task file cap has been reached.
    #[error("maximum files exceeded")]
    MaxFilesExceeded,

    /// Admission refused: task cap reached or no download slot available.
    #[error("server busy")]
    ServerBusy,

    /// The store has been shut down; no further operations are accepted.
    #[error("server has been cancelled")]
    ServerCancelled,

    /// A fatal loader failure (request construction, ZIP writer breakage).
    #[error(transparent)]
    Loader(#[from] LoaderError),
}
