//! fetchzip — an aggregating ZIP downloader service.
//!
//! Clients create a task, attach up to a bounded number of remote file
//! URLs, poll its status, and finally request the whole batch back as a
//! single ZIP archive streamed on the fly. The service validates declared
//! and actual (magic-number) file types, refuses to reach private network
//! space, and bounds both stored tasks and concurrent archive generations.
//!
//! # Architecture
//!
//! - [`egress`] - SSRF guard wired into the outbound client's DNS layer
//! - [`loader`] - stateless HEAD probes and streaming ZIP downloads
//! - [`store`] - in-memory task state with caps and TTL expiry
//! - [`manager`] - orchestration, file-id correlation, download slots
//! - [`api`] - the HTTP boundary (routes, wire shapes, error mapping)
//! - [`config`] - environment-based configuration

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod api;
pub mod config;
pub mod egress;
pub mod error;
pub mod loader;
pub mod manager;
pub mod model;
pub mod store;

// Re-export commonly used types
pub use error::ServiceError;
pub use loader::{Loader, LoaderError, build_outbound_client};
pub use manager::{DownloadSlot, Manager, ManagerConfig};
pub use model::{FileRecord, Task};
pub use store::{StoreConfig, TaskStore};
