//! Outbound HTTP client construction.
//!
//! One shared client serves every probe and download. The egress guard is
//! installed at the DNS layer, so redirect hops and retries are covered
//! uniformly; IP-literal hosts never reach DNS and are pre-checked by the
//! loader instead.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::egress::GuardedResolver;

/// Connection establishment deadline.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline between successive reads; bounds stuck response headers and
/// stalled body streams without capping total transfer time.
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Builds the guarded outbound client used by the loader.
///
/// # Errors
///
/// Returns the underlying builder error when the TLS backend cannot be
/// initialized.
pub fn build_outbound_client() -> reqwest::Result<Client> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(READ_TIMEOUT)
        .gzip(true)
        .dns_resolver(Arc::new(GuardedResolver))
        .build()
}
