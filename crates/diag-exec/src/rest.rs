//! Transport seam for REST catalog entries.

use async_trait::async_trait;

use diag_common::DiagResult;

/// Fetches the body of a REST diagnostic call.
///
/// The engine resolves *which* path to call; the transport (base URL,
/// authentication, TLS) belongs to the caller. Implementations must be
/// safe to share across the worker pool.
#[async_trait]
pub trait RestFetcher: Send + Sync {
    async fn fetch(&self, path: &str) -> DiagResult<String>;
}
