//! The tiered content-addressed cache.
//!
//! A cache stores one gzip-wrapped tar artifact per task hash. Reads consult
//! tiers in order and stop at the first hit; writes fan out to every
//! configured writer. The local tier lives on disk next to an integrity
//! sidecar; the remote tier is an HTTP client.

pub mod analytics;
mod fs;
mod http;
pub mod item;
mod multiplexer;
mod noop;
mod signature;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use turbine_core::{AbsoluteSystemPathBuf, AnchoredSystemPathBuf, Result};

pub use analytics::{AnalyticsClient, AnalyticsSink, CacheEvent, CacheEventStatus};
pub use fs::FsCache;
pub use http::{HttpCache, RemoteCacheConfig};
pub use multiplexer::CacheMultiplexer;
pub use noop::NoopCache;
pub use signature::ArtifactSignature;

/// Which tiers currently hold an artifact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ItemStatus {
    pub local: bool,
    pub remote: bool,
}

/// Which tier satisfied a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheSource {
    Local,
    Remote,
}

/// A successful fetch: the restored file set and the recorded duration of
/// the original task execution.
#[derive(Debug)]
pub struct FetchedArtifact {
    pub source: CacheSource,
    pub files: Vec<AnchoredSystemPathBuf>,
    pub duration_ms: u64,
}

/// The cache capability set. Tiers and the composite facade all implement
/// this; callers never know which tier answered.
pub trait Cache: Send + Sync {
    fn exists(&self, hash: &str) -> Result<ItemStatus>;

    /// Look up an artifact by hash and restore it under `anchor`. The globs
    /// are advisory: a tier may use them to restore a subset.
    fn fetch(
        &self,
        anchor: &AbsoluteSystemPathBuf,
        hash: &str,
        globs: &[String],
    ) -> Result<Option<FetchedArtifact>>;

    fn put(
        &self,
        anchor: &AbsoluteSystemPathBuf,
        hash: &str,
        duration_ms: u64,
        files: &[AnchoredSystemPathBuf],
    ) -> Result<()>;

    fn shutdown(&self) {}
}

/// Options assembling the facade for one invocation.
#[derive(Debug, Clone)]
pub struct CacheOpts {
    pub cache_dir: AbsoluteSystemPathBuf,
    pub remote: Option<RemoteCacheConfig>,
}

/// Default timeout for remote cache requests.
pub const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(30);

/// Build the tiered facade: local disk first, then the remote client when
/// configured. With no usable tier the caller gets a no-op cache.
pub fn new_cache(
    opts: &CacheOpts,
    analytics: Option<Arc<AnalyticsClient>>,
) -> Result<Arc<dyn Cache>> {
    let mut tiers: Vec<Arc<dyn Cache>> = Vec::new();
    tiers.push(Arc::new(FsCache::new(
        opts.cache_dir.clone(),
        analytics.clone(),
    )?));
    if let Some(remote) = &opts.remote {
        tiers.push(Arc::new(HttpCache::new(remote.clone(), analytics)?));
    }
    Ok(Arc::new(CacheMultiplexer::new(tiers)))
}
