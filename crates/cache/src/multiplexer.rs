//! The composite facade: ordered tiers, first-hit reads, fan-out writes.

use std::sync::Arc;

use tracing::warn;

use turbine_core::{AbsoluteSystemPathBuf, AnchoredSystemPathBuf, Error, Result};

use crate::{Cache, FetchedArtifact, ItemStatus};

pub struct CacheMultiplexer {
    tiers: Vec<Arc<dyn Cache>>,
}

impl CacheMultiplexer {
    pub fn new(tiers: Vec<Arc<dyn Cache>>) -> Self {
        Self { tiers }
    }
}

/// Missing-tier and transient-network failures are non-fatal; everything
/// else (corruption, disk full) propagates.
fn is_transient(err: &Error) -> bool {
    matches!(err, Error::Network { .. } | Error::Timeout { .. })
}

impl Cache for CacheMultiplexer {
    fn exists(&self, hash: &str) -> Result<ItemStatus> {
        let mut status = ItemStatus::default();
        for tier in &self.tiers {
            match tier.exists(hash) {
                Ok(tier_status) => {
                    status.local |= tier_status.local;
                    status.remote |= tier_status.remote;
                }
                Err(err) if is_transient(&err) => {
                    warn!(%hash, "cache tier unavailable during probe: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(status)
    }

    fn fetch(
        &self,
        anchor: &AbsoluteSystemPathBuf,
        hash: &str,
        globs: &[String],
    ) -> Result<Option<FetchedArtifact>> {
        for tier in &self.tiers {
            match tier.fetch(anchor, hash, globs) {
                Ok(Some(artifact)) => return Ok(Some(artifact)),
                Ok(None) => continue,
                Err(err) if is_transient(&err) => {
                    warn!(%hash, "cache tier unavailable, treating as miss: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(None)
    }

    fn put(
        &self,
        anchor: &AbsoluteSystemPathBuf,
        hash: &str,
        duration_ms: u64,
        files: &[AnchoredSystemPathBuf],
    ) -> Result<()> {
        for tier in &self.tiers {
            match tier.put(anchor, hash, duration_ms, files) {
                Ok(()) => {}
                Err(err) if is_transient(&err) => {
                    warn!(%hash, "cache tier rejected write, continuing: {err}");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn shutdown(&self) {
        for tier in &self.tiers {
            tier.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use crate::{CacheSource, FsCache, NoopCache};

    use super::*;

    struct UnreachableTier;

    impl Cache for UnreachableTier {
        fn exists(&self, _hash: &str) -> Result<ItemStatus> {
            Err(Error::network("http://cache.invalid", "connection refused"))
        }

        fn fetch(
            &self,
            _anchor: &AbsoluteSystemPathBuf,
            _hash: &str,
            _globs: &[String],
        ) -> Result<Option<FetchedArtifact>> {
            Err(Error::network("http://cache.invalid", "connection refused"))
        }

        fn put(
            &self,
            _anchor: &AbsoluteSystemPathBuf,
            _hash: &str,
            _duration_ms: u64,
            _files: &[AnchoredSystemPathBuf],
        ) -> Result<()> {
            Err(Error::network("http://cache.invalid", "connection refused"))
        }
    }

    fn abs(dir: &TempDir) -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf::new(dir.path()).unwrap()
    }

    #[test]
    fn first_hit_wins_and_transient_failures_downgrade_to_miss() {
        let workspace = TempDir::new().unwrap();
        std::fs::write(workspace.path().join("out.txt"), b"out").unwrap();
        let anchor = abs(&workspace);
        let files = vec![AnchoredSystemPathBuf::new("out.txt").unwrap()];

        let cache_dir = TempDir::new().unwrap();
        let local = Arc::new(FsCache::new(abs(&cache_dir), None).unwrap());
        let facade = CacheMultiplexer::new(vec![local, Arc::new(UnreachableTier)]);

        // Writes land on the local tier even with the remote down.
        facade.put(&anchor, "abcd123400000000", 7, &files).unwrap();
        assert!(facade.exists("abcd123400000000").unwrap().local);

        let out = TempDir::new().unwrap();
        let hit = facade
            .fetch(&abs(&out), "abcd123400000000", &[])
            .unwrap()
            .unwrap();
        assert_eq!(hit.source, CacheSource::Local);

        // An absent hash with a broken remote is a plain miss.
        assert!(facade
            .fetch(&abs(&out), "ffff000000000000", &[])
            .unwrap()
            .is_none());
    }

    #[test]
    fn noop_tiers_never_hit() {
        let facade = CacheMultiplexer::new(vec![Arc::new(NoopCache)]);
        let out = TempDir::new().unwrap();
        assert!(facade
            .fetch(&abs(&out), "0123456789abcdef", &[])
            .unwrap()
            .is_none());
        assert_eq!(
            facade.exists("0123456789abcdef").unwrap(),
            ItemStatus::default()
        );
    }
}
