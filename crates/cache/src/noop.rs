//! A cache that stores nothing. Used when caching is disabled entirely.

use turbine_core::{AbsoluteSystemPathBuf, AnchoredSystemPathBuf, Result};

use crate::{Cache, FetchedArtifact, ItemStatus};

pub struct NoopCache;

impl Cache for NoopCache {
    fn exists(&self, _hash: &str) -> Result<ItemStatus> {
        Ok(ItemStatus::default())
    }

    fn fetch(
        &self,
        _anchor: &AbsoluteSystemPathBuf,
        _hash: &str,
        _globs: &[String],
    ) -> Result<Option<FetchedArtifact>> {
        Ok(None)
    }

    fn put(
        &self,
        _anchor: &AbsoluteSystemPathBuf,
        _hash: &str,
        _duration_ms: u64,
        _files: &[AnchoredSystemPathBuf],
    ) -> Result<()> {
        Ok(())
    }
}
