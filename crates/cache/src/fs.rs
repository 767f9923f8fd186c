//! The local disk tier. Artifacts land as `<hash>.tar.gz` plus a `.meta`
//! sidecar carrying the integrity digest and the original task duration.
//! Writes are atomic (temp file + rename) and serialized per hash so two
//! concurrent builds of the same fingerprint never corrupt one archive.

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use turbine_core::{AbsoluteSystemPathBuf, AnchoredSystemPathBuf, Error, Result};

use crate::analytics::{AnalyticsClient, CacheEventStatus};
use crate::item::{CacheReader, CacheWriter};
use crate::{Cache, CacheSource, FetchedArtifact, ItemStatus};

/// Sidecar contents for one artifact.
#[derive(Debug, Serialize, Deserialize)]
struct CacheMetadata {
    hash: String,
    /// Original task duration in milliseconds.
    duration: u64,
    /// Hex SHA-512 of the compressed archive.
    integrity: String,
}

pub struct FsCache {
    cache_dir: AbsoluteSystemPathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    analytics: Option<Arc<AnalyticsClient>>,
}

impl FsCache {
    pub fn new(
        cache_dir: AbsoluteSystemPathBuf,
        analytics: Option<Arc<AnalyticsClient>>,
    ) -> Result<Self> {
        fs::create_dir_all(cache_dir.as_path())
            .map_err(|e| Error::file_system(cache_dir.as_path(), "create cache directory", e))?;
        Ok(Self {
            cache_dir,
            locks: Mutex::new(HashMap::new()),
            analytics,
        })
    }

    fn archive_path(&self, hash: &str) -> Result<AbsoluteSystemPathBuf> {
        Ok(self.cache_dir.join_component(&format!("{hash}.tar.gz"))?)
    }

    fn meta_path(&self, hash: &str) -> Result<AbsoluteSystemPathBuf> {
        Ok(self.cache_dir.join_component(&format!("{hash}.meta"))?)
    }

    fn hash_lock(&self, hash: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(hash.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn read_metadata(&self, hash: &str) -> Result<CacheMetadata> {
        let path = self.meta_path(hash)?;
        let contents = fs::read_to_string(path.as_path())
            .map_err(|e| Error::file_system(path.as_path(), "read cache metadata", e))?;
        serde_json::from_str(&contents).map_err(|e| Error::json(format!("{path}: {e}"), e))
    }

    /// Drop a corrupt artifact and its sidecar so the next run starts clean.
    fn remove(&self, hash: &str) {
        if let Ok(path) = self.archive_path(hash) {
            let _ = fs::remove_file(path.as_path());
        }
        if let Ok(path) = self.meta_path(hash) {
            let _ = fs::remove_file(path.as_path());
        }
    }

    fn record(&self, event: CacheEventStatus, hash: &str, duration: u64) {
        if let Some(analytics) = &self.analytics {
            analytics.log_event(CacheSource::Local, event, hash, duration);
        }
    }
}

impl Cache for FsCache {
    fn exists(&self, hash: &str) -> Result<ItemStatus> {
        Ok(ItemStatus {
            local: self.archive_path(hash)?.exists(),
            remote: false,
        })
    }

    fn fetch(
        &self,
        anchor: &AbsoluteSystemPathBuf,
        hash: &str,
        _globs: &[String],
    ) -> Result<Option<FetchedArtifact>> {
        let archive = self.archive_path(hash)?;
        if !archive.exists() {
            self.record(CacheEventStatus::Miss, hash, 0);
            return Ok(None);
        }

        let metadata = match self.read_metadata(hash) {
            Ok(metadata) => metadata,
            Err(err) => {
                warn!(%hash, "cache artifact has no readable metadata, discarding: {err}");
                self.remove(hash);
                return Err(Error::cache_corrupt(
                    archive.as_path(),
                    "missing or unreadable metadata sidecar",
                ));
            }
        };

        let reader = CacheReader::open(&archive)?;
        if let Err(err) = reader.verify_integrity(&metadata.integrity) {
            self.remove(hash);
            return Err(err);
        }

        let files = reader.restore(anchor)?;
        debug!(%hash, files = files.len(), "restored artifact from local cache");
        self.record(CacheEventStatus::Hit, hash, metadata.duration);
        Ok(Some(FetchedArtifact {
            source: CacheSource::Local,
            files,
            duration_ms: metadata.duration,
        }))
    }

    fn put(
        &self,
        anchor: &AbsoluteSystemPathBuf,
        hash: &str,
        duration_ms: u64,
        files: &[AnchoredSystemPathBuf],
    ) -> Result<()> {
        let lock = self.hash_lock(hash);
        let _guard = lock.lock();

        let temp = self
            .cache_dir
            .join_component(&format!(".{}.tmp", Uuid::new_v4()))?;
        let result = (|| -> Result<String> {
            let mut writer = CacheWriter::create(&temp)?;
            for file in files {
                writer.add_file(anchor, file)?;
            }
            writer.finish()
        })();

        let integrity = match result {
            Ok(integrity) => integrity,
            Err(err) => {
                let _ = fs::remove_file(temp.as_path());
                return Err(err);
            }
        };

        let archive = self.archive_path(hash)?;
        fs::rename(temp.as_path(), archive.as_path()).map_err(|e| {
            let _ = fs::remove_file(temp.as_path());
            Error::file_system(archive.as_path(), "publish cache artifact", e)
        })?;

        let metadata = CacheMetadata {
            hash: hash.to_string(),
            duration: duration_ms,
            integrity,
        };
        let serialized = serde_json::to_string(&metadata)
            .map_err(|e| Error::json("failed to serialize cache metadata", e))?;
        write_atomic(&self.meta_path(hash)?, serialized.as_bytes())
    }
}

/// Write via a temp file in the same directory followed by a rename.
fn write_atomic(path: &AbsoluteSystemPathBuf, contents: &[u8]) -> Result<()> {
    let parent = path
        .as_path()
        .parent()
        .ok_or_else(|| Error::internal("atomic write target has no parent"))?;
    let temp = parent.join(format!(".{}.tmp", Uuid::new_v4()));
    fs::write(&temp, contents).map_err(|e| Error::file_system(&temp, "write temp file", e))?;
    fs::rename(&temp, path.as_path()).map_err(|e| {
        let _ = fs::remove_file(&temp);
        Error::file_system(path.as_path(), "atomic rename", e)
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn abs(dir: &TempDir) -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf::new(dir.path()).unwrap()
    }

    fn seeded_workspace() -> (TempDir, AbsoluteSystemPathBuf, Vec<AnchoredSystemPathBuf>) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("dist")).unwrap();
        std::fs::write(dir.path().join("dist/out.js"), b"bundle").unwrap();
        let anchor = abs(&dir);
        let files = vec![
            AnchoredSystemPathBuf::new("dist").unwrap(),
            AnchoredSystemPathBuf::new("dist/out.js").unwrap(),
        ];
        (dir, anchor, files)
    }

    #[test]
    fn put_makes_exists_true_and_fetch_restores() {
        let cache_dir = TempDir::new().unwrap();
        let cache = FsCache::new(abs(&cache_dir), None).unwrap();
        let (_ws, anchor, files) = seeded_workspace();

        assert!(!cache.exists("deadbeef00000000").unwrap().local);
        cache.put(&anchor, "deadbeef00000000", 1200, &files).unwrap();
        assert!(cache.exists("deadbeef00000000").unwrap().local);

        let out = TempDir::new().unwrap();
        let fetched = cache
            .fetch(&abs(&out), "deadbeef00000000", &[])
            .unwrap()
            .unwrap();
        assert_eq!(fetched.source, CacheSource::Local);
        assert_eq!(fetched.duration_ms, 1200);
        assert_eq!(
            std::fs::read(out.path().join("dist/out.js")).unwrap(),
            b"bundle"
        );
    }

    #[test]
    fn failed_put_leaves_no_visible_artifact() {
        let cache_dir = TempDir::new().unwrap();
        let cache = FsCache::new(abs(&cache_dir), None).unwrap();
        let (_ws, anchor, _) = seeded_workspace();

        let missing = vec![AnchoredSystemPathBuf::new("does/not/exist").unwrap()];
        assert!(cache.put(&anchor, "cafebabe00000000", 10, &missing).is_err());
        assert!(!cache.exists("cafebabe00000000").unwrap().local);
        // No temp files left behind either.
        let leftovers: Vec<_> = std::fs::read_dir(cache_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(leftovers.is_empty(), "leftovers: {leftovers:?}");
    }

    #[test]
    fn corrupted_archive_is_removed_and_reported() {
        let cache_dir = TempDir::new().unwrap();
        let cache = FsCache::new(abs(&cache_dir), None).unwrap();
        let (_ws, anchor, files) = seeded_workspace();
        cache.put(&anchor, "feedface00000000", 5, &files).unwrap();

        let archive = cache.archive_path("feedface00000000").unwrap();
        let mut bytes = std::fs::read(archive.as_path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(archive.as_path(), &bytes).unwrap();

        let out = TempDir::new().unwrap();
        let err = cache
            .fetch(&abs(&out), "feedface00000000", &[])
            .unwrap_err();
        assert!(matches!(err, Error::CacheCorrupt { .. }), "got {err}");
        assert!(!cache.exists("feedface00000000").unwrap().local);
    }

    #[test]
    fn fetch_of_absent_hash_is_a_miss() {
        let cache_dir = TempDir::new().unwrap();
        let cache = FsCache::new(abs(&cache_dir), None).unwrap();
        let out = TempDir::new().unwrap();
        assert!(cache.fetch(&abs(&out), "0000000000000000", &[]).unwrap().is_none());
    }
}
