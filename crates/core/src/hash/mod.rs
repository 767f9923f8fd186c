//! Content hashing.
//!
//! Two digests are used throughout the engine: a git-compatible blob hash for
//! file contents (so fingerprints agree with what a git index would record),
//! and a truncated canonical-object hash for structured inputs.

use std::fs::File;
use std::io::{BufReader, Read};

use serde::Serialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};
use crate::paths::AbsoluteSystemPathBuf;

const READ_BUFFER_SIZE: usize = 8192;

/// Hash a file the way a git object store would: SHA-1 over
/// `"blob {len}\0"` followed by the raw bytes. Symlinks hash the link target
/// string, not the resolved file.
pub fn hash_file(path: &AbsoluteSystemPathBuf) -> Result<String> {
    let metadata = path
        .as_path()
        .symlink_metadata()
        .map_err(|e| Error::file_system(path.as_path(), "stat file for hashing", e))?;

    if metadata.file_type().is_symlink() {
        let target = std::fs::read_link(path.as_path())
            .map_err(|e| Error::file_system(path.as_path(), "read symlink for hashing", e))?;
        return Ok(hash_blob_bytes(target.to_string_lossy().as_bytes()));
    }

    let file = File::open(path.as_path())
        .map_err(|e| Error::file_system(path.as_path(), "open file for hashing", e))?;

    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", metadata.len()).as_bytes());

    let mut reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);
    let mut buffer = [0u8; READ_BUFFER_SIZE];
    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .map_err(|e| Error::file_system(path.as_path(), "read file chunk for hashing", e))?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Git blob digest of an in-memory byte string.
pub fn hash_blob_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(format!("blob {}\0", bytes.len()).as_bytes());
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Hash a serializable value: canonical JSON (struct fields in declared
/// order, `BTreeMap` for sorted maps) digested with SHA-256 and truncated to
/// 16 hex characters. Numeric and boolean formatting comes from the
/// serializer and is locale-independent.
pub fn hash_object<T: Serialize>(value: &T) -> Result<String> {
    let serialized = serde_json::to_vec(value)
        .map_err(|e| Error::json("failed to serialize value for hashing", e))?;
    let digest = Sha256::digest(&serialized);
    Ok(hex::encode(&digest[..8]))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use serde::Serialize;
    use tempfile::TempDir;

    use super::*;

    fn abs(dir: &TempDir, name: &str) -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf::new(dir.path().join(name)).unwrap()
    }

    #[test]
    fn empty_file_matches_git_empty_blob() {
        let dir = TempDir::new().unwrap();
        let path = abs(&dir, "empty");
        std::fs::write(path.as_path(), b"").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "e69de29bb2d1d6434b8b29ae775ad8c2e48c5391"
        );
    }

    #[test]
    fn file_contents_match_git_blob_digest() {
        let dir = TempDir::new().unwrap();
        let path = abs(&dir, "hello");
        std::fs::write(path.as_path(), b"hello world\n").unwrap();
        assert_eq!(
            hash_file(&path).unwrap(),
            "3b18e512dba79e4c8300dd08aeb37f8e728b8dad"
        );
    }

    #[cfg(unix)]
    #[test]
    fn symlink_hashes_target_string_not_contents() {
        let dir = TempDir::new().unwrap();
        let target = abs(&dir, "real");
        std::fs::write(target.as_path(), b"contents").unwrap();
        let link = abs(&dir, "link");
        std::os::unix::fs::symlink("real", link.as_path()).unwrap();

        assert_eq!(hash_file(&link).unwrap(), hash_blob_bytes(b"real"));
        assert_ne!(hash_file(&link).unwrap(), hash_file(&target).unwrap());
    }

    #[derive(Serialize)]
    struct WithOptional {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        extras: Option<Vec<String>>,
    }

    #[test]
    fn object_hash_is_deterministic_and_sixteen_hex() {
        let mut map = BTreeMap::new();
        map.insert("b", 2u64);
        map.insert("a", 1u64);
        let first = hash_object(&map).unwrap();
        let second = hash_object(&map).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 16);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn absent_and_empty_optionals_hash_differently() {
        let absent = WithOptional {
            name: "x".into(),
            extras: None,
        };
        let empty = WithOptional {
            name: "x".into(),
            extras: Some(Vec::new()),
        };
        assert_ne!(
            hash_object(&absent).unwrap(),
            hash_object(&empty).unwrap()
        );
    }
}
