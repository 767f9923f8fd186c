use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::{AnchoredSystemPathBuf, PathError};

/// A path stemming from some anchor, always using unix `/` separators.
/// This is the flavor stored inside cache artifacts and hash manifests so
/// that fingerprints agree across platforms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchoredUnixPathBuf(String);

impl AnchoredUnixPathBuf {
    /// Wrap an anchored unix path. Fails with `NotAnchored` on a leading `/`.
    pub fn new(path: impl Into<String>) -> Result<Self, PathError> {
        let path = path.into();
        if path.starts_with('/') {
            return Err(PathError::NotAnchored {
                path: PathBuf::from(path),
            });
        }
        Ok(Self(path))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert `/` to platform separators. The only place `/` becomes `\`.
    pub fn to_system(&self) -> AnchoredSystemPathBuf {
        let system = if std::path::MAIN_SEPARATOR == '/' {
            self.0.clone()
        } else {
            self.0.replace('/', std::path::MAIN_SEPARATOR_STR)
        };
        AnchoredSystemPathBuf::new(system).expect("anchored unix paths are never absolute")
    }

    /// Append a segment. Rejects absolute segments.
    pub fn join(&self, segment: &str) -> Result<AnchoredUnixPathBuf, PathError> {
        if segment.starts_with('/') {
            return Err(PathError::AbsoluteSegment {
                segment: segment.to_string(),
            });
        }
        if self.0.is_empty() {
            return AnchoredUnixPathBuf::new(segment);
        }
        AnchoredUnixPathBuf::new(format!("{}/{}", self.0, segment))
    }
}

impl fmt::Display for AnchoredUnixPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
