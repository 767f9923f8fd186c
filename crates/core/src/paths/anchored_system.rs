use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{AbsoluteSystemPathBuf, AnchoredUnixPathBuf, PathError};

/// A path stemming from some anchor, using platform separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnchoredSystemPathBuf(PathBuf);

impl AnchoredSystemPathBuf {
    /// Wrap a relative path. Fails with `NotAnchored` on absolute input.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PathError> {
        let path = path.into();
        if path.is_absolute() {
            return Err(PathError::NotAnchored { path });
        }
        Ok(Self(path))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn to_str(&self) -> Result<&str, PathError> {
        self.0.to_str().ok_or_else(|| PathError::InvalidUnicode {
            path: self.0.clone(),
        })
    }

    /// Convert separators to unix `/`. The only place `\` leaves this flavor.
    pub fn to_unix(&self) -> Result<AnchoredUnixPathBuf, PathError> {
        let raw = self.to_str()?;
        let unix = if std::path::MAIN_SEPARATOR == '/' {
            raw.to_string()
        } else {
            raw.replace(std::path::MAIN_SEPARATOR, "/")
        };
        AnchoredUnixPathBuf::new(unix)
    }

    /// Prefix with the given anchor to recover an absolute path.
    pub fn restore_anchor(&self, anchor: &AbsoluteSystemPathBuf) -> AbsoluteSystemPathBuf {
        anchor.join(self)
    }

    /// Append another anchored segment. Rejects absolute segments.
    pub fn join(&self, tail: &AnchoredSystemPathBuf) -> AnchoredSystemPathBuf {
        AnchoredSystemPathBuf(self.0.join(&tail.0))
    }

    /// Append a single literal component. Rejects absolute segments.
    pub fn join_component(&self, component: &str) -> Result<AnchoredSystemPathBuf, PathError> {
        if Path::new(component).is_absolute() {
            return Err(PathError::AbsoluteSegment {
                segment: component.to_string(),
            });
        }
        Ok(AnchoredSystemPathBuf(self.0.join(component)))
    }
}

impl fmt::Display for AnchoredSystemPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

impl AsRef<Path> for AnchoredSystemPathBuf {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
