use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{AnchoredSystemPathBuf, PathError};

/// An absolute path using the separators of the current platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AbsoluteSystemPathBuf(PathBuf);

impl AbsoluteSystemPathBuf {
    /// Wrap an absolute path. Fails with `NotAbsolute` otherwise.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, PathError> {
        let path = path.into();
        if !path.is_absolute() {
            return Err(PathError::NotAbsolute { path });
        }
        Ok(Self(path))
    }

    /// The current working directory as an anchor.
    pub fn cwd() -> std::io::Result<Self> {
        Ok(Self(std::env::current_dir()?))
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn exists(&self) -> bool {
        self.0.exists()
    }

    /// Append an anchored path. Anchored paths are relative by construction,
    /// so this cannot escape through an absolute segment.
    pub fn join(&self, tail: &AnchoredSystemPathBuf) -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf(self.0.join(tail.as_path()))
    }

    /// Append a single literal component. Rejects absolute segments.
    pub fn join_component(&self, component: &str) -> Result<AbsoluteSystemPathBuf, PathError> {
        if Path::new(component).is_absolute() {
            return Err(PathError::AbsoluteSegment {
                segment: component.to_string(),
            });
        }
        Ok(AbsoluteSystemPathBuf(self.0.join(component)))
    }

    /// Express this path relative to `anchor`. Fails with `OutsideAnchor` if
    /// the result would escape it.
    pub fn relative_to(
        &self,
        anchor: &AbsoluteSystemPathBuf,
    ) -> Result<AnchoredSystemPathBuf, PathError> {
        let tail = self
            .0
            .strip_prefix(&anchor.0)
            .map_err(|_| PathError::OutsideAnchor {
                path: self.0.clone(),
                anchor: anchor.0.clone(),
            })?;
        AnchoredSystemPathBuf::new(tail)
    }
}

impl fmt::Display for AbsoluteSystemPathBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.display().fmt(f)
    }
}

impl AsRef<Path> for AbsoluteSystemPathBuf {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}
