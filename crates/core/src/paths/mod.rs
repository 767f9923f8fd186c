//! Typed path model.
//!
//! Four distinct flavors, each an opaque wrapper with explicit conversion:
//! absolute/anchored crossed with system/unix separators. APIs that take a
//! workspace or cache path accept exactly one flavor; `\` vs `/` translation
//! happens only inside the system/unix conversions.

mod absolute_system;
mod absolute_unix;
mod anchored_system;
mod anchored_unix;

use std::path::PathBuf;

pub use absolute_system::AbsoluteSystemPathBuf;
pub use absolute_unix::AbsoluteUnixPathBuf;
pub use anchored_system::AnchoredSystemPathBuf;
pub use anchored_unix::AnchoredUnixPathBuf;

/// Path flavor violations
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("path is not absolute: {path}")]
    NotAbsolute { path: PathBuf },

    #[error("path is not anchored: {path}")]
    NotAnchored { path: PathBuf },

    #[error("cannot join an absolute segment: {segment}")]
    AbsoluteSegment { segment: String },

    #[error("{path} is outside of anchor {anchor}")]
    OutsideAnchor { path: PathBuf, anchor: PathBuf },

    #[error("path is not valid unicode: {path}")]
    InvalidUnicode { path: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor() -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf::new(std::env::temp_dir().join("repo")).unwrap()
    }

    #[test]
    fn join_then_relative_to_round_trips() {
        let anchor = anchor();
        let tail = AnchoredSystemPathBuf::new("packages/web/dist").unwrap();
        let joined = anchor.join(&tail);
        assert_eq!(joined.relative_to(&anchor).unwrap(), tail);
    }

    #[test]
    fn relative_to_rejects_escaping_paths() {
        let anchor = anchor();
        let elsewhere = AbsoluteSystemPathBuf::new(std::env::temp_dir().join("other")).unwrap();
        let err = elsewhere.relative_to(&anchor).unwrap_err();
        assert!(matches!(err, PathError::OutsideAnchor { .. }));
    }

    #[test]
    fn join_component_rejects_absolute_segments() {
        let anchor = anchor();
        assert!(matches!(
            anchor.join_component("/etc/passwd").unwrap_err(),
            PathError::AbsoluteSegment { .. }
        ));
    }

    #[test]
    fn flavors_reject_wrong_shape() {
        assert!(AbsoluteSystemPathBuf::new("relative/path").is_err());
        assert!(AnchoredSystemPathBuf::new(std::env::temp_dir()).is_err());
        assert!(AnchoredUnixPathBuf::new("/leading/slash").is_err());
        assert!(AbsoluteUnixPathBuf::new("no/slash").is_err());
    }

    #[test]
    fn unix_system_conversions_round_trip() {
        let system = AnchoredSystemPathBuf::new("a/b/c.txt").unwrap();
        let unix = system.to_unix().unwrap();
        assert_eq!(unix.as_str(), "a/b/c.txt");
        assert_eq!(unix.to_system(), system);
    }

    #[test]
    fn unix_join_builds_slash_paths() {
        let base = AnchoredUnixPathBuf::new("dist").unwrap();
        assert_eq!(base.join("out.js").unwrap().as_str(), "dist/out.js");
        assert!(base.join("/abs").is_err());
    }
}
