//! Cache artifacts: gzip-wrapped tar archives with a SHA-512 integrity
//! digest computed over the compressed stream.
//!
//! Entries carry zeroed ownership and times so that byte-for-byte equality
//! holds across machines, and use anchored-unix names so archives restore
//! identically on every platform.

mod create;
mod restore;

pub use create::CacheWriter;
pub use restore::CacheReader;

/// Inspect an archive entry name: `(well_formed, windows_safe)`.
///
/// A well-formed name is a non-empty anchored-unix path with no `.`/`..`
/// segments and no doubled separators. Windows safety additionally forbids
/// `\` anywhere in the name.
pub(crate) fn check_name(name: &str) -> (bool, bool) {
    if name.is_empty() {
        return (false, false);
    }

    let mut well_formed = true;

    if name.starts_with('/') || name.starts_with("./") || name.starts_with("../") {
        well_formed = false;
    }
    if name.ends_with("/.") || name.ends_with("/..") {
        well_formed = false;
    }
    if name.contains("//") || name.contains("/./") || name.contains("/../") {
        well_formed = false;
    }
    if name == "." || name == ".." {
        well_formed = false;
    }

    let windows_safe = !name.contains('\\');
    (well_formed, windows_safe)
}
