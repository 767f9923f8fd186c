use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use petgraph::algo;
use petgraph::graph::DiGraph;
use sha2::{Digest, Sha512};
use tar::{Archive, EntryType};

use turbine_core::{
    AbsoluteSystemPathBuf, AnchoredSystemPathBuf, AnchoredUnixPathBuf, Error, Result,
};

use super::check_name;

/// Reads an artifact back: `file -> gunzip -> tar`, with entry-name
/// validation and deferred symlink restoration.
pub struct CacheReader {
    path: AbsoluteSystemPathBuf,
}

/// A symlink whose target did not exist when its entry was reached. Links
/// get one shot at restoration, then are collected, DAG'd, and replayed in
/// topological order.
struct DeferredSymlink {
    name: AnchoredUnixPathBuf,
    target: String,
}

impl CacheReader {
    pub fn open(path: &AbsoluteSystemPathBuf) -> Result<Self> {
        if !path.exists() {
            return Err(Error::file_system(
                path.as_path(),
                "open cache artifact",
                io::Error::new(io::ErrorKind::NotFound, "no such artifact"),
            ));
        }
        Ok(Self { path: path.clone() })
    }

    /// Hash the compressed stream and compare against the recorded digest.
    pub fn verify_integrity(&self, expected_hex: &str) -> Result<()> {
        let mut file = File::open(self.path.as_path())
            .map_err(|e| Error::file_system(self.path.as_path(), "open cache artifact", e))?;
        let mut hasher = Sha512::new();
        let mut buffer = [0u8; 8192];
        loop {
            let read = file
                .read(&mut buffer)
                .map_err(|e| Error::file_system(self.path.as_path(), "read cache artifact", e))?;
            if read == 0 {
                break;
            }
            hasher.update(&buffer[..read]);
        }
        let actual = hex::encode(hasher.finalize());
        if actual != expected_hex {
            return Err(Error::cache_corrupt(
                self.path.as_path(),
                "integrity digest mismatch",
            ));
        }
        Ok(())
    }

    /// Extract the artifact under `anchor`, returning every restored path.
    pub fn restore(&self, anchor: &AbsoluteSystemPathBuf) -> Result<Vec<AnchoredSystemPathBuf>> {
        let file = File::open(self.path.as_path())
            .map_err(|e| Error::file_system(self.path.as_path(), "open cache artifact", e))?;
        let mut archive = Archive::new(GzDecoder::new(file));

        let mut restored = Vec::new();
        let mut deferred: Vec<DeferredSymlink> = Vec::new();

        for entry in archive
            .entries()
            .map_err(|e| Error::file_system(self.path.as_path(), "read tar entries", e))?
        {
            let mut entry =
                entry.map_err(|e| Error::file_system(self.path.as_path(), "read tar entry", e))?;

            let name = {
                let bytes = entry.path_bytes();
                let raw = std::str::from_utf8(&bytes).map_err(|_| Error::NameMalformed {
                    name: String::from_utf8_lossy(&bytes).into_owned(),
                })?;
                // Directory entries may carry the tar trailing slash.
                raw.strip_suffix('/').unwrap_or(raw).to_string()
            };

            let (well_formed, windows_safe) = check_name(&name);
            if !well_formed {
                return Err(Error::NameMalformed { name });
            }
            if cfg!(windows) && !windows_safe {
                return Err(Error::NameWindowsUnsafe { name });
            }

            let unix = AnchoredUnixPathBuf::new(name.clone())?;
            let system = unix.to_system();
            let dest = system.restore_anchor(anchor);

            match entry.header().entry_type() {
                EntryType::Directory => {
                    fs::create_dir_all(dest.as_path()).map_err(|e| {
                        Error::file_system(dest.as_path(), "restore directory", e)
                    })?;
                    restored.push(system);
                }
                EntryType::Regular => {
                    ensure_parent(dest.as_path())?;
                    let mut out = File::create(dest.as_path())
                        .map_err(|e| Error::file_system(dest.as_path(), "restore file", e))?;
                    io::copy(&mut entry, &mut out)
                        .map_err(|e| Error::file_system(dest.as_path(), "write file body", e))?;
                    restore_mode(dest.as_path(), entry.header().mode().ok())?;
                    restored.push(system);
                }
                EntryType::Symlink => {
                    let target = entry
                        .link_name()
                        .map_err(|e| Error::file_system(dest.as_path(), "read link target", e))?
                        .ok_or_else(|| Error::NameMalformed { name: name.clone() })?
                        .to_string_lossy()
                        .into_owned();
                    if try_restore_symlink(anchor, &unix, &target)? {
                        restored.push(system);
                    } else {
                        deferred.push(DeferredSymlink { name: unix, target });
                    }
                }
                _ => return Err(Error::UnsupportedFileType { name }),
            }
        }

        restored.extend(restore_deferred(anchor, deferred)?);
        Ok(restored)
    }
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::file_system(parent, "create parent directory", e))?;
    }
    Ok(())
}

#[cfg(unix)]
fn restore_mode(path: &Path, mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .map_err(|e| Error::file_system(path, "restore file mode", e))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restore_mode(_path: &Path, _mode: Option<u32>) -> Result<()> {
    Ok(())
}

/// Create the link if its target already exists on disk. Returns false when
/// the target is still missing and the link must be deferred.
fn try_restore_symlink(
    anchor: &AbsoluteSystemPathBuf,
    link: &AnchoredUnixPathBuf,
    target: &str,
) -> Result<bool> {
    let dest = link.to_system().restore_anchor(anchor);
    let target_path = resolve_on_disk(dest.as_path(), target);
    if target_path.symlink_metadata().is_err() {
        return Ok(false);
    }
    create_symlink(target, dest.as_path())?;
    Ok(true)
}

/// Where a link's target lands on disk: absolute targets stand alone,
/// relative targets resolve against the link's parent directory.
fn resolve_on_disk(link_dest: &Path, target: &str) -> PathBuf {
    let target_path = Path::new(target);
    if target_path.is_absolute() {
        return target_path.to_path_buf();
    }
    match link_dest.parent() {
        Some(parent) => parent.join(target_path),
        None => target_path.to_path_buf(),
    }
}

#[cfg(unix)]
fn create_symlink(target: &str, dest: &Path) -> Result<()> {
    ensure_parent(dest)?;
    if dest.symlink_metadata().is_ok() {
        fs::remove_file(dest)
            .map_err(|e| Error::file_system(dest, "replace existing symlink", e))?;
    }
    std::os::unix::fs::symlink(target, dest)
        .map_err(|e| Error::file_system(dest, "restore symlink", e))
}

#[cfg(not(unix))]
fn create_symlink(_target: &str, dest: &Path) -> Result<()> {
    Err(Error::UnsupportedFileType {
        name: dest.display().to_string(),
    })
}

/// Restore the links whose targets were missing on first pass. Links that
/// point at other deferred links form a DAG restored in topological order; a
/// cycle or a target that never materializes is an error.
fn restore_deferred(
    anchor: &AbsoluteSystemPathBuf,
    deferred: Vec<DeferredSymlink>,
) -> Result<Vec<AnchoredSystemPathBuf>> {
    if deferred.is_empty() {
        return Ok(Vec::new());
    }

    let mut graph = DiGraph::<usize, ()>::new();
    let mut by_name = HashMap::new();
    for (index, link) in deferred.iter().enumerate() {
        let node = graph.add_node(index);
        by_name.insert(link.name.as_str().to_string(), node);
    }
    for link in &deferred {
        let from = by_name[link.name.as_str()];
        if let Some(target_name) = resolve_within_anchor(link.name.as_str(), &link.target) {
            if let Some(&to) = by_name.get(&target_name) {
                if from != to {
                    graph.add_edge(from, to, ());
                }
            }
        }
    }

    let order = algo::toposort(&graph, None).map_err(|_| Error::LinkCycle {
        names: deferred.iter().map(|l| l.name.as_str().to_string()).collect(),
    })?;

    let mut restored = Vec::new();
    // Edges point link -> target, so targets restore first in reverse order.
    for node in order.into_iter().rev() {
        let link = &deferred[graph[node]];
        if !try_restore_symlink(anchor, &link.name, &link.target)? {
            return Err(Error::MissingSymlinkTarget {
                name: link.name.as_str().to_string(),
                target: link.target.clone(),
            });
        }
        restored.push(link.name.to_system());
    }
    Ok(restored)
}

/// Lexically resolve a link target against the link's parent, staying
/// inside the anchor. Returns the anchored-unix name of the target, or None
/// when the target escapes or is absolute.
fn resolve_within_anchor(link_name: &str, target: &str) -> Option<String> {
    if target.starts_with('/') {
        return None;
    }
    let mut segments: Vec<&str> = link_name.split('/').collect();
    segments.pop(); // the link itself
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::super::CacheWriter;
    use super::*;

    fn abs(dir: &TempDir) -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf::new(dir.path()).unwrap()
    }

    fn anchored(path: &str) -> AnchoredSystemPathBuf {
        AnchoredSystemPathBuf::new(path).unwrap()
    }

    fn write_archive(
        source: &AbsoluteSystemPathBuf,
        artifact: &AbsoluteSystemPathBuf,
        files: &[&str],
    ) -> String {
        let mut writer = CacheWriter::create(artifact).unwrap();
        for file in files {
            writer.add_file(source, &anchored(file)).unwrap();
        }
        writer.finish().unwrap()
    }

    #[test]
    fn round_trips_files_directories_and_links() {
        let source_dir = TempDir::new().unwrap();
        let source = abs(&source_dir);
        std::fs::create_dir_all(source_dir.path().join("dist/assets")).unwrap();
        std::fs::write(source_dir.path().join("dist/out.js"), b"console.log(1)").unwrap();
        std::fs::write(source_dir.path().join("dist/assets/logo.svg"), b"<svg/>").unwrap();
        std::os::unix::fs::symlink("out.js", source_dir.path().join("dist/latest")).unwrap();

        let artifact_dir = TempDir::new().unwrap();
        let artifact = abs(&artifact_dir).join_component("item.tar.gz").unwrap();
        let digest = write_archive(
            &source,
            &artifact,
            &["dist", "dist/out.js", "dist/assets", "dist/assets/logo.svg", "dist/latest"],
        );

        let reader = CacheReader::open(&artifact).unwrap();
        reader.verify_integrity(&digest).unwrap();

        let out_dir = TempDir::new().unwrap();
        let mut restored: Vec<String> = reader
            .restore(&abs(&out_dir))
            .unwrap()
            .iter()
            .map(|p| p.to_unix().unwrap().as_str().to_string())
            .collect();
        restored.sort();
        assert_eq!(
            restored,
            vec![
                "dist",
                "dist/assets",
                "dist/assets/logo.svg",
                "dist/latest",
                "dist/out.js"
            ]
        );
        assert_eq!(
            std::fs::read(out_dir.path().join("dist/out.js")).unwrap(),
            b"console.log(1)"
        );
        assert_eq!(
            std::fs::read_link(out_dir.path().join("dist/latest")).unwrap(),
            std::path::PathBuf::from("out.js")
        );
    }

    #[test]
    fn deferred_symlink_chains_restore_in_any_order() {
        let source_dir = TempDir::new().unwrap();
        let source = abs(&source_dir);
        std::fs::write(source_dir.path().join("a"), b"payload").unwrap();
        std::os::unix::fs::symlink("a", source_dir.path().join("b")).unwrap();
        std::os::unix::fs::symlink("b", source_dir.path().join("c")).unwrap();

        let artifact_dir = TempDir::new().unwrap();
        let artifact = abs(&artifact_dir).join_component("links.tar.gz").unwrap();
        // Adversarial order: both links precede their targets.
        write_archive(&source, &artifact, &["c", "b", "a"]);

        let out_dir = TempDir::new().unwrap();
        let restored = CacheReader::open(&artifact)
            .unwrap()
            .restore(&abs(&out_dir))
            .unwrap();
        assert_eq!(restored.len(), 3);
        assert_eq!(
            std::fs::read(out_dir.path().join("c")).unwrap(),
            b"payload"
        );
        assert_eq!(
            std::fs::read(out_dir.path().join("b")).unwrap(),
            b"payload"
        );
    }

    #[test]
    fn cyclic_links_fail_restoration() {
        let source_dir = TempDir::new().unwrap();
        let source = abs(&source_dir);
        std::os::unix::fs::symlink("y", source_dir.path().join("x")).unwrap();
        std::os::unix::fs::symlink("x", source_dir.path().join("y")).unwrap();

        let artifact_dir = TempDir::new().unwrap();
        let artifact = abs(&artifact_dir).join_component("cycle.tar.gz").unwrap();
        write_archive(&source, &artifact, &["x", "y"]);

        let out_dir = TempDir::new().unwrap();
        let err = CacheReader::open(&artifact)
            .unwrap()
            .restore(&abs(&out_dir))
            .unwrap_err();
        assert!(matches!(err, Error::LinkCycle { .. }), "got {err}");
    }

    #[test]
    fn dangling_link_target_fails_restoration() {
        let source_dir = TempDir::new().unwrap();
        let source = abs(&source_dir);
        std::os::unix::fs::symlink("missing", source_dir.path().join("orphan")).unwrap();

        let artifact_dir = TempDir::new().unwrap();
        let artifact = abs(&artifact_dir).join_component("orphan.tar.gz").unwrap();
        write_archive(&source, &artifact, &["orphan"]);

        let out_dir = TempDir::new().unwrap();
        let err = CacheReader::open(&artifact)
            .unwrap()
            .restore(&abs(&out_dir))
            .unwrap_err();
        assert!(matches!(err, Error::MissingSymlinkTarget { .. }), "got {err}");
    }

    #[test]
    fn corrupted_artifact_fails_integrity_check() {
        let source_dir = TempDir::new().unwrap();
        let source = abs(&source_dir);
        std::fs::write(source_dir.path().join("file"), b"data").unwrap();

        let artifact_dir = TempDir::new().unwrap();
        let artifact = abs(&artifact_dir).join_component("bad.tar.gz").unwrap();
        let digest = write_archive(&source, &artifact, &["file"]);

        let mut bytes = std::fs::read(artifact.as_path()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(artifact.as_path(), &bytes).unwrap();

        let err = CacheReader::open(&artifact)
            .unwrap()
            .verify_integrity(&digest)
            .unwrap_err();
        assert!(matches!(err, Error::CacheCorrupt { .. }), "got {err}");
    }
}
