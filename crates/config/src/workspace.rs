//! Workspace discovery: read the root manifest's declared workspace globs
//! and collect every matching package manifest. No structure is inferred
//! beyond what the globs declare.

use std::collections::{BTreeMap, HashSet};
use std::fs;

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use tracing::debug;
use walkdir::WalkDir;

use turbine_core::{
    hash, AbsoluteSystemPathBuf, AnchoredSystemPathBuf, Error, PackageInfo, Result, Workspace,
    ROOT_PKG_NAME,
};

const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, Deserialize)]
struct RawManifest {
    name: Option<String>,
    #[serde(default)]
    workspaces: Vec<String>,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, String>,
}

fn read_manifest(path: &AbsoluteSystemPathBuf) -> Result<RawManifest> {
    let contents = fs::read_to_string(path.as_path())
        .map_err(|e| Error::file_system(path.as_path(), "read package manifest", e))?;
    serde_json::from_str(&contents).map_err(|e| Error::json(format!("{path}: {e}"), e))
}

fn workspace_globs(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::config(format!("invalid workspace glob `{pattern}`: {e}")))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::config(format!("invalid workspace globs: {e}")))
}

/// Scan the workspace: the root manifest names the package directory globs;
/// each matching directory containing a manifest becomes a package.
pub fn discover_workspace(root: &AbsoluteSystemPathBuf) -> Result<Workspace> {
    let root_manifest = read_manifest(&root.join_component(MANIFEST_FILE)?)?;
    let globs = workspace_globs(&root_manifest.workspaces)?;

    // First pass: collect raw manifests so workspace-internal dependencies
    // can be separated from external ones afterwards.
    let mut manifests: Vec<(AnchoredSystemPathBuf, RawManifest)> = Vec::new();
    for entry in WalkDir::new(root.as_path())
        .into_iter()
        .filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            name != "node_modules" && name != ".git"
        })
        .filter_map(|e| e.ok())
    {
        if entry.file_name().to_string_lossy() != MANIFEST_FILE || entry.depth() < 2 {
            continue;
        }
        let manifest_path = AbsoluteSystemPathBuf::new(entry.path())?;
        let dir = AbsoluteSystemPathBuf::new(entry.path().parent().unwrap())?;
        let rel_dir = dir.relative_to(root)?;
        let Ok(rel_unix) = rel_dir.to_unix() else {
            continue;
        };
        if !globs.is_match(rel_unix.as_str()) {
            continue;
        }
        let manifest = read_manifest(&manifest_path)?;
        manifests.push((rel_dir, manifest));
    }

    let names: HashSet<String> = manifests
        .iter()
        .filter_map(|(_, m)| m.name.clone())
        .collect();

    let mut packages = BTreeMap::new();
    for (dir, manifest) in manifests {
        let Some(name) = manifest.name else {
            debug!(dir = %dir, "skipping unnamed package");
            continue;
        };

        let mut workspace_deps = Vec::new();
        let mut external: BTreeMap<&String, &String> = BTreeMap::new();
        for (dep, version) in manifest
            .dependencies
            .iter()
            .chain(manifest.dev_dependencies.iter())
        {
            if names.contains(dep) {
                workspace_deps.push(dep.clone());
            } else {
                external.insert(dep, version);
            }
        }

        let info = PackageInfo {
            name: name.clone(),
            dir,
            scripts: manifest.scripts,
            dependencies: workspace_deps,
            external_deps_hash: hash::hash_object(&external)?,
        };
        if packages.insert(name.clone(), info).is_some() {
            return Err(Error::config(format!(
                "duplicate workspace package name `{name}`"
            )));
        }
    }

    // The workspace root participates as the `//` package so root-level
    // scripts can be addressed as `//#task`.
    packages.insert(
        ROOT_PKG_NAME.to_string(),
        PackageInfo {
            name: ROOT_PKG_NAME.to_string(),
            dir: AnchoredSystemPathBuf::new("")?,
            scripts: root_manifest.scripts,
            dependencies: Vec::new(),
            external_deps_hash: hash::hash_object(&BTreeMap::from_iter(
                root_manifest
                    .dependencies
                    .iter()
                    .chain(root_manifest.dev_dependencies.iter()),
            ))?,
        },
    );

    Workspace::new(root.clone(), packages)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn write(path: &std::path::Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn fixture() -> (TempDir, AbsoluteSystemPathBuf) {
        let dir = TempDir::new().unwrap();
        write(
            &dir.path().join(MANIFEST_FILE),
            r#"{"name": "fixture", "workspaces": ["packages/*"], "scripts": {"lint": "eslint ."}}"#,
        );
        write(
            &dir.path().join("packages/app/package.json"),
            r#"{"name": "app", "scripts": {"build": "build-app"},
                "dependencies": {"lib": "*", "react": "18.0.0"}}"#,
        );
        write(
            &dir.path().join("packages/lib/package.json"),
            r#"{"name": "lib", "scripts": {"build": "build-lib"}}"#,
        );
        let root = AbsoluteSystemPathBuf::new(dir.path()).unwrap();
        (dir, root)
    }

    #[test]
    fn discovers_packages_by_declared_globs() {
        let (_dir, root) = fixture();
        let ws = discover_workspace(&root).unwrap();
        assert!(ws.package("app").is_some());
        assert!(ws.package("lib").is_some());
        assert!(ws.package(ROOT_PKG_NAME).is_some());
        assert_eq!(ws.dependencies_of("app"), vec!["lib"]);
    }

    #[test]
    fn external_dependencies_change_the_fingerprint() {
        let (dir, root) = fixture();
        let before = ws_hash(&root);
        write(
            &dir.path().join("packages/app/package.json"),
            r#"{"name": "app", "scripts": {"build": "build-app"},
                "dependencies": {"lib": "*", "react": "19.0.0"}}"#,
        );
        let after = ws_hash(&root);
        assert_ne!(before, after);
    }

    fn ws_hash(root: &AbsoluteSystemPathBuf) -> String {
        discover_workspace(root)
            .unwrap()
            .package("app")
            .unwrap()
            .external_deps_hash
            .clone()
    }

    #[test]
    fn ignores_directories_outside_the_globs() {
        let (dir, root) = fixture();
        write(
            &dir.path().join("tools/helper/package.json"),
            r#"{"name": "helper"}"#,
        );
        let ws = discover_workspace(&root).unwrap();
        assert!(ws.package("helper").is_none());
    }
}
