//! The global hash: the fingerprint of workspace-wide inputs that feeds
//! every task hash. It covers the `globalDependencies` file contents, the
//! current values of `globalEnv` variables, the aggregate external
//! dependency fingerprint, the pipeline itself, and an opaque cache key
//! that lets a release bust every cache at once.

use std::collections::BTreeMap;

use globset::{GlobBuilder, GlobSetBuilder};
use ignore::WalkBuilder;
use serde::Serialize;
use tracing::debug;

use turbine_config::{HashableTask, Pipeline};
use turbine_core::{hash, AbsoluteSystemPathBuf, Error, Result, Workspace};

/// Bump to invalidate every existing cache artifact.
const GLOBAL_CACHE_KEY: &str = "turbine cache key v1";

#[derive(Serialize)]
struct GlobalHashable<'a> {
    global_file_hash_map: BTreeMap<String, String>,
    root_external_deps_hash: BTreeMap<&'a str, &'a str>,
    env_pairs: Vec<String>,
    pipeline: BTreeMap<&'a str, HashableTask<'a>>,
    global_cache_key: &'static str,
}

/// Compute the global hash for one invocation.
pub fn calculate_global_hash(
    workspace: &Workspace,
    pipeline: &Pipeline,
    global_dependencies: &[String],
    global_env: &[String],
) -> Result<String> {
    let global_file_hash_map = hash_global_files(workspace.root(), global_dependencies)?;

    let mut env_pairs: Vec<String> = global_env
        .iter()
        .map(|var| format!("{var}={}", std::env::var(var).unwrap_or_default()))
        .collect();
    env_pairs.sort();

    let hashable = GlobalHashable {
        global_file_hash_map,
        root_external_deps_hash: workspace.external_deps_aggregate().into_iter().collect(),
        env_pairs,
        pipeline: pipeline.hashable(),
        global_cache_key: GLOBAL_CACHE_KEY,
    };
    let global_hash = hash::hash_object(&hashable)?;
    debug!(hash = %global_hash, "computed global hash");
    Ok(global_hash)
}

/// Hash the files matched by the `globalDependencies` globs, anchored at the
/// workspace root. `node_modules` and VCS metadata never participate.
fn hash_global_files(
    root: &AbsoluteSystemPathBuf,
    globs: &[String],
) -> Result<BTreeMap<String, String>> {
    let mut files = BTreeMap::new();
    if globs.is_empty() {
        return Ok(files);
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in globs {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::config(format!("invalid global dependency glob `{pattern}`: {e}")))?;
        builder.add(glob);
    }
    let set = builder
        .build()
        .map_err(|e| Error::config(format!("invalid global dependency globs: {e}")))?;

    let walk = WalkBuilder::new(root.as_path())
        .hidden(false)
        .require_git(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .parents(false)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            name != "node_modules" && name != ".git"
        })
        .build();

    for entry in walk {
        let Ok(entry) = entry else { continue };
        if entry.file_type().is_some_and(|t| t.is_dir()) {
            continue;
        }
        let absolute = AbsoluteSystemPathBuf::new(entry.path())?;
        let relative = absolute.relative_to(root)?.to_unix()?;
        if set.is_match(relative.as_str()) {
            files.insert(relative.as_str().to_string(), hash::hash_file(&absolute)?);
        }
    }
    Ok(files)
}
