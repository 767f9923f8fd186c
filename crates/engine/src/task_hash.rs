//! The task hash tracker.
//!
//! Hashing is two-phase. Phase one hashes each unique `(package, inputs)`
//! combination present in the graph, in parallel across a worker pool.
//! Phase two assembles per-task hashes from the file hash, the package's
//! external dependency fingerprint, the task name and outputs, CLI
//! arguments, declared environment values, the global hash, and the sorted
//! hashes of dependency tasks. Phase two is threadsafe provided it runs in
//! topological order: a dependency's write always completes before any
//! dependent becomes eligible.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::mpsc;
use std::sync::Arc;

use dashmap::DashMap;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::debug;

use turbine_core::{
    hash, AbsoluteSystemPathBuf, Error, PackageInfo, Result, Workspace, ROOT_NODE_NAME,
};

use crate::graph::TaskGraph;
use crate::nodes::PackageTask;

/// Sentinel in `inputs` expanding to the default all-tracked-files set.
pub const DEFAULT_INPUTS_SENTINEL: &str = "$TURBO_DEFAULT$";

/// Directories never considered task inputs.
const ALWAYS_IGNORED: &[&str] = &["node_modules", ".git", ".turbo"];

type FileHashes = Arc<BTreeMap<String, String>>;

pub struct Tracker {
    global_hash: String,
    package_file_hashes: DashMap<String, (String, FileHashes)>,
    task_hashes: RwLock<HashMap<String, String>>,
}

/// The canonical serialization that becomes the task hash.
#[derive(Serialize)]
struct TaskHashable<'a> {
    hash_of_files: &'a str,
    external_deps_hash: &'a str,
    task: &'a str,
    outputs: Vec<String>,
    pass_through_args: &'a [String],
    env_pairs: Vec<String>,
    global_hash: &'a str,
    dependency_hashes: Vec<String>,
}

/// Key for one `(package, sorted inputs)` combination.
fn file_hash_key(package: &str, inputs: &[String]) -> String {
    let mut sorted = inputs.to_vec();
    sorted.sort();
    format!("{package}#{}", sorted.join("!"))
}

impl Tracker {
    pub fn new(global_hash: String) -> Self {
        Self {
            global_hash,
            package_file_hashes: DashMap::new(),
            task_hashes: RwLock::new(HashMap::new()),
        }
    }

    pub fn global_hash(&self) -> &str {
        &self.global_hash
    }

    /// Phase one: hash every unique package-inputs combination in the graph
    /// across `worker_count` threads. Must run before task hashing.
    pub fn calculate_file_hashes(
        &self,
        graph: &TaskGraph,
        workspace: &Workspace,
        worker_count: usize,
    ) -> Result<()> {
        let mut specs: HashSet<(String, Vec<String>)> = HashSet::new();
        for task_id in graph.task_ids() {
            let Some((package, _)) = turbine_core::task_id::split(task_id) else {
                continue;
            };
            let definition = graph
                .definition(task_id)
                .ok_or_else(|| Error::internal(format!("no definition for {task_id}")))?;
            let mut inputs = definition.inputs.clone();
            inputs.sort();
            specs.insert((package.to_string(), inputs));
        }

        let workers = worker_count.max(1);
        let (sender, receiver) = mpsc::sync_channel::<(String, Vec<String>)>(workers);
        let receiver = Mutex::new(receiver);
        let first_error: Mutex<Option<Error>> = Mutex::new(None);

        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let spec = receiver.lock().recv();
                    let Ok((package_name, inputs)) = spec else {
                        break;
                    };
                    let result = (|| -> Result<()> {
                        let package = workspace
                            .package(&package_name)
                            .ok_or_else(|| Error::undefined_package(&package_name))?;
                        let files = hash_package_inputs(workspace.root(), package, &inputs)?;
                        let hash_of_files = hash::hash_object(&files)?;
                        self.package_file_hashes.insert(
                            file_hash_key(&package_name, &inputs),
                            (hash_of_files, Arc::new(files)),
                        );
                        Ok(())
                    })();
                    if let Err(err) = result {
                        first_error.lock().get_or_insert(err);
                    }
                });
            }

            for spec in specs {
                if sender.send(spec).is_err() {
                    break;
                }
            }
            drop(sender);
        });

        match first_error.into_inner() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Phase two: assemble one task's hash. `dependencies` are the task ids
    /// this node depends on; their hashes must already be present.
    pub fn calculate_task_hash(
        &self,
        task: &PackageTask,
        dependencies: &[&str],
        args: &[String],
    ) -> Result<String> {
        let key = file_hash_key(&task.package_name, &task.definition.inputs);
        let hash_of_files = self
            .package_file_hashes
            .get(&key)
            .map(|entry| entry.0.clone())
            .ok_or_else(|| {
                Error::internal(format!("missing package-file hash for {key}"))
            })?;

        let mut env_pairs: Vec<String> = task
            .definition
            .env
            .iter()
            .map(|var| format!("{var}={}", std::env::var(var).unwrap_or_default()))
            .collect();
        env_pairs.sort();

        let dependency_hashes = self.dependency_hashes(dependencies)?;

        let hashable = TaskHashable {
            hash_of_files: &hash_of_files,
            external_deps_hash: &task.package.external_deps_hash,
            task: &task.task,
            outputs: task.definition.outputs.hashable(),
            pass_through_args: args,
            env_pairs,
            global_hash: &self.global_hash,
            dependency_hashes,
        };
        let task_hash = hash::hash_object(&hashable)?;
        debug!(task = %task.task_id, hash = %task_hash, "computed task hash");

        self.task_hashes
            .write()
            .insert(task.task_id.clone(), task_hash.clone());
        Ok(task_hash)
    }

    fn dependency_hashes(&self, dependencies: &[&str]) -> Result<Vec<String>> {
        let task_hashes = self.task_hashes.read();
        let mut set = HashSet::new();
        for dependency in dependencies {
            if *dependency == ROOT_NODE_NAME {
                continue;
            }
            let hash = task_hashes.get(*dependency).ok_or_else(|| {
                Error::internal(format!("missing hash for dependency task {dependency}"))
            })?;
            set.insert(hash.clone());
        }
        let mut hashes: Vec<String> = set.into_iter().collect();
        hashes.sort();
        Ok(hashes)
    }

    pub fn hash_for(&self, task_id: &str) -> Option<String> {
        self.task_hashes.read().get(task_id).cloned()
    }

    /// The file -> hash map backing a task's input hash, for summaries.
    pub fn input_files_for(&self, task: &PackageTask) -> Option<FileHashes> {
        let key = file_hash_key(&task.package_name, &task.definition.inputs);
        self.package_file_hashes
            .get(&key)
            .map(|entry| entry.1.clone())
    }
}

fn input_globs(inputs: &[String]) -> Result<Option<GlobSet>> {
    let patterns: Vec<&String> = inputs
        .iter()
        .filter(|i| *i != DEFAULT_INPUTS_SENTINEL)
        .collect();
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| Error::config(format!("invalid input glob `{pattern}`: {e}")))?;
        builder.add(glob);
    }
    Ok(Some(builder.build().map_err(|e| {
        Error::config(format!("invalid input globs: {e}"))
    })?))
}

/// Hash one package's input files. Empty inputs (or the sentinel) hash every
/// tracked file in the package directory, observing the root and package
/// `.gitignore`s; explicit inputs hash exactly the matching globs. The
/// result is keyed by anchored-unix path so it is stable across platforms.
fn hash_package_inputs(
    root: &AbsoluteSystemPathBuf,
    package: &PackageInfo,
    inputs: &[String],
) -> Result<BTreeMap<String, String>> {
    let package_dir = package.dir.restore_anchor(root);
    let use_default_set =
        inputs.is_empty() || inputs.iter().any(|i| i == DEFAULT_INPUTS_SENTINEL);
    let globs = input_globs(inputs)?;

    let mut files = BTreeMap::new();
    let walk = WalkBuilder::new(package_dir.as_path())
        .hidden(false)
        .require_git(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(false)
        .parents(true)
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !ALWAYS_IGNORED.contains(&name.as_ref())
        })
        .build();

    for entry in walk {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                debug!(package = %package.name, "skipping unreadable path during input walk: {err}");
                continue;
            }
        };
        if entry.file_type().is_some_and(|t| t.is_dir()) {
            continue;
        }
        let absolute = AbsoluteSystemPathBuf::new(entry.path())?;
        let relative = absolute.relative_to(&package_dir)?.to_unix()?;

        let matches_glob = globs
            .as_ref()
            .is_some_and(|set| set.is_match(relative.as_str()));
        if !use_default_set && !matches_glob {
            continue;
        }
        files.insert(relative.as_str().to_string(), hash::hash_file(&absolute)?);
    }

    Ok(files)
}
