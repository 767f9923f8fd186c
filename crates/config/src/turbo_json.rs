//! `turbo.json` schema, validation, and the root/workspace overlay merge.

use std::fs;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::debug;

use turbine_core::{
    task_id, AbsoluteSystemPathBuf, Error, OutputLogsMode, Result, TaskDefinition, TaskOutputs,
    Workspace,
};

use crate::pipeline::Pipeline;
use crate::CONFIG_FILE;

/// Keys allowed at the workspace root only.
const ROOT_ONLY_KEYS: &[&str] = &[
    "globalDependencies",
    "globalEnv",
    "globalPassThroughEnv",
    "remoteCache",
    "ui",
];

/// Remote cache settings from the root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoteCacheOptions {
    pub enabled: Option<bool>,
    pub signature: Option<bool>,
    pub team_id: Option<String>,
    pub api_url: Option<String>,
    pub timeout: Option<u64>,
}

/// The validated root configuration.
#[derive(Debug, Default)]
pub struct TurboJson {
    pub global_dependencies: Vec<String>,
    pub global_env: Vec<String>,
    pub global_pass_through_env: Vec<String>,
    pub pipeline: Pipeline,
    pub remote_cache: Option<RemoteCacheOptions>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawTurboJson {
    #[serde(rename = "$schema")]
    #[allow(dead_code)]
    schema: Option<String>,
    extends: Option<Vec<String>>,
    global_dependencies: Option<Vec<String>>,
    global_env: Option<Vec<String>>,
    global_pass_through_env: Option<Vec<String>>,
    pipeline: Option<IndexMap<String, RawTaskDefinition>>,
    remote_cache: Option<RemoteCacheOptions>,
    ui: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawTaskDefinition {
    depends_on: Option<Vec<String>>,
    inputs: Option<Vec<String>>,
    outputs: Option<Vec<String>>,
    env: Option<Vec<String>>,
    pass_through_env: Option<Vec<String>>,
    // Deprecated: accepted on read, migrated into `inputs`, never written.
    dot_env: Option<Vec<String>>,
    output_mode: Option<OutputLogsMode>,
    cache: Option<bool>,
    persistent: Option<bool>,
    interactive: Option<bool>,
}

impl RawTaskDefinition {
    /// Resolve into a full definition, layered over `base` when a workspace
    /// entry refines a root entry.
    fn resolve(&self, base: Option<&TaskDefinition>) -> TaskDefinition {
        let base = base.cloned().unwrap_or_default();
        let mut inputs = self.inputs.clone().unwrap_or(base.inputs);
        if let Some(dot_env) = &self.dot_env {
            // dotEnv migration: the files become ordinary hashed inputs.
            inputs.extend(dot_env.iter().cloned());
        }
        TaskDefinition {
            task_dependencies: self
                .depends_on
                .clone()
                .unwrap_or(base.task_dependencies),
            inputs,
            outputs: self
                .outputs
                .as_ref()
                .map(|raw| split_outputs(raw))
                .unwrap_or(base.outputs),
            env: self.env.clone().unwrap_or(base.env),
            pass_through_env: self
                .pass_through_env
                .clone()
                .unwrap_or(base.pass_through_env),
            output_mode: self.output_mode.unwrap_or(base.output_mode),
            cache: self.cache.unwrap_or(base.cache),
            persistent: self.persistent.unwrap_or(base.persistent),
            interactive: self.interactive.unwrap_or(base.interactive),
        }
    }
}

/// Outputs in the file are a flat list; `!`-prefixed entries are exclusions.
fn split_outputs(raw: &[String]) -> TaskOutputs {
    let mut outputs = TaskOutputs::default();
    for entry in raw {
        match entry.strip_prefix('!') {
            Some(exclusion) => outputs.exclusions.push(exclusion.to_string()),
            None => outputs.inclusions.push(entry.clone()),
        }
    }
    outputs
}

fn parse(path: &AbsoluteSystemPathBuf) -> Result<RawTurboJson> {
    let contents = fs::read_to_string(path.as_path())
        .map_err(|e| Error::file_system(path.as_path(), "read configuration", e))?;
    serde_json::from_str(&contents)
        .map_err(|e| Error::json(format!("{path}: {e}"), e))
}

/// Load and validate the root `turbo.json`.
pub fn load_root_config(root: &AbsoluteSystemPathBuf) -> Result<TurboJson> {
    let path = root.join_component(CONFIG_FILE)?;
    let raw = parse(&path)?;

    if raw.extends.is_some() {
        return Err(Error::config(format!(
            "{path}: `extends` is only valid in workspace configurations"
        )));
    }

    let mut pipeline = Pipeline::default();
    for (key, task) in raw.pipeline.unwrap_or_default() {
        pipeline.insert(key, task.resolve(None));
    }

    Ok(TurboJson {
        global_dependencies: raw.global_dependencies.unwrap_or_default(),
        global_env: raw.global_env.unwrap_or_default(),
        global_pass_through_env: raw.global_pass_through_env.unwrap_or_default(),
        pipeline,
        remote_cache: raw.remote_cache,
    })
}

/// Load per-workspace `turbo.json` overlays and merge them into the root
/// pipeline as qualified `pkg#task` entries.
pub fn load_workspace_overlays(config: &mut TurboJson, workspace: &Workspace) -> Result<()> {
    for package in workspace.packages() {
        let dir = package.dir.restore_anchor(workspace.root());
        let path = dir.join_component(CONFIG_FILE)?;
        if !path.exists() {
            continue;
        }
        debug!(package = %package.name, "loading workspace configuration");
        let raw = parse(&path)?;
        validate_workspace_config(&raw, &path)?;

        for (key, task) in raw.pipeline.unwrap_or_default() {
            if task_id::is_package_task(&key) {
                return Err(Error::config(format!(
                    "{path}: `{key}` is qualified with a package; workspace \
                     configurations may only use bare task names"
                )));
            }
            let qualified = task_id::task_id(&package.name, &key);
            let base = config.pipeline.task_definition(&key).cloned();
            config
                .pipeline
                .insert(qualified, task.resolve(base.as_ref()));
        }
    }
    Ok(())
}

fn validate_workspace_config(raw: &RawTurboJson, path: &AbsoluteSystemPathBuf) -> Result<()> {
    match &raw.extends {
        Some(extends) if extends.as_slice() == ["//"] => {}
        Some(_) => {
            return Err(Error::config(format!(
                "{path}: `extends` must be exactly [\"//\"]"
            )))
        }
        None => {
            return Err(Error::config(format!(
                "{path}: workspace configurations must declare `extends: [\"//\"]`"
            )))
        }
    }

    let present: &[(&str, bool)] = &[
        ("globalDependencies", raw.global_dependencies.is_some()),
        ("globalEnv", raw.global_env.is_some()),
        (
            "globalPassThroughEnv",
            raw.global_pass_through_env.is_some(),
        ),
        ("remoteCache", raw.remote_cache.is_some()),
        ("ui", raw.ui.is_some()),
    ];
    for (key, is_present) in present {
        if *is_present {
            debug_assert!(ROOT_ONLY_KEYS.contains(key));
            return Err(Error::config(format!(
                "{path}: `{key}` is only valid in the root configuration"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tempfile::TempDir;
    use turbine_core::{AnchoredSystemPathBuf, PackageInfo};

    use super::*;

    fn write_config(dir: &std::path::Path, contents: &str) {
        fs::write(dir.join(CONFIG_FILE), contents).unwrap();
    }

    fn root(dir: &TempDir) -> AbsoluteSystemPathBuf {
        AbsoluteSystemPathBuf::new(dir.path()).unwrap()
    }

    #[test]
    fn parses_pipeline_with_defaults() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            r#"{
                "$schema": "https://turbo.build/schema.json",
                "globalDependencies": ["tsconfig.json"],
                "globalEnv": ["CI"],
                "pipeline": {
                    "build": {
                        "dependsOn": ["^build"],
                        "outputs": ["dist/**", "!dist/cache/**"]
                    },
                    "test": { "dependsOn": ["build"] }
                }
            }"#,
        );
        let config = load_root_config(&root(&dir)).unwrap();
        let build = config.pipeline.task_definition("web#build").unwrap();
        assert_eq!(build.task_dependencies, vec!["^build"]);
        assert_eq!(build.outputs.inclusions, vec!["dist/**"]);
        assert_eq!(build.outputs.exclusions, vec!["dist/cache/**"]);
        assert!(build.cache);
        let test = config.pipeline.task_definition("web#test").unwrap();
        assert!(test.outputs.inclusions.is_empty());
    }

    #[test]
    fn migrates_dot_env_into_inputs() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            r#"{"pipeline": {"build": {"inputs": ["src/**"], "dotEnv": [".env.local"]}}}"#,
        );
        let config = load_root_config(&root(&dir)).unwrap();
        let build = config.pipeline.task_definition("build").unwrap();
        assert_eq!(build.inputs, vec!["src/**", ".env.local"]);
    }

    #[test]
    fn rejects_unknown_task_keys() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            r#"{"pipeline": {"build": {"dependson": ["^build"]}}}"#,
        );
        assert!(load_root_config(&root(&dir)).is_err());
    }

    #[test]
    fn rejects_extends_at_root() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), r#"{"extends": ["//"], "pipeline": {}}"#);
        assert!(load_root_config(&root(&dir)).is_err());
    }

    fn workspace_with_package(dir: &TempDir, pkg_config: Option<&str>) -> Workspace {
        let pkg_dir = dir.path().join("packages").join("web");
        fs::create_dir_all(&pkg_dir).unwrap();
        if let Some(contents) = pkg_config {
            write_config(&pkg_dir, contents);
        }
        let info = PackageInfo {
            name: "web".into(),
            dir: AnchoredSystemPathBuf::new("packages/web").unwrap(),
            scripts: BTreeMap::new(),
            dependencies: Vec::new(),
            external_deps_hash: String::new(),
        };
        Workspace::new(root(dir), BTreeMap::from([("web".to_string(), info)])).unwrap()
    }

    #[test]
    fn workspace_overlay_refines_root_definition() {
        let dir = TempDir::new().unwrap();
        write_config(
            dir.path(),
            r#"{"pipeline": {"build": {"dependsOn": ["^build"], "outputs": ["dist/**"]}}}"#,
        );
        let workspace = workspace_with_package(
            &dir,
            Some(r#"{"extends": ["//"], "pipeline": {"build": {"outputs": ["lib/**"]}}}"#),
        );
        let mut config = load_root_config(&root(&dir)).unwrap();
        load_workspace_overlays(&mut config, &workspace).unwrap();

        let overridden = config.pipeline.task_definition("web#build").unwrap();
        assert_eq!(overridden.outputs.inclusions, vec!["lib/**"]);
        // dependsOn is inherited from the root entry.
        assert_eq!(overridden.task_dependencies, vec!["^build"]);
    }

    #[test]
    fn workspace_overlay_requires_extends() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), r#"{"pipeline": {}}"#);
        let workspace = workspace_with_package(&dir, Some(r#"{"pipeline": {}}"#));
        let mut config = load_root_config(&root(&dir)).unwrap();
        assert!(load_workspace_overlays(&mut config, &workspace).is_err());
    }

    #[test]
    fn workspace_overlay_rejects_qualified_keys_and_root_only_keys() {
        let dir = TempDir::new().unwrap();
        write_config(dir.path(), r#"{"pipeline": {}}"#);

        let workspace = workspace_with_package(
            &dir,
            Some(r#"{"extends": ["//"], "pipeline": {"other#build": {}}}"#),
        );
        let mut config = load_root_config(&root(&dir)).unwrap();
        assert!(load_workspace_overlays(&mut config, &workspace).is_err());

        let workspace = workspace_with_package(
            &dir,
            Some(r#"{"extends": ["//"], "globalEnv": ["CI"], "pipeline": {}}"#),
        );
        let mut config = load_root_config(&root(&dir)).unwrap();
        assert!(load_workspace_overlays(&mut config, &workspace).is_err());
    }
}
