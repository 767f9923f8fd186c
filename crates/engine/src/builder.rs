//! Task graph construction.
//!
//! Starting from the requested task names and an optional package filter,
//! resolve each task's definition by the most specific pipeline key, expand
//! `dependsOn` entries (`^dep` topologically over workspace dependencies,
//! `pkg#dep` explicitly, bare `dep` intra-package), and validate the result:
//! unknown tasks and packages are fatal, cycles are fatal with the offending
//! path, and persistent tasks may not have dependents.

use std::collections::{HashSet, VecDeque};

use globset::{Glob, GlobSetBuilder};
use petgraph::algo;
use tracing::debug;

use turbine_config::Pipeline;
use turbine_core::{
    task_id, Error, Result, Workspace, PackageInfo, ROOT_PKG_NAME, TOPOLOGICAL_PREFIX,
};

use crate::graph::TaskGraph;

pub struct EngineBuilder<'a> {
    workspace: &'a Workspace,
    pipeline: &'a Pipeline,
    tasks_only: bool,
}

impl<'a> EngineBuilder<'a> {
    pub fn new(workspace: &'a Workspace, pipeline: &'a Pipeline) -> Self {
        Self {
            workspace,
            pipeline,
            tasks_only: false,
        }
    }

    /// Restrict the graph to exactly the entry tasks, without expanding
    /// their dependencies (`--only`).
    pub fn with_tasks_only(mut self, tasks_only: bool) -> Self {
        self.tasks_only = tasks_only;
        self
    }

    /// Whether this package can host this task: it declares a script for it,
    /// or the pipeline addresses it explicitly.
    fn is_runnable(&self, package: &PackageInfo, task: &str) -> bool {
        package.command_for(task).is_some()
            || self
                .pipeline
                .iter()
                .any(|(key, _)| key == task_id::task_id(&package.name, task))
    }

    /// Build the task graph for the requested tasks over the filtered
    /// package frontier.
    pub fn build(&self, task_names: &[String], frontier: &HashSet<String>) -> Result<TaskGraph> {
        let mut graph = TaskGraph::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        let mut seen: HashSet<String> = HashSet::new();

        // Seed the frontier.
        for name in task_names {
            if let Some((package_name, _)) = task_id::split(name) {
                if self.workspace.package(package_name).is_none() {
                    return Err(Error::undefined_package(package_name));
                }
                if self.pipeline.task_definition(name).is_none() {
                    return Err(Error::undefined_task(name));
                }
                queue.push_back(name.clone());
            } else {
                if !self.pipeline.has_task(name) {
                    return Err(Error::undefined_task(name));
                }
                for package_name in frontier {
                    let Some(package) = self.workspace.package(package_name) else {
                        return Err(Error::undefined_package(package_name));
                    };
                    let id = task_id::task_id(package_name, name);
                    if self.pipeline.task_definition(&id).is_some()
                        && self.is_runnable(package, name)
                    {
                        queue.push_back(id);
                    }
                }
            }
        }

        // Expand the closure.
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id.clone()) {
                continue;
            }
            let definition = self
                .pipeline
                .task_definition(&id)
                .ok_or_else(|| Error::undefined_task(&id))?
                .clone();
            let (package_name, _) = task_id::split(&id)
                .ok_or_else(|| Error::internal(format!("unqualified task id {id}")))?;
            let package_name = package_name.to_string();

            let node = self.add_task_node(&mut graph, &id);
            // Every task sinks into ROOT so the walk has one source of
            // readiness.
            graph.graph.update_edge(node, graph.root, ());

            if self.tasks_only {
                graph.definitions.insert(id.clone(), definition);
                continue;
            }

            for dep in &definition.task_dependencies {
                if let Some(dep_task) = dep.strip_prefix(TOPOLOGICAL_PREFIX) {
                    for ws_dep in self.workspace.dependencies_of(&package_name) {
                        let dep_package = self
                            .workspace
                            .package(ws_dep)
                            .ok_or_else(|| Error::undefined_package(ws_dep))?;
                        let dep_id = task_id::task_id(ws_dep, dep_task);
                        if self.pipeline.task_definition(&dep_id).is_none()
                            || !self.is_runnable(dep_package, dep_task)
                        {
                            debug!(task = %dep_id, "skipping topological dependency without a runnable task");
                            continue;
                        }
                        let dep_node = self.add_task_node(&mut graph, &dep_id);
                        graph.graph.update_edge(node, dep_node, ());
                        queue.push_back(dep_id);
                    }
                } else if let Some((dep_package, dep_task)) = task_id::split(dep) {
                    if self.workspace.package(dep_package).is_none() {
                        return Err(Error::undefined_package(dep_package));
                    }
                    let dep_id = task_id::task_id(dep_package, dep_task);
                    if self.pipeline.task_definition(&dep_id).is_none() {
                        return Err(Error::undefined_task(&dep_id));
                    }
                    let dep_node = self.add_task_node(&mut graph, &dep_id);
                    graph.graph.update_edge(node, dep_node, ());
                    queue.push_back(dep_id);
                } else {
                    let dep_id = task_id::task_id(&package_name, dep);
                    if self.pipeline.task_definition(&dep_id).is_none() {
                        return Err(Error::undefined_task(dep));
                    }
                    let dep_node = self.add_task_node(&mut graph, &dep_id);
                    graph.graph.update_edge(node, dep_node, ());
                    queue.push_back(dep_id);
                }
            }

            graph.definitions.insert(id.clone(), definition);
        }

        self.validate(&graph)?;
        Ok(graph)
    }

    fn add_task_node(&self, graph: &mut TaskGraph, id: &str) -> petgraph::graph::NodeIndex {
        if let Some(&idx) = graph.indices.get(id) {
            return idx;
        }
        let idx = graph.graph.add_node(id.to_string());
        graph.indices.insert(id.to_string(), idx);
        idx
    }

    fn validate(&self, graph: &TaskGraph) -> Result<()> {
        // Persistent tasks may not have dependents.
        for edge in graph.graph.edge_indices() {
            let Some((from, to)) = graph.graph.edge_endpoints(edge) else {
                continue;
            };
            if to == graph.root {
                continue;
            }
            let dependency = &graph.graph[to];
            if graph
                .definitions
                .get(dependency)
                .is_some_and(|d| d.persistent)
            {
                return Err(Error::PersistentWithDependents {
                    persistent: dependency.clone(),
                    dependent: graph.graph[from].clone(),
                });
            }
        }

        if algo::toposort(&graph.graph, None).is_err() {
            for scc in algo::tarjan_scc(&graph.graph) {
                if scc.len() > 1 {
                    let mut path: Vec<String> =
                        scc.iter().map(|&i| graph.graph[i].clone()).collect();
                    path.push(path[0].clone());
                    return Err(Error::cycle(path));
                }
                if scc.len() == 1 && graph.graph.contains_edge(scc[0], scc[0]) {
                    let name = graph.graph[scc[0]].clone();
                    return Err(Error::cycle(vec![name.clone(), name]));
                }
            }
            return Err(Error::cycle(Vec::new()));
        }
        Ok(())
    }
}

/// Resolve `--filter` patterns into a package frontier. With no patterns,
/// every package except the workspace root is in scope; the root joins only
/// when named explicitly.
pub fn resolve_filter(workspace: &Workspace, patterns: &[String]) -> Result<HashSet<String>> {
    if patterns.is_empty() {
        return Ok(workspace
            .package_names()
            .filter(|name| *name != ROOT_PKG_NAME)
            .map(str::to_string)
            .collect());
    }

    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::config(format!("invalid filter pattern `{pattern}`: {e}")))?;
        builder.add(glob);
    }
    let globs = builder
        .build()
        .map_err(|e| Error::config(format!("invalid filter patterns: {e}")))?;

    let selected: HashSet<String> = workspace
        .package_names()
        .filter(|name| globs.is_match(name))
        .map(str::to_string)
        .collect();
    if selected.is_empty() {
        return Err(Error::config(format!(
            "no packages matched the provided filter: {}",
            patterns.join(", ")
        )));
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use turbine_core::{AbsoluteSystemPathBuf, AnchoredSystemPathBuf, TaskDefinition};

    use super::*;

    fn package(name: &str, scripts: &[&str], deps: &[&str]) -> PackageInfo {
        PackageInfo {
            name: name.to_string(),
            dir: AnchoredSystemPathBuf::new(format!("packages/{name}")).unwrap(),
            scripts: scripts
                .iter()
                .map(|s| (s.to_string(), format!("run-{s}")))
                .collect(),
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            external_deps_hash: String::new(),
        }
    }

    fn workspace(packages: Vec<PackageInfo>) -> Workspace {
        let root = AbsoluteSystemPathBuf::new(std::env::temp_dir().join("engine-ws")).unwrap();
        Workspace::new(
            root,
            packages.into_iter().map(|p| (p.name.clone(), p)).collect(),
        )
        .unwrap()
    }

    fn pipeline(entries: Vec<(&str, TaskDefinition)>) -> Pipeline {
        let mut p = Pipeline::default();
        for (key, def) in entries {
            p.insert(key.to_string(), def);
        }
        p
    }

    fn depends_on(deps: &[&str]) -> TaskDefinition {
        TaskDefinition {
            task_dependencies: deps.iter().map(|d| d.to_string()).collect(),
            ..TaskDefinition::default()
        }
    }

    fn all(workspace: &Workspace) -> HashSet<String> {
        resolve_filter(workspace, &[]).unwrap()
    }

    #[test]
    fn intra_package_dependency_builds_two_nodes() {
        let ws = workspace(vec![package("app", &["build", "test"], &[])]);
        let pipe = pipeline(vec![
            ("build", TaskDefinition::default()),
            ("test", depends_on(&["build"])),
        ]);
        let graph = EngineBuilder::new(&ws, &pipe)
            .build(&["test".to_string()], &all(&ws))
            .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.dependencies_of("app#test"), vec!["app#build"]);
        assert_eq!(graph.dependents_of("app#build"), vec!["app#test"]);
        assert_eq!(
            graph.topological_order().unwrap(),
            vec!["app#build", "app#test"]
        );
    }

    #[test]
    fn topological_dependency_expands_over_workspace_deps() {
        let ws = workspace(vec![
            package("app", &["build"], &["lib"]),
            package("lib", &["build"], &[]),
        ]);
        let pipe = pipeline(vec![("build", depends_on(&["^build"]))]);
        let graph = EngineBuilder::new(&ws, &pipe)
            .build(&["build".to_string()], &all(&ws))
            .unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.dependencies_of("app#build"), vec!["lib#build"]);
        let order = graph.topological_order().unwrap();
        let lib = order.iter().position(|t| *t == "lib#build").unwrap();
        let app = order.iter().position(|t| *t == "app#build").unwrap();
        assert!(lib < app);
    }

    #[test]
    fn topological_dependency_skips_packages_without_the_script() {
        let ws = workspace(vec![
            package("app", &["build"], &["assets"]),
            package("assets", &[], &[]),
        ]);
        let pipe = pipeline(vec![("build", depends_on(&["^build"]))]);
        let graph = EngineBuilder::new(&ws, &pipe)
            .build(&["build".to_string()], &all(&ws))
            .unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.dependencies_of("app#build").is_empty());
    }

    #[test]
    fn explicit_cross_package_dependency() {
        let ws = workspace(vec![
            package("app", &["deploy"], &[]),
            package("infra", &["provision"], &[]),
        ]);
        let pipe = pipeline(vec![
            ("deploy", depends_on(&["infra#provision"])),
            ("provision", TaskDefinition::default()),
        ]);
        let graph = EngineBuilder::new(&ws, &pipe)
            .build(&["deploy".to_string()], &all(&ws))
            .unwrap();
        assert_eq!(graph.dependencies_of("app#deploy"), vec!["infra#provision"]);
    }

    #[test]
    fn unknown_task_and_package_are_fatal() {
        let ws = workspace(vec![package("app", &["build"], &[])]);
        let pipe = pipeline(vec![("build", TaskDefinition::default())]);
        let builder = EngineBuilder::new(&ws, &pipe);

        assert!(matches!(
            builder.build(&["nope".to_string()], &all(&ws)),
            Err(Error::UndefinedTask { .. })
        ));
        assert!(matches!(
            builder.build(&["ghost#build".to_string()], &all(&ws)),
            Err(Error::UndefinedPackage { .. })
        ));
    }

    #[test]
    fn dependency_cycles_report_the_offending_path() {
        let ws = workspace(vec![package("app", &["a", "b"], &[])]);
        let pipe = pipeline(vec![("a", depends_on(&["b"])), ("b", depends_on(&["a"]))]);
        let err = EngineBuilder::new(&ws, &pipe)
            .build(&["a".to_string()], &all(&ws))
            .unwrap_err();
        match err {
            Error::CycleDetected { path } => {
                assert!(path.contains(&"app#a".to_string()));
                assert!(path.contains(&"app#b".to_string()));
            }
            other => panic!("expected cycle, got {other}"),
        }
    }

    #[test]
    fn persistent_tasks_may_not_have_dependents() {
        let ws = workspace(vec![package("app", &["dev", "test"], &[])]);
        let pipe = pipeline(vec![
            (
                "dev",
                TaskDefinition {
                    persistent: true,
                    ..TaskDefinition::default()
                },
            ),
            ("test", depends_on(&["dev"])),
        ]);
        let err = EngineBuilder::new(&ws, &pipe)
            .build(&["test".to_string()], &all(&ws))
            .unwrap_err();
        match err {
            Error::PersistentWithDependents {
                persistent,
                dependent,
            } => {
                assert_eq!(persistent, "app#dev");
                assert_eq!(dependent, "app#test");
            }
            other => panic!("expected persistent guard, got {other}"),
        }
    }

    #[test]
    fn tasks_only_skips_dependency_expansion() {
        let ws = workspace(vec![package("app", &["build", "test"], &[])]);
        let pipe = pipeline(vec![
            ("build", TaskDefinition::default()),
            ("test", depends_on(&["build"])),
        ]);
        let graph = EngineBuilder::new(&ws, &pipe)
            .with_tasks_only(true)
            .build(&["test".to_string()], &all(&ws))
            .unwrap();
        assert_eq!(graph.len(), 1);
        assert!(graph.dependencies_of("app#test").is_empty());
    }

    #[test]
    fn filter_restricts_the_frontier_but_not_the_closure() {
        let ws = workspace(vec![
            package("app", &["build"], &["lib"]),
            package("lib", &["build"], &[]),
            package("docs", &["build"], &[]),
        ]);
        let pipe = pipeline(vec![("build", depends_on(&["^build"]))]);
        let frontier = resolve_filter(&ws, &["app".to_string()]).unwrap();
        let graph = EngineBuilder::new(&ws, &pipe)
            .build(&["build".to_string()], &frontier)
            .unwrap();

        assert!(graph.contains("app#build"));
        assert!(graph.contains("lib#build"), "dependency closure crosses the filter");
        assert!(!graph.contains("docs#build"));
    }

    #[test]
    fn filter_with_no_matches_is_an_error() {
        let ws = workspace(vec![package("app", &["build"], &[])]);
        assert!(resolve_filter(&ws, &["nomatch-*".to_string()]).is_err());
    }
}
