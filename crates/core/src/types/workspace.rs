use std::collections::{BTreeMap, HashMap};

use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::errors::{Error, Result};
use crate::paths::AbsoluteSystemPathBuf;

use super::package::PackageInfo;

/// The loaded workspace: a root, its packages, and the acyclic dependency
/// graph between them. Immutable for the duration of one invocation.
#[derive(Debug)]
pub struct Workspace {
    root: AbsoluteSystemPathBuf,
    packages: BTreeMap<String, PackageInfo>,
    graph: DiGraph<String, ()>,
    indices: HashMap<String, NodeIndex>,
}

impl Workspace {
    /// Assemble the workspace and validate its dependency graph. Edges run
    /// from a package to each of its workspace dependencies; dependency names
    /// that are not workspace packages are external and carry no edge.
    pub fn new(
        root: AbsoluteSystemPathBuf,
        packages: BTreeMap<String, PackageInfo>,
    ) -> Result<Self> {
        let mut graph = DiGraph::new();
        let mut indices = HashMap::new();

        for name in packages.keys() {
            let idx = graph.add_node(name.clone());
            indices.insert(name.clone(), idx);
        }
        for (name, info) in &packages {
            let from = indices[name];
            for dep in &info.dependencies {
                if let Some(&to) = indices.get(dep) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        if algo::toposort(&graph, None).is_err() {
            let path = cycle_path(&graph);
            return Err(Error::cycle(path));
        }

        Ok(Self {
            root,
            packages,
            graph,
            indices,
        })
    }

    pub fn root(&self) -> &AbsoluteSystemPathBuf {
        &self.root
    }

    pub fn package(&self, name: &str) -> Option<&PackageInfo> {
        self.packages.get(name)
    }

    pub fn package_names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }

    pub fn packages(&self) -> impl Iterator<Item = &PackageInfo> {
        self.packages.values()
    }

    /// Immediate workspace dependencies of a package.
    pub fn dependencies_of(&self, name: &str) -> Vec<&str> {
        let Some(&idx) = self.indices.get(name) else {
            return Vec::new();
        };
        self.graph
            .neighbors(idx)
            .map(|n| self.graph[n].as_str())
            .collect()
    }

    /// Aggregate external dependency fingerprint across every package,
    /// feeding the global hash.
    pub fn external_deps_aggregate(&self) -> Vec<(&str, &str)> {
        self.packages
            .iter()
            .map(|(name, info)| (name.as_str(), info.external_deps_hash.as_str()))
            .collect()
    }
}

/// Extract one cycle's node names for error reporting.
fn cycle_path(graph: &DiGraph<String, ()>) -> Vec<String> {
    for scc in algo::tarjan_scc(graph) {
        if scc.len() > 1 {
            let mut path: Vec<String> = scc.iter().map(|&i| graph[i].clone()).collect();
            path.push(path[0].clone());
            return path;
        }
        if scc.len() == 1 && graph.contains_edge(scc[0], scc[0]) {
            let name = graph[scc[0]].clone();
            return vec![name.clone(), name];
        }
    }
    Vec::new()
}
