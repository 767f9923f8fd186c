//! The task graph: an arena of `package#task` nodes indexed by small
//! integers, with edges pointing from dependents to their dependencies and a
//! single synthetic `ROOT` sink.

use std::collections::HashMap;

use petgraph::algo;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use turbine_core::{task_id, Error, Result, TaskDefinition, Workspace, ROOT_NODE_NAME};

use crate::nodes::PackageTask;

#[derive(Debug)]
pub struct TaskGraph {
    pub(crate) graph: DiGraph<String, ()>,
    pub(crate) indices: HashMap<String, NodeIndex>,
    pub(crate) definitions: HashMap<String, TaskDefinition>,
    pub(crate) root: NodeIndex,
}

impl TaskGraph {
    pub(crate) fn new() -> Self {
        let mut graph = DiGraph::new();
        let root = graph.add_node(ROOT_NODE_NAME.to_string());
        let mut indices = HashMap::new();
        indices.insert(ROOT_NODE_NAME.to_string(), root);
        Self {
            graph,
            indices,
            definitions: HashMap::new(),
            root,
        }
    }

    pub fn len(&self) -> usize {
        self.graph.node_count() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.indices.contains_key(task_id)
    }

    /// Every real task id, in arbitrary order.
    pub fn task_ids(&self) -> impl Iterator<Item = &str> {
        self.graph
            .node_indices()
            .filter(move |&idx| idx != self.root)
            .map(|idx| self.graph[idx].as_str())
    }

    pub fn definition(&self, task_id: &str) -> Option<&TaskDefinition> {
        self.definitions.get(task_id)
    }

    /// Dependencies of a task (outgoing edges), excluding the root sink.
    pub fn dependencies_of(&self, task_id: &str) -> Vec<&str> {
        self.neighbors_of(task_id, Direction::Outgoing)
    }

    /// Dependents of a task (incoming edges).
    pub fn dependents_of(&self, task_id: &str) -> Vec<&str> {
        self.neighbors_of(task_id, Direction::Incoming)
    }

    fn neighbors_of(&self, task_id: &str, direction: Direction) -> Vec<&str> {
        let Some(&idx) = self.indices.get(task_id) else {
            return Vec::new();
        };
        let mut names: Vec<&str> = self
            .graph
            .neighbors_directed(idx, direction)
            .filter(|&n| n != self.root)
            .map(|n| self.graph[n].as_str())
            .collect();
        names.sort();
        names
    }

    /// Task ids in dependency-first order.
    pub fn topological_order(&self) -> Result<Vec<&str>> {
        let sorted = algo::toposort(&self.graph, None)
            .map_err(|_| Error::internal("task graph lost acyclicity after validation"))?;
        // Edges point dependent -> dependency, so toposort yields dependents
        // first; execution wants the reverse.
        Ok(sorted
            .into_iter()
            .rev()
            .filter(|&idx| idx != self.root)
            .map(|idx| self.graph[idx].as_str())
            .collect())
    }

    /// Assemble the concrete node for a task id, resolving its command from
    /// the package manifest.
    pub fn package_task(&self, workspace: &Workspace, id: &str) -> Result<PackageTask> {
        let (package_name, task) =
            task_id::split(id).ok_or_else(|| Error::internal(format!("unqualified task id {id}")))?;
        let package = workspace
            .package(package_name)
            .ok_or_else(|| Error::undefined_package(package_name))?;
        let definition = self
            .definitions
            .get(id)
            .ok_or_else(|| Error::undefined_task(id))?;
        Ok(PackageTask {
            task_id: id.to_string(),
            task: task.to_string(),
            package_name: package_name.to_string(),
            package: package.clone(),
            definition: definition.clone(),
            command: package.command_for(task).map(str::to_string),
        })
    }

    /// Graphviz rendering for `--graph`.
    pub fn dot(&self) -> String {
        let mut out = String::from("digraph {\n");
        let mut edges: Vec<(String, String)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].clone(), self.graph[b].clone()))
            .collect();
        edges.sort();
        for (from, to) in edges {
            out.push_str(&format!("\t\"[root] {from}\" -> \"[root] {to}\"\n"));
        }
        out.push_str("}\n");
        out
    }
}
