//! The graph walk: bounded-concurrency execution in dependency order.
//!
//! Ready nodes flow through a channel to a pool of OS-thread workers. A node
//! becomes ready when every dependency completed successfully; a failed or
//! cancelled dependency marks its dependents skipped without running them.
//! Cancellation is cooperative: once the token fires, queued nodes drain as
//! `Cancelled` and nothing new starts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;

use parking_lot::Mutex;
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use tracing::debug;

use turbine_core::{Error, Result};

use crate::graph::TaskGraph;

/// Cooperative cancellation shared between the walker, visitors, and the
/// signal handler.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Succeeded,
    Failed,
    Cancelled,
    UpstreamFailed,
    UpstreamCancelled,
}

impl NodeStatus {
    /// The status a dependent inherits when this node did not succeed.
    fn skip_reason(self) -> NodeStatus {
        match self {
            NodeStatus::Cancelled | NodeStatus::UpstreamCancelled => NodeStatus::UpstreamCancelled,
            _ => NodeStatus::UpstreamFailed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WalkOpts {
    pub concurrency: usize,
    /// Ignore dependency edges: submit every selected task immediately.
    pub parallel: bool,
    /// Let unrelated branches finish after a failure (`--continue`).
    pub continue_on_error: bool,
}

impl Default for WalkOpts {
    fn default() -> Self {
        Self {
            concurrency: 10,
            parallel: false,
            continue_on_error: false,
        }
    }
}

#[derive(Debug, Default)]
pub struct WalkResult {
    pub statuses: HashMap<String, NodeStatus>,
    pub errors: Vec<Error>,
}

impl WalkResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
            && self
                .statuses
                .values()
                .all(|s| *s == NodeStatus::Succeeded)
    }
}

struct WalkState {
    remaining: HashMap<NodeIndex, usize>,
    skip: HashMap<NodeIndex, NodeStatus>,
    statuses: HashMap<String, NodeStatus>,
    errors: Vec<Error>,
    pending: usize,
    sender: Option<Sender<NodeIndex>>,
    parallel: bool,
}

impl WalkState {
    /// Mark a node terminal and release or skip its dependents. Skip
    /// cascades run entirely inside the lock; ready nodes go back out
    /// through the channel.
    fn complete(&mut self, graph: &TaskGraph, index: NodeIndex, status: NodeStatus) {
        let mut stack = vec![(index, status)];
        while let Some((idx, status)) = stack.pop() {
            if idx != graph.root {
                self.statuses.insert(graph.graph[idx].clone(), status);
            }
            self.pending -= 1;

            if !self.parallel {
                let dependents: Vec<NodeIndex> = graph
                    .graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .collect();
                for dependent in dependents {
                    let remaining = self
                        .remaining
                        .get_mut(&dependent)
                        .expect("dependent tracked in walk state");
                    *remaining -= 1;
                    if status != NodeStatus::Succeeded {
                        self.skip.entry(dependent).or_insert(status.skip_reason());
                    }
                    if *remaining == 0 {
                        match self.skip.get(&dependent) {
                            Some(&reason) => stack.push((dependent, reason)),
                            None => {
                                if let Some(sender) = &self.sender {
                                    let _ = sender.send(dependent);
                                }
                            }
                        }
                    }
                }
            }
        }

        if self.pending == 0 {
            // Dropping the sender lets idle workers drain out.
            self.sender.take();
        }
    }
}

impl TaskGraph {
    /// Walk the graph, invoking `visitor` once per ready task id.
    ///
    /// Visitor errors mark the node failed; unless `continue_on_error` is
    /// set, the first failure cancels the token and nothing new starts.
    pub fn execute<V>(&self, visitor: &V, opts: &WalkOpts, token: &CancellationToken) -> WalkResult
    where
        V: Fn(&str) -> Result<()> + Sync,
    {
        let (sender, receiver) = mpsc::channel::<NodeIndex>();
        let receiver = Mutex::new(receiver);

        let mut remaining: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in self.graph.node_indices() {
            if idx != self.root {
                remaining.insert(
                    idx,
                    self.graph
                        .neighbors_directed(idx, Direction::Outgoing)
                        .count(),
                );
            }
        }

        let state = Mutex::new(WalkState {
            remaining,
            skip: HashMap::new(),
            statuses: HashMap::new(),
            errors: Vec::new(),
            pending: self.graph.node_count(),
            sender: Some(sender),
            parallel: opts.parallel,
        });

        {
            let mut state = state.lock();
            if opts.parallel {
                for idx in self.graph.node_indices() {
                    if idx != self.root {
                        if let Some(sender) = &state.sender {
                            let _ = sender.send(idx);
                        }
                    }
                }
                // ROOT is bookkeeping only.
                state.pending -= 1;
                if state.pending == 0 {
                    state.sender.take();
                }
            } else {
                // ROOT completes immediately, releasing the leaves.
                state.complete(self, self.root, NodeStatus::Succeeded);
            }
        }

        let workers = opts.concurrency.max(1);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    let next = receiver.lock().recv();
                    let Ok(idx) = next else {
                        break;
                    };
                    let id = self.graph[idx].as_str();

                    if token.is_cancelled() {
                        debug!(task = id, "skipping task after cancellation");
                        state.lock().complete(self, idx, NodeStatus::Cancelled);
                        continue;
                    }

                    match visitor(id) {
                        Ok(()) => state.lock().complete(self, idx, NodeStatus::Succeeded),
                        // A cancelled task is not a failure: record the
                        // status without an error and without re-cancelling.
                        Err(Error::Cancelled { .. }) => {
                            state.lock().complete(self, idx, NodeStatus::Cancelled);
                        }
                        Err(err) => {
                            if !opts.continue_on_error {
                                token.cancel();
                            }
                            let mut state = state.lock();
                            state.errors.push(err);
                            state.complete(self, idx, NodeStatus::Failed);
                        }
                    }
                });
            }
        });

        let state = state.into_inner();
        WalkResult {
            statuses: state.statuses,
            errors: state.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};
    use std::sync::Mutex as StdMutex;

    use turbine_config::Pipeline;
    use turbine_core::{
        AbsoluteSystemPathBuf, AnchoredSystemPathBuf, PackageInfo, TaskDefinition, Workspace,
    };

    use crate::builder::{resolve_filter, EngineBuilder};

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

    fn two_package_graph() -> (Workspace, Pipeline) {
        let root = AbsoluteSystemPathBuf::new(std::env::temp_dir().join("walker-ws")).unwrap();
        let packages: BTreeMap<String, PackageInfo> = [
            package("app", &["build"], &["lib"]),
            package("lib", &["build"], &[]),
        ]
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect();
        let workspace = Workspace::new(root, packages).unwrap();
        let mut pipeline = Pipeline::default();
        pipeline.insert(
            "build".into(),
            TaskDefinition {
                task_dependencies: vec!["^build".into()],
                ..TaskDefinition::default()
            },
        );
        (workspace, pipeline)
    }

    fn build_graph(workspace: &Workspace, pipeline: &Pipeline) -> TaskGraph {
        let frontier = resolve_filter(workspace, &[]).unwrap();
        EngineBuilder::new(workspace, pipeline)
            .build(&["build".to_string()], &frontier)
            .unwrap()
    }

    #[test]
    fn ordered_walk_respects_dependency_edges() {
        let (workspace, pipeline) = two_package_graph();
        let graph = build_graph(&workspace, &pipeline);

        let order = StdMutex::new(Vec::<String>::new());
        let result = graph.execute(
            &|id| {
                order.lock().unwrap().push(id.to_string());
                Ok(())
            },
            &WalkOpts {
                concurrency: 4,
                ..WalkOpts::default()
            },
            &CancellationToken::new(),
        );

        assert!(result.is_success());
        let order = order.into_inner().unwrap();
        let lib = order.iter().position(|t| t == "lib#build").unwrap();
        let app = order.iter().position(|t| t == "app#build").unwrap();
        assert!(lib < app, "lib#build must complete before app#build starts");
    }

    #[test]
    fn parallel_walk_submits_every_task() {
        let (workspace, pipeline) = two_package_graph();
        let graph = build_graph(&workspace, &pipeline);

        let seen = StdMutex::new(HashSet::<String>::new());
        let result = graph.execute(
            &|id| {
                seen.lock().unwrap().insert(id.to_string());
                Ok(())
            },
            &WalkOpts {
                concurrency: 4,
                parallel: true,
                continue_on_error: false,
            },
            &CancellationToken::new(),
        );

        assert!(result.is_success());
        assert_eq!(seen.into_inner().unwrap().len(), 2);
    }

    #[test]
    fn dependency_failure_skips_dependents_with_upstream_status() {
        let (workspace, pipeline) = two_package_graph();
        let graph = build_graph(&workspace, &pipeline);

        let result = graph.execute(
            &|id| {
                if id == "lib#build" {
                    Err(Error::task_failed(id, Some(1)))
                } else {
                    Ok(())
                }
            },
            &WalkOpts::default(),
            &CancellationToken::new(),
        );

        assert!(!result.is_success());
        assert_eq!(result.statuses["lib#build"], NodeStatus::Failed);
        assert_eq!(result.statuses["app#build"], NodeStatus::UpstreamFailed);
        assert_eq!(result.errors.len(), 1);
    }

    #[test]
    fn continue_mode_runs_unrelated_branches() {
        let root = AbsoluteSystemPathBuf::new(std::env::temp_dir().join("walker-ws2")).unwrap();
        let packages: BTreeMap<String, PackageInfo> = [
            package("a", &["build"], &[]),
            package("b", &["build"], &[]),
        ]
        .into_iter()
        .map(|p| (p.name.clone(), p))
        .collect();
        let workspace = Workspace::new(root, packages).unwrap();
        let mut pipeline = Pipeline::default();
        pipeline.insert("build".into(), TaskDefinition::default());
        let graph = build_graph(&workspace, &pipeline);

        let result = graph.execute(
            &|id| {
                if id == "a#build" {
                    Err(Error::task_failed(id, Some(2)))
                } else {
                    Ok(())
                }
            },
            &WalkOpts {
                concurrency: 1,
                parallel: false,
                continue_on_error: true,
            },
            &CancellationToken::new(),
        );

        assert_eq!(result.statuses["a#build"], NodeStatus::Failed);
        assert_eq!(result.statuses["b#build"], NodeStatus::Succeeded);
    }

    #[test]
    fn cancellation_prevents_new_tasks_from_starting() {
        let (workspace, pipeline) = two_package_graph();
        let graph = build_graph(&workspace, &pipeline);
        let token = CancellationToken::new();

        let started = StdMutex::new(Vec::<String>::new());
        let result = graph.execute(
            &|id| {
                started.lock().unwrap().push(id.to_string());
                // Cancel while the first task is "running".
                token.cancel();
                Ok(())
            },
            &WalkOpts {
                concurrency: 1,
                ..WalkOpts::default()
            },
            &token,
        );

        let started = started.into_inner().unwrap();
        assert_eq!(started, vec!["lib#build"]);
        assert_eq!(result.statuses["app#build"], NodeStatus::Cancelled);
    }
}
