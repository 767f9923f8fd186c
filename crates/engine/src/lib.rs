//! The execution engine: builds the task graph from workspace + pipeline,
//! fingerprints every node, and walks the graph under a concurrency budget.

mod builder;
mod global_hash;
mod graph;
mod nodes;
mod task_hash;
mod walker;

pub use builder::{resolve_filter, EngineBuilder};
pub use global_hash::calculate_global_hash;
pub use graph::TaskGraph;
pub use nodes::PackageTask;
pub use task_hash::Tracker;
pub use walker::{CancellationToken, NodeStatus, WalkOpts, WalkResult};
