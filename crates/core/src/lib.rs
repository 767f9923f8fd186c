//! Core types shared across the turbine workspace: the error taxonomy, the
//! typed path model, content hashing, and the task/workspace data model.

pub mod errors;
pub mod hash;
pub mod paths;
pub mod types;

pub use errors::{Error, Result};
pub use paths::{
    AbsoluteSystemPathBuf, AbsoluteUnixPathBuf, AnchoredSystemPathBuf, AnchoredUnixPathBuf,
    PathError,
};
pub use types::{
    task_id, OutputLogsMode, PackageInfo, TaskDefinition, TaskOutputs, Workspace, ROOT_NODE_NAME,
    ROOT_PKG_NAME, TASK_DELIMITER, TOPOLOGICAL_PREFIX,
};
