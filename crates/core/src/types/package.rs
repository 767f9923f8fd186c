use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::paths::AnchoredSystemPathBuf;

/// One workspace package: a directory with a manifest declaring scripts and
/// dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageInfo {
    pub name: String,

    /// Package directory relative to the workspace root.
    pub dir: AnchoredSystemPathBuf,

    /// Named command scripts runnable in this package.
    pub scripts: BTreeMap<String, String>,

    /// Names of other workspace packages this one depends on.
    pub dependencies: Vec<String>,

    /// Fingerprint of the package's external (non-workspace) dependencies.
    pub external_deps_hash: String,
}

impl PackageInfo {
    pub fn command_for(&self, task: &str) -> Option<&str> {
        self.scripts.get(task).map(String::as_str)
    }
}
