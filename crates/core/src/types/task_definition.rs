use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// Output globs a task produces: inclusion patterns minus exclusion
/// patterns, both anchored at the package directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskOutputs {
    pub inclusions: Vec<String>,
    pub exclusions: Vec<String>,
}

impl TaskOutputs {
    /// The outputs list as it participates in the task hash: sorted
    /// inclusions followed by sorted `!`-prefixed exclusions.
    pub fn hashable(&self) -> Vec<String> {
        let mut inclusions = self.inclusions.clone();
        inclusions.sort();
        let mut exclusions: Vec<String> =
            self.exclusions.iter().map(|e| format!("!{e}")).collect();
        exclusions.sort();
        inclusions.extend(exclusions);
        inclusions
    }
}

/// How task output is surfaced on the terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutputLogsMode {
    #[default]
    Full,
    HashOnly,
    NewOnly,
    ErrorsOnly,
    None,
}

impl FromStr for OutputLogsMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(OutputLogsMode::Full),
            "hash-only" => Ok(OutputLogsMode::HashOnly),
            "new-only" => Ok(OutputLogsMode::NewOnly),
            "errors-only" => Ok(OutputLogsMode::ErrorsOnly),
            "none" => Ok(OutputLogsMode::None),
            other => Err(Error::config(format!(
                "invalid output mode `{other}`: expected full|hash-only|new-only|errors-only|none"
            ))),
        }
    }
}

impl fmt::Display for OutputLogsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutputLogsMode::Full => "full",
            OutputLogsMode::HashOnly => "hash-only",
            OutputLogsMode::NewOnly => "new-only",
            OutputLogsMode::ErrorsOnly => "errors-only",
            OutputLogsMode::None => "none",
        };
        f.write_str(s)
    }
}

/// The resolved cache/inputs/outputs/env/dependency policy for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    /// Raw `dependsOn` entries: `^dep`, `pkg#dep`, or bare `dep`.
    pub task_dependencies: Vec<String>,

    /// Input globs contributing to the task hash. Empty means every tracked
    /// file in the package.
    pub inputs: Vec<String>,

    pub outputs: TaskOutputs,

    /// Environment variables whose values feed the task hash.
    pub env: Vec<String>,

    /// Environment variables handed to the task but excluded from hashing.
    pub pass_through_env: Vec<String>,

    pub output_mode: OutputLogsMode,

    /// Whether results may be written to and replayed from the cache.
    pub cache: bool,

    /// Long-running task that never exits normally; may not be depended on.
    pub persistent: bool,

    /// Task wants an interactive terminal; implies no caching.
    pub interactive: bool,
}

impl Default for TaskDefinition {
    fn default() -> Self {
        Self {
            task_dependencies: Vec::new(),
            inputs: Vec::new(),
            outputs: TaskOutputs::default(),
            env: Vec::new(),
            pass_through_env: Vec::new(),
            output_mode: OutputLogsMode::default(),
            cache: true,
            persistent: false,
            interactive: false,
        }
    }
}

/// Prefix marking a `dependsOn` entry as topological: expand over the
/// package's workspace dependencies.
pub const TOPOLOGICAL_PREFIX: &str = "^";

impl TaskDefinition {
    pub fn should_cache(&self) -> bool {
        self.cache && !self.interactive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashable_outputs_sort_and_mark_exclusions() {
        let outputs = TaskOutputs {
            inclusions: vec!["dist/**".into(), "build/**".into()],
            exclusions: vec!["dist/cache/**".into()],
        };
        assert_eq!(
            outputs.hashable(),
            vec!["build/**", "dist/**", "!dist/cache/**"]
        );
    }

    #[test]
    fn output_mode_parses_kebab_names() {
        assert_eq!(
            "hash-only".parse::<OutputLogsMode>().unwrap(),
            OutputLogsMode::HashOnly
        );
        assert!("verbose".parse::<OutputLogsMode>().is_err());
    }

    #[test]
    fn cache_defaults_to_true() {
        assert!(TaskDefinition::default().cache);
        assert!(TaskDefinition::default().should_cache());
    }
}
