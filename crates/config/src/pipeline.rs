use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Serialize;

use turbine_core::{task_id, TaskDefinition};

/// The merged pipeline: task definitions keyed by bare task name or
/// qualified `pkg#task` id. Insertion order follows the configuration files;
/// hashing always goes through the sorted view.
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    tasks: IndexMap<String, TaskDefinition>,
}

impl Pipeline {
    pub fn new(tasks: IndexMap<String, TaskDefinition>) -> Self {
        Self { tasks }
    }

    pub fn insert(&mut self, key: String, definition: TaskDefinition) {
        self.tasks.insert(key, definition);
    }

    /// Resolve the definition for a task id by the most specific key:
    /// `pkg#task` overrides the bare `task` entry.
    pub fn task_definition(&self, id: &str) -> Option<&TaskDefinition> {
        if let Some(definition) = self.tasks.get(id) {
            return Some(definition);
        }
        self.tasks.get(task_id::task_name(id))
    }

    /// Whether any pipeline entry covers this bare task name.
    pub fn has_task(&self, name: &str) -> bool {
        self.tasks
            .keys()
            .any(|key| key == name || task_id::task_name(key) == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &TaskDefinition)> {
        self.tasks.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Key-sorted view of the pipeline for deterministic hashing.
    pub fn hashable(&self) -> BTreeMap<&str, HashableTask<'_>> {
        self.tasks
            .iter()
            .map(|(key, def)| {
                (
                    key.as_str(),
                    HashableTask {
                        task_dependencies: &def.task_dependencies,
                        inputs: &def.inputs,
                        outputs: def.outputs.hashable(),
                        env: &def.env,
                        pass_through_env: &def.pass_through_env,
                        cache: def.cache,
                        persistent: def.persistent,
                    },
                )
            })
            .collect()
    }
}

/// The hash-relevant projection of one pipeline entry.
#[derive(Debug, Serialize)]
pub struct HashableTask<'a> {
    task_dependencies: &'a [String],
    inputs: &'a [String],
    outputs: Vec<String>,
    env: &'a [String],
    pass_through_env: &'a [String],
    cache: bool,
    persistent: bool,
}
