//! Task identifier helpers.
//!
//! A task id is the pair `package#task`. The workspace root package is
//! spelled `//`, and the synthetic sink of every task graph is
//! `___ROOT___`.

/// Separator between package and task in a task id.
pub const TASK_DELIMITER: &str = "#";

/// Name of the workspace root package.
pub const ROOT_PKG_NAME: &str = "//";

/// Name of the synthetic root node every task graph sinks into.
pub const ROOT_NODE_NAME: &str = "___ROOT___";

/// Construct a `package#task` id.
pub fn task_id(package: &str, task: &str) -> String {
    format!("{package}{TASK_DELIMITER}{task}")
}

/// Split a task id into `(package, task)`. Returns `None` for bare names.
pub fn split(task_id: &str) -> Option<(&str, &str)> {
    // The root package name `//` contains no delimiter, so a plain split
    // suffices.
    task_id.split_once(TASK_DELIMITER)
}

/// Whether this pipeline key is qualified with a package name.
pub fn is_package_task(name: &str) -> bool {
    name.contains(TASK_DELIMITER)
}

/// The task-name portion of a possibly-qualified id.
pub fn task_name(task_id_or_name: &str) -> &str {
    match split(task_id_or_name) {
        Some((_, task)) => task,
        None => task_id_or_name,
    }
}

/// The package portion of a qualified id, if any.
pub fn package_name(task_id_or_name: &str) -> Option<&str> {
    split(task_id_or_name).map(|(package, _)| package)
}
