//! Display implementation for the core error type

use std::fmt;

use super::types::Error;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config { message } => write!(f, "invalid configuration: {message}"),
            Error::UndefinedTask { name } => {
                write!(f, "task `{name}` has no entry in the pipeline")
            }
            Error::UndefinedPackage { name } => {
                write!(f, "package `{name}` is not part of the workspace")
            }
            Error::CycleDetected { path } => {
                write!(f, "cyclic task dependency: {}", path.join(" -> "))
            }
            Error::PersistentWithDependents {
                persistent,
                dependent,
            } => write!(
                f,
                "`{dependent}` depends on `{persistent}`, but persistent tasks may not have dependents"
            ),
            Error::TaskFailed { task_id, exit_code } => match exit_code {
                Some(code) => write!(f, "{task_id} exited ({code})"),
                None => write!(f, "{task_id} terminated by signal"),
            },
            Error::Cancelled { task_id } => write!(f, "{task_id} was cancelled"),
            Error::CacheCorrupt { path, reason } => {
                write!(f, "cache artifact {} is corrupt: {reason}", path.display())
            }
            Error::NameMalformed { name } => {
                write!(f, "archive entry name is malformed: {name}")
            }
            Error::NameWindowsUnsafe { name } => {
                write!(f, "archive entry name is unsafe on Windows: {name}")
            }
            Error::UnsupportedFileType { name } => {
                write!(f, "archive entry {name} has an unsupported file type")
            }
            Error::LinkCycle { names } => {
                write!(f, "symlinks form a cycle: {}", names.join(" -> "))
            }
            Error::MissingSymlinkTarget { name, target } => {
                write!(f, "symlink {name} points at missing target {target}")
            }
            Error::Path(err) => write!(f, "{err}"),
            Error::FileSystem {
                path, operation, ..
            } => write!(f, "failed to {operation}: {}", path.display()),
            Error::Json { message, .. } => write!(f, "{message}"),
            Error::Network { endpoint, message } => {
                write!(f, "network error talking to {endpoint}: {message}")
            }
            Error::Timeout {
                operation,
                duration,
            } => write!(f, "{operation} timed out after {duration:?}"),
            Error::Internal { message } => write!(f, "internal error: {message}"),
        }
    }
}
