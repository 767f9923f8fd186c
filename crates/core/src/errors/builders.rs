//! Builder methods for creating errors with context

use std::path::PathBuf;

use super::types::Error;

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Create an undefined-task error
    #[must_use]
    pub fn undefined_task(name: impl Into<String>) -> Self {
        Error::UndefinedTask { name: name.into() }
    }

    /// Create an undefined-package error
    #[must_use]
    pub fn undefined_package(name: impl Into<String>) -> Self {
        Error::UndefinedPackage { name: name.into() }
    }

    /// Create a cycle error from the offending path
    #[must_use]
    pub fn cycle(path: Vec<String>) -> Self {
        Error::CycleDetected { path }
    }

    /// Create a task failure error
    #[must_use]
    pub fn task_failed(task_id: impl Into<String>, exit_code: Option<i32>) -> Self {
        Error::TaskFailed {
            task_id: task_id.into(),
            exit_code,
        }
    }

    /// Create a cancellation record for a task
    #[must_use]
    pub fn cancelled(task_id: impl Into<String>) -> Self {
        Error::Cancelled {
            task_id: task_id.into(),
        }
    }

    /// Create a corrupt-cache error
    #[must_use]
    pub fn cache_corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::CacheCorrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a file system error with context
    #[must_use]
    pub fn file_system(
        path: impl Into<PathBuf>,
        operation: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Error::FileSystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    /// Create a JSON error with context
    #[must_use]
    pub fn json(message: impl Into<String>, source: serde_json::Error) -> Self {
        Error::Json {
            message: message.into(),
            source,
        }
    }

    /// Create a network error
    #[must_use]
    pub fn network(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Network {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(operation: impl Into<String>, duration: std::time::Duration) -> Self {
        Error::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create an internal invariant error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }
}
