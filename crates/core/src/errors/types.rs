//! Core error type definitions

use std::path::PathBuf;
use std::time::Duration;

use crate::paths::PathError;

/// Result type alias for turbine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for turbine operations using thiserror
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration schema violations, unknown keys, invalid values
    Config { message: String },

    /// A requested or referenced task has no pipeline definition
    UndefinedTask { name: String },

    /// A task reference names a package that is not in the workspace
    UndefinedPackage { name: String },

    /// The expanded task graph (or the workspace graph) contains a cycle
    CycleDetected { path: Vec<String> },

    /// A persistent task may not be depended on
    PersistentWithDependents {
        persistent: String,
        dependent: String,
    },

    /// Child process exited non-zero
    TaskFailed {
        task_id: String,
        exit_code: Option<i32>,
    },

    /// Task was interrupted by a cancellation signal
    Cancelled { task_id: String },

    /// Archive failed its integrity check or contains disallowed content
    CacheCorrupt { path: PathBuf, reason: String },

    /// Archive entry name is not a well-formed anchored unix path
    NameMalformed { name: String },

    /// Archive entry name cannot be restored on Windows
    NameWindowsUnsafe { name: String },

    /// Archive entry type is not regular/dir/symlink
    UnsupportedFileType { name: String },

    /// Deferred symlinks form a cycle
    LinkCycle { names: Vec<String> },

    /// A symlink target never materialized during restoration
    MissingSymlinkTarget { name: String, target: String },

    /// Path flavor violations
    Path(#[from] PathError),

    /// File system operations
    FileSystem {
        path: PathBuf,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization errors
    Json {
        message: String,
        #[source]
        source: serde_json::Error,
    },

    /// Network-related errors (remote cache, analytics)
    Network { endpoint: String, message: String },

    /// Operation timeout errors
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Internal scheduler or tracker invariant broken
    Internal { message: String },
}

impl Error {
    /// Whether this error should be downgraded to a cache miss with a warning
    /// rather than aborting the run.
    pub fn is_cache_miss_downgrade(&self) -> bool {
        matches!(
            self,
            Error::CacheCorrupt { .. } | Error::Network { .. } | Error::Timeout { .. }
        )
    }
}
