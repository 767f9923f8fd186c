//! Run summaries: the plan plus its execution record, rendered as aligned
//! text blocks or one stable JSON document.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::Utc;
use serde::Serialize;

use turbine_cache::ItemStatus;
use turbine_core::TaskDefinition;

/// Label recorded when a package declares no script for the task.
pub const MISSING_TASK_LABEL: &str = "<NONEXISTENT>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSummary {
    pub local: bool,
    pub remote: bool,
    pub status: CacheStatus,
    /// Milliseconds of execution the hit avoided.
    pub time_saved: u64,
}

impl CacheSummary {
    pub fn miss() -> Self {
        Self {
            local: false,
            remote: false,
            status: CacheStatus::Miss,
            time_saved: 0,
        }
    }

    pub fn from_status(status: ItemStatus, time_saved: u64) -> Self {
        Self {
            local: status.local,
            remote: status.remote,
            status: if status.local || status.remote {
                CacheStatus::Hit
            } else {
                CacheStatus::Miss
            },
            time_saved,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionState {
    Built,
    Cached,
    Failed,
    Canceled,
    UpstreamFailed,
    UpstreamCanceled,
    NotRun,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionSummary {
    pub state: ExecutionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentSummary {
    pub env: Vec<String>,
    pub pass_through_env: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub task_id: String,
    pub task: String,
    pub package: String,
    pub hash: String,
    pub command: String,
    pub outputs: Vec<String>,
    pub excluded_outputs: Vec<String>,
    pub log_file: String,
    pub dependencies: Vec<String>,
    pub dependents: Vec<String>,
    pub resolved_task_definition: TaskDefinition,
    pub environment_variables: EnvironmentSummary,
    /// Input file -> content hash, sorted for determinism.
    pub inputs: BTreeMap<String, String>,
    pub cache: CacheSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution: Option<ExecutionSummary>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalCacheInputs {
    pub hash: String,
    pub global_dependencies: Vec<String>,
    pub global_env: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub id: String,
    /// Summary schema version.
    pub version: String,
    pub turbo_version: String,
    pub started_at: String,
    pub global_cache_inputs: GlobalCacheInputs,
    pub tasks: Vec<TaskSummary>,
}

impl RunSummary {
    pub fn new(global_hash: String, global_dependencies: Vec<String>, global_env: Vec<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            version: "1".to_string(),
            turbo_version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Utc::now().to_rfc3339(),
            global_cache_inputs: GlobalCacheInputs {
                hash: global_hash,
                global_dependencies,
                global_env,
            },
            tasks: Vec::new(),
        }
    }

    pub fn format_json(&self) -> turbine_core::Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| turbine_core::Error::json("failed to render run summary", e))
    }

    /// One block per task with aligned fields.
    pub fn format_text(&self) -> String {
        let mut out = String::new();
        for task in &self.tasks {
            let _ = writeln!(out, "{}", task.task_id);
            let fields: Vec<(&str, String)> = vec![
                ("Task", task.task.clone()),
                ("Package", task.package.clone()),
                ("Hash", task.hash.clone()),
                ("Cached (Local)", task.cache.local.to_string()),
                ("Cached (Remote)", task.cache.remote.to_string()),
                ("Command", task.command.clone()),
                ("Outputs", task.outputs.join(", ")),
                ("Log File", task.log_file.clone()),
                ("Dependencies", task.dependencies.join(", ")),
                ("Dependents", task.dependents.join(", ")),
            ];
            for (label, value) in fields {
                let _ = writeln!(out, "  {label: <24} = {value}");
            }
        }
        out
    }
}
