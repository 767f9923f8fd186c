//! Environment variables recognized by the engine. Flag values override
//! these; these override the configuration file.

use std::time::Duration;

/// Engine-relevant environment, captured once per invocation.
#[derive(Debug, Clone, Default)]
pub struct EngineEnv {
    /// `TURBO_FORCE`: bypass cache reads.
    pub force: bool,
    /// `TURBO_RUN_SUMMARY`: persist the run summary to disk.
    pub run_summary: bool,
    /// `TURBO_TOKEN` / `VERCEL_ARTIFACTS_TOKEN`: remote cache auth.
    pub token: Option<String>,
    /// `TURBO_TEAM`: remote cache team identifier.
    pub team: Option<String>,
    /// `TURBO_API`: remote cache base URL.
    pub api_url: Option<String>,
    /// `TURBO_REMOTE_CACHE_TIMEOUT` in seconds.
    pub remote_cache_timeout: Option<Duration>,
    /// `TURBO_REMOTE_CACHE_SIGNATURE_KEY`: enables signed artifacts.
    pub signature_key: Option<String>,
}

impl EngineEnv {
    pub fn from_env() -> Self {
        Self {
            force: bool_var("TURBO_FORCE"),
            run_summary: bool_var("TURBO_RUN_SUMMARY"),
            token: string_var("TURBO_TOKEN").or_else(|| string_var("VERCEL_ARTIFACTS_TOKEN")),
            team: string_var("TURBO_TEAM"),
            api_url: string_var("TURBO_API"),
            remote_cache_timeout: string_var("TURBO_REMOTE_CACHE_TIMEOUT")
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs),
            signature_key: string_var("TURBO_REMOTE_CACHE_SIGNATURE_KEY"),
        }
    }
}

fn string_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn bool_var(name: &str) -> bool {
    matches!(
        std::env::var(name).ok().as_deref(),
        Some("1") | Some("true") | Some("TRUE") | Some("True")
    )
}
