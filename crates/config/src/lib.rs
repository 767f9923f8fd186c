//! Configuration loading: `turbo.json` parsing and validation, per-workspace
//! pipeline overlays, workspace discovery, and the environment variables the
//! engine recognizes.

mod env;
mod pipeline;
mod turbo_json;
mod workspace;

pub use env::EngineEnv;
pub use pipeline::{HashableTask, Pipeline};
pub use turbo_json::{load_root_config, load_workspace_overlays, RemoteCacheOptions, TurboJson};
pub use workspace::discover_workspace;

/// File name of the pipeline configuration at the root and in workspaces.
pub const CONFIG_FILE: &str = "turbo.json";
