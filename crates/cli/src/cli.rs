use clap::{Args, Parser, Subcommand};

use turbine_core::OutputLogsMode;

#[derive(Debug, Parser)]
#[command(name = "turbine", version, about = "A monorepo task runner")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run tasks across workspace packages
    Run(RunArgs),
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Task names to run (e.g. `build`, `pkg#test`)
    #[arg(required = true)]
    pub tasks: Vec<String>,

    /// Restrict the run to packages matching these patterns (repeatable)
    #[arg(long)]
    pub filter: Vec<String>,

    /// Worker count, or a percentage of the available cores (e.g. `50%`)
    #[arg(long, default_value = "10")]
    pub concurrency: String,

    /// Ignore dependency ordering and run every selected task at once
    #[arg(long)]
    pub parallel: bool,

    /// Ignore the existing cache (to force execution)
    #[arg(long)]
    pub force: bool,

    /// Avoid saving task results to the cache
    #[arg(long = "no-cache")]
    pub no_cache: bool,

    /// Keep running unrelated tasks after a failure
    #[arg(long = "continue")]
    pub continue_on_error: bool,

    /// Show what would run without executing; `--dry=json` for JSON
    #[arg(long, value_name = "FORMAT", num_args = 0..=1, default_missing_value = "text")]
    pub dry: Option<String>,

    /// Emit the task graph in graphviz format; optionally to a file
    #[arg(long, value_name = "FILE", num_args = 0..=1, default_missing_value = "")]
    pub graph: Option<String>,

    /// How task output is surfaced: full|hash-only|new-only|errors-only|none
    #[arg(long = "output-logs", value_name = "MODE")]
    pub output_logs: Option<String>,

    /// Run only the named tasks, without their dependencies
    #[arg(long)]
    pub only: bool,

    /// Override the local cache directory
    #[arg(long = "cache-dir", value_name = "DIR")]
    pub cache_dir: Option<String>,

    /// Persist the run summary under .turbo/runs/
    #[arg(long)]
    pub summarize: bool,

    /// Run as if launched from this directory
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<String>,

    /// Arguments forwarded to every task after `--`
    #[arg(last = true)]
    pub pass_through_args: Vec<String>,
}

impl RunArgs {
    pub fn output_logs_mode(&self) -> turbine_core::Result<Option<OutputLogsMode>> {
        self.output_logs
            .as_deref()
            .map(str::parse::<OutputLogsMode>)
            .transpose()
    }
}
