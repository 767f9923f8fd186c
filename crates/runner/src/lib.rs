//! Run orchestration: the run cache, child execution, summaries, and the
//! `Run` value that owns one invocation end to end.

pub mod daemon;
mod execution;
mod output;
mod run;
mod run_cache;
pub mod summary;

pub use execution::{ChildRegistry, TERMINATION_GRACE};
pub use output::{ColorSelector, PrefixedWriter};
pub use run::{parse_concurrency, DryRunFormat, Run, RunOpts, RunOutcome};
pub use run_cache::{CacheHit, RunCache, RunCacheOpts, TaskCache};
