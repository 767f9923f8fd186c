//! One invocation of the engine.
//!
//! A single `Run` value owns the workspace, the merged pipeline, the cache
//! facade, the hash tracker, and the walk for the duration of the
//! invocation; no component reaches for global state.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use console::style;
use parking_lot::Mutex;
use tracing::debug;

use turbine_cache::{
    analytics::NullSink, new_cache, AnalyticsClient, CacheOpts, CacheSource, RemoteCacheConfig,
};
use turbine_config::{
    discover_workspace, load_root_config, load_workspace_overlays, EngineEnv, TurboJson,
};
use turbine_core::{
    AbsoluteSystemPathBuf, Error, OutputLogsMode, Result, Workspace,
};
use turbine_engine::{
    calculate_global_hash, resolve_filter, CancellationToken, EngineBuilder, NodeStatus,
    PackageTask, TaskGraph, Tracker, WalkOpts,
};

use crate::daemon::NoopWatcher;
use crate::execution::{run_command, ChildRegistry, TERMINATION_GRACE};
use crate::run_cache::{RunCache, RunCacheOpts, TaskCache};
use crate::summary::{
    CacheStatus, CacheSummary, EnvironmentSummary, ExecutionState, ExecutionSummary, RunSummary,
    TaskSummary, MISSING_TASK_LABEL,
};

const DEFAULT_CACHE_DIR: &str = "node_modules/.cache/turbo";
const DEFAULT_API_URL: &str = "https://vercel.com/api";
const CACHE_STATE_PROBES: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DryRunFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Default)]
pub struct RunOpts {
    pub tasks: Vec<String>,
    pub filters: Vec<String>,
    pub concurrency: usize,
    pub parallel: bool,
    pub continue_on_error: bool,
    pub force: bool,
    pub no_cache: bool,
    pub only: bool,
    pub dry: Option<DryRunFormat>,
    pub output_logs: Option<OutputLogsMode>,
    pub pass_through_args: Vec<String>,
    pub summarize: bool,
    pub cache_dir: Option<String>,
}

pub struct Run {
    repo_root: AbsoluteSystemPathBuf,
    workspace: Workspace,
    config: TurboJson,
    env: EngineEnv,
    opts: RunOpts,
}

/// Everything a caller needs after the run: the exit code, the summary,
/// and the per-task terminal statuses.
pub struct RunOutcome {
    pub exit_code: i32,
    pub full_turbo: bool,
    pub summary: RunSummary,
    pub statuses: HashMap<String, NodeStatus>,
}

impl Run {
    pub fn new(repo_root: AbsoluteSystemPathBuf, opts: RunOpts) -> Result<Self> {
        let env = EngineEnv::from_env();
        let workspace = discover_workspace(&repo_root)?;
        let mut config = load_root_config(&repo_root)?;
        load_workspace_overlays(&mut config, &workspace)?;
        Ok(Self {
            repo_root,
            workspace,
            config,
            env,
            opts,
        })
    }

    fn build_graph(&self) -> Result<TaskGraph> {
        let frontier = resolve_filter(&self.workspace, &self.opts.filters)?;
        EngineBuilder::new(&self.workspace, &self.config.pipeline)
            .with_tasks_only(self.opts.only)
            .build(&self.opts.tasks, &frontier)
    }

    /// The graphviz rendering for `--graph`.
    pub fn graph_dot(&self) -> Result<String> {
        Ok(self.build_graph()?.dot())
    }

    fn cache_opts(&self) -> Result<CacheOpts> {
        let cache_dir = match &self.opts.cache_dir {
            Some(dir) => {
                let path = std::path::Path::new(dir);
                if path.is_absolute() {
                    AbsoluteSystemPathBuf::new(path)?
                } else {
                    self.repo_root.join_component(dir)?
                }
            }
            None => self.repo_root.join_component(DEFAULT_CACHE_DIR)?,
        };

        let remote_options = self.config.remote_cache.clone().unwrap_or_default();
        let remote_enabled = remote_options.enabled.unwrap_or(true);
        let remote = match (remote_enabled, self.env.token.clone()) {
            (true, Some(token)) => Some(RemoteCacheConfig {
                base_url: self
                    .env
                    .api_url
                    .clone()
                    .or(remote_options.api_url)
                    .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
                token,
                team: self.env.team.clone().or(remote_options.team_id),
                timeout: self
                    .env
                    .remote_cache_timeout
                    .or(remote_options.timeout.map(std::time::Duration::from_secs)),
                signature_key: self.env.signature_key.clone(),
            }),
            _ => None,
        };

        Ok(CacheOpts { cache_dir, remote })
    }

    /// Build the base summary entry for a node before its cache state or
    /// execution are known.
    fn base_summary(
        &self,
        graph: &TaskGraph,
        tracker: &Tracker,
        task: &PackageTask,
        hash: &str,
        task_cache: &TaskCache,
    ) -> TaskSummary {
        TaskSummary {
            task_id: task.task_id.clone(),
            task: task.task.clone(),
            package: task.package_name.clone(),
            hash: hash.to_string(),
            command: task
                .command
                .clone()
                .unwrap_or_else(|| MISSING_TASK_LABEL.to_string()),
            outputs: task.definition.outputs.inclusions.clone(),
            excluded_outputs: task.definition.outputs.exclusions.clone(),
            log_file: task_cache
                .log_file_relative()
                .to_unix()
                .map(|p| p.as_str().to_string())
                .unwrap_or_default(),
            dependencies: to_owned(graph.dependencies_of(&task.task_id)),
            dependents: to_owned(graph.dependents_of(&task.task_id)),
            resolved_task_definition: task.definition.clone(),
            environment_variables: EnvironmentSummary {
                env: task.definition.env.clone(),
                pass_through_env: task.definition.pass_through_env.clone(),
            },
            inputs: tracker
                .input_files_for(task)
                .map(|files| files.as_ref().clone())
                .unwrap_or_default(),
            cache: CacheSummary::miss(),
            execution: None,
        }
    }

    pub fn execute(&self, token: &CancellationToken) -> Result<RunOutcome> {
        let graph = self.build_graph()?;

        let global_hash = calculate_global_hash(
            &self.workspace,
            &self.config.pipeline,
            &self.config.global_dependencies,
            &self.config.global_env,
        )?;
        let tracker = Tracker::new(global_hash.clone());
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        tracker.calculate_file_hashes(&graph, &self.workspace, workers)?;

        let analytics = Some(Arc::new(AnalyticsClient::new(NullSink)));
        let cache = new_cache(&self.cache_opts()?, analytics.clone())?;
        let run_cache = RunCache::new(
            cache,
            self.repo_root.clone(),
            RunCacheOpts {
                skip_reads: self.opts.force || self.env.force,
                skip_writes: self.opts.no_cache,
                output_mode_override: self.opts.output_logs,
            },
            Arc::new(NoopWatcher),
        );

        let mut summary = RunSummary::new(
            global_hash,
            self.config.global_dependencies.clone(),
            self.config.global_env.clone(),
        );

        let outcome = if self.opts.dry.is_some() {
            self.dry_run(&graph, &tracker, &run_cache, &mut summary, token)?
        } else {
            self.real_run(&graph, &tracker, &run_cache, &mut summary, token)?
        };

        run_cache.shutdown();
        if let Some(analytics) = analytics {
            analytics.close();
        }

        if self.opts.summarize || self.env.run_summary {
            self.persist_summary(&summary)?;
        }

        Ok(RunOutcome {
            exit_code: outcome.exit_code,
            full_turbo: outcome.full_turbo,
            summary,
            statuses: outcome.statuses,
        })
    }

    /// Walk the graph with a record-only visitor, then probe cache state in
    /// parallel. No side effects, no child processes.
    fn dry_run(
        &self,
        graph: &TaskGraph,
        tracker: &Tracker,
        run_cache: &Arc<RunCache>,
        summary: &mut RunSummary,
        token: &CancellationToken,
    ) -> Result<PartialOutcome> {
        let summaries: Mutex<HashMap<String, TaskSummary>> = Mutex::new(HashMap::new());

        let visitor = |task_id: &str| -> Result<()> {
            let task = graph.package_task(&self.workspace, task_id)?;
            let dependencies = graph.dependencies_of(task_id);
            let hash = tracker.calculate_task_hash(&task, &dependencies, &self.opts.pass_through_args)?;
            let task_cache = run_cache.task_cache(&task, &hash)?;
            let entry = self.base_summary(graph, tracker, &task, &hash, &task_cache);
            summaries.lock().insert(task_id.to_string(), entry);
            Ok(())
        };

        // Dry runs walk without concurrency; hashing order still matters.
        let result = graph.execute(
            &visitor,
            &WalkOpts {
                concurrency: 1,
                parallel: false,
                continue_on_error: false,
            },
            token,
        );
        if let Some(err) = result.errors.into_iter().next() {
            return Err(err);
        }

        let mut summaries = summaries.into_inner();
        self.populate_cache_states(run_cache, &mut summaries);

        for task_id in graph.topological_order()? {
            if let Some(entry) = summaries.remove(task_id) {
                summary.tasks.push(entry);
            }
        }

        Ok(PartialOutcome {
            exit_code: 0,
            full_turbo: false,
            statuses: result.statuses,
        })
    }

    /// Probe `exists` for every recorded task with a small worker pool.
    fn populate_cache_states(
        &self,
        run_cache: &Arc<RunCache>,
        summaries: &mut HashMap<String, TaskSummary>,
    ) {
        let queue: Mutex<VecDeque<String>> =
            Mutex::new(summaries.keys().cloned().collect());
        let states: Mutex<HashMap<String, turbine_cache::ItemStatus>> =
            Mutex::new(HashMap::new());
        let hashes: HashMap<String, String> = summaries
            .iter()
            .map(|(id, s)| (id.clone(), s.hash.clone()))
            .collect();

        let probes = CACHE_STATE_PROBES.min(summaries.len().max(1));
        std::thread::scope(|scope| {
            for _ in 0..probes {
                scope.spawn(|| loop {
                    let Some(task_id) = queue.lock().pop_front() else {
                        break;
                    };
                    let hash = &hashes[&task_id];
                    match run_cache.exists(hash) {
                        Ok(status) => {
                            states.lock().insert(task_id, status);
                        }
                        Err(err) => {
                            debug!(%hash, "cache probe failed: {err}");
                        }
                    }
                });
            }
        });

        for (task_id, status) in states.into_inner() {
            if let Some(entry) = summaries.get_mut(&task_id) {
                entry.cache = CacheSummary::from_status(status, 0);
            }
        }
    }

    fn real_run(
        &self,
        graph: &TaskGraph,
        tracker: &Tracker,
        run_cache: &Arc<RunCache>,
        summary: &mut RunSummary,
        token: &CancellationToken,
    ) -> Result<PartialOutcome> {
        let summaries: Mutex<HashMap<String, TaskSummary>> = Mutex::new(HashMap::new());
        let registry = ChildRegistry::new();
        let started = Instant::now();

        // Watchdog: when the token fires, reach every live child.
        let done = Arc::new(AtomicBool::new(false));
        let watchdog = {
            let registry = Arc::clone(&registry);
            let token = token.clone();
            let done = Arc::clone(&done);
            std::thread::spawn(move || loop {
                if done.load(Ordering::SeqCst) {
                    break;
                }
                if token.is_cancelled() {
                    registry.terminate_all(TERMINATION_GRACE);
                    break;
                }
                std::thread::sleep(std::time::Duration::from_millis(50));
            })
        };

        let visitor = |task_id: &str| -> Result<()> {
            let task = graph.package_task(&self.workspace, task_id)?;
            let dependencies = graph.dependencies_of(task_id);
            let hash = tracker.calculate_task_hash(&task, &dependencies, &self.opts.pass_through_args)?;
            let task_cache = run_cache.task_cache(&task, &hash)?;
            let mut entry = self.base_summary(graph, tracker, &task, &hash, &task_cache);

            if let Some(hit) = task_cache.restore_outputs()? {
                entry.cache = CacheSummary {
                    local: hit.source == CacheSource::Local,
                    remote: hit.source == CacheSource::Remote,
                    status: CacheStatus::Hit,
                    time_saved: hit.time_saved_ms,
                };
                entry.execution = Some(ExecutionSummary {
                    state: ExecutionState::Cached,
                    exit_code: Some(0),
                    duration_ms: 0,
                });
                summaries.lock().insert(task_id.to_string(), entry);
                return Ok(());
            }

            if task.command.is_none() {
                debug!(task = %task_id, "no script for task, skipping execution");
                entry.execution = Some(ExecutionSummary {
                    state: ExecutionState::NotRun,
                    exit_code: None,
                    duration_ms: 0,
                });
                summaries.lock().insert(task_id.to_string(), entry);
                return Ok(());
            }

            let outcome = match run_command(
                &task,
                &self.repo_root,
                &task_cache,
                &self.opts.pass_through_args,
                &registry,
                token,
            ) {
                Ok(outcome) => outcome,
                Err(err) => {
                    entry.execution = Some(ExecutionSummary {
                        state: if matches!(err, Error::Cancelled { .. }) {
                            ExecutionState::Canceled
                        } else {
                            ExecutionState::Failed
                        },
                        exit_code: None,
                        duration_ms: 0,
                    });
                    summaries.lock().insert(task_id.to_string(), entry);
                    return Err(err);
                }
            };
            let duration_ms = outcome.duration.as_millis() as u64;

            if !outcome.succeeded() {
                if task_cache.output_mode == OutputLogsMode::ErrorsOnly {
                    let _ = task_cache.replay_log_file();
                }
                entry.execution = Some(ExecutionSummary {
                    state: ExecutionState::Failed,
                    exit_code: outcome.exit_code,
                    duration_ms,
                });
                summaries.lock().insert(task_id.to_string(), entry);
                return Err(Error::task_failed(task_id, outcome.exit_code));
            }

            task_cache.save_outputs(duration_ms)?;
            entry.execution = Some(ExecutionSummary {
                state: ExecutionState::Built,
                exit_code: Some(0),
                duration_ms,
            });
            summaries.lock().insert(task_id.to_string(), entry);
            Ok(())
        };

        let result = graph.execute(
            &visitor,
            &WalkOpts {
                concurrency: self.opts.concurrency.max(1),
                parallel: self.opts.parallel,
                continue_on_error: self.opts.continue_on_error,
            },
            token,
        );

        done.store(true, Ordering::SeqCst);
        let _ = watchdog.join();

        let mut summaries = summaries.into_inner();
        // Tasks skipped by the walker still appear in the summary.
        for (task_id, status) in &result.statuses {
            if summaries.contains_key(task_id) {
                continue;
            }
            let state = match status {
                NodeStatus::UpstreamFailed => ExecutionState::UpstreamFailed,
                NodeStatus::UpstreamCancelled => ExecutionState::UpstreamCanceled,
                NodeStatus::Cancelled => ExecutionState::Canceled,
                _ => ExecutionState::NotRun,
            };
            if let Ok(task) = graph.package_task(&self.workspace, task_id) {
                if let Ok(task_cache) = run_cache.task_cache(&task, "") {
                    let mut entry = self.base_summary(graph, tracker, &task, "", &task_cache);
                    entry.execution = Some(ExecutionSummary {
                        state,
                        exit_code: None,
                        duration_ms: 0,
                    });
                    summaries.insert(task_id.clone(), entry);
                }
            }
        }

        for task_id in graph.topological_order()? {
            if let Some(entry) = summaries.remove(task_id) {
                summary.tasks.push(entry);
            }
        }

        let attempted = summary.tasks.len();
        let cached = summary
            .tasks
            .iter()
            .filter(|t| t.cache.status == CacheStatus::Hit)
            .count();
        let successful = result
            .statuses
            .values()
            .filter(|s| **s == NodeStatus::Succeeded)
            .count();
        let full_turbo = attempted > 0 && cached == attempted && result.errors.is_empty();

        self.print_tally(successful, attempted, cached, started, full_turbo, &result.errors);

        let exit_code = if result.is_success() { 0 } else { 1 };
        Ok(PartialOutcome {
            exit_code,
            full_turbo,
            statuses: result.statuses,
        })
    }

    fn print_tally(
        &self,
        successful: usize,
        attempted: usize,
        cached: usize,
        started: Instant,
        full_turbo: bool,
        errors: &[Error],
    ) {
        println!();
        println!(
            " Tasks:    {} successful, {attempted} total",
            style(successful).bold()
        );
        println!(" Cached:   {cached} cached, {attempted} total");
        println!("   Time:   {:.2}s", started.elapsed().as_secs_f64());
        if full_turbo {
            println!();
            println!("{}", style(">>> FULL TURBO").cyan().bold());
        }
        if !errors.is_empty() {
            println!();
            for err in errors {
                eprintln!(" {} {err}", style("ERROR").red().bold());
            }
        }
        println!();
    }

    fn persist_summary(&self, summary: &RunSummary) -> Result<()> {
        let runs_dir = self.repo_root.join_component(".turbo")?.join_component("runs")?;
        std::fs::create_dir_all(runs_dir.as_path())
            .map_err(|e| Error::file_system(runs_dir.as_path(), "create runs directory", e))?;
        let path = runs_dir.join_component(&format!("{}.json", summary.id))?;
        std::fs::write(path.as_path(), summary.format_json()?)
            .map_err(|e| Error::file_system(path.as_path(), "persist run summary", e))?;
        debug!(path = %path, "persisted run summary");
        Ok(())
    }
}

struct PartialOutcome {
    exit_code: i32,
    full_turbo: bool,
    statuses: HashMap<String, NodeStatus>,
}

fn to_owned(names: Vec<&str>) -> Vec<String> {
    names.into_iter().map(str::to_string).collect()
}

/// `--concurrency N|P%`: an absolute worker count or a percentage of the
/// available cores.
pub fn parse_concurrency(raw: &str) -> Result<usize> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    if let Some(percent) = raw.strip_suffix('%') {
        let percent: f64 = percent
            .parse()
            .map_err(|_| Error::config(format!("invalid concurrency percentage `{raw}`")))?;
        if percent <= 0.0 {
            return Err(Error::config(format!(
                "concurrency percentage must be positive: `{raw}`"
            )));
        }
        return Ok(((cores as f64 * percent / 100.0).ceil() as usize).max(1));
    }
    let count: usize = raw
        .parse()
        .map_err(|_| Error::config(format!("invalid concurrency `{raw}`")))?;
    if count == 0 {
        return Err(Error::config("concurrency must be at least 1"));
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_accepts_counts_and_percentages() {
        assert_eq!(parse_concurrency("4").unwrap(), 4);
        assert!(parse_concurrency("100%").unwrap() >= 1);
        assert!(parse_concurrency("0").is_err());
        assert!(parse_concurrency("-2").is_err());
        assert!(parse_concurrency("half").is_err());
    }
}
