//! The per-run cache surface.
//!
//! `RunCache` wraps the cache facade for a single invocation; `TaskCache`
//! scopes it to one task: restoring prior outputs and logs, capturing live
//! output into the task's log file, and saving fresh outputs afterwards.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::sync::Arc;

use console::style;
use globset::{GlobBuilder, GlobSetBuilder};
use tracing::{debug, warn};
use walkdir::WalkDir;

use turbine_cache::{Cache, CacheSource};
use turbine_core::{
    AbsoluteSystemPathBuf, AnchoredSystemPathBuf, Error, OutputLogsMode, Result,
};
use turbine_engine::PackageTask;

use crate::daemon::{changed_outputs_or_all, OutputWatcher};
use crate::output::{ColorSelector, MultiWriter, PrefixedWriter};

#[derive(Debug, Clone, Default)]
pub struct RunCacheOpts {
    /// `--force`: ignore the existing cache.
    pub skip_reads: bool,
    /// `--no-cache`: do not save task results.
    pub skip_writes: bool,
    /// `--output-logs` override of each task's configured mode.
    pub output_mode_override: Option<OutputLogsMode>,
}

pub struct RunCache {
    cache: Arc<dyn Cache>,
    repo_root: AbsoluteSystemPathBuf,
    opts: RunCacheOpts,
    watcher: Arc<dyn OutputWatcher>,
    colors: ColorSelector,
}

/// A cache hit and how much execution time it avoided.
#[derive(Debug, Clone, Copy)]
pub struct CacheHit {
    pub source: CacheSource,
    pub time_saved_ms: u64,
}

impl RunCache {
    pub fn new(
        cache: Arc<dyn Cache>,
        repo_root: AbsoluteSystemPathBuf,
        opts: RunCacheOpts,
        watcher: Arc<dyn OutputWatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            repo_root,
            opts,
            watcher,
            colors: ColorSelector::new(),
        })
    }

    pub fn shutdown(&self) {
        self.cache.shutdown();
    }

    pub fn exists(&self, hash: &str) -> Result<turbine_cache::ItemStatus> {
        self.cache.exists(hash)
    }

    /// Scope the run cache to one task.
    pub fn task_cache(self: &Arc<Self>, task: &PackageTask, hash: &str) -> Result<TaskCache> {
        let (inclusions, exclusions) = task.repo_relative_output_globs()?;
        let log_file_relative = task.log_file()?;
        let log_file = log_file_relative.restore_anchor(&self.repo_root);
        let output_mode = self
            .opts
            .output_mode_override
            .unwrap_or(task.definition.output_mode);
        Ok(TaskCache {
            run_cache: Arc::clone(self),
            task: task.clone(),
            hash: hash.to_string(),
            inclusion_globs: inclusions,
            exclusion_globs: exclusions,
            output_mode,
            caching_disabled: !task.definition.should_cache(),
            log_file,
            log_file_relative,
        })
    }
}

pub struct TaskCache {
    run_cache: Arc<RunCache>,
    task: PackageTask,
    hash: String,
    inclusion_globs: Vec<String>,
    exclusion_globs: Vec<String>,
    pub output_mode: OutputLogsMode,
    caching_disabled: bool,
    log_file: AbsoluteSystemPathBuf,
    log_file_relative: AnchoredSystemPathBuf,
}

impl TaskCache {
    pub fn log_file_relative(&self) -> &AnchoredSystemPathBuf {
        &self.log_file_relative
    }

    fn prefix(&self) -> String {
        let style = self
            .run_cache
            .colors
            .style_for(&self.task.package_name);
        format!("{}: ", style.apply_to(self.task.output_prefix()))
    }

    fn status_line(&self, message: &str) {
        if matches!(
            self.output_mode,
            OutputLogsMode::None | OutputLogsMode::ErrorsOnly
        ) {
            return;
        }
        println!("{}{message}", self.prefix());
    }

    /// Try to replay a previous execution. Returns the hit metadata, or
    /// `None` when the task must run.
    pub fn restore_outputs(&self) -> Result<Option<CacheHit>> {
        if self.caching_disabled || self.run_cache.opts.skip_reads {
            self.status_line(&format!(
                "cache bypass, force executing {}",
                style(&self.hash).dim()
            ));
            return Ok(None);
        }

        let (changed_globs, watcher_time_saved) = changed_outputs_or_all(
            self.run_cache.watcher.as_ref(),
            &self.hash,
            &self.inclusion_globs,
        );

        let hit = if changed_globs.is_empty() {
            // Outputs are untouched since the last cache write; nothing to
            // restore.
            debug!(task = %self.task.task_id, "outputs unchanged, skipping restoration");
            Some(CacheHit {
                source: CacheSource::Local,
                time_saved_ms: watcher_time_saved,
            })
        } else {
            match self
                .run_cache
                .cache
                .fetch(&self.run_cache.repo_root, &self.hash, &changed_globs)
            {
                Ok(Some(artifact)) => Some(CacheHit {
                    source: artifact.source,
                    time_saved_ms: artifact.duration_ms + watcher_time_saved,
                }),
                Ok(None) => None,
                Err(err) if err.is_cache_miss_downgrade() => {
                    warn!(task = %self.task.task_id, "treating unusable cache artifact as a miss: {err}");
                    None
                }
                Err(err) => return Err(err),
            }
        };

        let Some(hit) = hit else {
            self.status_line(&format!(
                "cache miss, executing {}",
                style(&self.hash).dim()
            ));
            return Ok(None);
        };

        match self.output_mode {
            OutputLogsMode::Full => self.replay_log_file()?,
            OutputLogsMode::HashOnly | OutputLogsMode::NewOnly => {
                self.status_line(&format!(
                    "cache hit, suppressing output {}",
                    style(&self.hash).dim()
                ));
            }
            OutputLogsMode::ErrorsOnly | OutputLogsMode::None => {}
        }

        Ok(Some(hit))
    }

    /// Replay the captured log line by line. The prefix is baked into the
    /// log body, so lines go straight to the terminal.
    pub fn replay_log_file(&self) -> Result<()> {
        if !self.log_file.exists() {
            return Ok(());
        }
        let file = File::open(self.log_file.as_path())
            .map_err(|e| Error::file_system(self.log_file.as_path(), "open task log", e))?;
        for line in BufReader::new(file).lines() {
            let line = line
                .map_err(|e| Error::file_system(self.log_file.as_path(), "read task log", e))?;
            println!("{line}");
        }
        Ok(())
    }

    /// The sink for a live child process: terminal (respecting the output
    /// mode) plus the log file that later rides along in the artifact.
    pub fn output_writer(&self) -> Result<Box<dyn Write + Send>> {
        let terminal: Box<dyn Write + Send> = Box::new(PrefixedWriter::new(
            self.prefix(),
            std::io::stdout(),
        ));

        if self.caching_disabled || self.run_cache.opts.skip_writes {
            return Ok(terminal);
        }

        if let Some(parent) = self.log_file.as_path().parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::file_system(parent, "create log directory", e))?;
        }
        let log = File::create(self.log_file.as_path())
            .map_err(|e| Error::file_system(self.log_file.as_path(), "create task log", e))?;
        let mut log = BufWriter::new(log);
        // The replay banner is baked into the log so a later cache hit
        // replays it verbatim.
        log.write_all(
            format!(
                "{}: cache hit, replaying output {}\n",
                self.task.output_prefix(),
                self.hash
            )
            .as_bytes(),
        )
        .map_err(|e| Error::file_system(self.log_file.as_path(), "write log banner", e))?;
        // The log carries an uncolored prefix so replayed lines read the
        // same as live ones.
        let log = Box::new(PrefixedWriter::new(
            format!("{}: ", self.task.output_prefix()),
            log,
        ));

        Ok(match self.output_mode {
            OutputLogsMode::Full | OutputLogsMode::NewOnly => {
                Box::new(MultiWriter::new(vec![terminal, log]))
            }
            // Quiet modes still capture to the log for later replay.
            OutputLogsMode::HashOnly | OutputLogsMode::ErrorsOnly | OutputLogsMode::None => log,
        })
    }

    /// After a successful execution, glob the declared outputs (inclusions
    /// minus exclusions), add the log file, and hand everything to the
    /// cache facade.
    pub fn save_outputs(&self, duration_ms: u64) -> Result<()> {
        if self.caching_disabled || self.run_cache.opts.skip_writes {
            return Ok(());
        }

        let mut files = self.expand_outputs()?;
        if !self.inclusion_globs.is_empty() && files.is_empty() {
            warn!(
                task = %self.task.task_id,
                "task declared outputs, but none were found after it ran"
            );
        }
        if self.log_file.exists() {
            files.push(self.log_file_relative.clone());
        }
        files.sort();
        files.dedup();

        self.run_cache
            .cache
            .put(&self.run_cache.repo_root, &self.hash, duration_ms, &files)?;

        let outputs = turbine_core::TaskOutputs {
            inclusions: self.inclusion_globs.clone(),
            exclusions: self.exclusion_globs.clone(),
        };
        if let Err(err) =
            self.run_cache
                .watcher
                .notify_outputs_written(&self.hash, &outputs, duration_ms)
        {
            warn!(task = %self.task.task_id, "failed to notify output watcher: {err}");
        }
        Ok(())
    }

    /// Expand the repo-relative output globs against the package directory.
    fn expand_outputs(&self) -> Result<Vec<AnchoredSystemPathBuf>> {
        if self.inclusion_globs.is_empty() {
            return Ok(Vec::new());
        }

        let build_set = |globs: &[String]| -> Result<globset::GlobSet> {
            let mut builder = GlobSetBuilder::new();
            for pattern in globs {
                let glob = GlobBuilder::new(pattern)
                    .literal_separator(true)
                    .build()
                    .map_err(|e| Error::config(format!("invalid output glob `{pattern}`: {e}")))?;
                builder.add(glob);
            }
            builder
                .build()
                .map_err(|e| Error::config(format!("invalid output globs: {e}")))
        };
        let inclusions = build_set(&self.inclusion_globs)?;
        let exclusions = build_set(&self.exclusion_globs)?;

        let package_dir = self
            .task
            .package
            .dir
            .restore_anchor(&self.run_cache.repo_root);
        let mut files = Vec::new();
        for entry in WalkDir::new(package_dir.as_path())
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if entry.file_type().is_dir() {
                continue;
            }
            let absolute = AbsoluteSystemPathBuf::new(entry.path())?;
            let relative = absolute.relative_to(&self.run_cache.repo_root)?;
            let unix = relative.to_unix()?;
            if inclusions.is_match(unix.as_str()) && !exclusions.is_match(unix.as_str()) {
                files.push(relative);
            }
        }
        Ok(files)
    }
}
