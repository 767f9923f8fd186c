//! Real execution: spawn the task's command, stream its output through the
//! task cache writer, and terminate children cooperatively on cancellation
//! (SIGTERM, a grace period, then SIGKILL).

use std::collections::HashSet;
use std::io::{BufReader, Read, Write};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use turbine_core::{AbsoluteSystemPathBuf, Error, Result};
use turbine_engine::{CancellationToken, PackageTask};

use crate::run_cache::TaskCache;

/// How long children get between SIGTERM and SIGKILL.
pub const TERMINATION_GRACE: Duration = Duration::from_secs(2);

/// Tracks live child process-group ids so cancellation can reach them.
#[derive(Default)]
pub struct ChildRegistry {
    children: Mutex<HashSet<u32>>,
}

impl ChildRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, pid: u32) {
        self.children.lock().insert(pid);
    }

    fn unregister(&self, pid: u32) {
        self.children.lock().remove(&pid);
    }

    /// Terminate every live child: SIGTERM its process group, wait out the
    /// grace period, then SIGKILL whatever remains.
    pub fn terminate_all(&self, grace: Duration) {
        let pids: Vec<u32> = self.children.lock().iter().copied().collect();
        if pids.is_empty() {
            return;
        }
        debug!(count = pids.len(), "terminating in-flight child processes");
        for pid in &pids {
            signal_group(*pid, libc::SIGTERM);
        }
        std::thread::sleep(grace);
        for pid in self.children.lock().iter() {
            signal_group(*pid, libc::SIGKILL);
        }
    }
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: i32) {
    // Negative pid addresses the whole process group.
    unsafe {
        libc::kill(-(pid as i32), signal);
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: i32) {}

/// The result of one child execution.
#[derive(Debug)]
pub struct ChildOutcome {
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

impl ChildOutcome {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Run one task's command to completion, streaming output into the task
/// cache writer. Returns `Cancelled` when the token fired mid-flight.
pub fn run_command(
    task: &PackageTask,
    repo_root: &AbsoluteSystemPathBuf,
    task_cache: &TaskCache,
    pass_through_args: &[String],
    registry: &ChildRegistry,
    token: &CancellationToken,
) -> Result<ChildOutcome> {
    let Some(script) = &task.command else {
        return Err(Error::internal(format!(
            "{} has no command to execute",
            task.task_id
        )));
    };

    let mut command_line = script.clone();
    if !pass_through_args.is_empty() {
        command_line.push(' ');
        command_line.push_str(&pass_through_args.join(" "));
    }

    let package_dir = task.package.dir.restore_anchor(repo_root);
    let started = Instant::now();

    let mut command = Command::new("sh");
    command
        .arg("-c")
        .arg(&command_line)
        .current_dir(package_dir.as_path())
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // Each task leads its own process group so termination reaches the
        // whole tree.
        command.process_group(0);
    }

    let mut child = command.spawn().map_err(|e| {
        Error::file_system(package_dir.as_path(), format!("spawn `{command_line}`"), e)
    })?;
    let pid = child.id();
    registry.register(pid);

    let writer = Mutex::new(task_cache.output_writer()?);
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let status = std::thread::scope(|scope| {
        if let Some(stdout) = stdout {
            scope.spawn(|| pump(stdout, &writer));
        }
        if let Some(stderr) = stderr {
            scope.spawn(|| pump(stderr, &writer));
        }
        child.wait()
    });
    registry.unregister(pid);

    if let Err(err) = writer.lock().flush() {
        warn!(task = %task.task_id, "failed to flush task output: {err}");
    }

    let status =
        status.map_err(|e| Error::file_system(package_dir.as_path(), "wait for child", e))?;
    let duration = started.elapsed();

    if token.is_cancelled() && !status.success() {
        return Err(Error::cancelled(&task.task_id));
    }

    Ok(ChildOutcome {
        exit_code: status.code(),
        duration,
    })
}

/// Copy a child stream into the shared writer in line-sized chunks.
fn pump(stream: impl Read, writer: &Mutex<Box<dyn Write + Send>>) {
    let mut reader = BufReader::new(stream);
    let mut buffer = [0u8; 4096];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if writer.lock().write_all(&buffer[..n]).is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}
