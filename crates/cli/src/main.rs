mod cli;
mod tracing_setup;

use std::io::Write;

use clap::Parser;
use console::style;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

use turbine_core::{AbsoluteSystemPathBuf, Error, Result};
use turbine_engine::CancellationToken;
use turbine_runner::{parse_concurrency, DryRunFormat, Run, RunOpts};

use crate::cli::{Cli, Command, RunArgs};

fn main() {
    tracing_setup::init();
    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => run(args).unwrap_or_else(|err| {
            eprintln!(" {} {err}", style("ERROR").red().bold());
            1
        }),
    };
    std::process::exit(code);
}

fn run(args: RunArgs) -> Result<i32> {
    let repo_root = match &args.cwd {
        Some(dir) => AbsoluteSystemPathBuf::new(
            std::fs::canonicalize(dir)
                .map_err(|e| Error::file_system(dir, "resolve working directory", e))?,
        )?,
        None => AbsoluteSystemPathBuf::cwd()
            .map_err(|e| Error::file_system(".", "resolve working directory", e))?,
    };

    let dry = match args.dry.as_deref() {
        None => None,
        Some("text") => Some(DryRunFormat::Text),
        Some("json") => Some(DryRunFormat::Json),
        Some(other) => {
            return Err(Error::config(format!(
                "invalid --dry format `{other}`: expected `json`"
            )))
        }
    };

    let opts = RunOpts {
        tasks: args.tasks.clone(),
        filters: args.filter.clone(),
        concurrency: parse_concurrency(&args.concurrency)?,
        parallel: args.parallel,
        continue_on_error: args.continue_on_error,
        force: args.force,
        no_cache: args.no_cache,
        only: args.only,
        dry,
        output_logs: args.output_logs_mode()?,
        pass_through_args: args.pass_through_args.clone(),
        summarize: args.summarize,
        cache_dir: args.cache_dir.clone(),
    };

    let run = Run::new(repo_root, opts)?;

    if let Some(graph_target) = &args.graph {
        let dot = run.graph_dot()?;
        if graph_target.is_empty() {
            print!("{dot}");
            std::io::stdout().flush().ok();
        } else {
            std::fs::write(graph_target, dot)
                .map_err(|e| Error::file_system(graph_target, "write graph file", e))?;
            println!("wrote task graph to {graph_target}");
        }
        return Ok(0);
    }

    let token = CancellationToken::new();
    spawn_signal_handler(token.clone())?;

    let outcome = run.execute(&token)?;

    match dry {
        Some(DryRunFormat::Json) => println!("{}", outcome.summary.format_json()?),
        Some(DryRunFormat::Text) => print!("{}", outcome.summary.format_text()),
        None => {}
    }

    Ok(outcome.exit_code)
}

/// Ctrl-C and SIGTERM cancel the run cooperatively; the scheduler then
/// terminates in-flight children.
fn spawn_signal_handler(token: CancellationToken) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM])
        .map_err(|e| Error::file_system("<signals>", "install signal handler", e))?;
    std::thread::spawn(move || {
        if signals.forever().next().is_some() {
            eprintln!();
            eprintln!(" {} stopping...", style("interrupt").yellow());
            token.cancel();
        }
    });
    Ok(())
}
