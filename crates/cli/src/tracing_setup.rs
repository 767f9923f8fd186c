//! Tracing initialization for the CLI.

use std::io::IsTerminal;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber once per process. Verbosity comes from
/// `TURBINE_LOG` (falling back to warnings only); non-TTY output drops ANSI.
pub fn init() {
    let filter = EnvFilter::try_from_env("TURBINE_LOG")
        .or_else(|_| EnvFilter::try_new("warn"))
        .expect("static filter directive parses");

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .compact()
        .with_target(false);

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}
