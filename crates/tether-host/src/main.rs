//! Host entrypoint: launches the calculator plugin and exercises it.
//!
//! All work is delegated to [`tether_host::run`], which loads configuration,
//! installs telemetry, runs the demonstration and shuts the plugin down.

use std::io::{self, StderrLock, StdoutLock};
use std::process::ExitCode;

fn main() -> ExitCode {
    let mut stdout: StdoutLock<'_> = io::stdout().lock();
    let mut stderr: StderrLock<'_> = io::stderr().lock();
    tether_host::run(std::env::args_os(), &mut stdout, &mut stderr)
}
