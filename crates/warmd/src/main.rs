//! Daemon entrypoint. Configuration comes from `WARM_*` environment
//! variables, the configuration file and command-line flags.

use std::io::{self, Write};
use std::process::ExitCode;

fn main() -> ExitCode {
    match warmd::run_daemon() {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            drop(writeln!(io::stderr().lock(), "warmd: {error}"));
            ExitCode::FAILURE
        }
    }
}
