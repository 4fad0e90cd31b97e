//! `stratad` entry point.
//!
//! Parses CLI arguments and dispatches via the cli module; all
//! configuration loading and subsystem startup happens there. This file
//! only reports the failure and sets the exit code.

use stratadb_repl::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
