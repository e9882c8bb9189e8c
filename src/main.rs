//! vtn-coordinator entry point
//!
//! Parses arguments and hands off to the CLI module. Errors go to stderr
//! with a non-zero exit; main.rs itself loads no configuration and spawns
//! no threads.

use vtn_coordinator::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
