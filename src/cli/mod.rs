//! CLI module for the coordinator
//!
//! Provides command-line interface for:
//! - serve: Boot the coordinator and serve RPC requests over stdin/stdout
//! - check-config: Validate a configuration file

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{boot, check_config, run, run_command, serve, serve_requests};
pub use errors::{CliError, CliResult};
pub use io::{read_requests, write_error, write_json, RequestLine};
