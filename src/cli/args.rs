//! CLI argument definitions using clap
//!
//! Commands:
//! - vtn-coordinator serve --config <path>
//! - vtn-coordinator check-config --config <path>

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Configuration lock and transaction coordinator for VTN controllers
#[derive(Parser, Debug)]
#[command(name = "vtn-coordinator")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Boot the coordinator and serve line-delimited JSON requests on stdin
    Serve {
        /// Path to configuration file
        #[arg(long, default_value = "./vtn-coordinator.json")]
        config: PathBuf,
    },

    /// Validate a configuration file and print it with defaults filled in
    CheckConfig {
        /// Path to configuration file
        #[arg(long, default_value = "./vtn-coordinator.json")]
        config: PathBuf,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
