use std::path::PathBuf;

use clap::{Parser, Subcommand};
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::CONFIG_PATH_ENV;

#[derive(Parser, Debug)]
#[command(
    name = "dscp-agent",
    about = "Egress DSCP marking agent",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    pub config: Option<PathBuf>,

    /// Log level override (takes precedence over config file)
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Log format: json (default, production) or text (development)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Load the config, apply it to a policy table, and report what was loaded
    Check,
    /// Print the agent version
    Version,
}

pub fn parse() -> Cli {
    Cli::parse()
}
