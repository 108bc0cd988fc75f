// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `toolwarden`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "toolwarden",
    version,
    about = "Supervise long-running disk, forensic and device-bridge tools from a command console.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Toolwarden.toml` in the current working directory. A missing
    /// default file falls back to built-in settings.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Replay commands from this file (one per line) instead of reading stdin.
    ///
    /// Each line waits for the operation it starts to finish before the
    /// next one is dispatched.
    #[arg(long, value_name = "FILE")]
    pub script: Option<String>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TOOLWARDEN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate the config, print the command table, run nothing.
    #[arg(long)]
    pub check: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
