// src/lib.rs

pub mod bridge;
pub mod cli;
pub mod config;
pub mod console;
pub mod errors;
pub mod exec;
pub mod fallback;
pub mod fs;
pub mod handlers;
pub mod logging;
pub mod operation;
pub mod router;
pub mod transcript;
pub mod types;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, resolve_config};
use crate::console::{Console, ConsoleInput, script_lines};
use crate::exec::RealProcessBackend;
use crate::fs::RealFileSystem;
use crate::handlers::builtin_table;
use crate::transcript::StdoutTranscript;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - process backend, filesystem and elevation gate
/// - the console (router + event bridge)
/// - stdin / script input and Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config = resolve_config(args.config.as_deref().map(Path::new))?;

    if args.check {
        print_check(&config)?;
        return Ok(());
    }

    let mut console = Console::build(
        Arc::new(config),
        Arc::new(RealProcessBackend::new()),
        Arc::new(RealFileSystem),
        Box::new(StdoutTranscript),
    )?;

    if let Some(script) = args.script {
        let text = std::fs::read_to_string(&script)
            .with_context(|| format!("reading script {script}"))?;
        let lines = script_lines(&text);
        info!(script = %script, commands = lines.len(), "replaying script");
        console.replay(lines).await;
        console.shutdown().await;
        return Ok(());
    }

    let (tx, rx) = mpsc::channel::<ConsoleInput>(16);

    // Ctrl-C → cancel active operation and shut down.
    {
        let tx = tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(ConsoleInput::Interrupt).await;
        });
    }

    // Stdin lines, read off the console task.
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(ConsoleInput::Line(line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });

    console.run(rx).await?;
    Ok(())
}

/// `--check` output: settings, tool resolution and the command table.
fn print_check(cfg: &ConfigFile) -> Result<()> {
    println!("toolwarden config check");
    println!(
        "  supervisor.escalate_after = {:?}",
        cfg.supervisor.escalate_after
    );
    if let Some(timeout) = cfg.supervisor.default_timeout {
        println!("  supervisor.default_timeout = {timeout:?}");
    }
    println!(
        "  elevation = {} {}",
        cfg.elevation.program,
        cfg.elevation.args.join(" ")
    );
    println!(
        "  identify.strategy_timeout = {:?}",
        cfg.identify.strategy_timeout
    );
    if let Some(deadline) = cfg.identify.deadline {
        println!("  identify.deadline = {deadline:?}");
    }
    println!(
        "  session.scratch_dir = {}",
        cfg.session.scratch_dir().display()
    );
    println!();

    println!("tools:");
    for (name, program) in cfg.tools.entries() {
        match which::which(program) {
            Ok(path) => println!("  - {name}: {}", path.display()),
            Err(_) => println!("  - {name}: {program} (not found)"),
        }
    }
    println!();

    let table = builtin_table()?;
    println!("commands ({}):", table.len());
    for spec in table.iter() {
        println!("  {:<28} {}", spec.usage, spec.help);
    }

    debug!("config check complete (no execution)");
    Ok(())
}
