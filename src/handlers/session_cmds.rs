// src/handlers/session_cmds.rs

//! Commands that only inspect or steer the session itself.

use crate::errors::Result;
use crate::router::{Command, HandlerContext};
use crate::types::INTERACTIVE_SLOT;

pub fn help(ctx: &mut HandlerContext<'_>, _cmd: &Command) -> Result<()> {
    let lines: Vec<String> = ctx
        .table
        .iter()
        .map(|spec| format!("  {:<28} {}", spec.usage, spec.help))
        .collect();

    ctx.say("Available commands:");
    for line in lines {
        ctx.say(line);
    }
    Ok(())
}

pub fn version(ctx: &mut HandlerContext<'_>, _cmd: &Command) -> Result<()> {
    ctx.say(format!(
        "{} {}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    ));
    Ok(())
}

pub fn status(ctx: &mut HandlerContext<'_>, _cmd: &Command) -> Result<()> {
    let lines: Vec<String> = ctx
        .session
        .entries()
        .map(|(slot, entry)| {
            format!("{slot}: {} ({})", entry.label, entry.target.state_name())
        })
        .collect();

    if lines.is_empty() {
        ctx.say("No active operation.");
    }
    for line in lines {
        ctx.say(line);
    }
    Ok(())
}

/// Cancel whatever occupies the interactive slot.
pub fn stop(ctx: &mut HandlerContext<'_>, _cmd: &Command) -> Result<()> {
    let Some(entry) = ctx.session.active(INTERACTIVE_SLOT).cloned() else {
        ctx.say("No active operation to stop.");
        return Ok(());
    };

    if entry.target.request_cancel() {
        ctx.say(format!("Stopping {}...", entry.label));
    } else {
        ctx.say(format!("{} is already stopping.", entry.label));
    }
    Ok(())
}
