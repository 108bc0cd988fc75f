// src/handlers/mod.rs

//! Built-in command handlers and the table that registers them.

pub mod device;
pub mod disk;
pub mod identify;
pub mod session_cmds;

use crate::errors::Result;
use crate::router::{CommandSpec, CommandTable};

/// The verb table registered at startup, in `help` order.
pub fn builtin_table() -> Result<CommandTable> {
    let mut table = CommandTable::new();

    table.register(CommandSpec::new(
        "help",
        "help",
        0,
        "List available commands",
        session_cmds::help,
    ))?;
    table.register(CommandSpec::new(
        "version",
        "version",
        0,
        "Show the program version",
        session_cmds::version,
    ))?;
    table.register(CommandSpec::new(
        "status",
        "status",
        0,
        "Show the active operation",
        session_cmds::status,
    ))?;
    table.register(CommandSpec::new(
        "stop",
        "stop",
        0,
        "Cancel the active operation",
        session_cmds::stop,
    ))?;
    table.register(CommandSpec::new(
        "verify",
        "verify <device>",
        1,
        "Read-only surface scan (badblocks)",
        disk::verify,
    ))?;
    table.register(CommandSpec::new(
        "test",
        "test <device>",
        1,
        "SMART health check (smartctl -H)",
        disk::health_test,
    ))?;
    table.register(CommandSpec::new(
        "mount",
        "mount <device> [options..]",
        1,
        "Mount a device under /mnt",
        disk::mount,
    ))?;
    table.register(CommandSpec::new(
        "identify",
        "identify <serial>",
        1,
        "Read an Android device's IMEI or Android ID over adb",
        identify::identify,
    ))?;

    Ok(table)
}
