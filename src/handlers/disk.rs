// src/handlers/disk.rs

//! Disk commands: `verify`, `test` and `mount`.
//!
//! All three run elevated and occupy the interactive slot.

use std::path::Path;

use crate::errors::Result;
use crate::exec::ProcessHandle;
use crate::handlers::device::{device_name, resolve_device};
use crate::operation::{Operation, OperationSpec};
use crate::router::{Command, HandlerContext};
use crate::types::INTERACTIVE_SLOT;

pub const MOUNT_ROOT: &str = "/mnt";

/// Read-only `badblocks` scan. Bad block numbers are printed on stdout and
/// stream straight into the transcript.
pub fn verify(ctx: &mut HandlerContext<'_>, cmd: &Command) -> Result<()> {
    if !ctx.ensure_slot_free(INTERACTIVE_SLOT) {
        return Ok(());
    }
    let device = resolve_device(ctx.exec.fs.as_ref(), cmd.arg(0).unwrap_or_default())?;

    let handle = ProcessHandle::new(&ctx.config.tools.badblocks)
        .args(["-v", "-s", "-e", "1"])
        .arg(device.display().to_string())
        .elevated();

    ctx.say(format!(
        "Starting read-only verification of {} (use 'stop' to cancel)",
        device.display()
    ));
    ctx.start_operation(
        INTERACTIVE_SLOT,
        Operation::new(OperationSpec::single("Verification", handle)),
    );
    Ok(())
}

/// SMART overall-health self-assessment.
pub fn health_test(ctx: &mut HandlerContext<'_>, cmd: &Command) -> Result<()> {
    if !ctx.ensure_slot_free(INTERACTIVE_SLOT) {
        return Ok(());
    }
    let device = resolve_device(ctx.exec.fs.as_ref(), cmd.arg(0).unwrap_or_default())?;

    let handle = ProcessHandle::new(&ctx.config.tools.smartctl)
        .arg("-H")
        .arg(device.display().to_string())
        .elevated();

    ctx.say(format!("Running health test on {}", device.display()));
    ctx.start_operation(
        INTERACTIVE_SLOT,
        Operation::new(OperationSpec::single("Health test", handle)),
    );
    Ok(())
}

/// Two elevated steps under one grant: create the mount point, then mount.
/// Extra arguments are passed to `mount` before the device.
pub fn mount(ctx: &mut HandlerContext<'_>, cmd: &Command) -> Result<()> {
    if !ctx.ensure_slot_free(INTERACTIVE_SLOT) {
        return Ok(());
    }
    let device = resolve_device(ctx.exec.fs.as_ref(), cmd.arg(0).unwrap_or_default())?;
    let target = Path::new(MOUNT_ROOT).join(device_name(&device));

    let spec = OperationSpec::new("Mount")
        .step(
            ProcessHandle::new(&ctx.config.tools.mkdir)
                .arg("-p")
                .arg(target.display().to_string())
                .elevated(),
        )
        .step(
            ProcessHandle::new(&ctx.config.tools.mount)
                .args(cmd.args.iter().skip(1).cloned())
                .arg(device.display().to_string())
                .arg(target.display().to_string())
                .elevated(),
        );

    ctx.say(format!("Mounting {} at {}", device.display(), target.display()));
    ctx.start_operation(INTERACTIVE_SLOT, Operation::new(spec));
    Ok(())
}
