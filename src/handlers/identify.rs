// src/handlers/identify.rs

//! `identify <serial>`: retrieve a hardware identifier from an Android device
//! over adb, falling back through four unrelated techniques.
//!
//! The first one drives the device UI: it opens the dialer on `*#06#`,
//! captures the screen, pulls the capture into the session scratch directory
//! and reads it back with `tesseract`. The capture is a scratch file of that
//! strategy's Operation and is removed however the strategy ends.

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::config::ToolsSection;
use crate::errors::{Result, WardenError};
use crate::exec::{ProcessHandle, ProcessResult};
use crate::fallback::{FallbackChain, Strategy};
use crate::operation::OperationSpec;
use crate::router::{Command, HandlerContext};
use crate::types::{INTERACTIVE_SLOT, OperationId};

const MIN_IMEI_DIGITS: usize = 14;

/// Writable location on the device for the dialer capture.
const DEVICE_TMP: &str = "/sdcard";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifierKind {
    Imei,
    AndroidId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentifier {
    pub kind: IdentifierKind,
    pub value: String,
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            IdentifierKind::Imei => write!(f, "IMEI {}", self.value),
            IdentifierKind::AndroidId => write!(f, "Android ID {}", self.value),
        }
    }
}

pub fn identify(ctx: &mut HandlerContext<'_>, cmd: &Command) -> Result<()> {
    if !ctx.ensure_slot_free(INTERACTIVE_SLOT) {
        return Ok(());
    }
    let serial = cmd.arg(0).unwrap_or_default().to_string();
    let scratch_dir = ctx.config.session.scratch_dir();
    let mut chain = identifier_chain(&ctx.config.tools, &scratch_dir, &serial)?;
    if let Some(deadline) = ctx.config.identify.deadline {
        chain = chain.with_deadline(deadline);
    }

    let strategy_timeout = ctx.config.identify.strategy_timeout;

    ctx.say(format!("Identifying device {serial}"));
    ctx.start_chain(
        INTERACTIVE_SLOT,
        "Identify",
        chain,
        strategy_timeout,
        |strategy: &str, id: &DeviceIdentifier| format!("{id} (via {strategy})"),
    );
    Ok(())
}

/// The four strategies, in precedence order.
pub fn identifier_chain(
    tools: &ToolsSection,
    scratch_dir: &Path,
    serial: &str,
) -> Result<FallbackChain<DeviceIdentifier>> {
    let android_id = Regex::new(r"^[0-9a-fA-F]{16}$")
        .map_err(|e| WardenError::Other(anyhow::Error::new(e)))?;
    let bare_imei = Regex::new(r"\b[0-9]{14,16}\b")
        .map_err(|e| WardenError::Other(anyhow::Error::new(e)))?;

    let shell = {
        let adb = tools.adb.clone();
        let serial = serial.to_string();
        move |label: &str, args: &[&str]| {
            OperationSpec::single(
                label,
                ProcessHandle::new(&adb)
                    .args(["-s", serial.as_str(), "shell"])
                    .args(args.iter().copied()),
            )
        }
    };

    let dialer = DialerCapture {
        adb: tools.adb.clone(),
        tesseract: tools.tesseract.clone(),
        serial: serial.to_string(),
        scratch_dir: scratch_dir.to_path_buf(),
    };
    let service_call = shell.clone();
    let dumpsys = shell.clone();
    let settings = shell;

    Ok(FallbackChain::new()
        .strategy(Strategy::new(
            "dialer-ocr",
            move || dialer.spec(),
            move |result: &ProcessResult| {
                ocr_imei(&result.stdout, &bare_imei)
                    .map(imei)
                    .ok_or_else(|| "no IMEI in OCR text".to_string())
            },
        ))
        .strategy(Strategy::new(
            "service-call",
            move || service_call("service-call", &["service", "call", "iphonesubinfo", "1"]),
            |result: &ProcessResult| {
                decode_parcel_digits(&result.stdout)
                    .map(imei)
                    .ok_or_else(|| "no IMEI in parcel".to_string())
            },
        ))
        .strategy(Strategy::new(
            "dumpsys",
            move || dumpsys("dumpsys", &["dumpsys", "iphonesubinfo"]),
            |result: &ProcessResult| {
                dumpsys_device_id(&result.stdout)
                    .map(imei)
                    .ok_or_else(|| "no Device ID line".to_string())
            },
        ))
        .strategy(Strategy::new(
            "android-id",
            move || settings("android-id", &["settings", "get", "secure", "android_id"]),
            move |result: &ProcessResult| {
                let value = result.stdout_text().trim().to_string();
                if android_id.is_match(&value) {
                    Ok(DeviceIdentifier {
                        kind: IdentifierKind::AndroidId,
                        value: value.to_lowercase(),
                    })
                } else {
                    Err(format!("unexpected android_id {value:?}"))
                }
            },
        )))
}

/// Everything the dialer strategy needs to build a fresh multi-step spec.
#[derive(Debug, Clone)]
struct DialerCapture {
    adb: String,
    tesseract: String,
    serial: String,
    scratch_dir: PathBuf,
}

impl DialerCapture {
    /// Each attempt gets its own capture name so concurrent sessions and
    /// retries never share a file.
    fn spec(&self) -> OperationSpec {
        let name = format!("toolwarden-{}-imei.png", OperationId::next());
        let remote = format!("{DEVICE_TMP}/{name}");
        let local = self.scratch_dir.join(&name);
        let adb = |args: &[&str]| {
            ProcessHandle::new(&self.adb)
                .args(["-s", self.serial.as_str()])
                .args(args.iter().copied())
        };

        OperationSpec::new("dialer-ocr")
            .step(adb(&[
                "shell",
                "am",
                "start",
                "-a",
                "android.intent.action.DIAL",
                "-d",
                "tel:*#06#",
            ]))
            // Let the dialer render the code result.
            .step(adb(&["shell", "sleep", "2"]))
            .step(adb(&["shell", "screencap", "-p", remote.as_str()]))
            .step(adb(&["pull", remote.as_str()]).arg(local.display().to_string()))
            .step(adb(&["shell", "rm", "-f", remote.as_str()]))
            .step(
                ProcessHandle::new(&self.tesseract)
                    .arg(local.display().to_string())
                    .arg("stdout"),
            )
            .with_scratch(local)
    }
}

fn imei(value: String) -> DeviceIdentifier {
    DeviceIdentifier {
        kind: IdentifierKind::Imei,
        value,
    }
}

/// Digits from the quoted text columns of a `service call` parcel dump:
///
/// ```text
/// Result: Parcel(
///   0x00000000: 00000000 0000000f 00350033 00300034 '........3.5.4.0.'
///   0x00000010: 00310032 00340033 00360035 00380037 '2.1.3.4.5.6.7.8.'
/// ```
pub fn decode_parcel_digits(lines: &[String]) -> Option<String> {
    let start = lines.iter().position(|line| line.contains("Parcel"))?;
    let digits: String = lines[start..]
        .iter()
        .filter_map(|line| {
            let open = line.find('\'')?;
            let close = line.rfind('\'')?;
            (close > open).then(|| &line[open + 1..close])
        })
        .flat_map(str::chars)
        .filter(char::is_ascii_digit)
        .collect();

    (digits.len() >= MIN_IMEI_DIGITS).then_some(digits)
}

/// IMEI read off the dialer capture: the digits of the first labelled line
/// with enough of them, else the first bare 14 to 16 digit number.
pub fn ocr_imei(lines: &[String], bare_imei: &Regex) -> Option<String> {
    lines
        .iter()
        .filter(|line| line.to_uppercase().contains("IMEI") || line.contains("Device ID"))
        .map(|line| line.chars().filter(char::is_ascii_digit).collect::<String>())
        .find(|digits| digits.len() >= MIN_IMEI_DIGITS)
        .or_else(|| {
            lines
                .iter()
                .find_map(|line| bare_imei.find(line))
                .map(|m| m.as_str().to_string())
        })
}

/// Value of the first `Device ID` / `IMEI` line of `dumpsys iphonesubinfo`.
pub fn dumpsys_device_id(lines: &[String]) -> Option<String> {
    lines
        .iter()
        .filter(|line| line.contains("Device ID") || line.contains("IMEI"))
        .filter_map(|line| {
            let separator = if line.contains('=') { '=' } else { ':' };
            line.split_once(separator).map(|(_, value)| value.trim())
        })
        .find(|value| value.len() >= MIN_IMEI_DIGITS && value.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
}
