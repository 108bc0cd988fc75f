// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [supervisor]
/// escalate_after = "1s"
/// default_timeout = "2h"
///
/// [elevation]
/// program = "pkexec"
///
/// [tools]
/// badblocks = "/usr/sbin/badblocks"
/// adb = "adb"
/// tesseract = "/usr/bin/tesseract"
///
/// [identify]
/// strategy_timeout = "10s"
/// deadline = "30s"
/// ```
///
/// All sections are optional and have reasonable defaults. Durations stay
/// strings here; [`ConfigFile`] holds the parsed, validated form.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub supervisor: RawSupervisorSection,

    #[serde(default)]
    pub elevation: ElevationSection,

    #[serde(default)]
    pub tools: ToolsSection,

    #[serde(default)]
    pub identify: RawIdentifySection,

    #[serde(default)]
    pub session: SessionSection,
}

/// `[supervisor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawSupervisorSection {
    /// Grace period between the terminate signal and a forced kill.
    #[serde(default = "default_escalate_after")]
    pub escalate_after: String,

    /// Timeout applied to process handles that don't carry their own.
    #[serde(default)]
    pub default_timeout: Option<String>,
}

impl Default for RawSupervisorSection {
    fn default() -> Self {
        Self {
            escalate_after: default_escalate_after(),
            default_timeout: None,
        }
    }
}

fn default_escalate_after() -> String {
    "1s".to_string()
}

/// `[elevation]` section: the single privilege-escalation entry point.
#[derive(Debug, Clone, Deserialize)]
pub struct ElevationSection {
    #[serde(default = "default_elevation_program")]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ElevationSection {
    fn default() -> Self {
        Self {
            program: default_elevation_program(),
            args: Vec::new(),
        }
    }
}

fn default_elevation_program() -> String {
    "pkexec".to_string()
}

/// `[tools]` section: external executables, by bare name or path.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_badblocks")]
    pub badblocks: String,
    #[serde(default = "default_smartctl")]
    pub smartctl: String,
    #[serde(default = "default_adb")]
    pub adb: String,
    #[serde(default = "default_mount")]
    pub mount: String,
    #[serde(default = "default_mkdir")]
    pub mkdir: String,
    #[serde(default = "default_tesseract")]
    pub tesseract: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            badblocks: default_badblocks(),
            smartctl: default_smartctl(),
            adb: default_adb(),
            mount: default_mount(),
            mkdir: default_mkdir(),
            tesseract: default_tesseract(),
        }
    }
}

impl ToolsSection {
    /// `(key, value)` pairs, used by validation and `--check` output.
    pub fn entries(&self) -> [(&'static str, &str); 6] {
        [
            ("badblocks", self.badblocks.as_str()),
            ("smartctl", self.smartctl.as_str()),
            ("adb", self.adb.as_str()),
            ("mount", self.mount.as_str()),
            ("mkdir", self.mkdir.as_str()),
            ("tesseract", self.tesseract.as_str()),
        ]
    }
}

fn default_badblocks() -> String {
    "badblocks".to_string()
}
fn default_smartctl() -> String {
    "smartctl".to_string()
}
fn default_adb() -> String {
    "adb".to_string()
}
fn default_mount() -> String {
    "mount".to_string()
}
fn default_mkdir() -> String {
    "mkdir".to_string()
}
fn default_tesseract() -> String {
    "tesseract".to_string()
}

/// `[identify]` section: budgets for the identifier fallback chain.
#[derive(Debug, Clone, Deserialize)]
pub struct RawIdentifySection {
    #[serde(default = "default_strategy_timeout")]
    pub strategy_timeout: String,

    /// Optional wall-clock budget for the whole chain.
    #[serde(default)]
    pub deadline: Option<String>,
}

impl Default for RawIdentifySection {
    fn default() -> Self {
        Self {
            strategy_timeout: default_strategy_timeout(),
            deadline: None,
        }
    }
}

fn default_strategy_timeout() -> String {
    "10s".to_string()
}

/// `[session]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionSection {
    /// Where per-operation scratch files go. Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

impl SessionSection {
    pub fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// Validated configuration.
///
/// Construct via `ConfigFile::try_from(raw)` (see `validate.rs`) or
/// [`ConfigFile::default`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub supervisor: SupervisorSettings,
    pub elevation: ElevationSection,
    pub tools: ToolsSection,
    pub identify: IdentifySettings,
    pub session: SessionSection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub escalate_after: Duration,
    pub default_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdentifySettings {
    pub strategy_timeout: Duration,
    pub deadline: Option<Duration>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            supervisor: SupervisorSettings {
                escalate_after: Duration::from_secs(1),
                default_timeout: None,
            },
            elevation: ElevationSection::default(),
            tools: ToolsSection::default(),
            identify: IdentifySettings {
                strategy_timeout: Duration::from_secs(10),
                deadline: None,
            },
            session: SessionSection::default(),
        }
    }
}
