// src/config/validate.rs

use std::time::Duration;

use crate::config::duration::parse_duration;
use crate::config::model::{ConfigFile, IdentifySettings, RawConfigFile, SupervisorSettings};
use crate::errors::{Result, WardenError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::WardenError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        let supervisor = validate_supervisor(&raw)?;
        let identify = validate_identify(&raw)?;
        validate_elevation(&raw)?;
        validate_tools(&raw)?;

        Ok(ConfigFile {
            supervisor,
            elevation: raw.elevation,
            tools: raw.tools,
            identify,
            session: raw.session,
        })
    }
}

fn duration_field(section: &str, key: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| WardenError::ConfigError(format!("[{section}].{key}: {e}")))
}

fn validate_supervisor(cfg: &RawConfigFile) -> Result<SupervisorSettings> {
    let escalate_after =
        duration_field("supervisor", "escalate_after", &cfg.supervisor.escalate_after)?;
    if escalate_after.is_zero() {
        return Err(WardenError::ConfigError(
            "[supervisor].escalate_after must be greater than zero".to_string(),
        ));
    }

    let default_timeout = match cfg.supervisor.default_timeout.as_deref() {
        Some(s) => Some(duration_field("supervisor", "default_timeout", s)?),
        None => None,
    };

    Ok(SupervisorSettings {
        escalate_after,
        default_timeout,
    })
}

fn validate_identify(cfg: &RawConfigFile) -> Result<IdentifySettings> {
    let strategy_timeout =
        duration_field("identify", "strategy_timeout", &cfg.identify.strategy_timeout)?;
    if strategy_timeout.is_zero() {
        return Err(WardenError::ConfigError(
            "[identify].strategy_timeout must be greater than zero".to_string(),
        ));
    }

    let deadline = match cfg.identify.deadline.as_deref() {
        Some(s) => Some(duration_field("identify", "deadline", s)?),
        None => None,
    };

    if let Some(deadline) = deadline {
        if deadline < strategy_timeout {
            return Err(WardenError::ConfigError(format!(
                "[identify].deadline ({deadline:?}) is shorter than strategy_timeout ({strategy_timeout:?})"
            )));
        }
    }

    Ok(IdentifySettings {
        strategy_timeout,
        deadline,
    })
}

fn validate_elevation(cfg: &RawConfigFile) -> Result<()> {
    if cfg.elevation.program.trim().is_empty() {
        return Err(WardenError::ConfigError(
            "[elevation].program must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_tools(cfg: &RawConfigFile) -> Result<()> {
    for (key, value) in cfg.tools.entries() {
        if value.trim().is_empty() {
            return Err(WardenError::ConfigError(format!(
                "[tools].{key} must not be empty"
            )));
        }
    }
    Ok(())
}
