// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! `WardenError` covers failures that happen on the caller's side of a
//! boundary (config loading, spawning, command dispatch). Outcomes of a
//! running Operation are reported as [`crate::operation::FailureReason`]
//! inside Events instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WardenError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("cannot start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("event bridge unavailable: {0}")]
    BridgeUnavailable(String),

    #[error("device {0} not found")]
    UnknownDevice(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl WardenError {
    pub fn spawn(program: impl Into<String>, reason: impl Into<String>) -> Self {
        WardenError::Spawn {
            program: program.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;
