// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - [`model`] holds the serde-facing raw structs and the validated
//!   [`ConfigFile`].
//! - [`validate`] converts raw into validated config (`TryFrom`).
//! - [`loader`] reads TOML from disk.

pub mod duration;
pub mod loader;
pub mod model;
pub mod validate;

pub use duration::parse_duration;
pub use loader::{load_and_validate, load_from_path, resolve_config};
pub use model::{
    ConfigFile, ElevationSection, IdentifySettings, RawConfigFile, SessionSection,
    SupervisorSettings, ToolsSection,
};
