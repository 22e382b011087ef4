//! DropCraft Settings
//!
//! Configuration for a distribution run, stored as JSON.
//!
//! ## Features
//!
//! - Smoothing parameters (threshold, surplus band)
//! - Contribution sources with optional token budgets
//! - Exclusion lists from earlier airdrops
//! - Output and checkpoint locations
//!
//! ## Usage
//!
//! ```no_run
//! use dropcraft_settings::Settings;
//!
//! let mut settings = Settings::load_or_default()?;
//! settings.smoothing.threshold = "10000000000000000000".to_string();
//! settings.save()?;
//! # Ok::<(), dropcraft_settings::SettingsError>(())
//! ```
//!
//! Relative paths in a settings file are resolved against the directory
//! that holds the file.

mod config;
mod paths;

pub use config::{
    LoggingSettings, OutputSettings, Settings, SmoothingSettings, SourceFormat, SourceSettings,
};
pub use paths::{default_config_dir, expand_path};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid setting {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
