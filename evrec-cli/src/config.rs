//! Configuration loading and parsing
//!
//! Optional TOML file with defaults for everything the command line does not
//! say. Command-line flags always win.

use anyhow::{Context, Result};
use evrec_core::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from evrec.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub adapter: u32,
    #[serde(default)]
    pub frontend: u32,
    /// Narrow the capture to the recorded program only
    #[serde(default)]
    pub single_program: bool,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ChannelsConfig {
    /// Channel directory file (channels.conf)
    pub conf: Option<PathBuf>,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .tracker
        .validate()
        .with_context(|| format!("Invalid [tracker] settings in {:?}", path))?;

    Ok(config)
}
