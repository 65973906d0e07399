//! Configuration loading and parsing

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sm_trace::{DiagramGraph, EventCatalog, TracerConfig};
use std::fs;
use std::path::{Path, PathBuf};

/// Main application configuration (loaded from a TOML file)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub listener: TracerConfig,
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub console: ConsoleConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct InputConfig {
    /// Diagram description (JSON)
    pub diagram: Option<PathBuf>,
    /// Event name catalog (TOML)
    pub catalog: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleConfig {
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Address of the instance to track as soon as it appears
    #[serde(default)]
    pub track: Option<u32>,
    /// Track the first instance that appears
    #[serde(default)]
    pub track_first: bool,
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            track: None,
            track_first: false,
            format: OutputFormat::default(),
        }
    }
}

fn default_poll_interval() -> u64 {
    100
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    if config.console.track_first && config.console.track.is_some() {
        log::warn!("Both console.track and console.track_first are set; console.track wins");
    }

    Ok(config)
}

/// Load and validate a diagram description
pub fn load_diagram(path: &Path) -> Result<DiagramGraph> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read diagram file: {:?}", path))?;

    let diagram: DiagramGraph = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse diagram file: {:?}", path))?;

    diagram
        .validate()
        .with_context(|| format!("Diagram {:?} is inconsistent", path))?;

    if diagram.start_state().is_none() {
        log::warn!("Diagram {:?} has no start state; tracking will fail", path);
    }

    Ok(diagram)
}

/// Load an event name catalog
pub fn load_catalog(path: &Path) -> Result<EventCatalog> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read catalog file: {:?}", path))?;

    toml::from_str(&content).with_context(|| format!("Failed to parse catalog file: {:?}", path))
}
