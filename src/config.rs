use crate::resolver::{DEFAULT_REM_BASE_SIZE, ResolutionConfig, parse_exclude_filters};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default)]
    pub output: Output,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Resolution {
    #[serde(default = "default_convert_px_to_rem")]
    pub convert_px_to_rem: bool,
    #[serde(default = "default_rem_base_size")]
    pub rem_base_size: f64,
    #[serde(default)]
    pub exclude_filters: ExcludeFilters,
}

/// Exclusion filters as written in the file: either the comma-separated
/// form (`"weight, line-height"`) or a TOML array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ExcludeFilters {
    Joined(String),
    List(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
pub struct Output {
    #[serde(default)]
    pub style_tag: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ConfigError {
    pub message: String,
}

pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let text = fs::read_to_string(path).map_err(|err| ConfigError {
        message: format!("failed to read config {}: {}", path.display(), err),
    })?;
    let config: Config = toml::from_str(&text).map_err(|err| ConfigError {
        message: format!("failed to parse config {}: {}", path.display(), err),
    })?;
    validate_rem_base_size(config.resolution.rem_base_size).map_err(|message| ConfigError {
        message: format!("invalid config {}: {}", path.display(), message),
    })?;
    Ok(config)
}

pub fn resolve_resolution(config: &Config) -> ResolutionConfig {
    ResolutionConfig {
        convert_px_to_rem: config.resolution.convert_px_to_rem,
        rem_base_size: config.resolution.rem_base_size,
        exclude_filters: config.resolution.exclude_filters.to_filters(),
    }
}

pub fn validate_rem_base_size(value: f64) -> Result<f64, String> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(format!("rem_base_size must be a positive number, got {}", value))
    }
}

impl ExcludeFilters {
    pub fn to_filters(&self) -> Vec<String> {
        match self {
            Self::Joined(raw) => parse_exclude_filters(raw),
            Self::List(items) => items
                .iter()
                .map(|item| item.trim())
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect(),
        }
    }
}

impl Default for ExcludeFilters {
    fn default() -> Self {
        Self::Joined(String::new())
    }
}

fn default_convert_px_to_rem() -> bool {
    true
}

fn default_rem_base_size() -> f64 {
    DEFAULT_REM_BASE_SIZE
}

impl Default for Resolution {
    fn default() -> Self {
        Self {
            convert_px_to_rem: default_convert_px_to_rem(),
            rem_base_size: default_rem_base_size(),
            exclude_filters: ExcludeFilters::default(),
        }
    }
}
