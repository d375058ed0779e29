//! Bootstrap configuration loading and config file resolution
//!
//! Configuration is read once at startup from a TOML file. A missing file is
//! not an error: every section has built-in defaults.
//!
//! # Config file resolution priority
//!
//! 1. Command-line argument (highest priority)
//! 2. Environment variable (`FRAMEPIPE_CONFIG`)
//! 3. Platform config directory (`<config_dir>/framepipe/config.toml`)
//! 4. Built-in defaults (no file)
//!
//! Buffer counts and hints are kept as signed integers here so that a
//! negative or zero value in the file survives parsing and is rejected by the
//! decoder's validation with a descriptive error instead of a TOML type error.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "FRAMEPIPE_CONFIG";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    /// Decoder construction parameters
    #[serde(default)]
    pub decoder: DecoderSettings,

    /// Frame pacing thresholds
    #[serde(default)]
    pub pacing: PacingSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Decoder construction parameters as written in the config file
#[derive(Debug, Clone, Deserialize)]
pub struct DecoderSettings {
    /// Number of input buffer slots
    #[serde(default = "default_buffer_count")]
    pub num_input_buffers: i64,

    /// Number of output buffer slots
    #[serde(default = "default_buffer_count")]
    pub num_output_buffers: i64,

    /// Initial capacity of each input buffer in bytes (None = renderer default)
    #[serde(default)]
    pub initial_input_buffer_size: Option<i64>,

    /// Codec thread hint (None = available parallelism)
    #[serde(default)]
    pub thread_hint: Option<i64>,

    /// Codec tile hint (None = same as thread hint)
    #[serde(default)]
    pub tile_hint: Option<i64>,
}

impl Default for DecoderSettings {
    fn default() -> Self {
        Self {
            num_input_buffers: default_buffer_count(),
            num_output_buffers: default_buffer_count(),
            initial_input_buffer_size: None,
            thread_hint: None,
            tile_hint: None,
        }
    }
}

/// Frame pacing thresholds
#[derive(Debug, Clone, Deserialize)]
pub struct PacingSettings {
    /// Render gap (ms) above which a frame counts as delayed
    #[serde(default = "default_render_threshold_ms")]
    pub render_threshold_ms: u64,

    /// Rendered frames per late-frame report
    #[serde(default = "default_window_size")]
    pub window_size: u32,

    /// Rendered + dropped frames per drop measure window
    #[serde(default = "default_measure_window")]
    pub measure_window: u32,
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            render_threshold_ms: default_render_threshold_ms(),
            window_size: default_window_size(),
            measure_window: default_measure_window(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Print pipeline events as JSON lines on stdout
    #[serde(default)]
    pub json_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_events: false,
        }
    }
}

fn default_buffer_count() -> i64 {
    4
}

fn default_render_threshold_ms() -> u64 {
    41
}

fn default_window_size() -> u32 {
    16
}

fn default_measure_window() -> u32 {
    24
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|source| Error::ConfigParse {
            path: origin.to_path_buf(),
            source,
        })
    }

    /// Load a config file
    ///
    /// Unlike [`load_config`], a missing file here is an error.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content, path)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }
}

/// Resolve which config file to read
///
/// Returns None when no candidate exists (built-in defaults apply).
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path().filter(|p| p.exists())
}

/// Platform config file location (`<config_dir>/framepipe/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("framepipe").join("config.toml"))
}

/// Load configuration following the resolution priority
///
/// An explicitly named file (CLI or environment) that does not exist is an
/// error. When nothing is named and no platform file exists, built-in
/// defaults are returned with a warning.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    let explicit = cli_arg.is_some() || std::env::var(CONFIG_ENV_VAR).is_ok_and(|v| !v.is_empty());

    match resolve_config_path(cli_arg) {
        Some(path) if path.exists() => {
            info!("Using config file: {}", path.display());
            TomlConfig::load(&path)
        }
        Some(path) if explicit => Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        ))),
        _ => {
            warn!("No config file found, using built-in defaults");
            Ok(TomlConfig::default())
        }
    }
}
