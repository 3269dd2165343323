//! Configuration management for exectrace
//!
//! Looks for `./exectrace.toml`, then `~/.config/exectrace/config.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::trace_log::DEFAULT_MAX_CHARS;

const LOCAL_CONFIG_FILE: &str = "exectrace.toml";
const PYTHON_ENV_VAR: &str = "EXECTRACE_PYTHON";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Interpreter used for traced and judged runs
    pub python: String,
    /// Character budget for finalized traces
    pub max_chars: usize,
    /// Wall-clock limit for traced runs; none means wait indefinitely
    pub timeout_secs: Option<f64>,
    /// Wall-clock limit for each judged test case
    pub judge_timeout_secs: f64,
    /// Send the traced program's stdout to the null device
    pub suppress_stdout: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            max_chars: DEFAULT_MAX_CHARS,
            timeout_secs: None,
            judge_timeout_secs: 2.0,
            suppress_stdout: true,
        }
    }
}

impl Config {
    /// Get the user config file path
    fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("exectrace").join("config.toml"))
    }

    fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
        paths.extend(Self::user_config_path());
        paths
    }

    /// Load the first config file found, or return defaults.
    ///
    /// A file that fails to parse is reported and skipped.
    pub fn load() -> Self {
        let mut config = Self::candidate_paths()
            .into_iter()
            .filter(|path| path.is_file())
            .find_map(|path| match Self::load_from(&path) {
                Ok(config) => Some(config),
                Err(err) => {
                    warn!("{:#}. Using defaults.", err);
                    None
                }
            })
            .unwrap_or_default();
        config.apply_env();
        config
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config '{}'", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config TOML '{}'", path.display()))?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(python) = std::env::var(PYTHON_ENV_VAR) {
            if !python.trim().is_empty() {
                self.python = python;
            }
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.and_then(seconds)
    }

    pub fn judge_timeout(&self) -> Duration {
        seconds(self.judge_timeout_secs).unwrap_or(Duration::from_secs(2))
    }
}

/// Positive, finite seconds as a duration.
pub fn seconds(secs: f64) -> Option<Duration> {
    if secs.is_finite() && secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Parse a command-line time limit; only positive, finite seconds are accepted.
pub fn parse_timeout(value: &str) -> std::result::Result<Duration, String> {
    let secs: f64 = value
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a number of seconds", value))?;
    seconds(secs).ok_or_else(|| format!("timeout must be a positive number of seconds, got {}", value))
}
