//! Ludus configuration system
//!
//! # Configuration hierarchy
//!
//! ```text
//! Priority (high → low):
//! 1. CLI arguments
//! 2. Environment variables (LUDUS_FAIL_ON_SCRIPT_ERROR, LUDUS_LOG)
//! 3. Config file (ludus.toml)
//! 4. Default values
//! ```
//!
//! # Usage
//!
//! ```rust
//! use ludus::util::config::EngineConfig;
//!
//! let config = EngineConfig::default().with_env_overrides();
//! assert!(config.scripting.max_call_depth > 0);
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::util::logger::LogLevel;

/// Environment variable that forces the fail-on-script-error policy
pub const FAIL_ON_SCRIPT_ERROR_ENV: &str = "LUDUS_FAIL_ON_SCRIPT_ERROR";

/// Process-wide "abort on script error" policy flag
static FAIL_ON_SCRIPT_ERROR: AtomicBool = AtomicBool::new(false);

/// Set the process-wide fail-on-script-error policy
pub fn set_fail_on_script_error(enabled: bool) {
    FAIL_ON_SCRIPT_ERROR.store(enabled, Ordering::SeqCst);
}

/// Whether a script error must abort instead of pausing the game
pub fn fail_on_script_error() -> bool {
    FAIL_ON_SCRIPT_ERROR.load(Ordering::SeqCst)
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    /// Interpreter and scheduling settings
    #[serde(default)]
    pub scripting: ScriptingConfig,
    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Reference session settings (CLI driver)
    #[serde(default)]
    pub session: SessionConfig,
}

/// Interpreter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptingConfig {
    /// Abort the process on an uncaught script error instead of pausing
    #[serde(default)]
    pub fail_on_script_error: bool,
    /// Maximum nested call depth per thread
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
    /// Instruction budget for a single host-level resume
    #[serde(default = "default_max_instructions")]
    pub max_instructions_per_resume: u64,
    /// Allocations between automatic collections
    #[serde(default = "default_gc_threshold")]
    pub gc_threshold: usize,
}

fn default_max_call_depth() -> usize {
    200
}

fn default_max_instructions() -> u64 {
    50_000_000
}

fn default_gc_threshold() -> usize {
    64 * 1024
}

impl Default for ScriptingConfig {
    fn default() -> Self {
        Self {
            fail_on_script_error: false,
            max_call_depth: default_max_call_depth(),
            max_instructions_per_resume: default_max_instructions(),
            gc_threshold: default_gc_threshold(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// Default level when `LUDUS_LOG` is not set
    #[serde(default)]
    pub level: LogLevel,
}

/// Session defaults for the CLI driver
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Number of player slots
    #[serde(default = "default_players")]
    pub players: u8,
    /// Seed of the synchronized RNG stream
    #[serde(default)]
    pub seed: u64,
}

fn default_players() -> u8 {
    2
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            players: default_players(),
            seed: 0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(ConfigError::IoError)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::ParseError)
    }

    /// Load `path` if it exists, otherwise defaults
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Apply environment variable overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(value) = std::env::var(FAIL_ON_SCRIPT_ERROR_ENV) {
            self.scripting.fail_on_script_error = matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        self
    }

    /// Publish process-wide policies derived from this configuration
    pub fn apply_policies(&self) {
        set_fail_on_script_error(self.scripting.fail_on_script_error);
    }

    /// Serialize back to TOML
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::SerializeError)
    }
}

/// Configuration errors
#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    ParseError(toml::de::Error),
    SerializeError(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::ParseError(e) => write!(f, "Config parse error: {}", e),
            ConfigError::SerializeError(e) => write!(f, "Config serialize error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests;
