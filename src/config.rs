//! Runtime Configuration
//!
//! Tunables for a faceplate runtime session, loaded from TOML.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`FACEPLATE_LIVE`)
//! 2. Config file passed with `--config`
//! 3. Defaults
//!
//! ```toml
//! live = true
//! max_call_depth = 50
//!
//! [script]
//! max_call_depth = 64
//! max_steps = 100000
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FaceplateError, Result};

/// Depth at which a chain of dependent expressions is treated as runaway recursion
pub const DEFAULT_MAX_CALL_DEPTH: usize = 50;

/// Runtime configuration for one faceplate session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Subscribe to live field-change notifications
    pub live: bool,

    /// Maximum length of the expression call stack
    pub max_call_depth: usize,

    /// Interpreter limits for script bodies, transforms and modules
    pub script: ScriptLimits,
}

/// Sandbox limits applied to every script invocation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum nesting of user function calls inside one invocation
    pub max_call_depth: usize,

    /// Maximum evaluation steps per invocation
    pub max_steps: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            live: true,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            script: ScriptLimits::default(),
        }
    }
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_call_depth: 64,
            max_steps: 100_000,
        }
    }
}

impl RuntimeConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    ///
    /// Returns error if the file is missing or malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| FaceplateError::InvalidConfig {
            message: format!("Failed to read config file {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    pub fn with_env(mut self) -> Self {
        if let Ok(live) = std::env::var("FACEPLATE_LIVE") {
            match live.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.live = true,
                "0" | "false" | "no" | "off" => self.live = false,
                other => tracing::warn!(value = %other, "Ignoring unrecognized FACEPLATE_LIVE"),
            }
        }
        self
    }

    fn validate(&self) -> Result<()> {
        if self.max_call_depth == 0 {
            return Err(FaceplateError::InvalidConfig {
                message: "max_call_depth must be at least 1".to_string(),
            });
        }
        if self.script.max_call_depth == 0 || self.script.max_steps == 0 {
            return Err(FaceplateError::InvalidConfig {
                message: "script limits must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_values() {
        let config = RuntimeConfig::default();
        assert!(config.live);
        assert_eq!(config.max_call_depth, 50);
        assert_eq!(config.script.max_call_depth, 64);
        assert_eq!(config.script.max_steps, 100_000);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str("live = false").unwrap();
        assert!(!config.live);
        assert_eq!(config.max_call_depth, DEFAULT_MAX_CALL_DEPTH);
    }

    #[test]
    fn nested_script_section() {
        let config = RuntimeConfig::from_toml_str("[script]\nmax_steps = 10").unwrap();
        assert_eq!(config.script.max_steps, 10);
        assert_eq!(config.script.max_call_depth, 64);
    }

    #[test]
    fn zero_depth_rejected() {
        let err = RuntimeConfig::from_toml_str("max_call_depth = 0").unwrap_err();
        assert_eq!(err.code(), "FPL-050");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_call_depth = 12").unwrap();
        let config = RuntimeConfig::load(file.path()).unwrap();
        assert_eq!(config.max_call_depth, 12);
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = RuntimeConfig::load("/definitely/not/here.toml").unwrap_err();
        assert_eq!(err.code(), "FPL-050");
    }

    #[test]
    #[serial]
    fn env_overrides_live_flag() {
        std::env::set_var("FACEPLATE_LIVE", "off");
        let config = RuntimeConfig::default().with_env();
        std::env::remove_var("FACEPLATE_LIVE");
        assert!(!config.live);
    }

    #[test]
    #[serial]
    fn env_garbage_is_ignored() {
        std::env::set_var("FACEPLATE_LIVE", "maybe");
        let config = RuntimeConfig::default().with_env();
        std::env::remove_var("FACEPLATE_LIVE");
        assert!(config.live);
    }
}
