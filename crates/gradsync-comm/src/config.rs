//! Configuration - Communicator Settings
//!
//! Loaded from TOML, optionally overridden from the environment.
//!
//! ```toml
//! check_storage_class = true
//! strict_contexts = true
//! log_filter = "gradsync=info"
//!
//! [stream]
//! non_blocking = true
//! ```
//!
//! @version 0.1.0
//! @author `AutomataNexus` Development Team

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Environment variable overriding [`CommConfig::check_storage_class`].
pub const ENV_CHECK_STORAGE_CLASS: &str = "GRADSYNC_CHECK_STORAGE_CLASS";
/// Environment variable overriding [`CommConfig::strict_contexts`].
pub const ENV_STRICT_CONTEXTS: &str = "GRADSYNC_STRICT_CONTEXTS";
/// Environment variable overriding [`CommConfig::log_filter`].
pub const ENV_LOG: &str = "GRADSYNC_LOG";
/// Environment variable overriding [`StreamConfig::non_blocking`].
pub const ENV_STREAM_NON_BLOCKING: &str = "GRADSYNC_STREAM_NON_BLOCKING";

// =============================================================================
// Errors
// =============================================================================

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    /// The file is not valid TOML for this schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    /// The configuration could not be rendered as TOML.
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    /// A value is out of range or malformed.
    #[error("Invalid value for {key}: {value}")]
    InvalidValue {
        /// The offending key.
        key: String,
        /// The rejected value.
        value: String,
    },
}

// =============================================================================
// Config Structs
// =============================================================================

/// Communicator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CommConfig {
    /// Warn when a gradient's storage class is not one the backend allows.
    #[serde(default = "default_true")]
    pub check_storage_class: bool,

    /// Reject registries with more than one device context instead of
    /// reducing context 0 and ignoring the rest.
    #[serde(default = "default_true")]
    pub strict_contexts: bool,

    /// Default tracing filter used by [`crate::logging::init_from_config`].
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Reduction stream settings.
    #[serde(default)]
    pub stream: StreamConfig,
}

/// Reduction stream settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Create the reduction stream without implicit default-stream sync.
    #[serde(default = "default_true")]
    pub non_blocking: bool,
}

fn default_true() -> bool {
    true
}

fn default_log_filter() -> String {
    "gradsync=info".to_string()
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            check_storage_class: true,
            strict_contexts: true,
            log_filter: default_log_filter(),
            stream: StreamConfig::default(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { non_blocking: true }
    }
}

// =============================================================================
// Loading
// =============================================================================

impl CommConfig {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Parses configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CommConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml_string()?)?;
        Ok(())
    }

    /// Applies `GRADSYNC_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from an arbitrary key lookup.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_CHECK_STORAGE_CLASS) {
            self.check_storage_class = parse_bool(ENV_CHECK_STORAGE_CLASS, &value)?;
        }
        if let Some(value) = lookup(ENV_STRICT_CONTEXTS) {
            self.strict_contexts = parse_bool(ENV_STRICT_CONTEXTS, &value)?;
        }
        if let Some(value) = lookup(ENV_LOG) {
            self.log_filter = value;
        }
        if let Some(value) = lookup(ENV_STREAM_NON_BLOCKING) {
            self.stream.non_blocking = parse_bool(ENV_STREAM_NON_BLOCKING, &value)?;
        }
        self.validate()?;
        Ok(self)
    }

    /// Checks that every value is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_filter.trim().is_empty() || EnvFilter::try_new(&self.log_filter).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "log_filter".into(),
                value: self.log_filter.clone(),
            });
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        }),
    }
}

// =============================================================================
// Tests
// =============================================================================
