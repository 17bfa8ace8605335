//! Verifier configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic** — values set with the `with_*` methods after loading
//! 2. **Environment variables** — values from `APPVERIFY_*` env vars
//! 3. **Config file** — values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults** — built-in defaults from [`VerifierConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `APPVERIFY_ENABLED` | `bool` | `enabled` |
//! | `APPVERIFY_BEHAVIOR` | `log` / `panic` / `record` | `behavior` |
//! | `APPVERIFY_RECORD_LIMIT` | `usize` | `record_limit` |

use std::fmt;
use std::str::FromStr;

/// Environment variable name for turning verification on or off.
pub const ENV_ENABLED: &str = "APPVERIFY_ENABLED";
/// Environment variable name for the fault behavior.
pub const ENV_BEHAVIOR: &str = "APPVERIFY_BEHAVIOR";
/// Environment variable name for the recording sink capacity.
pub const ENV_RECORD_LIMIT: &str = "APPVERIFY_RECORD_LIMIT";

/// Default capacity of the recording sink.
pub const DEFAULT_RECORD_LIMIT: usize = 256;

/// Error loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held a value that does not parse.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// What was expected.
        expected: &'static str,
        /// The offending value.
        value: String,
    },
    /// A behavior name was not recognised.
    #[error("unknown fault behavior {0:?} (expected log, panic or record)")]
    UnknownBehavior(String),
    /// The config file could not be read.
    #[cfg(feature = "config-file")]
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The config file is not valid TOML for this schema.
    #[cfg(feature = "config-file")]
    #[error("failed to parse TOML config: {0}")]
    Toml(#[from] toml::de::Error),
}

/// What the default sink does with a reported fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "config-file", derive(serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(rename_all = "lowercase"))]
pub enum FaultBehavior {
    /// Log through `tracing` at error level.
    #[default]
    Log,
    /// Panic on the detecting thread.
    Panic,
    /// Keep faults in a bounded in-memory buffer.
    Record,
}

impl FromStr for FaultBehavior {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "log" => Ok(Self::Log),
            "panic" => Ok(Self::Panic),
            "record" => Ok(Self::Record),
            _ => Err(ConfigError::UnknownBehavior(s.to_owned())),
        }
    }
}

impl fmt::Display for FaultBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Log => "log",
            Self::Panic => "panic",
            Self::Record => "record",
        })
    }
}

/// Verifier configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifierConfig {
    /// Whether begin handlers are instrumented at all.
    pub enabled: bool,
    /// Default sink behavior.
    pub behavior: FaultBehavior,
    /// Capacity of the recording sink.
    pub record_limit: usize,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            enabled: cfg!(debug_assertions),
            behavior: FaultBehavior::default(),
            record_limit: DEFAULT_RECORD_LIMIT,
        }
    }
}

impl VerifierConfig {
    /// Defaults with environment overrides applied.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    /// Defaults, then the TOML file at `path`, then environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if an
    /// environment variable is invalid.
    #[cfg(feature = "config-file")]
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let toml = parse_toml_file(path)?;
        apply_toml_config(&mut config, &toml);
        apply_env_overrides(&mut config)?;
        tracing::debug!(path = %path.display(), ?config, "verifier config loaded");
        Ok(config)
    }

    /// Sets whether verification is enabled.
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Sets the fault behavior.
    #[must_use]
    pub fn with_behavior(mut self, behavior: FaultBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Sets the recording sink capacity.
    #[must_use]
    pub fn with_record_limit(mut self, limit: usize) -> Self {
        self.record_limit = limit;
        self
    }
}

/// Apply environment variable overrides to a [`VerifierConfig`].
///
/// Only variables that are set in the environment are applied.
///
/// # Errors
///
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut VerifierConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_ENABLED) {
        config.enabled = parse_bool(ENV_ENABLED, &val)?;
    }
    if let Some(val) = read_env(ENV_BEHAVIOR) {
        config.behavior = val.parse()?;
    }
    if let Some(val) = read_env(ENV_RECORD_LIMIT) {
        config.record_limit = parse_usize(ENV_RECORD_LIMIT, &val)?;
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var: &'static str, val: &str) -> Result<usize, ConfigError> {
    val.trim()
        .parse::<usize>()
        .map_err(|_| ConfigError::InvalidEnv {
            var,
            expected: "unsigned integer",
            value: val.to_owned(),
        })
}

fn parse_bool(var: &'static str, val: &str) -> Result<bool, ConfigError> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            expected: "bool (true/false/1/0/yes/no/on/off)",
            value: val.to_owned(),
        }),
    }
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable verifier configuration.
///
/// ```toml
/// [verifier]
/// enabled = true
/// behavior = "record"
/// record_limit = 64
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct VerifierTomlConfig {
    /// Verifier settings.
    #[serde(default)]
    pub verifier: VerifierToml,
}

/// `[verifier]` section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct VerifierToml {
    /// Whether verification is enabled.
    pub enabled: Option<bool>,
    /// Default sink behavior.
    pub behavior: Option<FaultBehavior>,
    /// Recording sink capacity.
    pub record_limit: Option<usize>,
}

/// Apply a parsed TOML config to a [`VerifierConfig`].
///
/// Only fields that are `Some` override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut VerifierConfig, toml: &VerifierTomlConfig) {
    if let Some(v) = toml.verifier.enabled {
        config.enabled = v;
    }
    if let Some(v) = toml.verifier.behavior {
        config.behavior = v;
    }
    if let Some(v) = toml.verifier.record_limit {
        config.record_limit = v;
    }
}

/// Parse a TOML string into a [`VerifierTomlConfig`].
///
/// # Errors
///
/// Returns an error if the string is not valid TOML for this schema.
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<VerifierTomlConfig, ConfigError> {
    Ok(toml::from_str(toml_str)?)
}

/// Read and parse a TOML file into a [`VerifierTomlConfig`].
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<VerifierTomlConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_toml_str(&content)
}
