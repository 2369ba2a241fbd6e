//! Engine configuration
//!
//! Loaded from TOML:
//!
//! ```toml
//! [limits]
//! max_ciphertext_bytes = 4096
//!
//! [precompile.gas]
//! verify_input = 60000
//! binary_op = 25000
//!
//! [logging]
//! filter = "fhevm_engine=debug"
//! ```
//!
//! Every section and field is optional and falls back to its default.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub precompile: PrecompileConfig,

    #[serde(default)]
    pub logging: LogConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or fails validation.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_ciphertext_bytes == 0 {
            return Err(ConfigError::Validation(
                "limits.max_ciphertext_bytes must be greater than zero".to_string(),
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigError::Validation(
                "logging.filter must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Resource limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Largest ciphertext accepted at ingestion
    #[serde(default = "default_max_ciphertext_bytes")]
    pub max_ciphertext_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_ciphertext_bytes: default_max_ciphertext_bytes(),
        }
    }
}

const fn default_max_ciphertext_bytes() -> usize {
    4096
}

/// Executor precompile settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrecompileConfig {
    #[serde(default)]
    pub gas: GasSchedule,
}

/// Gas charged per executor call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasSchedule {
    pub verify_input: u64,
    pub trivial_encrypt: u64,
    pub unary_op: u64,
    pub binary_op: u64,
    pub select: u64,
    pub acl: u64,
}

impl Default for GasSchedule {
    fn default() -> Self {
        Self {
            verify_input: 50_000,
            trivial_encrypt: 5_000,
            unary_op: 10_000,
            binary_op: 20_000,
            select: 30_000,
            acl: 3_000,
        }
    }
}

/// Logging settings consumed by the binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// `tracing_subscriber::EnvFilter` directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = EngineConfig::from_toml("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.limits.max_ciphertext_bytes, 4096);
        assert_eq!(config.precompile.gas.binary_op, 20_000);
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml(
            r#"
            [limits]
            max_ciphertext_bytes = 128

            [precompile.gas]
            binary_op = 1

            [logging]
            filter = "fhevm_engine=trace"
            "#,
        )
        .unwrap();

        assert_eq!(config.limits.max_ciphertext_bytes, 128);
        assert_eq!(config.precompile.gas.binary_op, 1);
        assert_eq!(config.precompile.gas.acl, 3_000);
        assert_eq!(config.logging.filter, "fhevm_engine=trace");
    }

    #[test]
    fn test_validation() {
        let zero = EngineConfig::from_toml("[limits]\nmax_ciphertext_bytes = 0\n");
        assert!(matches!(zero, Err(ConfigError::Validation(_))));

        let blank = EngineConfig::from_toml("[logging]\nfilter = \" \"\n");
        assert!(matches!(blank, Err(ConfigError::Validation(_))));

        let garbage = EngineConfig::from_toml("limits = 3");
        assert!(matches!(garbage, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = EngineConfig::default();
        let text = config.to_toml().unwrap();
        assert_eq!(EngineConfig::from_toml(&text).unwrap(), config);
    }
}
