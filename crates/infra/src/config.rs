//! Engine configuration.
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `gemledger.toml`, then `GEMLEDGER__SECTION__KEY` environment variables
//! (e.g. `GEMLEDGER__RETRY__MAX_ATTEMPTS=8`).

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub locks: LockConfig,
    pub retry: RetryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// How long one attempt waits for its key set before reporting contention.
    pub acquire_timeout_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 5,
            max_delay_ms: 200,
            jitter_pct: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Defaults ← `gemledger.toml` (if present) ← environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::with_name("gemledger").required(false)))
    }

    /// Defaults ← the given file (required) ← environment.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        Self::build(Config::builder().add_source(File::from(path).required(true)))
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, ConfigError> {
        let settings = builder
            .add_source(
                Environment::with_prefix("GEMLEDGER")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Message(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter_pct) {
            return Err(ConfigError::Message(
                "retry.jitter_pct must be within 0.0..=1.0".to_string(),
            ));
        }
        if self.log.filter.trim().is_empty() {
            return Err(ConfigError::Message("log.filter cannot be empty".to_string()));
        }
        Ok(())
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.locks.acquire_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            self.retry.base_delay_ms,
            self.retry.max_delay_ms,
            self.retry.jitter_pct,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.retry_policy().max_attempts, 5);
    }

    #[test]
    fn file_overrides_only_what_it_names() {
        let path = std::env::temp_dir().join(format!("gemledger-{}.toml", uuid::Uuid::now_v7()));
        std::fs::write(
            &path,
            "[retry]\nmax_attempts = 9\n\n[locks]\nacquire_timeout_ms = 40\n",
        )
        .unwrap();

        let config = EngineConfig::load_from_path(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.retry.max_attempts, 9);
        assert_eq!(config.retry.max_delay_ms, RetryConfig::default().max_delay_ms);
        assert_eq!(config.locks.acquire_timeout_ms, 40);
        assert_eq!(config.log.filter, "info");
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = EngineConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.retry.jitter_pct = 1.5;
        assert!(config.validate().is_err());
    }
}
