//! Runtime configuration
//!
//! Defaults are usable as-is; [`FluxConfig::from_env`] overrides them from
//! `KREPIS_FLUX_*` variables so test rigs can stretch timeouts on slow
//! machines without code changes.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::debug;

/// Variable overriding [`FluxConfig::verify_timeout`], in milliseconds
pub const ENV_VERIFY_TIMEOUT_MS: &str = "KREPIS_FLUX_VERIFY_TIMEOUT_MS";
/// Variable overriding [`FluxConfig::blocking_timeout`], in milliseconds
pub const ENV_BLOCKING_TIMEOUT_MS: &str = "KREPIS_FLUX_BLOCKING_TIMEOUT_MS";
/// Variable overriding [`FluxConfig::pool_size`]
pub const ENV_POOL_SIZE: &str = "KREPIS_FLUX_POOL_SIZE";
/// Variable overriding [`FluxConfig::thread_name_prefix`]
pub const ENV_THREAD_PREFIX: &str = "KREPIS_FLUX_THREAD_PREFIX";

/// Tunables shared by the verifier, blocking adapters and pooled schedulers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluxConfig {
    /// How long the step verifier waits for one expected signal
    pub verify_timeout: Duration,
    /// Default wait for `block_collect` / `block_last` / `to_iter`
    pub blocking_timeout: Duration,
    /// Worker count of schedulers built with `Scheduler::from_config`
    pub pool_size: usize,
    /// Thread name prefix of schedulers built with `Scheduler::from_config`
    pub thread_name_prefix: String,
}

impl Default for FluxConfig {
    fn default() -> Self {
        Self {
            verify_timeout: Duration::from_secs(5),
            blocking_timeout: Duration::from_secs(30),
            pool_size: 4,
            thread_name_prefix: "krepis-flux".to_string(),
        }
    }
}

/// Invalid `KREPIS_FLUX_*` value
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Value is not a number
    #[error("{var}: expected an unsigned integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },

    /// Value parses but is outside the accepted range
    #[error("{var}: {reason}")]
    OutOfRange { var: &'static str, reason: String },
}

impl FluxConfig {
    /// Defaults overridden by any `KREPIS_FLUX_*` variables that are set
    ///
    /// # Errors
    /// [`ConfigError`] when a variable is set to an unparsable or zero value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&'static str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_number(&lookup, ENV_VERIFY_TIMEOUT_MS)? {
            config.verify_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, ENV_BLOCKING_TIMEOUT_MS)? {
            config.blocking_timeout = Duration::from_millis(ms);
        }
        if let Some(size) = parse_number(&lookup, ENV_POOL_SIZE)? {
            config.pool_size = usize::try_from(size).map_err(|_| ConfigError::OutOfRange {
                var: ENV_POOL_SIZE,
                reason: format!("{size} workers exceeds the platform limit"),
            })?;
        }
        if let Some(prefix) = lookup(ENV_THREAD_PREFIX).filter(|p| !p.trim().is_empty()) {
            config.thread_name_prefix = prefix;
        }

        config.validate()?;
        debug!(?config, "flux config loaded");
        Ok(config)
    }

    /// Check ranges
    ///
    /// # Errors
    /// [`ConfigError::OutOfRange`] for a zero timeout or pool size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.verify_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                var: ENV_VERIFY_TIMEOUT_MS,
                reason: "timeout must be positive".to_string(),
            });
        }
        if self.blocking_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                var: ENV_BLOCKING_TIMEOUT_MS,
                reason: "timeout must be positive".to_string(),
            });
        }
        if self.pool_size == 0 {
            return Err(ConfigError::OutOfRange {
                var: ENV_POOL_SIZE,
                reason: "pool needs at least one worker".to_string(),
            });
        }
        Ok(())
    }

    /// Set the verifier timeout
    pub fn verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    /// Set the blocking adapter timeout
    pub fn blocking_timeout(mut self, timeout: Duration) -> Self {
        self.blocking_timeout = timeout;
        self
    }

    /// Set the pooled worker count
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the worker thread name prefix
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }
}

fn parse_number<L>(lookup: &L, var: &'static str) -> Result<Option<u64>, ConfigError>
where
    L: Fn(&'static str) -> Option<String>,
{
    lookup(var)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map_err(|_| ConfigError::InvalidNumber { var, value: raw })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let map: HashMap<&'static str, String> =
            pairs.iter().map(|(k, v)| (*k, (*v).to_string())).collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = FluxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool_size, 4);
    }

    #[test]
    fn test_env_overrides() {
        let config = FluxConfig::from_lookup(lookup(&[
            (ENV_VERIFY_TIMEOUT_MS, "250"),
            (ENV_POOL_SIZE, "2"),
            (ENV_THREAD_PREFIX, "io"),
        ]))
        .unwrap();

        assert_eq!(config.verify_timeout, Duration::from_millis(250));
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.thread_name_prefix, "io");
        assert_eq!(config.blocking_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = FluxConfig::from_lookup(lookup(&[(ENV_POOL_SIZE, "many")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumber { .. }));

        let err = FluxConfig::from_lookup(lookup(&[(ENV_POOL_SIZE, "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }));
    }

    #[test]
    fn test_builder_setters() {
        let config = FluxConfig::default()
            .verify_timeout(Duration::from_millis(10))
            .pool_size(8)
            .thread_name_prefix("cpu");
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.thread_name_prefix, "cpu");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: FluxConfig = serde_json::from_str(r#"{ "pool_size": 3 }"#).unwrap();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.verify_timeout, FluxConfig::default().verify_timeout);
    }
}
