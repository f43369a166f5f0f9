//! Configuration for the session cache and the orchestrator

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Session cache configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of resident sessions
    pub capacity: usize,

    /// Idle time after which an unused session is evicted, 0 disables it
    pub ttl_secs: u64,

    /// Interval of the background sweep
    pub sweep_interval_secs: u64,

    /// Deadline for a caller waiting on a load, 0 waits forever
    pub load_timeout_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            ttl_secs: 0,
            sweep_interval_secs: 30,
            load_timeout_secs: 60,
        }
    }
}

impl CacheConfig {
    /// Defaults overridden by `MODEL_CACHE_MAX`, `MODEL_CACHE_TTL`,
    /// `MODEL_CACHE_SWEEP_SECS` and `MODEL_CACHE_LOAD_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, value: Option<String>, default: T) -> Result<T, String> {
            match value {
                Some(raw) => raw
                    .trim()
                    .parse()
                    .map_err(|_| format!("{} must be a non-negative integer, got '{}'", name, raw)),
                None => Ok(default),
            }
        }

        let defaults = Self::default();
        let config = Self {
            capacity: parse("MODEL_CACHE_MAX", lookup("MODEL_CACHE_MAX"), defaults.capacity)?,
            ttl_secs: parse("MODEL_CACHE_TTL", lookup("MODEL_CACHE_TTL"), defaults.ttl_secs)?,
            sweep_interval_secs: parse(
                "MODEL_CACHE_SWEEP_SECS",
                lookup("MODEL_CACHE_SWEEP_SECS"),
                defaults.sweep_interval_secs,
            )?,
            load_timeout_secs: parse(
                "MODEL_CACHE_LOAD_TIMEOUT_SECS",
                lookup("MODEL_CACHE_LOAD_TIMEOUT_SECS"),
                defaults.load_timeout_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Idle TTL in whole seconds, 0 disables it
    pub fn with_ttl_secs(mut self, ttl_secs: u64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// TTL, `None` when time-based eviction is disabled
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_secs > 0).then(|| Duration::from_secs(self.ttl_secs))
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Load deadline, `None` to wait forever
    pub fn load_timeout(&self) -> Option<Duration> {
        (self.load_timeout_secs > 0).then(|| Duration::from_secs(self.load_timeout_secs))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.capacity == 0 {
            return Err("cache capacity must be greater than 0".to_string());
        }

        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be greater than 0".to_string());
        }

        Ok(())
    }
}

/// Orchestrator behavior switches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Resolve deployment status from the store before acquiring a session
    pub verify_deployment: bool,

    /// Run inference on the blocking thread pool
    pub blocking_execution: bool,

    /// Return every model output instead of only the first
    pub all_outputs: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            verify_deployment: true,
            blocking_execution: true,
            all_outputs: false,
        }
    }
}
