//! Server configuration

use nexon_core::{CacheConfig, OrchestratorConfig};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path, path::PathBuf};

/// Main server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server binding address
    pub bind: SocketAddr,

    /// Model session cache
    pub cache: CacheConfig,

    /// Request path behavior
    pub orchestrator: OrchestratorConfig,

    /// Request limits
    pub limits: RequestLimits,

    /// Model store
    pub store: StoreConfig,
}

/// Request size and time limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    /// Maximum request body size in bytes
    pub max_body_size: usize,

    /// Request timeout in seconds
    pub request_timeout: u64,
}

/// Model store configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory whose files are deployed as models on startup
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 8080)),
            cache: CacheConfig::default(),
            orchestrator: OrchestratorConfig::default(),
            limits: RequestLimits::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_body_size: 32 * 1024 * 1024, // 32MB
            request_timeout: 120,
        }
    }
}

impl ServerConfig {
    /// Layered load: defaults with the `MODEL_CACHE_*` variables applied,
    /// then the optional file, then `NEXON_*` variables (`NEXON_CACHE__CAPACITY=8`)
    pub fn load(path: Option<&Path>) -> Result<Self, config::ConfigError> {
        let cache = CacheConfig::from_env().map_err(config::ConfigError::Message)?;
        let base = Self {
            cache,
            ..Self::default()
        };

        let mut builder = config::Config::builder().add_source(config::Config::try_from(&base)?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("NEXON").separator("__"))
            .build()?;

        let loaded: Self = settings.try_deserialize()?;
        loaded.validate().map_err(config::ConfigError::Message)?;
        Ok(loaded)
    }

    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, config::ConfigError> {
        Self::load(Some(path))
    }

    /// Save configuration to file
    pub fn to_file(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), String> {
        self.cache.validate()?;

        if self.limits.max_body_size == 0 {
            return Err("max_body_size must be greater than 0".to_string());
        }

        if self.limits.request_timeout == 0 {
            return Err("request_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
