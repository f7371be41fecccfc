//! Runtime configuration.
//!
//! Loaded from TOML with serde defaults on every field, so a missing or
//! partial file still yields a working runtime. The default path is
//! `~/.foreman/foreman.toml`, overridable with `FOREMAN_CONFIG`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ratelimit::RateProfile;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub routing: RoutingConfig,
    pub rate_limits: RateLimitsConfig,
    pub cache: CacheConfig,
    pub retry: RetryConfig,
    pub metrics: MetricsConfig,
    pub orchestrator: OrchestratorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Minimum similarity for a confident route.
    pub threshold: f32,
    /// Tie-break margin; a later capability must beat the incumbent by
    /// more than this.
    pub epsilon: f32,
    /// TTL for cached task embeddings, in seconds.
    pub embedding_ttl_secs: u64,
    /// Capability used when neither similarity nor keywords match.
    pub default_capability: Option<String>,
    /// Keyword fallback table, consulted when similarity is inconclusive.
    pub keyword_routes: Vec<KeywordRoute>,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            threshold: 0.75,
            epsilon: 0.01,
            embedding_ttl_secs: 120,
            default_capability: None,
            keyword_routes: Vec::new(),
        }
    }
}

impl RoutingConfig {
    pub fn embedding_ttl(&self) -> Duration {
        Duration::from_secs(self.embedding_ttl_secs)
    }
}

/// Routes descriptions containing any of `keywords` to `capability`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRoute {
    pub capability: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    pub default: RateProfile,
    /// Capability-specific overrides.
    pub per_capability: HashMap<String, RateProfile>,
}

impl RateLimitsConfig {
    /// The profile governing a capability.
    pub fn resolve(&self, capability: &str) -> RateProfile {
        self.per_capability
            .get(capability)
            .copied()
            .unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_secs: 300,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 86400,
            sweep_interval_secs: 60,
        }
    }
}

impl MetricsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Concurrent sub-tasks per complex task.
    pub fan_out: usize,
    /// Per-invocation timeout in seconds.
    pub invoke_timeout_secs: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            fan_out: 4,
            invoke_timeout_secs: 30,
        }
    }
}

impl OrchestratorConfig {
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs)
    }
}

impl Config {
    /// Parse a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `FOREMAN_CONFIG` or the default path; a missing file
    /// yields defaults.
    pub fn load_default() -> Result<Self> {
        let path = match std::env::var_os("FOREMAN_CONFIG") {
            Some(path) => PathBuf::from(path),
            None => Self::default_path()?,
        };
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn default_path() -> Result<PathBuf> {
        let home = dirs::home_dir().ok_or(Error::NoHomeDir)?;
        Ok(home.join(".foreman").join("foreman.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.routing.threshold) {
            return Err(Error::Validation(
                "routing threshold must be within [0, 1]".to_string(),
            ));
        }
        if self.routing.epsilon < 0.0 {
            return Err(Error::Validation(
                "routing epsilon must be non-negative".to_string(),
            ));
        }
        self.rate_limits.default.validate()?;
        for (capability, profile) in &self.rate_limits.per_capability {
            profile.validate().map_err(|e| {
                Error::Validation(format!("rate profile for {}: {}", capability, e))
            })?;
        }
        self.retry.policy().validate()?;
        if self.orchestrator.fan_out == 0 {
            return Err(Error::Validation("fan_out must be positive".to_string()));
        }
        Ok(())
    }
}
