//! Plugin configuration.
//!
//! Every struct deserializes with per-field defaults so a partial document
//! is valid. [`PluginConfig::from_env`] layers `TRIBUTARY_*` environment
//! overrides on top of the defaults.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tributary_core::ResourceConstraintsSpec;

use crate::error::{Error, Result};

/// Settings for an auto-refresh cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachingConfig {
    /// Maximum number of entries before least-recently-used eviction.
    #[serde(default = "default_cache_size")]
    pub size: usize,

    /// How often every entry is refreshed.
    #[serde(with = "humantime_serde", default = "default_resync_interval")]
    pub resync_interval: Duration,

    /// Maximum concurrent refresh calls.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Consecutive system failures before an entry is marked failed.
    #[serde(default = "default_max_system_failures")]
    pub max_system_failures: u32,
}

const fn default_cache_size() -> usize {
    500_000
}

const fn default_resync_interval() -> Duration {
    Duration::from_secs(30)
}

const fn default_workers() -> usize {
    10
}

const fn default_max_system_failures() -> u32 {
    5
}

impl Default for CachingConfig {
    fn default() -> Self {
        Self {
            size: default_cache_size(),
            resync_interval: default_resync_interval(),
            workers: default_workers(),
            max_system_failures: default_max_system_failures(),
        }
    }
}

impl CachingConfig {
    /// Validates the cache settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any capacity, interval or threshold is zero.
    pub fn validate(&self) -> Result<()> {
        if self.size == 0 {
            return Err(Error::configuration("caching.size must be greater than 0"));
        }
        if self.resync_interval.is_zero() {
            return Err(Error::configuration(
                "caching.resyncInterval must be greater than 0",
            ));
        }
        if self.workers == 0 {
            return Err(Error::configuration("caching.workers must be greater than 0"));
        }
        if self.max_system_failures == 0 {
            return Err(Error::configuration(
                "caching.maxSystemFailures must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Token-bucket parameters for calls to an external system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimiterConfig {
    /// Sustained calls per second.
    #[serde(default = "default_qps")]
    pub qps: u32,

    /// Calls allowed above the sustained rate.
    #[serde(default = "default_burst")]
    pub burst: u32,
}

const fn default_qps() -> u32 {
    10
}

const fn default_burst() -> u32 {
    100
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            qps: default_qps(),
            burst: default_burst(),
        }
    }
}

impl RateLimiterConfig {
    fn validate(self, name: &str) -> Result<()> {
        if self.qps == 0 || self.burst == 0 {
            return Err(Error::configuration(format!(
                "{name} qps and burst must be greater than 0"
            )));
        }
        Ok(())
    }
}

/// Settings for array task reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayConfig {
    /// Upper bound on the collected error text, in characters.
    #[serde(default = "default_max_error_string_length")]
    pub max_error_string_length: usize,

    /// Largest accepted array size.
    #[serde(default = "default_max_array_size")]
    pub max_array_size: usize,
}

const fn default_max_error_string_length() -> usize {
    1024
}

const fn default_max_array_size() -> usize {
    5000
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            max_error_string_length: default_max_error_string_length(),
            max_array_size: default_max_array_size(),
        }
    }
}

/// Configuration shared by external-resource plugins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    /// Per-namespace ceilings on in-flight submissions.
    #[serde(default = "default_resource_quotas")]
    pub resource_quotas: BTreeMap<String, u64>,

    /// Limiter for read (status) calls.
    #[serde(default)]
    pub read_rate_limiter: RateLimiterConfig,

    /// Limiter for write (create/delete) calls.
    #[serde(default)]
    pub write_rate_limiter: RateLimiterConfig,

    /// Resource cache settings.
    #[serde(default)]
    pub caching: CachingConfig,

    /// Constraints applied to every submission.
    #[serde(default = "default_resource_constraints")]
    pub resource_constraints: ResourceConstraintsSpec,

    /// Array task settings.
    #[serde(default)]
    pub array: ArrayConfig,
}

fn default_resource_quotas() -> BTreeMap<String, u64> {
    BTreeMap::from([("default".to_string(), 1000)])
}

const fn default_resource_constraints() -> ResourceConstraintsSpec {
    ResourceConstraintsSpec::new(Some(100), Some(50))
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            resource_quotas: default_resource_quotas(),
            read_rate_limiter: RateLimiterConfig::default(),
            write_rate_limiter: RateLimiterConfig::default(),
            caching: CachingConfig::default(),
            resource_constraints: default_resource_constraints(),
            array: ArrayConfig::default(),
        }
    }
}

impl PluginConfig {
    /// Loads configuration from environment variables on top of defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable fails to parse or the result is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(size) = env_usize("TRIBUTARY_CACHE_SIZE")? {
            config.caching.size = size;
        }
        if let Some(secs) = env_u64("TRIBUTARY_CACHE_RESYNC_SECONDS")? {
            config.caching.resync_interval = Duration::from_secs(secs);
        }
        if let Some(workers) = env_usize("TRIBUTARY_CACHE_WORKERS")? {
            config.caching.workers = workers;
        }
        if let Some(max) = env_u32("TRIBUTARY_CACHE_MAX_SYSTEM_FAILURES")? {
            config.caching.max_system_failures = max;
        }
        if let Some(qps) = env_u32("TRIBUTARY_READ_QPS")? {
            config.read_rate_limiter.qps = qps;
        }
        if let Some(burst) = env_u32("TRIBUTARY_READ_BURST")? {
            config.read_rate_limiter.burst = burst;
        }
        if let Some(qps) = env_u32("TRIBUTARY_WRITE_QPS")? {
            config.write_rate_limiter.qps = qps;
        }
        if let Some(burst) = env_u32("TRIBUTARY_WRITE_BURST")? {
            config.write_rate_limiter.burst = burst;
        }
        if let Some(bound) = env_u64("TRIBUTARY_PROJECT_SCOPE_LIMIT")? {
            config.resource_constraints.project_scope = Some(bound);
        }
        if let Some(bound) = env_u64("TRIBUTARY_NAMESPACE_SCOPE_LIMIT")? {
            config.resource_constraints.namespace_scope = Some(bound);
        }
        if let Some(len) = env_usize("TRIBUTARY_MAX_ERROR_STRING_LENGTH")? {
            config.array.max_error_string_length = len;
        }
        if let Some(size) = env_usize("TRIBUTARY_MAX_ARRAY_SIZE")? {
            config.array.max_array_size = size;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        self.caching.validate()?;
        self.read_rate_limiter.validate("readRateLimiter")?;
        self.write_rate_limiter.validate("writeRateLimiter")?;
        if let Some((namespace, _)) = self.resource_quotas.iter().find(|(_, q)| **q == 0) {
            return Err(Error::configuration(format!(
                "resourceQuotas.{namespace} must be greater than 0"
            )));
        }
        if self.array.max_array_size == 0 {
            return Err(Error::configuration(
                "array.maxArraySize must be greater than 0",
            ));
        }
        Ok(())
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_u32(name: &str) -> Result<Option<u32>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u32>()
        .map(Some)
        .map_err(|e| Error::configuration(format!("{name} must be a u32: {e}")))
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::configuration(format!("{name} must be a u64: {e}")))
}

fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::configuration(format!("{name} must be a usize: {e}")))
}
