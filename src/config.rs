//! Configuration data consumed at manager-construction time.
//!
//! Everything here is plain serde data. The crate never reads files or
//! environment variables; the application deserializes `CacheProperties` from
//! whatever source it uses and hands it to a
//! [`ProviderContext`](crate::registry::ProviderContext).
//!
//! ```
//! use cache_bridge::config::CacheProperties;
//! use cache_bridge::provider::ProviderType;
//!
//! let props = CacheProperties::default();
//! assert_eq!(props.default_cache_type, ProviderType::Local);
//! assert!(props.validate().is_ok());
//! ```

use crate::error::{Error, Result};
use crate::key::KEY_SEPARATOR;
use crate::provider::ProviderType;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default connection pool size for networked providers.
/// Formula: (CPU cores × 2) + 1, rounded for 8-core hosts.
pub const DEFAULT_POOL_SIZE: u32 = 16;

/// Maximum length of a cache name.
pub const MAX_CACHE_NAME_LEN: usize = 100;

/// Top-level cache configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheProperties {
    /// Master switch; when false no provider is available.
    pub enabled: bool,
    /// Type requested by `create_default_cache_manager`.
    pub default_cache_type: ProviderType,
    pub default_cache_name: String,
    /// Key prefix used by `create_default_cache_manager`.
    pub key_prefix: String,
    /// Attach a local fallback to managers whose primary is not local.
    pub fallback_enabled: bool,
    pub local: LocalSettings,
    pub redis: RedisSettings,
    pub memcached: MemcachedSettings,
}

impl Default for CacheProperties {
    fn default() -> Self {
        CacheProperties {
            enabled: true,
            default_cache_type: ProviderType::Local,
            default_cache_name: "default".to_string(),
            key_prefix: "cache".to_string(),
            fallback_enabled: true,
            local: LocalSettings::default(),
            redis: RedisSettings::default(),
            memcached: MemcachedSettings::default(),
        }
    }
}

impl CacheProperties {
    /// Check the constraints the rest of the crate relies on.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` describing the first violation found.
    pub fn validate(&self) -> Result<()> {
        validate_cache_name(&self.default_cache_name)?;

        if self.local.max_entries == 0 {
            return Err(Error::ConfigError(
                "local.max_entries must be greater than zero".to_string(),
            ));
        }
        if self.redis.pool_size == 0 {
            return Err(Error::ConfigError(
                "redis.pool_size must be greater than zero".to_string(),
            ));
        }
        if self.redis.command_timeout.is_zero() {
            return Err(Error::ConfigError(
                "redis.command_timeout must be greater than zero".to_string(),
            ));
        }
        if self.memcached.enabled && self.memcached.servers.is_empty() {
            return Err(Error::ConfigError(
                "memcached.servers must not be empty when memcached is enabled".to_string(),
            ));
        }
        if self.memcached.pool_size == 0 {
            return Err(Error::ConfigError(
                "memcached.pool_size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Default TTL configured for a provider type.
    pub fn default_ttl_for(&self, provider_type: ProviderType) -> Option<Duration> {
        match provider_type {
            ProviderType::Local => self.local.default_ttl,
            ProviderType::Distributed => self.redis.default_ttl,
            ProviderType::Grid => self.memcached.default_ttl,
            ProviderType::Auto | ProviderType::Standard => None,
        }
    }
}

/// Cache names must be non-blank, at most [`MAX_CACHE_NAME_LEN`] characters,
/// and free of the key separator, so two caches under one prefix never nest.
pub fn validate_cache_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::ConfigError("Cache name cannot be blank".to_string()));
    }
    if name.contains(KEY_SEPARATOR) {
        return Err(Error::ConfigError(format!(
            "Cache name '{}' must not contain '{}'",
            name, KEY_SEPARATOR
        )));
    }
    if name.chars().count() > MAX_CACHE_NAME_LEN {
        return Err(Error::ConfigError(format!(
            "Cache name must not exceed {} characters",
            MAX_CACHE_NAME_LEN
        )));
    }
    Ok(())
}

/// In-process provider settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    pub enabled: bool,
    /// Entries per namespace before the oldest entry is dropped.
    pub max_entries: u64,
    pub default_ttl: Option<Duration>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        LocalSettings {
            enabled: true,
            max_entries: 1000,
            default_ttl: Some(Duration::from_secs(3600)),
        }
    }
}

/// Redis provider settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: u32,
    pub pool_size: u32,
    pub connection_timeout: Duration,
    /// Upper bound on each command; exceeding it is a failover trigger.
    pub command_timeout: Duration,
    pub default_ttl: Option<Duration>,
    pub ssl: bool,
}

impl Default for RedisSettings {
    fn default() -> Self {
        RedisSettings {
            enabled: true,
            host: "localhost".to_string(),
            port: 6379,
            username: None,
            password: None,
            database: 0,
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout: Duration::from_secs(10),
            command_timeout: Duration::from_secs(5),
            default_ttl: None,
            ssl: false,
        }
    }
}

impl RedisSettings {
    /// Build Redis connection string.
    pub fn connection_string(&self) -> String {
        let scheme = if self.ssl { "rediss" } else { "redis" };
        if let Some(password) = &self.password {
            if let Some(username) = &self.username {
                format!(
                    "{}://{}:{}@{}:{}/{}",
                    scheme, username, password, self.host, self.port, self.database
                )
            } else {
                format!(
                    "{}://default:{}@{}:{}/{}",
                    scheme, password, self.host, self.port, self.database
                )
            }
        } else {
            format!("{}://{}:{}/{}", scheme, self.host, self.port, self.database)
        }
    }

    /// Create a connection pool from these settings.
    ///
    /// Pool creation is lazy; no connection is attempted until first use.
    ///
    /// # Errors
    /// Returns `Err` if the pool configuration is invalid.
    #[cfg(feature = "redis")]
    pub fn create_pool(&self) -> Result<deadpool_redis::Pool> {
        let mut cfg = deadpool_redis::Config::from_url(self.connection_string());
        let mut pool_cfg = deadpool_redis::PoolConfig::new(self.pool_size as usize);
        pool_cfg.timeouts.wait = Some(self.connection_timeout);
        pool_cfg.timeouts.create = Some(self.connection_timeout);
        cfg.pool = Some(pool_cfg);

        let pool = cfg
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| Error::ConfigError(format!("Failed to create Redis pool: {}", e)))?;

        info!(
            "✓ Redis pool configured: {}:{} (pool size: {})",
            self.host, self.port, self.pool_size
        );

        Ok(pool)
    }
}

/// Memcached provider settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemcachedSettings {
    pub enabled: bool,
    /// e.g. `["localhost:11211"]`; the pool connects to the first entry.
    pub servers: Vec<String>,
    pub pool_size: u32,
    pub command_timeout: Duration,
    pub default_ttl: Option<Duration>,
}

impl Default for MemcachedSettings {
    fn default() -> Self {
        MemcachedSettings {
            enabled: true,
            servers: vec!["localhost:11211".to_string()],
            pool_size: DEFAULT_POOL_SIZE,
            command_timeout: Duration::from_secs(5),
            default_ttl: None,
        }
    }
}

impl MemcachedSettings {
    /// Create a connection pool from these settings.
    ///
    /// # Errors
    /// Returns `Err` if no server is configured or the pool cannot be built.
    #[cfg(feature = "memcached")]
    pub fn create_pool(&self) -> Result<deadpool_memcached::Pool> {
        // deadpool-memcached Manager takes a single server address
        let addr = self
            .servers
            .first()
            .ok_or_else(|| Error::ConfigError("No memcached servers specified".to_string()))?
            .clone();

        let manager = deadpool_memcached::Manager::new(addr.clone());
        let pool = deadpool_memcached::Pool::builder(manager)
            .max_size(self.pool_size as usize)
            .build()
            .map_err(|e| Error::ConfigError(format!("Failed to create connection pool: {}", e)))?;

        info!(
            "✓ Memcached pool configured: {} (pool size: {})",
            addr, self.pool_size
        );

        Ok(pool)
    }
}
