//! The cache operation contract and its provider implementations.

use crate::error::{Error, Result};
use crate::observability::{CacheHealth, CacheStats};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod local;
#[cfg(feature = "memcached")]
pub mod memcached;
#[cfg(feature = "redis")]
pub mod redis;

pub use local::{LocalProvider, LocalStore};
#[cfg(feature = "memcached")]
pub use memcached::MemcachedProvider;
#[cfg(feature = "redis")]
pub use redis::RedisProvider;

/// Provider type tag.
///
/// `Auto` is a request, not a provider: it asks the registry for the
/// highest-priority provider that is currently available.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderType {
    Auto,
    /// In-process memory.
    Local,
    /// Networked key-value store (Redis).
    Distributed,
    /// Multi-node memory grid (Memcached).
    Grid,
    /// Standards-based cache API; no built-in adapter.
    Standard,
}

impl ProviderType {
    /// Every concrete (registrable) type.
    pub const CONCRETE: [ProviderType; 4] = [
        ProviderType::Local,
        ProviderType::Distributed,
        ProviderType::Grid,
        ProviderType::Standard,
    ];

    pub fn is_auto(self) -> bool {
        self == ProviderType::Auto
    }

    /// In-process providers have no external dependency and are the only
    /// fallback candidates.
    pub fn is_local(self) -> bool {
        self == ProviderType::Local
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderType::Auto => "AUTO",
            ProviderType::Local => "LOCAL",
            ProviderType::Distributed => "DISTRIBUTED",
            ProviderType::Grid => "GRID",
            ProviderType::Standard => "STANDARD",
        }
    }
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "AUTO" => Ok(ProviderType::Auto),
            "LOCAL" => Ok(ProviderType::Local),
            "DISTRIBUTED" => Ok(ProviderType::Distributed),
            "GRID" => Ok(ProviderType::Grid),
            "STANDARD" => Ok(ProviderType::Standard),
            other => Err(Error::ConfigError(format!(
                "Unknown cache provider type: {}",
                other
            ))),
        }
    }
}

/// Resolve the TTL to apply to a write.
///
/// A per-call TTL of `None` or zero means "no override": the default applies.
/// A default of `None` or zero means the entry does not expire.
pub fn resolve_ttl(ttl: Option<Duration>, default_ttl: Option<Duration>) -> Option<Duration> {
    ttl.filter(|d| !d.is_zero())
        .or(default_ttl)
        .filter(|d| !d.is_zero())
}

/// Contract every cache provider implements.
///
/// Keys are LOGICAL keys; every implementation applies its
/// [`KeyNamespace`](crate::key::KeyNamespace) before touching the physical
/// store. Values are opaque bytes produced by
/// [`serialization::encode`](crate::serialization::encode).
///
/// **IMPORTANT:** All methods take `&self`. Implementations use interior
/// mutability or a client that is itself safe for concurrent use, since one
/// instance serves many concurrent operations.
///
/// **ASYNC:** No method may block the calling thread on I/O. Networked
/// providers bound each call with their own command timeout and report it as
/// `Error::Timeout`.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    /// Cache name this instance is bound to.
    fn cache_name(&self) -> &str;

    /// Type tag of this provider.
    fn provider_type(&self) -> ProviderType;

    /// Key prefix this instance is bound to.
    fn key_prefix(&self) -> &str;

    /// TTL applied when a write does not override it.
    fn default_ttl(&self) -> Option<Duration>;

    /// Retrieve value by key.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))` - Value found
    /// - `Ok(None)` - Key missing or expired
    ///
    /// # Errors
    /// Returns `Err` if a provider error occurs (connection lost, timeout)
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store value. `ttl` of `None` or zero uses the default TTL.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Store value only if the key is absent (or expired).
    ///
    /// Atomic with respect to this provider: of two racing calls exactly one
    /// returns `true`.
    async fn put_if_absent(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>)
        -> Result<bool>;

    /// Remove key. Returns whether a live entry was present.
    async fn evict(&self, key: &str) -> Result<bool>;

    /// Check whether a live entry exists.
    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Remove every entry in this instance's namespace.
    async fn clear(&self) -> Result<()>;

    /// Logical keys in this namespace. Best-effort: networked providers may
    /// return an approximate or server-scanned set.
    async fn keys(&self) -> Result<HashSet<String>>;

    /// Approximate number of entries in this namespace.
    async fn size(&self) -> Result<u64> {
        Ok(self.keys().await?.len() as u64)
    }

    /// Statistics snapshot. Never fails.
    async fn stats(&self) -> CacheStats;

    /// Health snapshot. Never fails.
    async fn health(&self) -> CacheHealth;

    /// Release underlying resources. Idempotent.
    async fn close(&self) -> Result<()>;
}
