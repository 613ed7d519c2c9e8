//! Memcached cache provider (the `GRID` type).
//!
//! Memcached cannot enumerate keys, so each provider keeps an index of the
//! logical keys it wrote. `keys`, `size` and `clear` work from that index and
//! only see entries written through this instance.

use super::{resolve_ttl, CacheProvider, ProviderType};
use crate::error::{Error, Result};
use crate::key::KeyNamespace;
use crate::observability::{CacheHealth, CacheStats};
use crate::registry::{ProviderContext, ProviderDescriptor};
use async_memcached::{AsciiProtocol, Status};
use async_trait::async_trait;
use dashmap::DashSet;
use deadpool_memcached::{Object, Pool, PoolError};
use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

/// Resolution priority of the Memcached provider.
pub const MEMCACHED_PRIORITY: i32 = 20;

/// Expirations above this many seconds are read by memcached as unix timestamps.
const MAX_RELATIVE_EXPIRATION: u64 = 60 * 60 * 24 * 30;

/// Memcached provider over a shared deadpool connection pool.
///
/// # Example
///
/// ```no_run
/// # use cache_bridge::config::MemcachedSettings;
/// # use cache_bridge::provider::{CacheProvider, MemcachedProvider};
/// # async fn example() -> cache_bridge::Result<()> {
/// let settings = MemcachedSettings::default();
/// let pool = settings.create_pool()?;
/// let provider = MemcachedProvider::new("sessions", "app", None, pool, settings.command_timeout);
///
/// provider.put("key", b"value".to_vec(), None).await?;
/// let value = provider.get("key").await?;
/// # Ok(())
/// # }
/// ```
pub struct MemcachedProvider {
    namespace: KeyNamespace,
    pool: Pool,
    default_ttl: Option<Duration>,
    command_timeout: Duration,
    written: DashSet<String>,
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
    evictions: AtomicU64,
    closed: AtomicBool,
}

impl MemcachedProvider {
    pub fn new(
        cache_name: impl Into<String>,
        key_prefix: impl Into<String>,
        default_ttl: Option<Duration>,
        pool: Pool,
        command_timeout: Duration,
    ) -> Self {
        let namespace = KeyNamespace::new(key_prefix, cache_name);
        debug!(
            "✓ Memcached provider created for {}:{}",
            namespace.prefix(),
            namespace.cache_name()
        );
        MemcachedProvider {
            namespace,
            pool,
            default_ttl,
            command_timeout,
            written: DashSet::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            puts: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Descriptor registering this provider with a
    /// [`ProviderRegistry`](crate::registry::ProviderRegistry).
    ///
    /// Available when the context holds a `deadpool_memcached::Pool`.
    pub fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor::new(
            ProviderType::Grid,
            MEMCACHED_PRIORITY,
            |ctx: &ProviderContext| ctx.has_handle::<Pool>(),
            |cache_name, key_prefix, default_ttl, ctx: &ProviderContext| {
                let pool = ctx.handle::<Pool>().ok_or_else(|| {
                    Error::ConfigError(
                        "No Memcached connection pool in provider context".to_string(),
                    )
                })?;
                let provider: Box<dyn CacheProvider> = Box::new(MemcachedProvider::new(
                    cache_name,
                    key_prefix,
                    default_ttl,
                    Pool::clone(&pool),
                    ctx.properties().memcached.command_timeout,
                ));
                Ok(provider)
            },
        )
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::BackendError(format!(
                "Memcached provider for {} is closed",
                self.namespace.cache_name()
            )));
        }
        Ok(())
    }

    async fn connection(&self) -> Result<Object> {
        self.pool.get().await.map_err(|e| match e {
            PoolError::Timeout(_) => {
                Error::Timeout(format!("Timed out waiting for Memcached connection: {}", e))
            }
            _ => Error::BackendError(format!("Failed to get Memcached connection: {}", e)),
        })
    }

    async fn timed<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.command_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "⚠ Memcached {} exceeded command timeout of {:?}",
                    op, self.command_timeout
                );
                Err(Error::Timeout(format!(
                    "Memcached {} exceeded {:?}",
                    op, self.command_timeout
                )))
            }
        }
    }
}

/// Memcached expiration in seconds, rounded up so sub-second TTLs still expire.
fn expiration(ttl: Option<Duration>) -> Option<i64> {
    ttl.map(|d| {
        let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
        secs.clamp(1, MAX_RELATIVE_EXPIRATION) as i64
    })
}

/// `NOT_FOUND` reply: a miss, not a failure.
fn is_not_found(e: &async_memcached::Error) -> bool {
    matches!(e, async_memcached::Error::Protocol(Status::NotFound))
}

/// `NOT_STORED` reply to ADD: the key already exists.
fn is_not_stored(e: &async_memcached::Error) -> bool {
    matches!(e, async_memcached::Error::Protocol(Status::NotStored))
}

#[async_trait]
impl CacheProvider for MemcachedProvider {
    fn cache_name(&self) -> &str {
        self.namespace.cache_name()
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Grid
    }

    fn key_prefix(&self) -> &str {
        self.namespace.prefix()
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);

        let value = self
            .timed("GET", async {
                let mut conn = self.connection().await?;
                match conn.get(&full).await {
                    Ok(Some(value)) => Ok(value.data),
                    Ok(None) => Ok(None),
                    Err(e) if is_not_found(&e) => Ok(None),
                    Err(e) => Err(Error::BackendError(format!(
                        "Memcached GET failed for key {}: {}",
                        full, e
                    ))),
                }
            })
            .await?;

        if value.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("✓ Memcached GET {} -> HIT", full);
        } else {
            self.written.remove(key);
            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!("✓ Memcached GET {} -> MISS", full);
        }

        Ok(value)
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);
        let ttl = resolve_ttl(ttl, self.default_ttl);

        self.timed("SET", async {
            let mut conn = self.connection().await?;
            // set(key, value, ttl, flags)
            conn.set(&full, value.as_slice(), expiration(ttl), None)
                .await
                .map_err(|e| {
                    Error::BackendError(format!("Memcached SET failed for key {}: {}", full, e))
                })
        })
        .await?;

        self.written.insert(key.to_string());
        self.puts.fetch_add(1, Ordering::Relaxed);
        if let Some(d) = ttl {
            debug!("✓ Memcached SET {} (TTL: {:?})", full, d);
        } else {
            debug!("✓ Memcached SET {}", full);
        }
        Ok(())
    }

    async fn put_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<bool> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);
        let ttl = resolve_ttl(ttl, self.default_ttl);

        // ADD stores only when the key is absent; the server decides atomically
        let inserted = self
            .timed("ADD", async {
                let mut conn = self.connection().await?;
                match conn.add(&full, value.as_slice(), expiration(ttl), None).await {
                    Ok(()) => Ok(true),
                    Err(e) if is_not_stored(&e) => Ok(false),
                    Err(e) => Err(Error::BackendError(format!(
                        "Memcached ADD failed for key {}: {}",
                        full, e
                    ))),
                }
            })
            .await?;

        if inserted {
            self.written.insert(key.to_string());
            self.puts.fetch_add(1, Ordering::Relaxed);
        }
        debug!("✓ Memcached ADD {} -> {}", full, inserted);
        Ok(inserted)
    }

    async fn evict(&self, key: &str) -> Result<bool> {
        self.ensure_open()?;
        let full = self.namespace.namespaced(key);

        let removed = self
            .timed("DELETE", async {
                let mut conn = self.connection().await?;
                match conn.delete(&full).await {
                    Ok(()) => Ok(true),
                    Err(e) if is_not_found(&e) => Ok(false),
                    Err(e) => Err(Error::BackendError(format!(
                        "Memcached DELETE failed for key {}: {}",
                        full, e
                    ))),
                }
            })
            .await?;

        self.written.remove(key);
        if removed {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        debug!("✓ Memcached DELETE {} -> {}", full, removed);
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        self.ensure_open()?;

        let tracked: Vec<String> = self.written.iter().map(|k| k.key().clone()).collect();
        let count = tracked.len();

        self.timed("CLEAR", async {
            let mut conn = self.connection().await?;
            for key in &tracked {
                let full = self.namespace.namespaced(key);
                match conn.delete(&full).await {
                    Ok(()) => {}
                    Err(e) if is_not_found(&e) => {}
                    Err(e) => {
                        return Err(Error::BackendError(format!(
                            "Memcached DELETE failed for key {}: {}",
                            full, e
                        )))
                    }
                }
                self.written.remove(key);
            }
            Ok(())
        })
        .await?;

        warn!(
            "⚠ Memcached CLEAR executed - {} tracked keys under {}:{} removed",
            count,
            self.namespace.prefix(),
            self.namespace.cache_name()
        );
        Ok(())
    }

    async fn keys(&self) -> Result<HashSet<String>> {
        self.ensure_open()?;
        // Entries may have expired server-side since they were written
        Ok(self.written.iter().map(|k| k.key().clone()).collect())
    }

    async fn stats(&self) -> CacheStats {
        let entry_count = if self.closed.load(Ordering::Acquire) {
            0
        } else {
            self.written.len() as u64
        };

        CacheStats {
            provider_type: ProviderType::Grid,
            cache_name: self.namespace.cache_name().to_string(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            puts: self.puts.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entry_count,
            captured_at: SystemTime::now(),
        }
    }

    async fn health(&self) -> CacheHealth {
        let name = self.namespace.cache_name();
        if self.closed.load(Ordering::Acquire) {
            return CacheHealth::down(ProviderType::Grid, name, "provider closed");
        }

        let started = Instant::now();
        let probe = self
            .timed("HEALTH", async {
                let mut conn = self.connection().await?;
                match conn.get("__health_check__").await {
                    Ok(_) => Ok(()),
                    Err(e) if is_not_found(&e) => Ok(()),
                    Err(e) => Err(Error::BackendError(format!(
                        "Memcached probe failed: {}",
                        e
                    ))),
                }
            })
            .await;

        match probe {
            Ok(()) => CacheHealth::up(ProviderType::Grid, name, Some(started.elapsed())),
            Err(e) => {
                warn!("⚠ Memcached health check failed for {}: {}", name, e);
                CacheHealth::down(ProviderType::Grid, name, e.to_string())
            }
        }
    }

    async fn close(&self) -> Result<()> {
        // The pool belongs to the context; other providers may still use it
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.written.clear();
            debug!(
                "✓ Memcached provider for {}:{} closed",
                self.namespace.prefix(),
                self.namespace.cache_name()
            );
        }
        Ok(())
    }
}
